// Archivo: runtime.rs
// Propósito: pools compartidos de la capa de servicio. Se construyen una
// vez al arrancar y se pasan por referencia a cada dispatcher.
//
// - workers: `rayon::ThreadPool` de tamaño fijo que ejecuta las llamadas
//   CRUD despachadas.
// - scheduler: runtime `tokio` con timers donde se programan los vaciados
//   de `ProgressAggregator`.
use crate::aggregator::DEFAULT_PROGRESS_DELAY;
use crate::errors::{Result, RuntimeError};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};

/// Configuración de los pools compartidos.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub scheduler_threads: usize,
    /// `None` desactiva la agregación de progreso.
    pub progress_delay: Option<Duration>,
    /// Espera máxima al apagar, por pool.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig { worker_threads: 50,
                        scheduler_threads: 20,
                        progress_delay: Some(DEFAULT_PROGRESS_DELAY),
                        shutdown_timeout: Duration::from_secs(10) }
    }
}

impl RuntimeConfig {
    /// Carga `.env` (si existe) y sobreescribe los valores por defecto con
    /// `CAP_WORKER_THREADS`, `CAP_SCHEDULER_THREADS`,
    /// `CAP_PROGRESS_DELAY_MS` (`0` u `off` desactiva la agregación) y
    /// `CAP_SHUTDOWN_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Igual que `from_env` pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where F: Fn(&str) -> Option<String>
    {
        let mut config = Self::default();
        if let Some(n) = parse_var(&lookup, "CAP_WORKER_THREADS")? {
            config.worker_threads = n as usize;
        }
        if let Some(n) = parse_var(&lookup, "CAP_SCHEDULER_THREADS")? {
            config.scheduler_threads = n as usize;
        }
        match lookup("CAP_PROGRESS_DELAY_MS").as_deref().map(str::trim) {
            Some("off") => config.progress_delay = None,
            Some(_) => {
                if let Some(ms) = parse_var(&lookup, "CAP_PROGRESS_DELAY_MS")? {
                    config.progress_delay = (ms > 0).then(|| Duration::from_millis(ms));
                }
            }
            None => {}
        }
        if let Some(ms) = parse_var(&lookup, "CAP_SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn parse_var<F>(lookup: &F, name: &'static str) -> Result<Option<u64>>
    where F: Fn(&str) -> Option<String>
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim()
                        .parse::<u64>()
                        .map(Some)
                        .map_err(|_| RuntimeError::Config { name, value: raw }),
    }
}

/// Contador de trabajos en curso con espera por vaciado.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn current(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Espera hasta que no quede trabajo o venza `timeout`. Devuelve los
    /// trabajos aún en curso.
    fn wait_idle(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            count = match self.idle.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *count
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}

pub struct ServiceRuntime {
    workers: rayon::ThreadPool,
    scheduler: Mutex<Option<Runtime>>,
    handle: Handle,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
    config: RuntimeConfig,
}

impl ServiceRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>> {
        let workers = rayon::ThreadPoolBuilder::new().num_threads(config.worker_threads.max(1))
                                                     .thread_name(|i| format!("cap-worker-{}", i))
                                                     .panic_handler(|_| error!("pánico no capturado en un worker"))
                                                     .build()
                                                     .map_err(|e| RuntimeError::Build { pool: "workers",
                                                                                        message: e.to_string() })?;
        let scheduler = tokio::runtime::Builder::new_multi_thread().worker_threads(config.scheduler_threads.max(1))
                                                                   .thread_name("cap-scheduler")
                                                                   .enable_time()
                                                                   .build()
                                                                   .map_err(|e| RuntimeError::Build { pool: "scheduler",
                                                                                                      message: e.to_string() })?;
        let handle = scheduler.handle().clone();
        info!("runtime de servicio iniciado: {} workers, {} hilos de scheduler",
              config.worker_threads, config.scheduler_threads);
        Ok(Arc::new(Self { workers,
                           scheduler: Mutex::new(Some(scheduler)),
                           handle,
                           in_flight: Arc::new(InFlight::default()),
                           closed: AtomicBool::new(false),
                           config }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Handle del scheduler para programar timers.
    pub fn scheduler(&self) -> Handle {
        self.handle.clone()
    }

    /// Encola `job` en el pool de workers. Falla con
    /// `RuntimeError::ShutDown` tras `shutdown`.
    pub fn submit<F>(&self, job: F) -> Result<()>
        where F: FnOnce() + Send + 'static
    {
        if self.is_shut_down() {
            return Err(RuntimeError::ShutDown);
        }
        self.in_flight.enter();
        let guard = InFlightGuard(self.in_flight.clone());
        self.workers.spawn(move || {
                             let _guard = guard;
                             job();
                         });
        Ok(())
    }

    /// Trabajos encolados o en ejecución.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deja de aceptar trabajo, espera hasta `shutdown_timeout` a que se
    /// vacíe el pool de workers y apaga el scheduler con el mismo límite.
    /// Devuelve cuántos trabajos seguían en curso al vencer la espera.
    /// Llamadas sucesivas no hacen nada y devuelven los trabajos en curso.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return self.in_flight();
        }
        let pending = self.in_flight.wait_idle(self.config.shutdown_timeout);
        if pending > 0 {
            warn!("apagado con {} trabajos aún en curso", pending);
        }
        let scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rt) = scheduler {
            rt.shutdown_timeout(self.config.shutdown_timeout);
        }
        info!("runtime de servicio apagado");
        pending
    }
}

impl Drop for ServiceRuntime {
    fn drop(&mut self) {
        let scheduler = self.scheduler.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rt) = scheduler {
            rt.shutdown_background();
        }
    }
}
