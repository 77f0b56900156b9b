// Archivo: dispatcher.rs
// Propósito: convertir una llamada síncrona que reporta por callback en una
// llamada asíncrona sobre el pool de workers.
//
// Sustituciones por llamada:
// - el `ExecutionCallback` se envuelve en un `ProgressAggregator` cuando hay
//   `delay` configurado;
// - el `ResultCallback` se decora para suprimir la entrega una vez que la
//   ejecución (posiblemente sustituida) informa cancelación.
// El interceptor envuelve el trabajo: `before_execution` antes y
// `after_execution` en un guard que corre pase lo que pase.
use crate::aggregator::ProgressAggregator;
use crate::callback::{ExecutionCallback, ResultCallback};
use crate::runtime::ServiceRuntime;
use cap_domain::ServiceError;
use log::{debug, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Datos de la llamada despachada que recibe el interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub call_id: Uuid,
    pub call: &'static str,
}

/// Hooks alrededor de cada llamada despachada (por ejemplo para abrir y
/// cerrar una sesión o transacción por hilo).
pub trait ExecutionInterceptor: Send + Sync {
    fn before_execution(&self, _context: &ExecutionContext) {}
    fn after_execution(&self, _context: &ExecutionContext) {}
}

pub struct NoopInterceptor;

impl ExecutionInterceptor for NoopInterceptor {}

struct AfterExecution<'a> {
    interceptor: &'a dyn ExecutionInterceptor,
    context: &'a ExecutionContext,
}

impl Drop for AfterExecution<'_> {
    fn drop(&mut self) {
        self.interceptor.after_execution(self.context);
    }
}

/// Punto único de entrega compartido entre el callback decorado y el
/// dispatcher, que lo usa para informar fallos escapados de la llamada.
struct DeliveryGate<T> {
    call: &'static str,
    callback: Mutex<Option<Box<dyn ResultCallback<T>>>>,
    execution: Option<Arc<dyn ExecutionCallback>>,
}

impl<T> DeliveryGate<T> {
    /// Toma el callback salvo que ya se haya entregado o que la ejecución
    /// esté cancelada.
    fn take(&self) -> Option<Box<dyn ResultCallback<T>>> {
        let callback = self.callback.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        if self.execution.as_ref().map_or(false, |e| e.is_canceled()) {
            debug!("entrega suprimida para '{}': ejecución cancelada", self.call);
            return None;
        }
        Some(callback)
    }

    fn fail(&self, message: String) {
        if let Some(callback) = self.take() {
            callback.exception(ServiceError::Dispatch { call: self.call.to_string(),
                                                        message });
        }
    }
}

/// `ResultCallback` que no entrega nada si la ejecución fue cancelada.
pub struct DecoratedResultCallback<T> {
    gate: Arc<DeliveryGate<T>>,
}

impl<T> ResultCallback<T> for DecoratedResultCallback<T> where T: Send
{
    fn finished(self: Box<Self>, value: T) {
        if let Some(callback) = self.gate.take() {
            callback.finished(value);
        }
    }

    fn exception(self: Box<Self>, error: ServiceError) {
        if error.is_canceled() {
            debug!("señal de cancelación descartada en '{}'", self.gate.call);
            return;
        }
        if let Some(callback) = self.gate.take() {
            callback.exception(error);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pánico sin mensaje".to_string()
    }
}

/// Despacha llamadas al pool de workers del `ServiceRuntime`.
#[derive(Clone)]
pub struct AsyncDispatcher {
    runtime: Arc<ServiceRuntime>,
    delay: Option<Duration>,
    interceptor: Arc<dyn ExecutionInterceptor>,
}

impl AsyncDispatcher {
    pub fn new(runtime: Arc<ServiceRuntime>, delay: Option<Duration>, interceptor: Arc<dyn ExecutionInterceptor>) -> Self {
        Self { runtime, delay, interceptor }
    }

    /// Dispatcher con el `progress_delay` de la configuración del runtime y
    /// sin interceptor.
    pub fn from_runtime(runtime: Arc<ServiceRuntime>) -> Self {
        let delay = runtime.config().progress_delay;
        Self::new(runtime, delay, Arc::new(NoopInterceptor))
    }

    pub fn runtime(&self) -> &Arc<ServiceRuntime> {
        &self.runtime
    }

    /// Envuelve `execution` en un `ProgressAggregator` si hay `delay`.
    pub fn wrap_execution(&self, execution: Arc<dyn ExecutionCallback>) -> Arc<dyn ExecutionCallback> {
        match self.delay {
            Some(delay) => ProgressAggregator::wrap(execution, delay, self.runtime.scheduler()),
            None => execution,
        }
    }

    /// Aplica las sustituciones y encola `work` en el pool de workers.
    /// Retorna inmediatamente; el resultado llega por `result`.
    ///
    /// Un pánico dentro de `work`, o el rechazo del encolado, se entrega como
    /// `ServiceError::Dispatch` si el callback no fue consumido todavía.
    pub fn dispatch<T, F>(&self,
                          call: &'static str,
                          execution: Option<Arc<dyn ExecutionCallback>>,
                          result: Box<dyn ResultCallback<T>>,
                          work: F)
        where T: Send + 'static,
              F: FnOnce(Option<Arc<dyn ExecutionCallback>>, Box<dyn ResultCallback<T>>) + Send + 'static
    {
        let execution = execution.map(|e| self.wrap_execution(e));
        let gate = Arc::new(DeliveryGate { call,
                                           callback: Mutex::new(Some(result)),
                                           execution: execution.clone() });
        let decorated: Box<dyn ResultCallback<T>> = Box::new(DecoratedResultCallback { gate: gate.clone() });
        let context = ExecutionContext { call_id: Uuid::new_v4(),
                                         call };
        let interceptor = self.interceptor.clone();
        let job_gate = gate.clone();
        debug!("despachando '{}' ({})", call, context.call_id);

        let submitted = self.runtime.submit(move || {
                                                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                                                  let _after = AfterExecution { interceptor: interceptor.as_ref(),
                                                                                                context: &context };
                                                                  interceptor.before_execution(&context);
                                                                  work(execution, decorated);
                                                              }));
                                                if let Err(payload) = outcome {
                                                    let message = panic_message(payload.as_ref());
                                                    warn!("la llamada '{}' ({}) falló: {}", call, context.call_id, message);
                                                    job_gate.fail(message);
                                                }
                                            });
        if let Err(e) = submitted {
            warn!("no se pudo despachar '{}': {}", call, e);
            gate.fail(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;
    use crate::stubs::{ChannelResultCallback, RecordingExecutionCallback};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime() -> Arc<ServiceRuntime> {
        ServiceRuntime::new(RuntimeConfig { worker_threads: 2,
                                            scheduler_threads: 1,
                                            progress_delay: Some(Duration::from_millis(20)),
                                            shutdown_timeout: Duration::from_secs(2) }).expect("runtime")
    }

    #[derive(Default)]
    struct CountingInterceptor {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl ExecutionInterceptor for CountingInterceptor {
        fn before_execution(&self, _context: &ExecutionContext) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_execution(&self, _context: &ExecutionContext) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn panic_in_work_is_delivered_as_dispatch_error_and_after_runs() {
        let rt = runtime();
        let interceptor = Arc::new(CountingInterceptor::default());
        let dispatcher = AsyncDispatcher::new(rt.clone(), None, interceptor.clone());
        let (result, rx) = ChannelResultCallback::<u32>::channel();
        dispatcher.dispatch("explota", None, result, |_, _| panic!("boom"));
        let outcome = rx.recv_timeout(Duration::from_secs(2)).expect("resultado");
        assert_eq!(outcome,
                   Err(ServiceError::Dispatch { call: "explota".into(),
                                                message: "boom".into() }));
        rt.shutdown();
        assert_eq!(interceptor.before.load(Ordering::SeqCst), 1);
        assert_eq!(interceptor.after.load(Ordering::SeqCst), 1);
    }

    struct FailingBefore {
        after: AtomicUsize,
    }

    impl ExecutionInterceptor for FailingBefore {
        fn before_execution(&self, _context: &ExecutionContext) {
            panic!("before roto");
        }

        fn after_execution(&self, _context: &ExecutionContext) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn after_execution_runs_when_before_execution_panics() {
        let rt = runtime();
        let interceptor = Arc::new(FailingBefore { after: AtomicUsize::new(0) });
        let dispatcher = AsyncDispatcher::new(rt.clone(), None, interceptor.clone());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let (result, rx) = ChannelResultCallback::<u32>::channel();
        dispatcher.dispatch("previa", None, result, move |_, result| {
                              r.fetch_add(1, Ordering::SeqCst);
                              result.finished(1);
                          });
        let outcome = rx.recv_timeout(Duration::from_secs(2)).expect("resultado");
        assert_eq!(outcome,
                   Err(ServiceError::Dispatch { call: "previa".into(),
                                                message: "before roto".into() }));
        rt.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(interceptor.after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delivery_is_suppressed_after_cancellation() {
        let rt = runtime();
        let dispatcher = AsyncDispatcher::from_runtime(rt.clone());
        let execution = RecordingExecutionCallback::new();
        let (result, rx) = ChannelResultCallback::<u32>::channel();
        let cancel_from_work = execution.clone();
        dispatcher.dispatch("cancelada", Some(execution.clone()), result, move |_, result| {
                              cancel_from_work.cancel();
                              result.finished(7);
                          });
        rt.shutdown();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rejected_submission_reports_dispatch_error() {
        let rt = runtime();
        rt.shutdown();
        let dispatcher = AsyncDispatcher::from_runtime(rt);
        let (result, rx) = ChannelResultCallback::<u32>::channel();
        dispatcher.dispatch("tarde", None, result, |_, result| result.finished(1));
        assert!(matches!(rx.try_recv(), Ok(Err(ServiceError::Dispatch { .. }))));
    }
}
