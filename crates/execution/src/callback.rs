// Archivo: callback.rs
// Propósito: contratos de progreso/cancelación (`ExecutionCallback`) y de
// entrega de resultados (`ResultCallback`), más la implementación por
// defecto que crean los llamadores.
use cap_domain::{Result, ServiceError};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Listener invocado una única vez cuando la ejecución se cancela.
pub type CancelListener = Box<dyn FnOnce() + Send>;

/// Sumidero jerárquico de progreso y cancelación.
///
/// La cancelación es monotónica: una vez `is_canceled()` devuelve `true`
/// nunca vuelve a `false`. Un listener registrado después de la
/// cancelación se invoca inmediatamente.
pub trait ExecutionCallback: Send + Sync {
    fn set_description(&self, description: &str);
    fn set_total_step_count(&self, total: u64);
    fn worked(&self, steps: u64);
    fn is_canceled(&self) -> bool;
    /// Crea una sub-ejecución que consume `proportion` (0..=1) del total del
    /// padre y comparte su cancelación.
    fn create_sub_execution(&self, proportion: f64) -> Arc<dyn ExecutionCallback>;
    fn add_cancel_listener(&self, listener: CancelListener);
    /// Cancela `target` cuando se cancele esta ejecución, mientras `target`
    /// siga vivo. Los enlaces muertos no retienen memoria.
    fn link_cancel(&self, target: Weak<CancelSignal>) {
        self.add_cancel_listener(Box::new(move || {
                                     if let Some(t) = target.upgrade() {
                                         t.cancel();
                                     }
                                 }));
    }
}

/// Punto de control de cancelación.
pub fn check_canceled(execution: &dyn ExecutionCallback) -> Result<()> {
    if execution.is_canceled() {
        return Err(ServiceError::Canceled);
    }
    Ok(())
}

/// Señal de cancelación compartible con listeners de un solo disparo.
#[derive(Default)]
pub struct CancelSignal {
    canceled: AtomicBool,
    listeners: Mutex<Vec<CancelListener>>,
    links: Mutex<Vec<Weak<CancelSignal>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Marca la señal y dispara los listeners pendientes. Devuelve `false`
    /// si ya estaba cancelada.
    pub fn cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let listeners = std::mem::take(&mut *self.listeners.lock().unwrap_or_else(|e| e.into_inner()));
        for listener in listeners {
            listener();
        }
        let links = std::mem::take(&mut *self.links.lock().unwrap_or_else(|e| e.into_inner()));
        for target in links.iter().filter_map(Weak::upgrade) {
            target.cancel();
        }
        true
    }

    pub fn add_listener(&self, listener: CancelListener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_canceled() {
            drop(listeners);
            listener();
        } else {
            listeners.push(listener);
        }
    }

    /// Enlaza `target` a esta señal descartando antes los enlaces cuyo
    /// destino ya no existe.
    pub fn link(&self, target: Weak<CancelSignal>) {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_canceled() {
            drop(links);
            if let Some(t) = target.upgrade() {
                t.cancel();
            }
        } else {
            links.retain(|l| l.strong_count() > 0);
            links.push(target);
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Progress {
    description: Option<String>,
    total: Option<u64>,
    worked: u64,
    /// Fracción acumulada aún no reenviada al padre.
    carry: f64,
}

/// Implementación por defecto de `ExecutionCallback`.
///
/// Las sub-ejecuciones comparten la señal de cancelación del padre y le
/// reenvían su avance escalado: una sub-ejecución con `proportion` p de un
/// padre con total T aporta `p * T` pasos al completar su propio total.
pub struct DefaultExecutionCallback {
    cancel: Arc<CancelSignal>,
    progress: Mutex<Progress>,
    parent: Option<(Arc<DefaultExecutionCallback>, f64)>,
    me: Weak<DefaultExecutionCallback>,
}

impl DefaultExecutionCallback {
    pub fn new() -> Arc<Self> {
        Self::build(Arc::new(CancelSignal::new()), None)
    }

    fn build(cancel: Arc<CancelSignal>, parent: Option<(Arc<DefaultExecutionCallback>, f64)>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self { cancel,
                                    progress: Mutex::new(Progress::default()),
                                    parent,
                                    me: me.clone() })
    }

    /// Solicita la cancelación (también la de padres e hijos, que comparten
    /// la señal).
    pub fn cancel(&self) {
        if self.cancel.cancel() {
            debug!("ejecución cancelada");
        }
    }

    pub fn description(&self) -> Option<String> {
        self.lock().description.clone()
    }

    pub fn total_step_count(&self) -> Option<u64> {
        self.lock().total
    }

    pub fn worked_steps(&self) -> u64 {
        self.lock().worked
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ExecutionCallback for DefaultExecutionCallback {
    fn set_description(&self, description: &str) {
        self.lock().description = Some(description.to_string());
    }

    fn set_total_step_count(&self, total: u64) {
        self.lock().total = Some(total);
    }

    fn worked(&self, steps: u64) {
        let forward = {
            let mut p = self.lock();
            p.worked = p.worked.saturating_add(steps);
            match (&self.parent, p.total) {
                (Some((parent, proportion)), Some(total)) if total > 0 => {
                    let parent_total = parent.total_step_count().unwrap_or(0) as f64;
                    p.carry += steps as f64 * proportion * parent_total / total as f64;
                    let whole = p.carry.floor();
                    p.carry -= whole;
                    whole as u64
                }
                _ => 0,
            }
        };
        if forward > 0 {
            if let Some((parent, _)) = &self.parent {
                parent.worked(forward);
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn create_sub_execution(&self, proportion: f64) -> Arc<dyn ExecutionCallback> {
        let parent = self.me.upgrade().map(|p| (p, proportion.clamp(0.0, 1.0)));
        Self::build(self.cancel.clone(), parent)
    }

    fn add_cancel_listener(&self, listener: CancelListener) {
        self.cancel.add_listener(listener);
    }

    fn link_cancel(&self, target: Weak<CancelSignal>) {
        self.cancel.link(target);
    }
}

/// Sumidero de resultado de un solo disparo: como consume `Box<Self>`, a lo
/// sumo uno de los dos métodos se invoca, y una única vez.
pub trait ResultCallback<T>: Send {
    fn finished(self: Box<Self>, value: T);
    fn exception(self: Box<Self>, error: ServiceError);
}

/// Adaptador de un closure `FnOnce(Result<T>)` a `ResultCallback`.
pub struct FnResultCallback<F> {
    f: F,
}

impl<T, F> ResultCallback<T> for FnResultCallback<F> where F: FnOnce(Result<T>) + Send
{
    fn finished(self: Box<Self>, value: T) {
        let FnResultCallback { f } = *self;
        f(Ok(value))
    }

    fn exception(self: Box<Self>, error: ServiceError) {
        let FnResultCallback { f } = *self;
        f(Err(error))
    }
}

/// Construye un `ResultCallback` a partir de un closure.
pub fn result_callback<T, F>(f: F) -> Box<dyn ResultCallback<T>>
    where T: 'static,
          F: FnOnce(Result<T>) + Send + 'static
{
    Box::new(FnResultCallback { f })
}

/// Entrega un resultado: `Ok` va a `finished`, los errores a `exception` y
/// la señal de cancelación se descarta sin invocar al callback.
pub fn deliver<T>(outcome: Result<T>, callback: Box<dyn ResultCallback<T>>) {
    match outcome {
        Ok(value) => callback.finished(value),
        Err(ServiceError::Canceled) => debug!("resultado descartado: ejecución cancelada"),
        Err(e) => callback.exception(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn cancellation_is_shared_with_sub_executions_and_fires_listeners_once() {
        let root = DefaultExecutionCallback::new();
        let child = root.create_sub_execution(0.5);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        child.add_cancel_listener(Box::new(move || {
                                      f.fetch_add(1, Ordering::SeqCst);
                                  }));
        assert!(check_canceled(child.as_ref()).is_ok());
        root.cancel();
        root.cancel();
        assert!(child.is_canceled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(check_canceled(root.as_ref()), Err(ServiceError::Canceled));
    }

    #[test]
    fn listener_added_after_cancel_fires_immediately() {
        let cb = DefaultExecutionCallback::new();
        cb.cancel();
        let (tx, rx) = mpsc::channel();
        cb.add_cancel_listener(Box::new(move || {
                                   let _ = tx.send(());
                               }));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn dead_links_are_pruned_and_live_ones_are_canceled() {
        let signal = CancelSignal::new();
        for _ in 0..50 {
            let gone = Arc::new(CancelSignal::new());
            signal.link(Arc::downgrade(&gone));
        }
        let alive = Arc::new(CancelSignal::new());
        signal.link(Arc::downgrade(&alive));
        assert_eq!(signal.links.lock().unwrap().len(), 1);
        assert!(signal.cancel());
        assert!(alive.is_canceled());
        let late = Arc::new(CancelSignal::new());
        signal.link(Arc::downgrade(&late));
        assert!(late.is_canceled());
    }

    #[test]
    fn sub_execution_forwards_scaled_progress() {
        let root = DefaultExecutionCallback::new();
        root.set_total_step_count(100);
        let child = root.create_sub_execution(0.5);
        child.set_total_step_count(10);
        for _ in 0..10 {
            child.worked(1);
        }
        assert_eq!(root.worked_steps(), 50);
    }

    #[test]
    fn deliver_drops_cancellation_silently() {
        let (tx, rx) = mpsc::channel::<Result<u32>>();
        deliver(Err(ServiceError::Canceled),
                result_callback(move |r| {
                    let _ = tx.send(r);
                }));
        assert!(rx.try_recv().is_err());

        let (tx, rx) = mpsc::channel::<Result<u32>>();
        deliver(Err(ServiceError::Service("x".into())),
                result_callback(move |r| {
                    let _ = tx.send(r);
                }));
        assert_eq!(rx.try_recv().ok(), Some(Err(ServiceError::Service("x".into()))));
    }
}
