// Archivo: stubs.rs
// Propósito: callbacks en memoria para pruebas y wiring rápido.
//
// `RecordingExecutionCallback` registra cada evento de progreso recibido y
// `ChannelResultCallback` reenvía el resultado a un canal `mpsc`.
use crate::callback::{CancelListener, CancelSignal, ExecutionCallback, ResultCallback};
use cap_domain::{Result, ServiceError};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

/// Evento de progreso recibido por un `RecordingExecutionCallback`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Description(String),
    TotalStepCount(u64),
    Worked(u64),
}

pub struct RecordingExecutionCallback {
    events: Mutex<Vec<ProgressEvent>>,
    cancel: Arc<CancelSignal>,
    subs: Mutex<Vec<Arc<RecordingExecutionCallback>>>,
}

impl RecordingExecutionCallback {
    pub fn new() -> Arc<Self> {
        Self::with_signal(Arc::new(CancelSignal::new()))
    }

    fn with_signal(cancel: Arc<CancelSignal>) -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()),
                        cancel,
                        subs: Mutex::new(Vec::new()) })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Suma de todos los `worked` recibidos.
    pub fn worked_total(&self) -> u64 {
        self.events()
            .iter()
            .map(|e| match e {
                ProgressEvent::Worked(n) => *n,
                _ => 0,
            })
            .sum()
    }

    /// Sub-ejecuciones creadas, en orden de creación.
    pub fn sub_executions(&self) -> Vec<Arc<RecordingExecutionCallback>> {
        self.subs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, event: ProgressEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl ExecutionCallback for RecordingExecutionCallback {
    fn set_description(&self, description: &str) {
        self.record(ProgressEvent::Description(description.to_string()));
    }

    fn set_total_step_count(&self, total: u64) {
        self.record(ProgressEvent::TotalStepCount(total));
    }

    fn worked(&self, steps: u64) {
        self.record(ProgressEvent::Worked(steps));
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn create_sub_execution(&self, _proportion: f64) -> Arc<dyn ExecutionCallback> {
        let sub = Self::with_signal(self.cancel.clone());
        self.subs.lock().unwrap_or_else(|e| e.into_inner()).push(sub.clone());
        sub
    }

    fn add_cancel_listener(&self, listener: CancelListener) {
        self.cancel.add_listener(listener);
    }

    fn link_cancel(&self, target: Weak<CancelSignal>) {
        self.cancel.link(target);
    }
}

/// `ResultCallback` que reenvía el resultado a un canal.
pub struct ChannelResultCallback<T> {
    sender: Sender<Result<T>>,
}

impl<T> ChannelResultCallback<T> where T: Send + 'static
{
    /// Devuelve el callback listo para pasar a un servicio y el receptor
    /// donde llegará, como mucho, un resultado.
    pub fn channel() -> (Box<dyn ResultCallback<T>>, Receiver<Result<T>>) {
        let (sender, receiver) = mpsc::channel();
        (Box::new(Self { sender }), receiver)
    }
}

impl<T> ResultCallback<T> for ChannelResultCallback<T> where T: Send
{
    fn finished(self: Box<Self>, value: T) {
        let _ = self.sender.send(Ok(value));
    }

    fn exception(self: Box<Self>, error: ServiceError) {
        let _ = self.sender.send(Err(error));
    }
}
