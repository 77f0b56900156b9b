// Archivo: aggregator.rs
// Propósito: `ProgressAggregator`, un `ExecutionCallback` que agrupa las
// actualizaciones de progreso y las reenvía al callback interno como
// mucho una vez por ventana de `delay`. La cancelación no se retrasa.
use crate::callback::{CancelListener, CancelSignal, ExecutionCallback};
use log::trace;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// Retardo por defecto entre vaciados.
pub const DEFAULT_PROGRESS_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct PendingProgress {
    description: Option<String>,
    total: Option<u64>,
    worked: u64,
    /// Hay un vaciado programado en el scheduler.
    scheduled: bool,
    /// Últimos valores reenviados al callback interno.
    flushed_description: Option<String>,
    flushed_total: Option<u64>,
}

pub struct ProgressAggregator {
    inner: Arc<dyn ExecutionCallback>,
    delay: Duration,
    scheduler: Handle,
    pending: Mutex<PendingProgress>,
    cancel: Arc<CancelSignal>,
    me: Weak<ProgressAggregator>,
}

impl ProgressAggregator {
    /// Envuelve `inner`. Los vaciados se programan en `scheduler`.
    pub fn wrap(inner: Arc<dyn ExecutionCallback>, delay: Duration, scheduler: Handle) -> Arc<Self> {
        let aggregator = Arc::new_cyclic(|me| Self { inner,
                                                     delay,
                                                     scheduler,
                                                     pending: Mutex::new(PendingProgress::default()),
                                                     cancel: Arc::new(CancelSignal::new()),
                                                     me: me.clone() });
        aggregator.inner.link_cancel(Arc::downgrade(&aggregator.cancel));
        aggregator
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Reenvía al callback interno lo acumulado que cambió desde el último
    /// vaciado y libera la marca de vaciado programado.
    pub fn flush(&self) {
        let (description, total, worked) = {
            let mut p = self.lock();
            p.scheduled = false;
            let description = p.description.take();
            let description = description.filter(|d| p.flushed_description.as_ref() != Some(d));
            if description.is_some() {
                p.flushed_description = description.clone();
            }
            let total = p.total.take();
            let total = total.filter(|t| p.flushed_total != Some(*t));
            if total.is_some() {
                p.flushed_total = total;
            }
            (description, total, std::mem::take(&mut p.worked))
        };
        trace!("vaciando progreso: description={:?} total={:?} worked={}", description, total, worked);
        if let Some(d) = description {
            self.inner.set_description(&d);
        }
        if let Some(t) = total {
            self.inner.set_total_step_count(t);
        }
        if worked > 0 {
            self.inner.worked(worked);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingProgress> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F>(&self, apply: F)
        where F: FnOnce(&mut PendingProgress)
    {
        let schedule = {
            let mut p = self.lock();
            apply(&mut p);
            !std::mem::replace(&mut p.scheduled, true)
        };
        if schedule {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let delay = self.delay;
        self.scheduler.spawn(async move {
                              tokio::time::sleep(delay).await;
                              me.flush();
                          });
    }
}

impl ExecutionCallback for ProgressAggregator {
    fn set_description(&self, description: &str) {
        let description = description.to_string();
        self.update(move |p| p.description = Some(description));
    }

    fn set_total_step_count(&self, total: u64) {
        self.update(|p| p.total = Some(total));
    }

    fn worked(&self, steps: u64) {
        self.update(|p| p.worked = p.worked.saturating_add(steps));
    }

    fn is_canceled(&self) -> bool {
        if self.cancel.is_canceled() {
            return true;
        }
        if self.inner.is_canceled() {
            self.cancel.cancel();
            return true;
        }
        false
    }

    fn create_sub_execution(&self, proportion: f64) -> Arc<dyn ExecutionCallback> {
        ProgressAggregator::wrap(self.inner.create_sub_execution(proportion), self.delay, self.scheduler.clone())
    }

    fn add_cancel_listener(&self, listener: CancelListener) {
        self.cancel.add_listener(listener);
    }

    fn link_cancel(&self, target: Weak<CancelSignal>) {
        self.cancel.link(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::{ProgressEvent, RecordingExecutionCallback};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::sleep;

    fn scheduler() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread().worker_threads(1)
                                                   .enable_time()
                                                   .build()
                                                   .expect("runtime de pruebas")
    }

    #[test]
    fn coalesces_worked_calls_into_a_single_flush() {
        let rt = scheduler();
        let inner = RecordingExecutionCallback::new();
        let agg = ProgressAggregator::wrap(inner.clone(), Duration::from_millis(100), rt.handle().clone());
        for _ in 0..25 {
            agg.worked(1);
        }
        assert!(inner.events().is_empty());
        sleep(Duration::from_millis(500));
        assert_eq!(inner.events(), vec![ProgressEvent::Worked(25)]);
    }

    #[test]
    fn only_changed_fields_are_forwarded() {
        let rt = scheduler();
        let inner = RecordingExecutionCallback::new();
        let agg = ProgressAggregator::wrap(inner.clone(), Duration::from_millis(50), rt.handle().clone());
        agg.set_description("a");
        agg.set_description("b");
        agg.set_total_step_count(4);
        sleep(Duration::from_millis(300));
        agg.set_description("b");
        agg.set_total_step_count(4);
        agg.worked(2);
        sleep(Duration::from_millis(300));
        assert_eq!(inner.events(),
                   vec![ProgressEvent::Description("b".into()),
                        ProgressEvent::TotalStepCount(4),
                        ProgressEvent::Worked(2)]);
    }

    #[test]
    fn cancellation_propagates_immediately() {
        let rt = scheduler();
        let inner = RecordingExecutionCallback::new();
        let agg = ProgressAggregator::wrap(inner.clone(), Duration::from_secs(60), rt.handle().clone());
        let notified = Arc::new(AtomicBool::new(false));
        let n = notified.clone();
        agg.add_cancel_listener(Box::new(move || n.store(true, Ordering::SeqCst)));
        assert!(!agg.is_canceled());
        inner.cancel();
        assert!(notified.load(Ordering::SeqCst));
        assert!(agg.is_canceled());
    }

    #[test]
    fn reused_inner_callback_still_cancels_the_live_aggregator() {
        let rt = scheduler();
        let inner = RecordingExecutionCallback::new();
        for _ in 0..20 {
            drop(ProgressAggregator::wrap(inner.clone(), Duration::from_secs(60), rt.handle().clone()));
        }
        let agg = ProgressAggregator::wrap(inner.clone(), Duration::from_secs(60), rt.handle().clone());
        assert_eq!(Arc::strong_count(&agg.cancel), 1);
        inner.cancel();
        assert!(agg.is_canceled());
    }

    #[test]
    fn sub_execution_is_aggregated_with_same_delay() {
        let rt = scheduler();
        let inner = RecordingExecutionCallback::new();
        let agg = ProgressAggregator::wrap(inner.clone(), Duration::from_millis(50), rt.handle().clone());
        let sub = agg.create_sub_execution(0.5);
        sub.worked(3);
        inner.cancel();
        assert!(sub.is_canceled());
        sleep(Duration::from_millis(300));
        assert_eq!(inner.sub_executions()[0].events(), vec![ProgressEvent::Worked(3)]);
    }
}
