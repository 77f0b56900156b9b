// Archivo: async_service.rs
// Propósito: decorador que hace asíncronas las operaciones mutadoras de un
// `BeanCrudService`. Cada llamada se despacha con `AsyncDispatcher`: el
// progreso se agrega y la entrega se suprime tras una cancelación. `read`
// se delega tal cual.
use crate::service::{BeanCrudService, DtoResultCallback};
use cap_domain::{BeanDto, BeanKey, BeanModification, Result};
use execution::{AsyncDispatcher, ExecutionCallback, ExecutionInterceptor, ServiceRuntime};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

pub struct AsyncCrudService<S: BeanCrudService> {
    inner: Arc<S>,
    dispatcher: AsyncDispatcher,
}

impl<S: BeanCrudService> AsyncCrudService<S> {
    /// Decora `inner`. `delay` es la ventana de agregación del progreso
    /// (`None` la desactiva); `interceptor` envuelve cada llamada en el
    /// hilo worker.
    pub fn decorate(inner: Arc<S>,
                    runtime: Arc<ServiceRuntime>,
                    delay: Option<Duration>,
                    interceptor: Arc<dyn ExecutionInterceptor>)
                    -> Self {
        Self::with_dispatcher(inner, AsyncDispatcher::new(runtime, delay, interceptor))
    }

    pub fn with_dispatcher(inner: Arc<S>, dispatcher: AsyncDispatcher) -> Self {
        Self { inner, dispatcher }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn dispatch<F>(&self,
                   call: &'static str,
                   execution: Arc<dyn ExecutionCallback>,
                   result: DtoResultCallback,
                   work: F)
        where F: FnOnce(&S, Arc<dyn ExecutionCallback>, DtoResultCallback) + Send + 'static
    {
        let inner = self.inner.clone();
        let original = execution.clone();
        self.dispatcher.dispatch(call, Some(execution), result, move |wrapped, result| {
                                     work(inner.as_ref(), wrapped.unwrap_or(original), result)
                                 });
    }
}

impl<S: BeanCrudService> BeanCrudService for AsyncCrudService<S> {
    fn read(&self, keys: &[BeanKey]) -> Result<Vec<BeanDto>> {
        self.inner.read(keys)
    }

    fn create(&self, parameter: JsonValue, execution: Arc<dyn ExecutionCallback>, result: DtoResultCallback) {
        self.dispatch("create", execution, result, move |inner, execution, result| {
                          inner.create(parameter, execution, result)
                      });
    }

    fn update(&self,
              keys: Vec<BeanKey>,
              modifications: Vec<BeanModification>,
              execution: Arc<dyn ExecutionCallback>,
              result: DtoResultCallback) {
        self.dispatch("update", execution, result, move |inner, execution, result| {
                          inner.update(keys, modifications, execution, result)
                      });
    }

    fn delete(&self, keys: Vec<BeanKey>, execution: Arc<dyn ExecutionCallback>, result: DtoResultCallback) {
        self.dispatch("delete", execution, result, move |inner, execution, result| {
                          inner.delete(keys, execution, result)
                      });
    }

    fn execute(&self,
               keys: Vec<BeanKey>,
               executor_id: String,
               parameter: JsonValue,
               execution: Arc<dyn ExecutionCallback>,
               result: DtoResultCallback) {
        self.dispatch("execute", execution, result, move |inner, execution, result| {
                          inner.execute(keys, executor_id, parameter, execution, result)
                      });
    }
}
