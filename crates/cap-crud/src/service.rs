// Archivo: service.rs
// Propósito: `BeanCrudService`, la interfaz de servicio CRUD sobre DTOs, y
// `CrudService`, su implementación síncrona sobre `CrudOrchestrator`.
//
// Las operaciones mutadoras no devuelven nada: el resultado se entrega por
// el `ResultCallback` recibido. La cancelación nunca llega al callback.
use crate::executor::ExecutorDescriptor;
use crate::interceptor::UpdateInterceptor;
use crate::orchestrator::CrudOrchestrator;
use crate::ordering::OrderConsistencyMaintainer;
use cap_domain::{Bean, BeanAccess, BeanDto, BeanKey, BeanModification, BeanValidator, DtoFactory, ModificationBatch,
                 OrderedBean, OrderedBeanGroupMapper, PropertyAccess, Result, ServiceError};
use execution::{deliver, ExecutionCallback, ResultCallback};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Resultado de las operaciones mutadoras.
pub type DtoResultCallback = Box<dyn ResultCallback<Vec<BeanDto>>>;

/// Servicio CRUD sobre DTOs.
pub trait BeanCrudService: Send + Sync + 'static {
    /// Lectura directa, sin despacho ni callbacks.
    fn read(&self, keys: &[BeanKey]) -> Result<Vec<BeanDto>>;

    fn create(&self, parameter: JsonValue, execution: Arc<dyn ExecutionCallback>, result: DtoResultCallback);

    fn update(&self,
              keys: Vec<BeanKey>,
              modifications: Vec<BeanModification>,
              execution: Arc<dyn ExecutionCallback>,
              result: DtoResultCallback);

    fn delete(&self, keys: Vec<BeanKey>, execution: Arc<dyn ExecutionCallback>, result: DtoResultCallback);

    /// Ejecuta el executor registrado como `executor_id`.
    fn execute(&self,
               keys: Vec<BeanKey>,
               executor_id: String,
               parameter: JsonValue,
               execution: Arc<dyn ExecutionCallback>,
               result: DtoResultCallback);
}

pub struct CrudService<B: Bean> {
    orchestrator: CrudOrchestrator<B>,
    creator: Option<ExecutorDescriptor<B>>,
    executors: HashMap<String, ExecutorDescriptor<B>>,
}

impl<B: Bean> CrudService<B> {
    pub fn builder(access: Arc<dyn BeanAccess<B>>, dto_factory: Arc<dyn DtoFactory<B>>) -> CrudServiceBuilder<B> {
        CrudServiceBuilder { orchestrator: CrudOrchestrator::new(access, dto_factory),
                             creator: None,
                             executors: HashMap::new() }
    }

    pub fn orchestrator(&self) -> &CrudOrchestrator<B> {
        &self.orchestrator
    }

    fn create_sync(&self, parameter: &JsonValue, execution: &dyn ExecutionCallback) -> Result<Vec<BeanDto>> {
        let creator = self.creator
                          .as_ref()
                          .ok_or_else(|| ServiceError::Service("no hay creador registrado".into()))?;
        self.orchestrator.create(parameter, creator, execution)
    }

    fn execute_sync(&self,
                    keys: &[BeanKey],
                    executor_id: &str,
                    parameter: &JsonValue,
                    execution: &dyn ExecutionCallback)
                    -> Result<Vec<BeanDto>> {
        let descriptor = self.executors
                             .get(executor_id)
                             .ok_or_else(|| ServiceError::Service(format!("executor desconocido: {}", executor_id)))?;
        self.orchestrator.execute(keys, parameter, descriptor, execution)
    }
}

impl<B> BeanCrudService for CrudService<B> where B: Bean + PropertyAccess
{
    fn read(&self, keys: &[BeanKey]) -> Result<Vec<BeanDto>> {
        self.orchestrator.read(keys)
    }

    fn create(&self, parameter: JsonValue, execution: Arc<dyn ExecutionCallback>, result: DtoResultCallback) {
        deliver(self.create_sync(&parameter, execution.as_ref()), result);
    }

    fn update(&self,
              keys: Vec<BeanKey>,
              modifications: Vec<BeanModification>,
              execution: Arc<dyn ExecutionCallback>,
              result: DtoResultCallback) {
        let batch: ModificationBatch = modifications.into_iter().collect();
        deliver(self.orchestrator.update(&keys, &batch, execution.as_ref()), result);
    }

    fn delete(&self, keys: Vec<BeanKey>, execution: Arc<dyn ExecutionCallback>, result: DtoResultCallback) {
        deliver(self.orchestrator.delete(&keys, execution.as_ref()), result);
    }

    fn execute(&self,
               keys: Vec<BeanKey>,
               executor_id: String,
               parameter: JsonValue,
               execution: Arc<dyn ExecutionCallback>,
               result: DtoResultCallback) {
        deliver(self.execute_sync(&keys, &executor_id, &parameter, execution.as_ref()), result);
    }
}

pub struct CrudServiceBuilder<B: Bean> {
    orchestrator: CrudOrchestrator<B>,
    creator: Option<ExecutorDescriptor<B>>,
    executors: HashMap<String, ExecutorDescriptor<B>>,
}

impl<B: Bean> CrudServiceBuilder<B> {
    pub fn validator(mut self, validator: Arc<dyn BeanValidator<B>>) -> Self {
        self.orchestrator = self.orchestrator.with_validator(validator);
        self
    }

    /// Los interceptores se invocan en el orden de registro.
    pub fn interceptor(mut self, interceptor: Arc<dyn UpdateInterceptor<B>>) -> Self {
        self.orchestrator = self.orchestrator.with_interceptor(interceptor);
        self
    }

    pub fn creator(mut self, creator: ExecutorDescriptor<B>) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn executor(mut self, id: impl Into<String>, descriptor: ExecutorDescriptor<B>) -> Self {
        self.executors.insert(id.into(), descriptor);
        self
    }

    pub fn build(self) -> CrudService<B> {
        CrudService { orchestrator: self.orchestrator,
                      creator: self.creator,
                      executors: self.executors }
    }
}

impl<B> CrudServiceBuilder<B> where B: OrderedBean + PropertyAccess
{
    /// Registra el mantenimiento de números de orden como interceptor.
    pub fn order_maintainer<M>(self, maintainer: OrderConsistencyMaintainer<B, M>) -> Self
        where M: OrderedBeanGroupMapper<B> + 'static
    {
        self.interceptor(Arc::new(maintainer))
    }
}
