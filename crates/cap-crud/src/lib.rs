//! cap-crud: servicio CRUD de beans sobre la capa de ejecución
//!
//! - `CrudOrchestrator`: pipeline común de carga, política de versiones,
//!   interceptores, executor, validación y flush.
//! - `CrudService`: implementación síncrona de `BeanCrudService`.
//! - `AsyncCrudService`: decorador que despacha cada mutación al pool de
//!   workers con progreso agregado y cancelación.
//! - `OrderConsistencyMaintainer`: mantiene contiguos los números de orden
//!   de cada grupo.
pub mod async_service;
pub mod executor;
pub mod interceptor;
pub mod orchestrator;
pub mod ordering;
pub mod service;

pub use async_service::AsyncCrudService;
pub use executor::{BeanExecutor, DeleteExecutor, ExecutionPolicy, ExecutorDescriptor, ListBeanExecutor,
                   ModificationExecutor, SingleBeanExecutor};
pub use interceptor::{MutationContext, MutationKind, UpdateInterceptor};
pub use orchestrator::CrudOrchestrator;
pub use ordering::{OrderConsistencyMaintainer, OrderConsistencyMaintainerBuilder, MAX_BEANS};
pub use service::{BeanCrudService, CrudService, CrudServiceBuilder, DtoResultCallback};
