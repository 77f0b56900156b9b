//! cap-domain: modelo de datos y contratos de la capa de servicio CRUD
//!
//! Define las claves, DTOs y modificaciones de beans, la taxonomía de
//! errores (`ServiceError`) y los traits de los colaboradores externos
//! (`BeanAccess`, `BeanReader`, `DtoFactory`, `BeanValidator`,
//! `ExecutableChecker`, `OrderedBeanGroupMapper`). Incluye un
//! almacenamiento en memoria (`InMemoryBeanStore`) para pruebas y demos.
mod access;
mod bean;
mod domain_stubs;
mod errors;
mod in_memory;
mod ordered;
mod validation;

pub use access::{compare_values, BeanAccess, BeanFilter, BeanReader, BeanValidator, DtoFactory, ExecutableChecker,
                 FilterCondition, SerdeDtoFactory, SortKey};
pub use bean::{Bean, BeanDto, BeanId, BeanKey, BeanModification, ModificationBatch, PropertyAccess};
pub use domain_stubs::{DomainStubs, StubBean, StubGroupMapper, StubValidator};
pub use errors::{Result, ServiceError};
pub use in_memory::InMemoryBeanStore;
pub use ordered::{OrderedBean, OrderedBeanGroupMapper};
pub use validation::{ExecutableState, Severity, ValidationResult};
