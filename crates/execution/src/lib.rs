//! execution: ejecución asíncrona, progreso y cancelación
//!
//! Define los contratos `ExecutionCallback` (progreso jerárquico con
//! cancelación cooperativa) y `ResultCallback` (entrega de un solo disparo),
//! el agregador de progreso `ProgressAggregator`, el `AsyncDispatcher` que
//! mueve llamadas al pool de workers y el `ServiceRuntime` que posee los
//! pools compartidos.
//!
//! Ejemplo rápido:
//! ```rust
//! use execution::{AsyncDispatcher, RuntimeConfig, ServiceRuntime};
//! let runtime = ServiceRuntime::new(RuntimeConfig::default()).expect("runtime");
//! let dispatcher = AsyncDispatcher::from_runtime(runtime.clone());
//! # let _ = dispatcher;
//! runtime.shutdown();
//! ```
pub mod aggregator;
pub mod callback;
pub mod dispatcher;
pub mod errors;
pub mod runtime;
pub mod stubs;

pub use aggregator::*;
pub use callback::*;
pub use dispatcher::*;
pub use errors::*;
pub use runtime::*;
