// errors.rs
use crate::bean::BeanId;
use crate::validation::ValidationResult;
use thiserror::Error;

/// Taxonomía de errores de la capa de servicio CRUD.
///
/// `Canceled` no es un error visible para el usuario: representa la señal de
/// cancelación cooperativa y nunca se entrega a un `ResultCallback`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
  /// El bean referenciado por la clave ya no existe.
  #[error("Bean eliminado: {0}")]
  DeletedBean(BeanId),
  /// La versión persistida no coincide con la versión de la clave.
  #[error("Bean obsoleto (versión distinta): {0}")]
  StaleBean(BeanId),
  /// El `ExecutableChecker` rechazó la ejecución sobre el bean.
  #[error("Bean {id} no ejecutable: {}", .reason.as_deref().unwrap_or("sin motivo"))]
  ExecutableCheck { id: BeanId, reason: Option<String> },
  /// La validación posterior a la ejecución produjo un error.
  #[error("Validación fallida para {id}: {worst}")]
  BeanValidation { id: BeanId, worst: ValidationResult },
  /// Violación de una restricción de unicidad sobre las propiedades dadas.
  #[error("Restricción de unicidad violada: {}", .0.join(", "))]
  UniqueConstraintViolation(Vec<String>),
  #[error("Error de servicio: {0}")]
  Service(String),
  /// Error de acceso al almacenamiento (lock envenenado, backend, etc.).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  /// Error escapado de una llamada despachada de forma asíncrona.
  #[error("Fallo en la llamada '{call}': {message}")]
  Dispatch { call: String, message: String },
  #[error("Ejecución cancelada")]
  Canceled,
}

impl ServiceError {
  /// Indica si el resultado corresponde a la señal de cancelación.
  pub fn is_canceled(&self) -> bool {
    matches!(self, ServiceError::Canceled)
  }
}

impl From<serde_json::Error> for ServiceError {
  fn from(e: serde_json::Error) -> Self {
    Self::Service(format!("serialización: {}", e))
  }
}

/// Alias de resultado usado por las APIs del workspace.
pub type Result<T> = std::result::Result<T, ServiceError>;
