// Archivo: errors.rs
// Propósito: errores de construcción y uso de los pools compartidos.
use cap_domain::ServiceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// No se pudo construir alguno de los pools.
    #[error("No se pudo construir el pool '{pool}': {message}")]
    Build { pool: &'static str, message: String },
    /// Variable de configuración con un valor no interpretable.
    #[error("Configuración inválida {name}={value}")]
    Config { name: &'static str, value: String },
    /// El runtime ya fue apagado y no acepta trabajo nuevo.
    #[error("El runtime de servicio está apagado")]
    ShutDown,
}

impl From<RuntimeError> for ServiceError {
    fn from(e: RuntimeError) -> Self {
        ServiceError::Service(e.to_string())
    }
}

/// Alias de resultado para las APIs del runtime.
pub type Result<T> = std::result::Result<T, RuntimeError>;
