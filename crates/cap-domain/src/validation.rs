// validation.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severidad de un resultado de validación, ordenada de menor a mayor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
  Ok,
  Info,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
  pub severity: Severity,
  pub message: String,
  /// Propiedad afectada, si el resultado es específico de una propiedad.
  pub property: Option<String>,
}

impl ValidationResult {
  pub fn ok() -> Self {
    Self { severity: Severity::Ok, message: String::new(), property: None }
  }

  pub fn error(property: Option<&str>, message: impl Into<String>) -> Self {
    Self { severity: Severity::Error, message: message.into(), property: property.map(str::to_string) }
  }

  pub fn warning(property: Option<&str>, message: impl Into<String>) -> Self {
    Self { severity: Severity::Warning, message: message.into(), property: property.map(str::to_string) }
  }

  pub fn is_valid(&self) -> bool {
    self.severity < Severity::Error
  }

  /// Peor resultado de la lista (el primero en caso de empate); `ok()` si
  /// está vacía.
  pub fn worst(results: &[ValidationResult]) -> ValidationResult {
    let mut worst: Option<&ValidationResult> = None;
    for r in results {
      if worst.map_or(true, |w| r.severity > w.severity) {
        worst = Some(r);
      }
    }
    worst.cloned().unwrap_or_else(Self::ok)
  }
}

impl fmt::Display for ValidationResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.property {
      Some(p) => write!(f, "{:?} [{}]: {}", self.severity, p, self.message),
      None => write!(f, "{:?}: {}", self.severity, self.message),
    }
  }
}

/// Resultado de la comprobación previa a la ejecución de un executor sobre
/// un bean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableState {
  pub executable: bool,
  pub reason: Option<String>,
}

impl ExecutableState {
  pub fn executable() -> Self {
    Self { executable: true, reason: None }
  }

  pub fn not_executable(reason: impl Into<String>) -> Self {
    Self { executable: false, reason: Some(reason.into()) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn worst_picks_highest_severity_first_on_ties() {
    let results = vec![ValidationResult::warning(Some("name"), "corto"),
                       ValidationResult::error(Some("name"), "vacío"),
                       ValidationResult::error(Some("group"), "otro")];
    let worst = ValidationResult::worst(&results);
    assert_eq!(worst.severity, Severity::Error);
    assert_eq!(worst.message, "vacío");
    assert!(!worst.is_valid());
  }

  #[test]
  fn worst_of_empty_is_ok() {
    assert!(ValidationResult::worst(&[]).is_valid());
  }
}
