// Archivo: access.rs
// Propósito: contratos de los colaboradores externos que consume la capa
// CRUD (acceso a beans, lectura filtrada, DTOs, validación y comprobación
// de ejecutabilidad). Las implementaciones concretas viven fuera del crate,
// salvo el almacenamiento en memoria de `in_memory.rs`.
use crate::bean::{Bean, BeanDto, BeanId};
use crate::errors::{Result, ServiceError};
use crate::validation::{ExecutableState, ValidationResult};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// Capacidad de acceso a beans persistidos.
///
/// `save` inserta o actualiza e incrementa la versión del bean recibido;
/// `flush` confirma el trabajo pendiente de la unidad de trabajo actual.
pub trait BeanAccess<B: Bean>: Send + Sync {
    /// Carga los beans existentes para `ids`. Los ids sin bean se omiten; el
    /// orden del resultado no está garantizado.
    fn load(&self, ids: &[BeanId]) -> Result<Vec<B>>;

    fn save(&self, bean: &mut B) -> Result<()>;

    fn delete(&self, id: &BeanId) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Condición de un filtro de lectura.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Equals(String, JsonValue),
    NotNull(String),
}

/// Conjunción de condiciones evaluada por el `BeanReader`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeanFilter {
    pub conditions: Vec<FilterCondition>,
}

impl BeanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, property: impl Into<String>, value: JsonValue) -> Self {
        self.conditions.push(FilterCondition::Equals(property.into(), value));
        self
    }

    pub fn not_null(mut self, property: impl Into<String>) -> Self {
        self.conditions.push(FilterCondition::NotNull(property.into()));
        self
    }

    /// Evalúa el filtro contra un accesor de propiedades.
    pub fn matches<F>(&self, property: F) -> bool
        where F: Fn(&str) -> Option<JsonValue>
    {
        self.conditions.iter().all(|c| match c {
                                  FilterCondition::Equals(name, value) => {
                                      property(name).unwrap_or(JsonValue::Null) == *value
                                  }
                                  FilterCondition::NotNull(name) => {
                                      property(name).map_or(false, |v| !v.is_null())
                                  }
                              })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub property: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(property: impl Into<String>) -> Self {
        Self { property: property.into(),
               ascending: true }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self { property: property.into(),
               ascending: false }
    }
}

/// Lectura filtrada y ordenada, acotada a `limit` resultados.
pub trait BeanReader<B: Bean>: Send + Sync {
    fn read(&self, filter: &BeanFilter, sort: &[SortKey], limit: usize) -> Result<Vec<B>>;
}

/// Orden total pragmático entre valores JSON: null < bool < número < string
/// < resto.
pub fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Conversión bean -> DTO.
pub trait DtoFactory<B: Bean>: Send + Sync {
    fn create_dto(&self, bean: &B) -> Result<BeanDto>;
}

/// `DtoFactory` genérico para beans serializables: cada campo de nivel
/// superior del objeto serializado se convierte en una propiedad del DTO.
pub struct SerdeDtoFactory<B> {
    _bean: PhantomData<fn(&B)>,
}

impl<B> SerdeDtoFactory<B> {
    pub fn new() -> Self {
        Self { _bean: PhantomData }
    }
}

impl<B> Default for SerdeDtoFactory<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> DtoFactory<B> for SerdeDtoFactory<B> where B: Bean + Serialize
{
    fn create_dto(&self, bean: &B) -> Result<BeanDto> {
        match serde_json::to_value(bean)? {
            JsonValue::Object(map) => Ok(BeanDto { id: bean.id(),
                                                   version: bean.version(),
                                                   properties: map.into_iter().collect() }),
            other => Err(ServiceError::Service(format!("el bean {} no se serializa como objeto: {}", bean.id(), other))),
        }
    }
}

pub trait BeanValidator<B: Bean>: Send + Sync {
    fn validate(&self, bean: &B) -> Vec<ValidationResult>;
}

pub trait ExecutableChecker<B: Bean>: Send + Sync {
    fn check(&self, bean: &B) -> ExecutableState;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_equality_and_not_null() {
        let filter = BeanFilter::new().equals("group", json!("a")).not_null("order_number");
        let props = |name: &str| match name {
            "group" => Some(json!("a")),
            "order_number" => Some(json!(2)),
            _ => None,
        };
        assert!(filter.matches(props));
        let no_order = |name: &str| match name {
            "group" => Some(json!("a")),
            "order_number" => Some(JsonValue::Null),
            _ => None,
        };
        assert!(!filter.matches(no_order));
    }

    #[test]
    fn compare_values_orders_numbers_numerically() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&JsonValue::Null, &json!(0)), Ordering::Less);
    }
}
