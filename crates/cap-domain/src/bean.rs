// Archivo: bean.rs
// Propósito: tipos de identidad y de transporte de beans (claves, DTOs,
// modificaciones) y los traits mínimos que la capa CRUD exige a un bean.
use crate::errors::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identidad opaca de un bean persistido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeanId(Uuid);

impl BeanId {
    /// Genera una identidad nueva (v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BeanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BeanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Referencia identidad + versión a un bean persistido. Dos claves con el
/// mismo `id` apuntan a la misma fila, posiblemente en versiones distintas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeanKey {
    pub id: BeanId,
    pub version: i64,
}

impl BeanKey {
    pub fn new(id: BeanId, version: i64) -> Self {
        Self { id, version }
    }
}

/// Snapshot inmutable de las propiedades de un bean, producido por un
/// `DtoFactory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeanDto {
    pub id: BeanId,
    pub version: i64,
    pub properties: BTreeMap<String, JsonValue>,
}

impl BeanDto {
    pub fn key(&self) -> BeanKey {
        BeanKey::new(self.id, self.version)
    }

    /// Valor de una propiedad, `Null` si no existe.
    pub fn property(&self, name: &str) -> &JsonValue {
        self.properties.get(name).unwrap_or(&JsonValue::Null)
    }
}

/// Un cambio de una propiedad de un bean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeanModification {
    pub id: BeanId,
    pub property_name: String,
    pub old_value: JsonValue,
    pub new_value: JsonValue,
}

impl BeanModification {
    pub fn new(id: BeanId, property_name: impl Into<String>, old_value: JsonValue, new_value: JsonValue) -> Self {
        Self { id,
               property_name: property_name.into(),
               old_value,
               new_value }
    }
}

/// Modificaciones agrupadas por bean, en orden de primera aparición.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModificationBatch {
    by_bean: IndexMap<BeanId, Vec<BeanModification>>,
}

impl ModificationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, modification: BeanModification) {
        self.by_bean.entry(modification.id).or_default().push(modification);
    }

    /// Modificaciones del bean `id` (vacío si no tiene).
    pub fn for_bean(&self, id: &BeanId) -> &[BeanModification] {
        self.by_bean.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids de los beans modificados, en orden de primera aparición.
    pub fn bean_ids(&self) -> impl Iterator<Item = &BeanId> {
        self.by_bean.keys()
    }

    pub fn touches(&self, id: &BeanId, property: &str) -> bool {
        self.for_bean(id).iter().any(|m| m.property_name == property)
    }

    pub fn is_empty(&self) -> bool {
        self.by_bean.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_bean.len()
    }
}

impl FromIterator<BeanModification> for ModificationBatch {
    fn from_iter<I: IntoIterator<Item = BeanModification>>(iter: I) -> Self {
        let mut batch = Self::new();
        for m in iter {
            batch.push(m);
        }
        batch
    }
}

/// Contrato mínimo de un bean de dominio gestionado por la capa CRUD.
///
/// La versión es monotónica y la incrementa el almacenamiento en cada
/// escritura.
pub trait Bean: Clone + Send + Sync + 'static {
    fn id(&self) -> BeanId;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);

    fn key(&self) -> BeanKey {
        BeanKey::new(self.id(), self.version())
    }
}

/// Acceso a propiedades por nombre. Lo usan las modificaciones genéricas y
/// la evaluación de filtros del almacenamiento en memoria.
pub trait PropertyAccess {
    fn get_property(&self, name: &str) -> Option<JsonValue>;
    fn set_property(&mut self, name: &str, value: JsonValue) -> Result<()>;
}
