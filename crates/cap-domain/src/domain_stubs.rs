use crate::access::{BeanFilter, BeanValidator};
use crate::bean::{Bean, BeanId, PropertyAccess};
use crate::errors::{Result, ServiceError};
use crate::in_memory::InMemoryBeanStore;
use crate::ordered::{OrderedBean, OrderedBeanGroupMapper};
use crate::validation::ValidationResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Bean ordenado de ejemplo: un elemento con nombre dentro de un grupo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubBean {
    pub id: BeanId,
    pub version: i64,
    pub name: String,
    pub group: String,
    pub order_number: Option<u32>,
}

impl StubBean {
    pub fn new(name: &str, group: &str, order_number: Option<u32>) -> Self {
        Self { id: BeanId::new(),
               version: 0,
               name: name.to_string(),
               group: group.to_string(),
               order_number }
    }
}

impl Bean for StubBean {
    fn id(&self) -> BeanId {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl PropertyAccess for StubBean {
    fn get_property(&self, name: &str) -> Option<JsonValue> {
        match name {
            "name" => Some(json!(self.name)),
            "group" => Some(json!(self.group)),
            "order_number" => Some(json!(self.order_number)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: JsonValue) -> Result<()> {
        let invalid = || ServiceError::Service(format!("valor inválido para '{}': {}", name, value));
        match name {
            "name" => self.name = value.as_str().ok_or_else(invalid)?.to_string(),
            "group" => self.group = value.as_str().ok_or_else(invalid)?.to_string(),
            "order_number" => {
                self.order_number = match &value {
                    JsonValue::Null => None,
                    v => Some(v.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(invalid)?),
                }
            }
            other => return Err(ServiceError::Service(format!("propiedad desconocida: {}", other))),
        }
        Ok(())
    }
}

impl OrderedBean for StubBean {
    fn order_number(&self) -> Option<u32> {
        self.order_number
    }

    fn set_order_number(&mut self, order_number: Option<u32>) {
        self.order_number = order_number;
    }
}

/// Agrupa `StubBean` por su propiedad `group`.
pub struct StubGroupMapper {
    changing: Vec<String>,
}

impl StubGroupMapper {
    pub fn new() -> Self {
        Self { changing: vec!["group".to_string()] }
    }
}

impl Default for StubGroupMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedBeanGroupMapper<StubBean> for StubGroupMapper {
    type Group = String;

    fn group(&self, bean: &StubBean) -> String {
        bean.group.clone()
    }

    fn group_filter(&self, group: &String) -> BeanFilter {
        BeanFilter::new().equals("group", json!(group))
    }

    fn group_changing_properties(&self) -> &[String] {
        &self.changing
    }
}

/// Rechaza beans sin nombre.
pub struct StubValidator;

impl BeanValidator<StubBean> for StubValidator {
    fn validate(&self, bean: &StubBean) -> Vec<ValidationResult> {
        if bean.name.trim().is_empty() {
            vec![ValidationResult::error(Some("name"), "el nombre no puede estar vacío")]
        } else {
            vec![ValidationResult::ok()]
        }
    }
}

pub struct DomainStubs;

impl DomainStubs {
    /// Crea un almacenamiento en memoria con `count` beans del grupo `group`
    /// numerados `0..count`. Devuelve también los beans en orden.
    pub fn ordered_store(group: &str, count: u32) -> (InMemoryBeanStore<StubBean>, Vec<StubBean>) {
        let store = InMemoryBeanStore::new();
        let beans: Vec<StubBean> = (0..count).map(|i| StubBean::new(&format!("{}-{}", group, i), group, Some(i)))
                                             .collect();
        for b in &beans {
            store.insert(b.clone());
        }
        (store, beans)
    }
}
