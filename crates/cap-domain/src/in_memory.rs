// Archivo: in_memory.rs
// Propósito: almacenamiento de beans en memoria para pruebas y wiring
// rápido. Implementa `BeanAccess` y `BeanReader`; no es durable y las
// escrituras se aplican inmediatamente (el `flush` sólo se contabiliza).
use crate::access::{compare_values, BeanAccess, BeanFilter, BeanReader, SortKey};
use crate::bean::{Bean, BeanId, PropertyAccess};
use crate::errors::{Result, ServiceError};
use dashmap::DashMap;
use log::debug;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

pub struct InMemoryBeanStore<B> {
    beans: DashMap<BeanId, B>,
    /// Cada entrada es un conjunto de propiedades que debe ser único.
    unique_constraints: Vec<Vec<String>>,
    flushes: AtomicUsize,
    writes: AtomicUsize,
}

impl<B> InMemoryBeanStore<B> where B: Bean + PropertyAccess
{
    pub fn new() -> Self {
        Self { beans: DashMap::new(),
               unique_constraints: Vec::new(),
               flushes: AtomicUsize::new(0),
               writes: AtomicUsize::new(0) }
    }

    /// Añade una restricción de unicidad sobre la combinación de
    /// `properties`.
    pub fn with_unique_constraint(mut self, properties: &[&str]) -> Self {
        self.unique_constraints.push(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Inserta un bean tal cual, sin tocar la versión ni contar escrituras.
    pub fn insert(&self, bean: B) {
        self.beans.insert(bean.id(), bean);
    }

    pub fn get(&self, id: &BeanId) -> Option<B> {
        self.beans.get(id).map(|b| b.value().clone())
    }

    pub fn all(&self) -> Vec<B> {
        self.beans.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(AtomicOrdering::SeqCst)
    }

    /// Número de `save`/`delete` aplicados.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    fn check_unique(&self, bean: &B) -> Result<()> {
        for constraint in &self.unique_constraints {
            let values: Vec<_> = constraint.iter().map(|p| bean.get_property(p)).collect();
            if values.iter().all(|v| v.as_ref().map_or(true, |v| v.is_null())) {
                continue;
            }
            let clash = self.beans.iter().any(|other| {
                                              other.key() != &bean.id()
                                              && constraint.iter()
                                                           .zip(values.iter())
                                                           .all(|(p, v)| &other.value().get_property(p) == v)
                                          });
            if clash {
                return Err(ServiceError::UniqueConstraintViolation(constraint.clone()));
            }
        }
        Ok(())
    }
}

impl<B> Default for InMemoryBeanStore<B> where B: Bean + PropertyAccess
{
    fn default() -> Self {
        Self::new()
    }
}

impl<B> BeanAccess<B> for InMemoryBeanStore<B> where B: Bean + PropertyAccess
{
    fn load(&self, ids: &[BeanId]) -> Result<Vec<B>> {
        Ok(ids.iter().filter_map(|id| self.get(id)).collect())
    }

    /// Inserta (versión 0) o actualiza (versión persistida + 1). Rechaza la
    /// actualización de una copia cuya versión ya no es la persistida.
    fn save(&self, bean: &mut B) -> Result<()> {
        self.check_unique(bean)?;
        let next_version = match self.beans.get(&bean.id()) {
            Some(stored) if stored.version() != bean.version() => return Err(ServiceError::StaleBean(bean.id())),
            Some(stored) => stored.version() + 1,
            None => 0,
        };
        bean.set_version(next_version);
        self.beans.insert(bean.id(), bean.clone());
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        debug!("bean {} guardado en versión {}", bean.id(), next_version);
        Ok(())
    }

    fn delete(&self, id: &BeanId) -> Result<()> {
        self.beans.remove(id).ok_or(ServiceError::DeletedBean(*id))?;
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        debug!("bean {} eliminado", id);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

impl<B> BeanReader<B> for InMemoryBeanStore<B> where B: Bean + PropertyAccess
{
    fn read(&self, filter: &BeanFilter, sort: &[SortKey], limit: usize) -> Result<Vec<B>> {
        let mut out: Vec<B> = self.beans
                                  .iter()
                                  .filter(|e| filter.matches(|name| e.value().get_property(name)))
                                  .map(|e| e.value().clone())
                                  .collect();
        out.sort_by(|a, b| {
               for key in sort {
                   let va = a.get_property(&key.property).unwrap_or_default();
                   let vb = b.get_property(&key.property).unwrap_or_default();
                   let ord = compare_values(&va, &vb);
                   let ord = if key.ascending { ord } else { ord.reverse() };
                   if ord != Ordering::Equal {
                       return ord;
                   }
               }
               a.id().cmp(&b.id())
           });
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_stubs::StubBean;
    use serde_json::json;

    #[test]
    fn save_bumps_version_and_rejects_stale_copies() -> Result<()> {
        let store = InMemoryBeanStore::new();
        let mut bean = StubBean::new("a", "g", Some(0));
        store.save(&mut bean)?;
        assert_eq!(bean.version(), 0);
        let mut stale = bean.clone();
        bean.name = "b".into();
        store.save(&mut bean)?;
        assert_eq!(bean.version(), 1);
        stale.name = "c".into();
        assert_eq!(store.save(&mut stale), Err(ServiceError::StaleBean(stale.id())));
        assert_eq!(store.write_count(), 2);
        Ok(())
    }

    #[test]
    fn unique_constraint_is_enforced() -> Result<()> {
        let store = InMemoryBeanStore::new().with_unique_constraint(&["name"]);
        store.save(&mut StubBean::new("dup", "g", None))?;
        let res = store.save(&mut StubBean::new("dup", "h", None));
        assert_eq!(res, Err(ServiceError::UniqueConstraintViolation(vec!["name".into()])));
        Ok(())
    }

    #[test]
    fn read_filters_sorts_and_limits() -> Result<()> {
        let store = InMemoryBeanStore::new();
        for (name, order) in [("c", Some(2)), ("a", Some(0)), ("x", None), ("b", Some(1))] {
            store.save(&mut StubBean::new(name, "g", order))?;
        }
        store.save(&mut StubBean::new("other", "h", Some(0)))?;
        let filter = BeanFilter::new().equals("group", json!("g")).not_null("order_number");
        let read = store.read(&filter, &[SortKey::asc("order_number")], 10)?;
        let names: Vec<&str> = read.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(store.read(&filter, &[SortKey::asc("order_number")], 2)?.len(), 2);
        Ok(())
    }

    #[test]
    fn delete_missing_bean_reports_deleted() {
        let store: InMemoryBeanStore<StubBean> = InMemoryBeanStore::new();
        let id = BeanId::new();
        assert_eq!(store.delete(&id), Err(ServiceError::DeletedBean(id)));
    }
}
