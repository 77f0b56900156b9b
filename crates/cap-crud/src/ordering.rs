// Archivo: ordering.rs
// Propósito: `OrderConsistencyMaintainer`, interceptor que mantiene los
// números de orden de cada grupo como el rango contiguo `0..n` tras crear,
// modificar o eliminar beans ordenados.
//
// Por cada grupo afectado se leen los miembros persistidos con número de
// orden (hasta `max_beans`), se reservan las posiciones pedidas
// explícitamente por los beans de la mutación y se renumeran los demás
// miembros en su orden relativo saltando las reservas. Los beans de la
// mutación sin número explícito van al final. Sólo se guardan los beans
// cuyo número cambia. No toma bloqueos: las mutaciones concurrentes sobre
// un mismo grupo deben serializarse fuera.
use crate::interceptor::{MutationContext, MutationKind, UpdateInterceptor};
use cap_domain::{BeanAccess, BeanId, BeanReader, OrderedBean, OrderedBeanGroupMapper, PropertyAccess, Result,
                 ServiceError, SortKey};
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Máximo de miembros leídos por grupo.
pub const MAX_BEANS: usize = 20_000;

pub struct OrderConsistencyMaintainer<B, M>
    where B: OrderedBean,
          M: OrderedBeanGroupMapper<B>
{
    access: Arc<dyn BeanAccess<B>>,
    reader: Arc<dyn BeanReader<B>>,
    mapper: Arc<M>,
    max_beans: usize,
}

pub struct OrderConsistencyMaintainerBuilder<B, M>
    where B: OrderedBean,
          M: OrderedBeanGroupMapper<B>
{
    access: Option<Arc<dyn BeanAccess<B>>>,
    reader: Option<Arc<dyn BeanReader<B>>>,
    mapper: Option<Arc<M>>,
    max_beans: usize,
}

impl<B, M> OrderConsistencyMaintainerBuilder<B, M>
    where B: OrderedBean,
          M: OrderedBeanGroupMapper<B>
{
    pub fn access(mut self, access: Arc<dyn BeanAccess<B>>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn reader(mut self, reader: Arc<dyn BeanReader<B>>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Usa el mismo almacenamiento para escribir y para leer grupos.
    pub fn store<S>(self, store: Arc<S>) -> Self
        where S: BeanAccess<B> + BeanReader<B> + 'static
    {
        self.access(store.clone()).reader(store)
    }

    pub fn group_mapper(mut self, mapper: Arc<M>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn max_beans(mut self, max_beans: usize) -> Self {
        self.max_beans = max_beans;
        self
    }

    pub fn build(self) -> Result<OrderConsistencyMaintainer<B, M>> {
        let missing = |part: &str| ServiceError::Service(format!("OrderConsistencyMaintainer sin {}", part));
        Ok(OrderConsistencyMaintainer { access: self.access.ok_or_else(|| missing("access"))?,
                                        reader: self.reader.ok_or_else(|| missing("reader"))?,
                                        mapper: self.mapper.ok_or_else(|| missing("group_mapper"))?,
                                        max_beans: self.max_beans.max(1) })
    }
}

impl<B, M> OrderConsistencyMaintainer<B, M>
    where B: OrderedBean + PropertyAccess,
          M: OrderedBeanGroupMapper<B>
{
    pub fn builder() -> OrderConsistencyMaintainerBuilder<B, M> {
        OrderConsistencyMaintainerBuilder { access: None,
                                            reader: None,
                                            mapper: None,
                                            max_beans: MAX_BEANS }
    }

    /// Renumera los miembros persistidos de `group` sin beans de mutación.
    /// Devuelve el número de beans guardados; un grupo ya consistente no
    /// produce escrituras.
    pub fn restore_group(&self, group: &M::Group) -> Result<usize> {
        self.restore(group, &HashSet::new(), &mut [], &[])
    }

    /// Beans de `beans` cuyo número de orden debe recolocarse.
    fn is_relevant(&self, context: &MutationContext<'_, B>, bean: &B) -> bool {
        match context.kind {
            MutationKind::Create => true,
            MutationKind::Update => {
                let modifications = context.modifications.map(|m| m.for_bean(&bean.id())).unwrap_or(&[]);
                let order_touched = modifications.iter().any(|m| {
                                                            m.property_name == B::ORDER_PROPERTY
                                                            && (!m.old_value.is_null() || !m.new_value.is_null())
                                                        });
                let changing = self.mapper.group_changing_properties();
                let group_touched = modifications.iter().any(|m| changing.contains(&m.property_name));
                order_touched || (group_touched && bean.order_number().is_some())
            }
            MutationKind::Delete | MutationKind::Execute => false,
        }
    }

    fn restore_after_delete(&self, context: &MutationContext<'_, B>) -> Result<()> {
        let removed: Vec<&B> = context.previous.iter().filter(|b| b.order_number().is_some()).collect();
        let excluded: HashSet<BeanId> = removed.iter().map(|b| b.id()).collect();
        let mut groups: Vec<M::Group> = Vec::new();
        for bean in removed {
            let group = self.mapper.group(bean);
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        for group in groups {
            self.restore(&group, &excluded, &mut [], &[])?;
        }
        Ok(())
    }

    fn restore_after_write(&self, context: &MutationContext<'_, B>, beans: &mut [B]) -> Result<()> {
        let relevant: Vec<usize> = (0..beans.len()).filter(|&i| self.is_relevant(context, &beans[i])).collect();
        if relevant.is_empty() {
            return Ok(());
        }
        let excluded: HashSet<BeanId> = relevant.iter().map(|&i| beans[i].id()).collect();
        let mut groups: IndexMap<M::Group, Vec<usize>> = IndexMap::new();
        for &i in &relevant {
            let slot = groups.entry(self.mapper.group(&beans[i])).or_default();
            // Un bean que deja de tener orden sólo compacta su grupo.
            if context.kind == MutationKind::Create || beans[i].order_number().is_some() {
                slot.push(i);
            }
            if let Some(before) = context.previous.iter().find(|p| p.id() == beans[i].id()) {
                if before.order_number().is_some() {
                    groups.entry(self.mapper.group(before)).or_default();
                }
            }
        }
        for (group, members) in groups {
            self.restore(&group, &excluded, beans, &members)?;
        }
        Ok(())
    }

    /// Renumera `group`. `excluded` son los ids que no deben tratarse como
    /// miembros persistidos; `relevant` indexa en `beans` los beans de la
    /// mutación que pertenecen a este grupo.
    fn restore(&self,
               group: &M::Group,
               excluded: &HashSet<BeanId>,
               beans: &mut [B],
               relevant: &[usize])
               -> Result<usize> {
        let filter = self.mapper.group_filter(group).not_null(B::ORDER_PROPERTY);
        let members = self.reader.read(&filter, &[SortKey::asc(B::ORDER_PROPERTY)], self.max_beans)?;
        if members.len() >= self.max_beans {
            warn!("grupo {:?} truncado a {} beans al restaurar el orden", group, self.max_beans);
        }
        let others: Vec<B> = members.into_iter().filter(|m| !excluded.contains(&m.id())).collect();
        let total = (others.len() + relevant.len()) as u32;

        // Explícitos primero en orden ascendente, después los nulos en el
        // orden en que llegaron.
        let mut ordered = relevant.to_vec();
        ordered.sort_by_key(|&i| (beans[i].order_number().is_none(), beans[i].order_number()));

        let mut reserved = BTreeSet::new();
        let mut assigned: Vec<(usize, u32)> = Vec::with_capacity(ordered.len());
        for &i in &ordered {
            if let Some(requested) = beans[i].order_number() {
                let slot = free_slot(&reserved, requested, total);
                reserved.insert(slot);
                assigned.push((i, slot));
            }
        }

        let mut writes = 0;
        let mut expected = 0u32;
        for mut member in others {
            while reserved.contains(&expected) {
                expected += 1;
            }
            if member.order_number() != Some(expected) {
                member.set_order_number(Some(expected));
                self.access.save(&mut member)?;
                writes += 1;
                if let Some(result) = beans.iter_mut().find(|b| b.id() == member.id()) {
                    *result = member;
                }
            }
            expected += 1;
        }
        for &i in &ordered {
            if beans[i].order_number().is_none() {
                while reserved.contains(&expected) {
                    expected += 1;
                }
                assigned.push((i, expected));
                expected += 1;
            }
        }
        for (i, slot) in assigned {
            if beans[i].order_number() != Some(slot) {
                beans[i].set_order_number(Some(slot));
                self.access.save(&mut beans[i])?;
                writes += 1;
            }
        }
        debug!("grupo {:?} restaurado: {} escrituras", group, writes);
        Ok(writes)
    }
}

/// Primera posición libre desde `requested` (acotada a `total - 1`); si no
/// queda ninguna por encima, la más baja libre.
fn free_slot(reserved: &BTreeSet<u32>, requested: u32, total: u32) -> u32 {
    let start = requested.min(total.saturating_sub(1));
    (start..total).chain(0..start).find(|s| !reserved.contains(s)).unwrap_or(start)
}

impl<B, M> UpdateInterceptor<B> for OrderConsistencyMaintainer<B, M>
    where B: OrderedBean + PropertyAccess,
          M: OrderedBeanGroupMapper<B>
{
    fn after_update(&self, context: &MutationContext<'_, B>, beans: &mut [B]) -> Result<()> {
        match context.kind {
            MutationKind::Delete => self.restore_after_delete(context),
            MutationKind::Create | MutationKind::Update => self.restore_after_write(context, beans),
            MutationKind::Execute => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_slot_clamps_and_wraps() {
        let mut reserved = BTreeSet::new();
        assert_eq!(free_slot(&reserved, 9, 4), 3);
        reserved.insert(3);
        assert_eq!(free_slot(&reserved, 3, 4), 0);
        reserved.insert(0);
        assert_eq!(free_slot(&reserved, 1, 4), 1);
        assert_eq!(free_slot(&reserved, 0, 4), 1);
    }
}
