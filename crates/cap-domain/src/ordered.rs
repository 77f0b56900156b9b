// ordered.rs
use crate::access::BeanFilter;
use crate::bean::Bean;
use std::fmt::Debug;
use std::hash::Hash;

/// Bean con número de orden relativo a su grupo.
///
/// Invariante mantenido por la capa CRUD: entre los beans persistidos de un
/// mismo grupo con número de orden no nulo, los números forman el rango
/// contiguo `0..n` sin duplicados.
pub trait OrderedBean: Bean {
    /// Nombre de la propiedad que almacena el número de orden.
    const ORDER_PROPERTY: &'static str = "order_number";

    fn order_number(&self) -> Option<u32>;
    fn set_order_number(&mut self, order_number: Option<u32>);
}

/// Estrategia que asigna un bean a su grupo de ordenación y construye el
/// filtro de lectura de ese grupo.
pub trait OrderedBeanGroupMapper<B: OrderedBean>: Send + Sync {
    type Group: Clone + Eq + Hash + Debug + Send + Sync;

    fn group(&self, bean: &B) -> Self::Group;

    /// Filtro que selecciona los miembros persistidos de `group`.
    fn group_filter(&self, group: &Self::Group) -> BeanFilter;

    /// Propiedades cuya modificación puede mover un bean de grupo.
    fn group_changing_properties(&self) -> &[String];
}
