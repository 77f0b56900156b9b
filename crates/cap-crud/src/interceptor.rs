use cap_domain::{Bean, ModificationBatch, Result};

/// Tipo de operación que originó una mutación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Execute,
}

impl MutationKind {
    pub fn label(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::Execute => "execute",
        }
    }
}

/// Contexto compartido por los hooks de una misma llamada.
pub struct MutationContext<'a, B> {
    pub kind: MutationKind,
    /// Sólo presente en `update`.
    pub modifications: Option<&'a ModificationBatch>,
    /// Beans tal como se cargaron, antes de ejecutar el executor.
    pub previous: &'a [B],
}

/// Hook antes/después de una mutación.
///
/// `before_update` recibe los beans cargados; `after_update` recibe los
/// beans resultantes ya validados y puede modificarlos en sitio antes del
/// flush.
pub trait UpdateInterceptor<B: Bean>: Send + Sync {
    fn before_update(&self, _context: &MutationContext<'_, B>, _beans: &[B]) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, _context: &MutationContext<'_, B>, _beans: &mut [B]) -> Result<()> {
        Ok(())
    }
}
