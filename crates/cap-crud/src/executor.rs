// Archivo: executor.rs
// Propósito: executors de dominio que el orquestador invoca (sobre la lista
// completa o bean a bean) y los executors incorporados de `update` y
// `delete`.
use cap_domain::{Bean, BeanAccess, ExecutableChecker, ModificationBatch, PropertyAccess, Result, ServiceError};
use execution::ExecutionCallback;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Executor invocado una vez por bean. Con entrada vacía se invoca una
/// única vez con `None` (semántica de creación). Un resultado `None` no se
/// acumula.
pub trait SingleBeanExecutor<B: Bean>: Send + Sync {
    fn execute(&self, bean: Option<B>, parameter: &JsonValue, execution: &dyn ExecutionCallback) -> Result<Option<B>>;
}

/// Executor invocado una vez con la lista completa de beans.
pub trait ListBeanExecutor<B: Bean>: Send + Sync {
    fn execute(&self, beans: Vec<B>, parameter: &JsonValue, execution: &dyn ExecutionCallback) -> Result<Vec<B>>;
}

pub enum BeanExecutor<B: Bean> {
    List(Arc<dyn ListBeanExecutor<B>>),
    Single(Arc<dyn SingleBeanExecutor<B>>),
}

impl<B: Bean> Clone for BeanExecutor<B> {
    fn clone(&self) -> Self {
        match self {
            BeanExecutor::List(e) => BeanExecutor::List(e.clone()),
            BeanExecutor::Single(e) => BeanExecutor::Single(e.clone()),
        }
    }
}

/// Política de consistencia aplicada a las claves antes de ejecutar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub allow_stale_beans: bool,
    pub allow_deleted_beans: bool,
}

/// Executor junto con su comprobación de ejecutabilidad y su política.
pub struct ExecutorDescriptor<B: Bean> {
    pub executor: BeanExecutor<B>,
    pub checker: Option<Arc<dyn ExecutableChecker<B>>>,
    pub policy: ExecutionPolicy,
}

impl<B: Bean> Clone for ExecutorDescriptor<B> {
    fn clone(&self) -> Self {
        Self { executor: self.executor.clone(),
               checker: self.checker.clone(),
               policy: self.policy }
    }
}

impl<B: Bean> ExecutorDescriptor<B> {
    pub fn single(executor: Arc<dyn SingleBeanExecutor<B>>) -> Self {
        Self { executor: BeanExecutor::Single(executor),
               checker: None,
               policy: ExecutionPolicy::default() }
    }

    pub fn list(executor: Arc<dyn ListBeanExecutor<B>>) -> Self {
        Self { executor: BeanExecutor::List(executor),
               checker: None,
               policy: ExecutionPolicy::default() }
    }

    /// Executor por bean a partir de un closure.
    pub fn single_fn<F>(f: F) -> Self
        where F: Fn(Option<B>, &JsonValue, &dyn ExecutionCallback) -> Result<Option<B>> + Send + Sync + 'static
    {
        Self::single(Arc::new(FnSingleExecutor(f)))
    }

    /// Executor de lista a partir de un closure.
    pub fn list_fn<F>(f: F) -> Self
        where F: Fn(Vec<B>, &JsonValue, &dyn ExecutionCallback) -> Result<Vec<B>> + Send + Sync + 'static
    {
        Self::list(Arc::new(FnListExecutor(f)))
    }

    pub fn with_checker(mut self, checker: Arc<dyn ExecutableChecker<B>>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

struct FnSingleExecutor<F>(F);

impl<B, F> SingleBeanExecutor<B> for FnSingleExecutor<F>
    where B: Bean,
          F: Fn(Option<B>, &JsonValue, &dyn ExecutionCallback) -> Result<Option<B>> + Send + Sync
{
    fn execute(&self, bean: Option<B>, parameter: &JsonValue, execution: &dyn ExecutionCallback) -> Result<Option<B>> {
        (self.0)(bean, parameter, execution)
    }
}

struct FnListExecutor<F>(F);

impl<B, F> ListBeanExecutor<B> for FnListExecutor<F>
    where B: Bean,
          F: Fn(Vec<B>, &JsonValue, &dyn ExecutionCallback) -> Result<Vec<B>> + Send + Sync
{
    fn execute(&self, beans: Vec<B>, parameter: &JsonValue, execution: &dyn ExecutionCallback) -> Result<Vec<B>> {
        (self.0)(beans, parameter, execution)
    }
}

/// Aplica las modificaciones del lote a cada bean y lo guarda.
pub struct ModificationExecutor<B: Bean> {
    access: Arc<dyn BeanAccess<B>>,
    batch: ModificationBatch,
}

impl<B: Bean> ModificationExecutor<B> {
    pub fn new(access: Arc<dyn BeanAccess<B>>, batch: ModificationBatch) -> Self {
        Self { access, batch }
    }
}

impl<B> SingleBeanExecutor<B> for ModificationExecutor<B> where B: Bean + PropertyAccess
{
    fn execute(&self, bean: Option<B>, _parameter: &JsonValue, _execution: &dyn ExecutionCallback) -> Result<Option<B>> {
        let mut bean = bean.ok_or_else(|| ServiceError::Service("update sin bean de entrada".into()))?;
        for m in self.batch.for_bean(&bean.id()) {
            bean.set_property(&m.property_name, m.new_value.clone())?;
        }
        self.access.save(&mut bean)?;
        Ok(Some(bean))
    }
}

/// Elimina cada bean; no produce resultados.
pub struct DeleteExecutor<B: Bean> {
    access: Arc<dyn BeanAccess<B>>,
}

impl<B: Bean> DeleteExecutor<B> {
    pub fn new(access: Arc<dyn BeanAccess<B>>) -> Self {
        Self { access }
    }
}

impl<B: Bean> SingleBeanExecutor<B> for DeleteExecutor<B> {
    fn execute(&self, bean: Option<B>, _parameter: &JsonValue, _execution: &dyn ExecutionCallback) -> Result<Option<B>> {
        let bean = bean.ok_or_else(|| ServiceError::Service("delete sin bean de entrada".into()))?;
        self.access.delete(&bean.id())?;
        Ok(None)
    }
}
