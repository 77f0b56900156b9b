// Archivo: orchestrator.rs
// Propósito: pipeline común de create/update/delete/execute.
//
// Pasos por llamada:
//   1. carga de los beans por id (sin acceso al almacenamiento si no hay
//      claves) y reordenación según el orden de las claves;
//   2. política de obsolescencia/eliminación del descriptor;
//   3. `before_update` de cada interceptor;
//   4. executor (lista completa o bean a bean con `ExecutableChecker`);
//   5. validación de cada resultado;
//   6. `after_update` de cada interceptor;
//   7. flush y conversión a DTO.
// La cancelación se consulta antes y después de la carga y de cada unidad
// de trabajo del executor. Los pasos ya aplicados no se deshacen.
use crate::executor::{BeanExecutor, DeleteExecutor, ExecutionPolicy, ExecutorDescriptor, ModificationExecutor};
use crate::interceptor::{MutationContext, MutationKind, UpdateInterceptor};
use cap_domain::{Bean, BeanAccess, BeanDto, BeanId, BeanKey, BeanValidator, DtoFactory, ModificationBatch,
                 PropertyAccess, Result, ServiceError, ValidationResult};
use execution::{check_canceled, ExecutionCallback};
use log::{debug, info};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct CrudOrchestrator<B: Bean> {
    access: Arc<dyn BeanAccess<B>>,
    dto_factory: Arc<dyn DtoFactory<B>>,
    validator: Option<Arc<dyn BeanValidator<B>>>,
    interceptors: Vec<Arc<dyn UpdateInterceptor<B>>>,
}

impl<B: Bean> CrudOrchestrator<B> {
    pub fn new(access: Arc<dyn BeanAccess<B>>, dto_factory: Arc<dyn DtoFactory<B>>) -> Self {
        Self { access,
               dto_factory,
               validator: None,
               interceptors: Vec::new() }
    }

    pub fn with_validator(mut self, validator: Arc<dyn BeanValidator<B>>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Los interceptores se invocan en el orden en que se añaden.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn UpdateInterceptor<B>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn access(&self) -> &Arc<dyn BeanAccess<B>> {
        &self.access
    }

    /// DTOs de los beans existentes, en el orden de `keys`. Las claves sin
    /// bean se omiten y la versión no se comprueba.
    pub fn read(&self, keys: &[BeanKey]) -> Result<Vec<BeanDto>> {
        let beans = self.load(keys)?;
        self.to_dtos(&beans)
    }

    /// Ejecuta el creador sobre una entrada vacía.
    pub fn create(&self,
                  parameter: &JsonValue,
                  creator: &ExecutorDescriptor<B>,
                  execution: &dyn ExecutionCallback)
                  -> Result<Vec<BeanDto>> {
        self.run(MutationKind::Create, &[], parameter, creator, None, execution)
    }

    pub fn delete(&self, keys: &[BeanKey], execution: &dyn ExecutionCallback) -> Result<Vec<BeanDto>> {
        let descriptor = ExecutorDescriptor::single(Arc::new(DeleteExecutor::new(self.access.clone())));
        self.run(MutationKind::Delete, keys, &JsonValue::Null, &descriptor, None, execution)
    }

    /// Ejecuta un executor con nombre sobre `keys`.
    pub fn execute(&self,
                   keys: &[BeanKey],
                   parameter: &JsonValue,
                   descriptor: &ExecutorDescriptor<B>,
                   execution: &dyn ExecutionCallback)
                   -> Result<Vec<BeanDto>> {
        self.run(MutationKind::Execute, keys, parameter, descriptor, None, execution)
    }

    fn run(&self,
           kind: MutationKind,
           keys: &[BeanKey],
           parameter: &JsonValue,
           descriptor: &ExecutorDescriptor<B>,
           modifications: Option<&ModificationBatch>,
           execution: &dyn ExecutionCallback)
           -> Result<Vec<BeanDto>> {
        debug!("{}: {} claves", kind.label(), keys.len());
        execution.set_description(&format!("{} ({} beans)", kind.label(), keys.len()));
        check_canceled(execution)?;
        let beans = self.load(keys)?;
        check_canceled(execution)?;
        check_policy(keys, &beans, descriptor.policy)?;

        let previous = beans.clone();
        let context = MutationContext { kind,
                                        modifications,
                                        previous: &previous };
        for interceptor in &self.interceptors {
            interceptor.before_update(&context, &beans)?;
        }

        // La invocación sin bean depende de las claves pedidas, no de los
        // beans cargados: claves que no resuelven a ningún bean no invocan
        // al executor.
        let mut results = self.run_executor(beans, keys.is_empty(), parameter, descriptor, execution)?;
        self.validate(&results)?;

        for interceptor in &self.interceptors {
            interceptor.after_update(&context, &mut results)?;
        }
        self.access.flush()?;
        info!("{} completado: {} resultados", kind.label(), results.len());
        self.to_dtos(&results)
    }

    /// Carga los beans de `keys` en el orden de las claves, sin duplicados.
    fn load(&self, keys: &[BeanKey]) -> Result<Vec<B>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let ids: Vec<BeanId> = keys.iter().map(|k| k.id).filter(|id| seen.insert(*id)).collect();
        let mut by_id: HashMap<BeanId, B> = self.access.load(&ids)?.into_iter().map(|b| (b.id(), b)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Con `no_input` un executor por bean se invoca una única vez sin bean.
    fn run_executor(&self,
                    beans: Vec<B>,
                    no_input: bool,
                    parameter: &JsonValue,
                    descriptor: &ExecutorDescriptor<B>,
                    execution: &dyn ExecutionCallback)
                    -> Result<Vec<B>> {
        match &descriptor.executor {
            BeanExecutor::List(executor) => {
                execution.set_total_step_count(1);
                check_canceled(execution)?;
                let results = executor.execute(beans, parameter, execution)?;
                check_canceled(execution)?;
                execution.worked(1);
                Ok(results)
            }
            BeanExecutor::Single(executor) if no_input => {
                execution.set_total_step_count(1);
                check_canceled(execution)?;
                let result = executor.execute(None, parameter, execution)?;
                check_canceled(execution)?;
                execution.worked(1);
                Ok(result.into_iter().collect())
            }
            BeanExecutor::Single(executor) => {
                execution.set_total_step_count(beans.len() as u64);
                let mut results = Vec::with_capacity(beans.len());
                for bean in beans {
                    check_canceled(execution)?;
                    if let Some(checker) = &descriptor.checker {
                        let state = checker.check(&bean);
                        if !state.executable {
                            return Err(ServiceError::ExecutableCheck { id: bean.id(),
                                                                       reason: state.reason });
                        }
                    }
                    if let Some(result) = executor.execute(Some(bean), parameter, execution)? {
                        results.push(result);
                    }
                    check_canceled(execution)?;
                    execution.worked(1);
                }
                Ok(results)
            }
        }
    }

    fn validate(&self, beans: &[B]) -> Result<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        for bean in beans {
            let worst = ValidationResult::worst(&validator.validate(bean));
            if !worst.is_valid() {
                return Err(ServiceError::BeanValidation { id: bean.id(),
                                                          worst });
            }
        }
        Ok(())
    }

    fn to_dtos(&self, beans: &[B]) -> Result<Vec<BeanDto>> {
        beans.iter().map(|b| self.dto_factory.create_dto(b)).collect()
    }
}

impl<B> CrudOrchestrator<B> where B: Bean + PropertyAccess
{
    /// Aplica `modifications` a los beans de `keys` y los guarda.
    pub fn update(&self,
                  keys: &[BeanKey],
                  modifications: &ModificationBatch,
                  execution: &dyn ExecutionCallback)
                  -> Result<Vec<BeanDto>> {
        let executor = ModificationExecutor::new(self.access.clone(), modifications.clone());
        let descriptor = ExecutorDescriptor::single(Arc::new(executor));
        self.run(MutationKind::Update,
                 keys,
                 &JsonValue::Null,
                 &descriptor,
                 Some(modifications),
                 execution)
    }
}

/// Sin `allow_stale_beans`, cada clave debe resolver a un bean cargado con
/// la misma versión. Con `allow_stale_beans` pero sin
/// `allow_deleted_beans`, sólo se exige que no falte ninguno.
fn check_policy<B: Bean>(keys: &[BeanKey], beans: &[B], policy: ExecutionPolicy) -> Result<()> {
    if policy.allow_stale_beans && policy.allow_deleted_beans {
        return Ok(());
    }
    let versions: HashMap<BeanId, i64> = beans.iter().map(|b| (b.id(), b.version())).collect();
    for key in keys {
        match versions.get(&key.id) {
            None => return Err(ServiceError::DeletedBean(key.id)),
            Some(version) if !policy.allow_stale_beans && *version != key.version => {
                return Err(ServiceError::StaleBean(key.id));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
