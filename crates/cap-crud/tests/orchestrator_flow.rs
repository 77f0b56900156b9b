use cap_crud::{BeanCrudService, CrudOrchestrator, CrudService, ExecutionPolicy, ExecutorDescriptor, MutationContext,
               UpdateInterceptor};
use cap_domain::{Bean, BeanId, BeanKey, BeanModification, ExecutableChecker, ExecutableState, InMemoryBeanStore,
                 ModificationBatch, SerdeDtoFactory, ServiceError, Severity, StubBean, StubValidator};
use execution::stubs::{ChannelResultCallback, RecordingExecutionCallback};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn seeded(n: usize) -> (Arc<InMemoryBeanStore<StubBean>>, Vec<BeanKey>) {
  let store = Arc::new(InMemoryBeanStore::new());
  let keys = (0..n).map(|i| {
                     let bean = StubBean::new(&format!("b{}", i), "g", None);
                     store.insert(bean.clone());
                     bean.key()
                   })
                   .collect();
  (store, keys)
}

fn orchestrator(store: &Arc<InMemoryBeanStore<StubBean>>) -> CrudOrchestrator<StubBean> {
  CrudOrchestrator::new(store.clone(), Arc::new(SerdeDtoFactory::new())).with_validator(Arc::new(StubValidator))
}

fn rename(keys: &[BeanKey], name: &str) -> ModificationBatch {
  keys.iter().map(|k| BeanModification::new(k.id, "name", JsonValue::Null, json!(name))).collect()
}

struct RejectNamed(&'static str);

impl ExecutableChecker<StubBean> for RejectNamed {
  fn check(&self, bean: &StubBean) -> ExecutableState {
    if bean.name == self.0 {
      ExecutableState::not_executable("bloqueado")
    } else {
      ExecutableState::executable()
    }
  }
}

#[test]
fn list_executor_returns_dtos_in_key_order() {
  let (store, keys) = seeded(5);
  let orch = orchestrator(&store);
  let mut shuffled = keys.clone();
  shuffled.reverse();
  let execution = RecordingExecutionCallback::new();
  let descriptor = ExecutorDescriptor::list_fn(|beans: Vec<StubBean>, _, _| Ok(beans));
  let dtos = orch.execute(&shuffled, &JsonValue::Null, &descriptor, execution.as_ref()).expect("execute");
  let ids: Vec<BeanId> = dtos.iter().map(|d| d.id).collect();
  let expected: Vec<BeanId> = shuffled.iter().map(|k| k.id).collect();
  assert_eq!(ids, expected);
  assert_eq!(store.flush_count(), 1);
}

#[test]
fn stale_key_fails_before_the_executor_and_nothing_is_flushed() {
  let (store, mut keys) = seeded(3);
  keys[2].version = 7;
  let orch = orchestrator(&store);
  let calls = Arc::new(AtomicUsize::new(0));
  let c = calls.clone();
  let descriptor = ExecutorDescriptor::single_fn(move |bean: Option<StubBean>, _, _| {
    c.fetch_add(1, Ordering::SeqCst);
    Ok(bean)
  });
  let execution = RecordingExecutionCallback::new();
  let res = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref());
  assert_eq!(res, Err(ServiceError::StaleBean(keys[2].id)));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert_eq!(store.flush_count(), 0);
}

#[test]
fn missing_bean_is_reported_as_deleted_even_when_stale_is_allowed() {
  let (store, mut keys) = seeded(2);
  let ghost = BeanKey::new(BeanId::new(), 0);
  keys.push(ghost);
  let orch = orchestrator(&store);
  let execution = RecordingExecutionCallback::new();
  let relaxed = ExecutionPolicy { allow_stale_beans: true,
                                  allow_deleted_beans: false };
  let descriptor = ExecutorDescriptor::list_fn(|beans: Vec<StubBean>, _, _| Ok(beans)).with_policy(relaxed);
  let res = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref());
  assert_eq!(res, Err(ServiceError::DeletedBean(ghost.id)));
}

#[test]
fn fully_relaxed_policy_skips_missing_beans() {
  let (store, mut keys) = seeded(2);
  keys[0].version = 4;
  keys.push(BeanKey::new(BeanId::new(), 0));
  let orch = orchestrator(&store);
  let execution = RecordingExecutionCallback::new();
  let relaxed = ExecutionPolicy { allow_stale_beans: true,
                                  allow_deleted_beans: true };
  let descriptor = ExecutorDescriptor::single_fn(|bean: Option<StubBean>, _, _| Ok(bean)).with_policy(relaxed);
  let dtos = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref()).expect("execute");
  assert_eq!(dtos.len(), 2);
}

#[test]
fn keys_that_all_resolve_to_nothing_never_invoke_the_executor() {
  let (store, _) = seeded(1);
  let keys = vec![BeanKey::new(BeanId::new(), 0), BeanKey::new(BeanId::new(), 3)];
  let orch = orchestrator(&store);
  let calls = Arc::new(AtomicUsize::new(0));
  let c = calls.clone();
  let relaxed = ExecutionPolicy { allow_stale_beans: true,
                                  allow_deleted_beans: true };
  let descriptor = ExecutorDescriptor::single_fn(move |bean: Option<StubBean>, _, _| {
                     c.fetch_add(1, Ordering::SeqCst);
                     Ok(bean)
                   }).with_policy(relaxed);
  let execution = RecordingExecutionCallback::new();
  let dtos = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref()).expect("execute");
  assert!(dtos.is_empty());
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert_eq!(store.flush_count(), 1);
}

#[test]
fn update_applies_modifications_and_bumps_versions() {
  let (store, keys) = seeded(3);
  let orch = orchestrator(&store);
  let execution = RecordingExecutionCallback::new();
  let dtos = orch.update(&keys, &rename(&keys, "nuevo"), execution.as_ref()).expect("update");
  assert_eq!(dtos.len(), 3);
  for (dto, key) in dtos.iter().zip(&keys) {
    assert_eq!(dto.id, key.id);
    assert_eq!(dto.version, 1);
    assert_eq!(dto.property("name"), "nuevo");
  }
  assert_eq!(execution.worked_total(), 3);
}

#[test]
fn executable_check_failure_stops_the_loop_without_rollback() {
  let (store, keys) = seeded(3);
  let orch = orchestrator(&store);
  let calls = Arc::new(AtomicUsize::new(0));
  let c = calls.clone();
  let descriptor = ExecutorDescriptor::single_fn(move |bean: Option<StubBean>, _, _| {
                     c.fetch_add(1, Ordering::SeqCst);
                     Ok(bean)
                   }).with_checker(Arc::new(RejectNamed("b1")));
  let execution = RecordingExecutionCallback::new();
  let res = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref());
  assert_eq!(res,
             Err(ServiceError::ExecutableCheck { id: keys[1].id,
                                                 reason: Some("bloqueado".into()) }));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(store.flush_count(), 0);
}

#[test]
fn invalid_result_is_reported_with_its_worst_validation() {
  let (store, keys) = seeded(2);
  let orch = orchestrator(&store);
  let execution = RecordingExecutionCallback::new();
  match orch.update(&keys, &rename(&keys[1..], ""), execution.as_ref()) {
    Err(ServiceError::BeanValidation { id, worst }) => {
      assert_eq!(id, keys[1].id);
      assert_eq!(worst.severity, Severity::Error);
      assert_eq!(worst.property.as_deref(), Some("name"));
    }
    other => panic!("se esperaba BeanValidation, llegó {:?}", other),
  }
  assert_eq!(store.flush_count(), 0);
}

#[test]
fn canceled_execution_never_reaches_the_executor() {
  let (store, keys) = seeded(2);
  let orch = orchestrator(&store);
  let calls = Arc::new(AtomicUsize::new(0));
  let c = calls.clone();
  let descriptor = ExecutorDescriptor::list_fn(move |beans: Vec<StubBean>, _, _| {
    c.fetch_add(1, Ordering::SeqCst);
    Ok(beans)
  });
  let execution = RecordingExecutionCallback::new();
  execution.cancel();
  let res = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref());
  assert_eq!(res, Err(ServiceError::Canceled));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancellation_during_the_first_bean_stops_the_loop() {
  let (store, keys) = seeded(3);
  let orch = orchestrator(&store);
  let execution = RecordingExecutionCallback::new();
  let calls = Arc::new(AtomicUsize::new(0));
  let c = calls.clone();
  let canceler = execution.clone();
  let descriptor = ExecutorDescriptor::single_fn(move |bean: Option<StubBean>, _, _| {
    c.fetch_add(1, Ordering::SeqCst);
    canceler.cancel();
    Ok(bean)
  });
  let res = orch.execute(&keys, &JsonValue::Null, &descriptor, execution.as_ref());
  assert_eq!(res, Err(ServiceError::Canceled));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(store.flush_count(), 0);
  assert_eq!(execution.worked_total(), 0);
}

#[test]
fn read_skips_missing_keys_and_ignores_versions() {
  let (store, mut keys) = seeded(2);
  keys[0].version = 9;
  keys.insert(1, BeanKey::new(BeanId::new(), 0));
  let orch = orchestrator(&store);
  let dtos = orch.read(&keys).expect("read");
  assert_eq!(dtos.iter().map(|d| d.id).collect::<Vec<_>>(), vec![keys[0].id, keys[2].id]);
}

struct Tracing {
  name: &'static str,
  log: Arc<Mutex<Vec<String>>>,
}

impl UpdateInterceptor<StubBean> for Tracing {
  fn before_update(&self, context: &MutationContext<'_, StubBean>, beans: &[StubBean]) -> cap_domain::Result<()> {
    assert_eq!(context.previous.len(), beans.len());
    self.log.lock().unwrap().push(format!("before-{}", self.name));
    Ok(())
  }

  fn after_update(&self, _context: &MutationContext<'_, StubBean>, beans: &mut [StubBean]) -> cap_domain::Result<()> {
    self.log.lock().unwrap().push(format!("after-{}-{}", self.name, beans.len()));
    Ok(())
  }
}

#[test]
fn interceptors_run_in_registration_order() {
  let (store, keys) = seeded(2);
  let log = Arc::new(Mutex::new(Vec::new()));
  let orch = orchestrator(&store).with_interceptor(Arc::new(Tracing { name: "a", log: log.clone() }))
                                 .with_interceptor(Arc::new(Tracing { name: "b", log: log.clone() }));
  let execution = RecordingExecutionCallback::new();
  orch.delete(&keys, execution.as_ref()).expect("delete");
  assert_eq!(*log.lock().unwrap(), vec!["before-a", "before-b", "after-a-0", "after-b-0"]);
  assert!(store.is_empty());
}

#[test]
fn service_reports_unknown_executor_through_the_callback() {
  let (store, keys) = seeded(1);
  let service = CrudService::builder(store.clone(), Arc::new(SerdeDtoFactory::new())).build();
  let (result, rx) = ChannelResultCallback::channel();
  service.execute(keys, "nope".into(), JsonValue::Null, RecordingExecutionCallback::new(), result);
  assert!(matches!(rx.try_recv(), Ok(Err(ServiceError::Service(_)))));
}

#[test]
fn service_without_creator_reports_an_error() {
  let store = Arc::new(InMemoryBeanStore::<StubBean>::new());
  let service = CrudService::builder(store, Arc::new(SerdeDtoFactory::new())).build();
  let (result, rx) = ChannelResultCallback::channel();
  service.create(json!({}), RecordingExecutionCallback::new(), result);
  assert!(matches!(rx.try_recv(), Ok(Err(ServiceError::Service(_)))));
}

#[test]
fn service_drops_cancellation_silently() {
  let (store, keys) = seeded(2);
  let service = CrudService::builder(store.clone(), Arc::new(SerdeDtoFactory::new())).build();
  let execution = RecordingExecutionCallback::new();
  execution.cancel();
  let (result, rx) = ChannelResultCallback::channel();
  service.delete(keys, execution, result);
  assert!(rx.try_recv().is_err());
  assert_eq!(store.len(), 2);
}

#[test]
fn service_delivers_named_executor_results() {
  let (store, keys) = seeded(2);
  let service = CrudService::builder(store.clone(), Arc::new(SerdeDtoFactory::new()))
    .executor("eco", ExecutorDescriptor::list_fn(|beans: Vec<StubBean>, _, _| Ok(beans)))
    .build();
  let (result, rx) = ChannelResultCallback::channel();
  service.execute(keys.clone(), "eco".into(), JsonValue::Null, RecordingExecutionCallback::new(), result);
  let dtos = rx.try_recv().expect("entregado").expect("ok");
  assert_eq!(dtos.iter().map(|d| d.key()).collect::<Vec<_>>(), keys);
}
