use cap_crud::{AsyncCrudService, BeanCrudService, CrudService, DtoResultCallback, ExecutorDescriptor,
               OrderConsistencyMaintainer};
use cap_domain::{Bean, BeanAccess, BeanDto, BeanFilter, BeanModification, BeanReader, InMemoryBeanStore,
                 SerdeDtoFactory, ServiceError, SortKey, StubBean, StubGroupMapper, StubValidator};
use execution::stubs::ChannelResultCallback;
use execution::{DefaultExecutionCallback, NoopInterceptor, RuntimeConfig, ServiceRuntime};
use log::{info, warn};
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

const RESULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Menú interactivo sobre una lista ordenada de elementos agrupados,
/// servida por `AsyncCrudService` con almacenamiento en memoria.
///
/// Opciones soportadas:
/// 1) Ver un grupo (orden, nombre, versión)
/// 2) Crear elemento
/// 3) Mover elemento a otra posición
/// 4) Mover elemento a otro grupo
/// 5) Eliminar elemento
/// 6) Salir
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = RuntimeConfig::from_env()?;
    let runtime = ServiceRuntime::new(config)?;
    info!("runtime iniciado: {:?}", runtime.config());

    let store = Arc::new(InMemoryBeanStore::<StubBean>::new().with_unique_constraint(&["group", "name"]));
    let maintainer = OrderConsistencyMaintainer::builder().store(store.clone())
                                                          .group_mapper(Arc::new(StubGroupMapper::new()))
                                                          .build()?;
    let access = store.clone();
    let creator = ExecutorDescriptor::single_fn(move |_: Option<StubBean>, parameter: &JsonValue, _| {
        let name = parameter["name"].as_str().unwrap_or_default();
        let group = parameter["group"].as_str().unwrap_or("inbox");
        let mut bean = StubBean::new(name, group, None);
        access.save(&mut bean)?;
        Ok(Some(bean))
    });
    let crud = CrudService::builder(store.clone(), Arc::new(SerdeDtoFactory::new())).validator(Arc::new(StubValidator))
                                                                                   .order_maintainer(maintainer)
                                                                                   .creator(creator)
                                                                                   .build();
    let service = AsyncCrudService::decorate(Arc::new(crud),
                                             runtime.clone(),
                                             runtime.config().progress_delay,
                                             Arc::new(NoopInterceptor));

    loop {
        println!("\n== Listas ordenadas ==");
        println!("1) Ver grupo");
        println!("2) Crear elemento");
        println!("3) Mover elemento a otra posición");
        println!("4) Mover elemento a otro grupo");
        println!("5) Eliminar elemento");
        println!("6) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                let group = prompt("Grupo: ")?;
                print_group(store.as_ref(), group.trim())?;
            }
            "2" => {
                let group = prompt("Grupo: ")?;
                let name = prompt("Nombre: ")?;
                let parameter = json!({"name": name.trim(), "group": group.trim()});
                report("creado", call(|r| service.create(parameter, DefaultExecutionCallback::new(), r)));
            }
            "3" => {
                let group = prompt("Grupo: ")?;
                let Some(bean) = pick(store.as_ref(), group.trim())? else {
                    continue;
                };
                let target: u32 = match prompt("Nueva posición: ")?.trim().parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Posición inválida");
                        continue;
                    }
                };
                let modification =
                    BeanModification::new(bean.id(), "order_number", json!(bean.order_number), json!(target));
                report("movido",
                       call(|r| service.update(vec![bean.key()], vec![modification], DefaultExecutionCallback::new(), r)));
            }
            "4" => {
                let group = prompt("Grupo actual: ")?;
                let Some(bean) = pick(store.as_ref(), group.trim())? else {
                    continue;
                };
                let target = prompt("Grupo destino: ")?;
                let modification = BeanModification::new(bean.id(), "group", json!(bean.group), json!(target.trim()));
                report("movido",
                       call(|r| service.update(vec![bean.key()], vec![modification], DefaultExecutionCallback::new(), r)));
            }
            "5" => {
                let group = prompt("Grupo: ")?;
                let Some(bean) = pick(store.as_ref(), group.trim())? else {
                    continue;
                };
                let confirm = prompt(&format!("Confirma borrado de '{}'? escribir 'yes' para confirmar: ", bean.name))?;
                if confirm.trim().to_lowercase() == "yes" {
                    report("eliminado",
                           call(|r| service.delete(vec![bean.key()], DefaultExecutionCallback::new(), r)));
                } else {
                    println!("Borrado cancelado");
                }
            }
            "6" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    let pending = runtime.shutdown();
    if pending > 0 {
        warn!("{} llamadas seguían en curso al salir", pending);
    } else {
        info!("runtime detenido sin llamadas pendientes");
    }
    Ok(())
}

/// Invoca una operación asíncrona y espera su resultado. `None` si no llegó
/// (cancelada o fuera de plazo).
fn call<F>(operation: F) -> Option<Result<Vec<BeanDto>, ServiceError>>
    where F: FnOnce(DtoResultCallback)
{
    let (result, rx) = ChannelResultCallback::channel();
    operation(result);
    rx.recv_timeout(RESULT_TIMEOUT).ok()
}

fn report(action: &str, outcome: Option<Result<Vec<BeanDto>, ServiceError>>) {
    match outcome {
        Some(Ok(dtos)) => {
            for dto in dtos {
                println!("{}: {} (orden {}, versión {})",
                         action,
                         dto.property("name"),
                         dto.property("order_number"),
                         dto.version);
            }
        }
        Some(Err(e)) => eprintln!("Error: {}", e),
        None => eprintln!("Sin resultado"),
    }
}

fn group_members(store: &InMemoryBeanStore<StubBean>, group: &str) -> Result<Vec<StubBean>, ServiceError> {
    store.read(&BeanFilter::new().equals("group", json!(group)),
               &[SortKey::asc("order_number"), SortKey::asc("name")],
               usize::MAX)
}

fn print_group(store: &InMemoryBeanStore<StubBean>, group: &str) -> Result<(), Box<dyn Error>> {
    let members = group_members(store, group)?;
    if members.is_empty() {
        println!("(grupo vacío)");
    }
    println!("\nORDEN | NOMBRE                         | VERSIÓN");
    println!("-----------------------------------------------");
    for (i, bean) in members.iter().enumerate() {
        let order = bean.order_number.map(|o| o.to_string()).unwrap_or_else(|| "-".into());
        println!("{:>5} | {:<30} | {}   [{}]", order, bean.name, bean.version, i);
    }
    Ok(())
}

/// Muestra el grupo y pide un elemento por su índice en el listado.
fn pick(store: &InMemoryBeanStore<StubBean>, group: &str) -> Result<Option<StubBean>, Box<dyn Error>> {
    print_group(store, group)?;
    let members = group_members(store, group)?;
    let index: usize = match prompt("Índice del elemento: ")?.trim().parse() {
        Ok(i) => i,
        Err(_) => {
            eprintln!("Índice inválido");
            return Ok(None);
        }
    };
    let picked = members.into_iter().nth(index);
    if picked.is_none() {
        eprintln!("No hay elemento {}", index);
    }
    Ok(picked)
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
