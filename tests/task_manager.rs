use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use futures::FutureExt;
use pollster::block_on;
use worker_task_engine::{
    demo::{self, MeshWorker, DEMO_SOUP},
    task_management::{
        execute_fn, init_fn, DependencyDescription, ExecuteFunction, TaskWorker, WorkerFunctions,
    },
    transport::{cmd, DataTransport, Envelope, Transport, TypedArray},
    Pending, TaskError, TaskManager, TaskManagerConfig,
};

fn threaded(max_parallel_executions: usize) -> TaskManager {
    TaskManager::new(TaskManagerConfig {
        max_parallel_executions,
        worker_ceiling: Some(8),
        ..Default::default()
    })
}

fn register(manager: &TaskManager, task_type: &str, functions: WorkerFunctions, fallback: bool) {
    assert!(manager.register_task_type(
        task_type,
        functions.init,
        functions.execute,
        functions.com_routing,
        fallback,
        Vec::new(),
    ));
}

fn init(manager: &TaskManager, task_type: &str) {
    block_on(
        manager
            .init_task_type(task_type, DataTransport::new(cmd::INIT, 0))
            .unwrap(),
    )
    .unwrap();
}

fn request(value: i64) -> DataTransport {
    let mut request = DataTransport::new(cmd::EXECUTE, 0);
    request.set_param("value", value).unwrap();
    request
}

fn value_of(reply: Envelope) -> i64 {
    DataTransport::from_envelope(reply)
        .unwrap()
        .param_as("value")
        .unwrap()
}

/// Counts how many executions overlap, sleeping inside each one.
fn overlapping(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> ExecuteFunction {
    execute_fn(move |scope, id, _| {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        active.fetch_sub(1, Ordering::SeqCst);
        scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
        Ok(())
    })
}

#[test]
fn echo_runs_on_background_threads() {
    let manager = threaded(4);
    register(&manager, demo::ECHO_TASK, demo::echo_functions(), false);
    init(&manager, demo::ECHO_TASK);

    let reply = block_on(
        manager
            .enqueue_for_execution(demo::ECHO_TASK, request(21))
            .unwrap(),
    )
    .unwrap();

    assert_eq!(reply.cmd(), cmd::EXEC_COMPLETE);
    assert_eq!(value_of(reply), 42);
    assert!(manager.supports_background_execution());
    assert_eq!(manager.actual_execution_count(), 0);
}

#[test]
fn executions_never_exceed_the_pool_size() {
    let manager = threaded(8);
    let (active, peak) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    register(
        &manager,
        "slow",
        WorkerFunctions::new(overlapping(active, peak.clone())),
        false,
    );
    assert!(manager.set_maximum_count("slow", 2));
    init(&manager, "slow");
    assert_eq!(manager.pool_snapshot("slow").unwrap().instances, 2);

    let pendings: Vec<Pending<Envelope>> = (0..8)
        .map(|n| manager.enqueue_for_execution("slow", request(n)).unwrap())
        .collect();
    for pending in pendings {
        block_on(pending).unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    let snapshot = manager.pool_snapshot("slow").unwrap();
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.available, 2);
}

#[test]
fn global_admission_limits_parallel_executions() {
    let manager = threaded(2);
    let (active, peak) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    register(
        &manager,
        "slow",
        WorkerFunctions::new(overlapping(active, peak.clone())),
        false,
    );
    manager.set_maximum_count("slow", 4);
    init(&manager, "slow");

    let pendings: Vec<_> = (0..8)
        .map(|n| manager.enqueue_for_execution("slow", request(n)).unwrap())
        .collect();
    assert!(manager.actual_execution_count() <= 2);
    for pending in pendings {
        block_on(pending).unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(manager.queued_execution_count(), 0);
}

#[test]
fn requests_of_one_type_start_in_fifo_order() {
    let manager = threaded(4);
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    register(
        &manager,
        "ordered",
        WorkerFunctions::new(execute_fn(move |scope, id, config| {
            let value: i64 = config.param_as("value")?;
            seen.lock().unwrap().push(value);
            scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
            Ok(())
        })),
        false,
    );
    manager.set_maximum_count("ordered", 1);
    init(&manager, "ordered");

    let pendings: Vec<_> = (0..6)
        .map(|n| manager.enqueue_for_execution("ordered", request(n)).unwrap())
        .collect();
    for pending in pendings {
        block_on(pending).unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn fallback_type_runs_inline_on_one_context() {
    let manager = threaded(4);
    register(&manager, "inline", demo::echo_functions(), true);
    manager.set_maximum_count("inline", 4);
    init(&manager, "inline");

    assert_eq!(manager.pool_snapshot("inline").unwrap().instances, 1);
    let reply = manager
        .enqueue_for_execution("inline", request(5))
        .unwrap()
        .now_or_never()
        .expect("inline executions complete before enqueue returns")
        .unwrap();
    assert_eq!(value_of(reply), 10);
}

#[test]
fn dispose_rejects_queued_and_running_requests() {
    let manager = threaded(4);
    register(
        &manager,
        "sleepy",
        WorkerFunctions::new(execute_fn(|scope, id, _| {
            thread::sleep(Duration::from_millis(100));
            scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
            Ok(())
        })),
        false,
    );
    manager.set_maximum_count("sleepy", 1);
    init(&manager, "sleepy");

    let pendings: Vec<_> = (0..3)
        .map(|n| manager.enqueue_for_execution("sleepy", request(n)).unwrap())
        .collect();
    manager.dispose().dispose();

    for pending in pendings {
        assert!(matches!(block_on(pending), Err(TaskError::Disposed)));
    }
    assert!(!manager.is_task_type_registered("sleepy"));
    assert!(matches!(
        manager.enqueue_for_execution("sleepy", request(0)),
        Err(TaskError::UnknownTaskType(_))
    ));
}

#[test]
fn dispose_rejects_a_pending_initialization() {
    let manager = threaded(4);
    register(
        &manager,
        "slow-init",
        WorkerFunctions::new(demo::echo_functions().execute).with_init(init_fn(|_, _, _| {
            thread::sleep(Duration::from_millis(100));
            Ok(())
        })),
        false,
    );

    let pending = manager
        .init_task_type("slow-init", DataTransport::new(cmd::INIT, 0))
        .unwrap();
    manager.dispose();
    assert!(matches!(block_on(pending), Err(TaskError::Disposed)));
}

#[test]
fn worker_errors_and_panics_only_fail_their_request() {
    let manager = threaded(4);
    register(
        &manager,
        "picky",
        WorkerFunctions::new(execute_fn(|scope, id, config| {
            let value: i64 = config.param_as("value")?;
            if value < 0 {
                return Err(TaskError::worker("negative input"));
            }
            if value == 0 {
                panic!("zero input");
            }
            let mut reply = DataTransport::new(cmd::EXEC_COMPLETE, id);
            reply.set_param("value", value)?;
            scope.post(reply)
        })),
        false,
    );
    manager.set_maximum_count("picky", 1);
    init(&manager, "picky");

    let negative = manager.enqueue_for_execution("picky", request(-1)).unwrap();
    let zero = manager.enqueue_for_execution("picky", request(0)).unwrap();
    let positive = manager.enqueue_for_execution("picky", request(3)).unwrap();

    assert!(matches!(
        block_on(negative),
        Err(TaskError::Execution { ref message, .. }) if message == "negative input"
    ));
    assert!(matches!(
        block_on(zero),
        Err(TaskError::Execution { ref message, .. }) if message == "zero input"
    ));
    assert_eq!(value_of(block_on(positive).unwrap()), 3);
}

#[test]
fn intermediate_messages_reach_the_callback_before_completion() {
    let manager = threaded(4);
    register(
        &manager,
        "progress",
        WorkerFunctions::new(execute_fn(|scope, id, _| {
            for step in 1..=3 {
                let mut update = DataTransport::new(cmd::INTERMEDIATE, id);
                update.set_progress(step as f32 / 3.0)?;
                scope.post(update)?;
            }
            scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
            Ok(())
        })),
        false,
    );
    init(&manager, "progress");

    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let pending = manager
        .enqueue_for_execution_with(
            "progress",
            DataTransport::new(cmd::EXECUTE, 0),
            Some(Arc::new(move |envelope: Envelope| {
                sink.lock().unwrap().push(envelope.main.progress);
            })),
        )
        .unwrap();
    block_on(pending).unwrap();

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 3);
    assert_eq!(updates.last().copied(), Some(1.0));
}

#[test]
fn dependencies_are_loaded_once_and_shared() {
    let manager = threaded(4);
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    assert!(manager.register_task_type(
        "deps",
        None,
        execute_fn(|scope, id, _| {
            let mut reply = DataTransport::new(cmd::EXEC_COMPLETE, id);
            reply.set_param("source", scope.dependencies().source())?;
            scope.post(reply)
        }),
        None,
        false,
        vec![
            DependencyDescription::inline("a.js", "const a = 1;"),
            DependencyDescription::new("b.js", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("const b = 2;".to_string())
            }),
        ],
    ));
    manager.set_maximum_count("deps", 3);
    init(&manager, "deps");

    let reply = block_on(
        manager
            .enqueue_for_execution("deps", DataTransport::new(cmd::EXECUTE, 0))
            .unwrap(),
    )
    .unwrap();
    let source: String = DataTransport::from_envelope(reply)
        .unwrap()
        .param_as("source")
        .unwrap();
    assert_eq!(source, "const a = 1;\nconst b = 2;");
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_dependency_rejects_initialization() {
    let manager = threaded(4);
    assert!(manager.register_task_type(
        "broken",
        None,
        demo::echo_functions().execute,
        None,
        false,
        vec![DependencyDescription::new("missing.js", || {
            Err("404".to_string())
        })],
    ));

    let result = block_on(
        manager
            .init_task_type("broken", DataTransport::new(cmd::INIT, 0))
            .unwrap(),
    );
    assert!(matches!(
        result,
        Err(TaskError::Initialization { ref reason, .. }) if reason.contains("missing.js")
    ));
    assert!(!manager.is_task_type_initialized("broken"));
    assert_eq!(manager.pool_snapshot("broken").unwrap().instances, 0);
}

#[test]
fn failing_worker_init_rejects_initialization() {
    let manager = threaded(4);
    register(
        &manager,
        "refuses",
        WorkerFunctions::new(demo::echo_functions().execute)
            .with_init(init_fn(|_, _, _| Err(TaskError::worker("no license")))),
        false,
    );

    let result = block_on(
        manager
            .init_task_type("refuses", DataTransport::new(cmd::INIT, 0))
            .unwrap(),
    );
    assert!(matches!(result, Err(TaskError::Initialization { .. })));
    assert!(!manager.is_task_type_initialized("refuses"));
}

#[test]
fn worker_modules_parse_meshes() {
    let manager = threaded(4);
    manager.register_worker_module("workers/soup.rs", || {
        Box::<MeshWorker>::default() as Box<dyn TaskWorker>
    });
    assert!(manager.register_task_type_module("soup", "workers/soup.rs"));
    let mut config = DataTransport::new(cmd::INIT, 0);
    config.set_param("materialName", "clay").unwrap();
    block_on(manager.init_task_type("soup", config).unwrap()).unwrap();

    let meshes = Arc::new(AtomicUsize::new(0));
    let counter = meshes.clone();
    let mut run = DataTransport::new(cmd::EXECUTE, 0);
    run.add_buffer("payload", TypedArray::from(DEMO_SOUP.as_bytes().to_vec()))
        .unwrap();
    let reply = block_on(
        manager
            .enqueue_for_execution_with(
                "soup",
                run,
                Some(Arc::new(move |_envelope: Envelope| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap(),
    )
    .unwrap();

    let mesh_count: usize = DataTransport::from_envelope(reply)
        .unwrap()
        .param_as("meshCount")
        .unwrap();
    assert_eq!(mesh_count, 2);
    assert_eq!(meshes.load(Ordering::SeqCst), 2);
}
