//! End-to-end scenarios against the in-memory runtime

mod common;

use common::{loader_class, plain_class, widget_class, MemoryRuntime};
use hotswap_bytecode::{access, flags, verify_class, ClassFile, CodeEditor, Opcode};
use hotswap_core::{
    Agent, AgentConfig, AuxiliaryType, ChangeObserver, ChangePhase, ChangeSet, CommitFailure,
    HotswapError, IdentityCache, LoadScope, Manipulation, ManipulationPlan, RedefinitionBatch,
    RedefinitionError, RuntimeError, TypeChange, TypeIdentifier,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    runtime: Arc<MemoryRuntime>,
    agent: Agent,
    dumps: TempDir,
}

fn attach() -> Fixture {
    let dumps = TempDir::new().unwrap();
    let runtime = MemoryRuntime::new();
    let config = AgentConfig {
        dump_directory: Some(dumps.path().to_path_buf()),
        ..AgentConfig::default()
    };
    let agent = Agent::attach(runtime.clone(), config).unwrap();
    Fixture {
        runtime,
        agent,
        dumps,
    }
}

fn scope(runtime: &MemoryRuntime, name: &str, implementation: &str) -> Arc<LoadScope> {
    let scope = LoadScope::new(name, None, implementation);
    runtime.install(
        scope.implementation().clone(),
        loader_class(implementation, "java.lang.ClassLoader").encode(),
    );
    scope
}

fn redefinition_error(
    result: hotswap_core::Result<hotswap_core::CommitReport>,
) -> RedefinitionError {
    match result {
        Err(HotswapError::Redefinition(error)) => error,
        Err(other) => panic!("unexpected error: {}", other),
        Ok(report) => panic!("batch unexpectedly committed: {:?}", report),
    }
}

#[test]
fn test_attach_registers_hook() {
    let fixture = attach();
    assert!(fixture.runtime.has_transformer());
}

#[test]
fn test_added_method_visible_only_in_owning_scope() {
    let fixture = attach();
    let app = scope(&fixture.runtime, "app", "com.example.AppLoader");
    let sibling = scope(&fixture.runtime, "sibling", "com.example.SiblingLoader");

    fixture.agent.install(
        "com.example.Widget",
        Manipulation::new(
            Manipulation::added_method(
                "com.example.Widget",
                "resize",
                "(II)V",
                access::PUBLIC,
                "com.example.Widget$Proxy",
            ),
            Some(&app),
        ),
    );

    let original = widget_class().encode();

    let in_app = fixture
        .runtime
        .load("com.example.Widget", Some(&app), &original)
        .unwrap();
    let class = ClassFile::decode(&in_app).unwrap();
    let resize = class.method("resize", "(II)V").unwrap();
    assert!(!resize.is_final());
    assert_eq!(resize.access & access::PUBLIC, access::PUBLIC);
    assert_eq!(resize.access & access::PRIVATE, 0);
    verify_class(&class).unwrap();

    // grow() now goes through the trampoline
    let grow = class.method("grow", "()V").unwrap();
    let invoke = CodeEditor::decode(&grow.code)
        .unwrap()
        .instructions()
        .iter()
        .find(|i| i.opcode.is_invoke())
        .copied()
        .unwrap();
    assert_eq!(invoke.opcode, Opcode::InvokeStatic);
    assert_eq!(
        class.constants.get_member(invoke.index().unwrap()).unwrap().to_string(),
        "com.example.Widget$Proxy.resize(Lcom/example/Widget;II)V"
    );

    let in_sibling = fixture
        .runtime
        .load("com.example.Widget", Some(&sibling), &original)
        .unwrap();
    assert_eq!(in_sibling, original);

    // Loading under a scope retrofits its implementation
    let loader = fixture.runtime.class(app.implementation()).unwrap();
    assert!(loader.has_flag(flags::RETROFITTED));
    verify_class(&loader).unwrap();
    assert!(fixture.agent.state().retrofits().is_done(app.implementation()));
}

#[test]
fn test_snapshot_captured_from_original_shape() {
    let fixture = attach();
    fixture.agent.install(
        "com.example.Task",
        Manipulation::global(Manipulation::relax_final("run", None)),
    );
    fixture
        .runtime
        .load("com.example.Task", None, &plain_class("com.example.Task").encode())
        .unwrap();

    let snapshot = fixture
        .agent
        .state()
        .class_data()
        .get(&TypeIdentifier::root("com.example.Task"))
        .unwrap();
    assert!(snapshot.method("run", "()V").unwrap().is_final());

    let loaded = fixture
        .runtime
        .class(&TypeIdentifier::root("com.example.Task"))
        .unwrap();
    assert!(!loaded.method("run", "()V").unwrap().is_final());
}

#[test]
fn test_redefine_commits_batch() {
    let fixture = attach();
    let app = scope(&fixture.runtime, "app", "com.example.AppLoader");
    fixture.agent.install(
        "com.example.Widget",
        Manipulation::new(Manipulation::relax_final("resize", None), Some(&app)),
    );
    fixture
        .runtime
        .load("com.example.Widget", Some(&app), &widget_class().encode())
        .unwrap();
    let calls_before = fixture.runtime.redefine_calls();

    let mut replacement = widget_class();
    replacement.methods.retain(|m| m.name != "grow");
    let proxy = plain_class("com.example.Widget$Proxy").encode();
    let batch = RedefinitionBatch::new()
        .change(TypeChange::new("com.example.Widget", Some(app.clone()), replacement.encode()))
        .add(AuxiliaryType::new("com.example.Widget$Proxy", Some(app.clone()), proxy.clone()));

    let widget = TypeIdentifier::in_scope("com.example.Widget", Some(&app));
    fixture.runtime.require_retransform(widget.clone());

    let report = fixture.agent.redefine(&batch).unwrap();
    assert_eq!(report.requires_retransform, vec![widget.clone()]);
    assert_eq!(fixture.runtime.retransformed(), vec![widget.clone()]);
    assert_eq!(fixture.runtime.redefine_calls(), calls_before + 1);

    // Committed binary went through the dispatcher
    let committed = fixture.runtime.class(&widget).unwrap();
    assert!(committed.method("grow", "()V").is_none());
    assert!(!committed.method("resize", "(II)V").unwrap().is_final());

    // Auxiliary type is waiting for the retrofitted scope
    let parked = fixture
        .agent
        .state()
        .aux_types()
        .lookup("com.example.Widget$Proxy", Some(app.id()))
        .unwrap();
    assert_eq!(&parked[..], &proxy[..]);
    assert!(fixture.agent.state().class_data().is_replaced(&widget));
}

#[test]
fn test_invalid_entry_fails_whole_batch() {
    let fixture = attach();
    for name in ["com.example.Widget", "com.example.Gadget"] {
        fixture.agent.install(
            name,
            Manipulation::global(Manipulation::relax_final("run", None)),
        );
        fixture
            .runtime
            .install(TypeIdentifier::root(name), plain_class(name).encode());
    }

    let garbage = b"definitely not a class".to_vec();
    let widget = plain_class("com.example.Widget").encode();
    let batch = RedefinitionBatch::new()
        .change(TypeChange::new("com.example.Widget", None, widget))
        .change(TypeChange::new("com.example.Gadget", None, garbage.clone()));

    let error = redefinition_error(fixture.agent.redefine(&batch));
    match error {
        RedefinitionError::RedefinitionFailed {
            count,
            cause: CommitFailure::Runtime(RuntimeError::Rejected { identity, .. }),
        } => {
            assert_eq!(count, 2);
            assert_eq!(identity, TypeIdentifier::root("com.example.Gadget"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(fixture.runtime.redefine_calls(), 1);

    // The runtime applied nothing of the batch
    let loaded = fixture
        .runtime
        .class(&TypeIdentifier::root("com.example.Widget"))
        .unwrap();
    assert!(loaded.method("run", "()V").unwrap().is_final());

    let widget_dump = fixture.dumps.path().join("com.example.Widget1.class");
    let gadget_dump = fixture.dumps.path().join("com.example.Gadget1.class");
    let widget = ClassFile::decode(&std::fs::read(widget_dump).unwrap()).unwrap();
    assert!(!widget.method("run", "()V").unwrap().is_final());
    assert_eq!(std::fs::read(gadget_dump).unwrap(), garbage);
}

#[test]
fn test_malformed_manipulation_does_not_block_unrelated_types() {
    let fixture = attach();
    fixture.agent.install(
        "com.example.Widget",
        Manipulation::global(Manipulation::relax_final("run", Some("(J)V".to_string()))),
    );
    fixture.agent.install(
        "com.example.Gadget",
        Manipulation::global(Manipulation::relax_final("run", None)),
    );
    let mut batch = RedefinitionBatch::new();
    for name in ["com.example.Widget", "com.example.Gadget"] {
        fixture
            .runtime
            .install(TypeIdentifier::root(name), plain_class(name).encode());
        batch = batch.change(TypeChange::new(name, None, plain_class(name).encode()));
    }

    fixture.agent.redefine(&batch).unwrap();
    assert_eq!(fixture.runtime.redefine_calls(), 1);

    let gadget = fixture
        .runtime
        .class(&TypeIdentifier::root("com.example.Gadget"))
        .unwrap();
    assert!(!gadget.method("run", "()V").unwrap().is_final());

    // Widget's manipulation names no declaration, so it goes in as given
    assert_eq!(
        fixture
            .runtime
            .binary(&TypeIdentifier::root("com.example.Widget"))
            .unwrap(),
        plain_class("com.example.Widget").encode()
    );
    assert_eq!(std::fs::read_dir(fixture.dumps.path()).unwrap().count(), 0);
}

#[test]
fn test_commit_failure_dumps_every_type() {
    let fixture = attach();
    let names = ["com.example.Alpha", "com.example.Beta"];
    let mut batch = RedefinitionBatch::new();
    for name in names {
        fixture
            .runtime
            .install(TypeIdentifier::root(name), plain_class(name).encode());
        batch = batch.change(TypeChange::new(name, None, plain_class(name).encode()));
    }
    fixture.runtime.fail_commits(true);

    let error = redefinition_error(fixture.agent.redefine(&batch));
    assert!(matches!(
        error,
        RedefinitionError::RedefinitionFailed {
            count: 2,
            cause: CommitFailure::Runtime(_)
        }
    ));
    assert!(error.to_string().contains("commit refused"));

    for name in names {
        let dump = fixture.dumps.path().join(format!("{}1.class", name));
        assert_eq!(std::fs::read(dump).unwrap(), plain_class(name).encode());
    }
}

#[test]
fn test_rejected_binary_without_manipulations() {
    let fixture = attach();
    fixture.runtime.install(
        TypeIdentifier::root("com.example.Widget"),
        plain_class("com.example.Widget").encode(),
    );
    let batch = RedefinitionBatch::new().change(TypeChange::new(
        "com.example.Widget",
        None,
        vec![0xde, 0xad],
    ));

    let error = redefinition_error(fixture.agent.redefine(&batch));
    assert!(matches!(
        error,
        RedefinitionError::RedefinitionFailed {
            cause: CommitFailure::Runtime(RuntimeError::Rejected { .. }),
            ..
        }
    ));
    assert!(fixture.dumps.path().join("com.example.Widget1.class").exists());
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<(ChangePhase, ChangeSet)>>,
    veto: Option<ChangePhase>,
}

impl ChangeObserver for RecordingObserver {
    fn before_change(&self, changes: &ChangeSet) -> anyhow::Result<()> {
        self.events.lock().push((ChangePhase::Before, changes.clone()));
        if self.veto == Some(ChangePhase::Before) {
            anyhow::bail!("vetoed");
        }
        Ok(())
    }

    fn after_change(&self, changes: &ChangeSet) -> anyhow::Result<()> {
        self.events.lock().push((ChangePhase::After, changes.clone()));
        if self.veto == Some(ChangePhase::After) {
            anyhow::bail!("too late");
        }
        Ok(())
    }
}

#[derive(Default)]
struct CountingCache {
    flushes: AtomicUsize,
}

impl IdentityCache for CountingCache {
    fn flush(&self) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn single_change(fixture: &Fixture) -> RedefinitionBatch {
    fixture.runtime.install(
        TypeIdentifier::root("com.example.Task"),
        plain_class("com.example.Task").encode(),
    );
    RedefinitionBatch::new().change(TypeChange::new(
        "com.example.Task",
        None,
        plain_class("com.example.Task").encode(),
    ))
}

#[test]
fn test_observers_and_caches() {
    let fixture = attach();
    let observer = Arc::new(RecordingObserver::default());
    let cache = Arc::new(CountingCache::default());
    fixture.agent.add_observer(observer.clone());
    fixture.agent.add_identity_cache(cache.clone());

    let batch = single_change(&fixture);
    fixture.agent.redefine(&batch).unwrap();

    let events = observer.events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, ChangePhase::Before);
    assert_eq!(events[1].0, ChangePhase::After);
    assert_eq!(
        events[0].1.changed,
        vec![TypeIdentifier::root("com.example.Task")]
    );
    assert_eq!(cache.flushes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_before_change_veto_commits_nothing() {
    let fixture = attach();
    fixture.agent.add_observer(Arc::new(RecordingObserver {
        veto: Some(ChangePhase::Before),
        ..RecordingObserver::default()
    }));

    let batch = single_change(&fixture);
    let error = redefinition_error(fixture.agent.redefine(&batch));
    assert!(matches!(
        error,
        RedefinitionError::Observer {
            phase: ChangePhase::Before,
            ..
        }
    ));
    assert_eq!(fixture.runtime.redefine_calls(), 0);
    assert_eq!(std::fs::read_dir(fixture.dumps.path()).unwrap().count(), 0);
}

#[test]
fn test_after_change_failure_reported_after_commit() {
    let fixture = attach();
    fixture.agent.add_observer(Arc::new(RecordingObserver {
        veto: Some(ChangePhase::After),
        ..RecordingObserver::default()
    }));

    let batch = single_change(&fixture);
    let error = redefinition_error(fixture.agent.redefine(&batch));
    assert!(matches!(
        error,
        RedefinitionError::Observer {
            phase: ChangePhase::After,
            ..
        }
    ));
    assert_eq!(fixture.runtime.redefine_calls(), 1);
}

#[test]
fn test_install_plan() {
    let fixture = attach();
    let app = scope(&fixture.runtime, "app", "com.example.AppLoader");
    let plan = ManipulationPlan::from_str(
        r#"
        [[manipulation]]
        type = "com.example.Widget"
        kind = "relax-final"
        name = "resize"

        [[manipulation]]
        type = "com.example.Widget"
        kind = "relax-final"
        name = "resize"
        "#,
    )
    .unwrap();

    assert_eq!(fixture.agent.install_plan(&plan, Some(&app)).unwrap(), 1);
    assert_eq!(
        fixture
            .agent
            .registry()
            .lookup_type(Some(&*app), "com.example.Widget")
            .len(),
        1
    );
    assert!(fixture
        .agent
        .registry()
        .lookup_type(None, "com.example.Widget")
        .is_empty());
}

#[test]
fn test_sweep_forgets_dropped_scopes() {
    let fixture = attach();
    let app = scope(&fixture.runtime, "app", "com.example.AppLoader");
    let plugin = LoadScope::new("plugin", Some(app.clone()), "com.example.PluginLoader");
    fixture.runtime.install(
        plugin.implementation().clone(),
        loader_class("com.example.PluginLoader", "java.lang.ClassLoader").encode(),
    );

    fixture.agent.install(
        "com.example.Widget",
        Manipulation::new(Manipulation::relax_final("resize", None), Some(&plugin)),
    );
    let original = widget_class().encode();
    fixture
        .runtime
        .load("com.example.Widget", Some(&plugin), &original)
        .unwrap();

    let helper = plain_class("com.example.Widget$Helper").encode();
    let batch = RedefinitionBatch::new()
        .change(TypeChange::new("com.example.Widget", Some(plugin.clone()), original))
        .add(AuxiliaryType::new("com.example.Widget$Helper", Some(plugin.clone()), helper));
    fixture.agent.redefine(&batch).unwrap();

    let state = fixture.agent.state();
    let implementation = plugin.implementation().clone();
    let widget = TypeIdentifier::in_scope("com.example.Widget", Some(&plugin));
    assert_eq!(state.class_data().len(), 1);
    assert!(state.class_data().is_replaced(&widget));
    assert_eq!(state.aux_types().len(), 1);
    assert!(state.retrofits().is_done(&implementation));
    assert_eq!(fixture.agent.sweep(), 0);

    drop(batch);
    drop(plugin);
    drop(app);

    assert_eq!(fixture.agent.sweep(), 2);
    assert!(state.class_data().is_empty());
    assert!(!state.class_data().is_replaced(&widget));
    assert!(state.aux_types().is_empty());
    assert_eq!(state.retrofits().state(&implementation), None);
    assert_eq!(state.registry().scope_count(), 0);
    assert!(state.scopes().is_empty());
}
