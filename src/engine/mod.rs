//! Resolution and execution of the build graph.
//!
//! The [`Runner`] walks the graph from a root node with an explicit work
//! stack, so the depth of the graph never turns into call stack depth:
//!
//! 1. The stack starts with only the root.
//! 2. The top of the stack is peeked. If it is complete it is popped.
//! 3. Otherwise its unmet requirements are pushed in declared order and the
//!    node stays where it is, to be examined again once they are resolved.
//! 4. A node without unmet requirements is popped, appended to the log and,
//!    unless this is a dry run, built.
//!
//! Every node carries a [`Status`] for the duration of a run. It lets the
//! runner treat a node built earlier in the same run as satisfied (see
//! [`Completion`]) and catch cycles: a requirement which is still
//! [`InProgress`](Status::InProgress) sits further down the stack waiting on
//! the very node that asks for it.

mod diagnostics;
mod journal;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::BuildGraph;
use crate::core::{Completion, Mode};
use crate::error::BuildError;
use crate::node::Handle;
use crate::storage::{FileSystem, Storage};

pub use diagnostics::{Diagnostics, NodeExecution};
pub use journal::{Entry, Journal};

/// Per-run state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Not examined yet.
    #[default]
    Pending,
    /// Its requirements were pushed and it waits for them to resolve.
    InProgress,
    /// Built or found complete in this run.
    Done,
}

/// Resolves and executes nodes of a [`BuildGraph`].
///
/// Created through [`BuildGraph::runner`]. By default it checks artifacts
/// against the local filesystem, invokes recipes and uses
/// [`Completion::PerRun`].
pub struct Runner<'a> {
    graph: &'a BuildGraph,
    storage: &'a dyn Storage,
    mode: Mode,
    completion: Completion,
}

impl<'a> Runner<'a> {
    pub fn new(graph: &'a BuildGraph) -> Self {
        Self {
            graph,
            storage: &FileSystem,
            mode: Mode::Build,
            completion: Completion::PerRun,
        }
    }

    /// Storage used to check whether artifacts exist.
    pub fn storage(mut self, storage: &'a dyn Storage) -> Self {
        self.storage = storage;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dry_run(self, dry_run: bool) -> Self {
        self.mode(Mode::from(dry_run))
    }

    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    /// Resolves `root` and returns the nodes in the order they were executed.
    pub fn run(&self, root: Handle) -> Result<Vec<Handle>, BuildError> {
        let mut log = Vec::new();
        self.run_into(root, &mut log)?;
        Ok(log)
    }

    /// Resolves `root`, appending executed nodes to `log`.
    ///
    /// `log` is extended in place, so after a failure it still holds every
    /// node executed before the failing one. It can also be shared between
    /// several runs to merge their logs. Nothing already built is undone.
    pub fn run_into(&self, root: Handle, log: &mut Vec<Handle>) -> Result<Diagnostics, BuildError> {
        self.known(root)?;

        let span = tracing::info_span!(
            "run",
            root = self.graph.node(root).label(),
            dry_run = self.mode.is_dry_run()
        );
        span.pb_set_message(&format!("Resolving {}", self.graph.node(root)));
        let _enter = span.enter();

        let mut status = vec![Status::Pending; self.graph.len()];
        let mut stack = vec![root];
        let mut diagnostics = Diagnostics::default();
        let before = log.len();

        while let Some(&top) = stack.last() {
            let index = top.0.index();

            if self.is_complete(top, &status) {
                stack.pop();
                status[index] = match (self.completion, status[index]) {
                    (Completion::PerRun, _) => Status::Done,
                    (Completion::Storage, Status::InProgress) => Status::Pending,
                    (Completion::Storage, current) => current,
                };
                tracing::debug!(node = self.graph.node(top).label(), "complete");
                continue;
            }

            let unmet = self.unmet_requirements(top, &status);

            if !unmet.is_empty() {
                // Done here only happens with storage completion: the node was
                // built earlier in this run and is still not complete.
                if let Some(&repeat) = unmet.iter().find(|h| status[h.0.index()] != Status::Pending) {
                    let node = self.graph.node(repeat).label().to_string();
                    tracing::error!(
                        node = node.as_str(),
                        status = ?status[repeat.0.index()],
                        "cycle detected"
                    );
                    return Err(BuildError::CycleDetected { node });
                }

                tracing::debug!(
                    node = self.graph.node(top).label(),
                    unmet = unmet.len(),
                    "pushing requirements"
                );
                status[index] = Status::InProgress;
                stack.extend(unmet);
                continue;
            }

            stack.pop();
            log.push(top);
            status[index] = Status::Done;

            if self.mode.is_dry_run() {
                let node = self.graph.node(top);
                if node.is_source() {
                    tracing::warn!(path = node.label(), "source is missing, a build would fail here");
                }
                tracing::info!(node = node.label(), "would build");
                continue;
            }

            self.execute(top, &mut diagnostics)?;
        }

        tracing::info!(executed = log.len() - before, "run complete");
        Ok(diagnostics)
    }

    /// Executes a previously computed log in order, without resolving
    /// anything. In dry run mode nothing is invoked.
    pub fn replay(&self, log: &[Handle]) -> Result<Diagnostics, BuildError> {
        let span = tracing::info_span!("replay", nodes = log.len());
        let _enter = span.enter();

        for &handle in log {
            self.known(handle)?;
        }

        let mut diagnostics = Diagnostics::default();

        for &handle in log {
            if self.mode.is_dry_run() {
                tracing::info!(node = self.graph.node(handle).label(), "would build");
                continue;
            }

            self.execute(handle, &mut diagnostics)?;
        }

        Ok(diagnostics)
    }

    fn known(&self, handle: Handle) -> Result<(), BuildError> {
        match self.graph.get(handle) {
            Some(_) => Ok(()),
            None => Err(BuildError::UnknownNode {
                index: handle.0.index(),
            }),
        }
    }

    fn is_complete(&self, handle: Handle, status: &[Status]) -> bool {
        let node = self.graph.node(handle);
        let done = status[handle.0.index()] == Status::Done;

        match self.completion {
            Completion::PerRun if done => true,
            // A dry run writes nothing, so an artifact logged earlier in the
            // run stands in for the file its recipe would have produced.
            Completion::Storage if done && self.mode.is_dry_run() && node.path().is_some() => true,
            _ => node.is_complete(self.storage),
        }
    }

    fn unmet_requirements(&self, handle: Handle, status: &[Status]) -> Vec<Handle> {
        self.graph
            .node(handle)
            .requires()
            .iter()
            .copied()
            .filter(|&requirement| !self.is_complete(requirement, status))
            .collect()
    }

    fn execute(&self, handle: Handle, diagnostics: &mut Diagnostics) -> Result<(), BuildError> {
        let node = self.graph.node(handle);

        let span = tracing::info_span!("node", name = node.label());
        span.pb_set_style(&crate::utils::STYLE_TASK);
        span.pb_set_message(&format!("Building {node}"));
        let _enter = span.enter();

        let start = Instant::now();

        // The graph is only read during a run, so a panicking recipe can't
        // leave it in a broken state.
        let result = match catch_unwind(AssertUnwindSafe(|| node.build())) {
            Ok(result) => result,
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    String::from("unknown payload")
                };

                Err(BuildError::Panic {
                    node: node.label().to_string(),
                    message,
                })
            }
        };

        diagnostics.record(handle, node.label(), start, start.elapsed());

        if let Err(err) = result {
            tracing::error!(node = node.label(), "{err}");
            return Err(err);
        }

        if let Some(path) = node.path()
            && !self.storage.exists(path)
        {
            tracing::warn!(%path, "recipe finished but the artifact does not exist");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use camino::Utf8Path;

    use super::*;
    use crate::blueprint::Blueprint;
    use crate::storage::Memory;

    type Calls = Arc<Mutex<Vec<String>>>;

    /// Artifact recipe which records the call and creates the artifact.
    fn produce(
        storage: &Arc<Memory>,
        calls: &Calls,
    ) -> impl Fn(&crate::Node) -> anyhow::Result<()> + Send + Sync + 'static {
        let storage = storage.clone();
        let calls = calls.clone();
        move |node: &crate::Node| {
            calls.lock().unwrap().push(node.label().to_string());
            if let Some(path) = node.path() {
                storage.insert(path);
            }
            Ok(())
        }
    }

    fn labels(graph: &BuildGraph, log: &[Handle]) -> Vec<String> {
        log.iter().map(|&h| graph.node(h).label().to_string()).collect()
    }

    #[test]
    fn test_complete_root_runs_nothing() {
        let storage = Arc::new(Memory::new());
        storage.insert("done.txt");
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let root = config.artifact("done.txt").run(produce(&storage, &calls));
        let graph = config.finish();

        let log = graph.runner().storage(storage.as_ref()).run(root).unwrap();

        assert!(log.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_linear_chain() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let c = config.artifact("c").run(produce(&storage, &calls));
        let b = config.artifact("b").requires([c]).run(produce(&storage, &calls));
        let a = config.artifact("a").requires([b]).run(produce(&storage, &calls));
        let graph = config.finish();

        let log = graph.runner().storage(storage.as_ref()).run(a).unwrap();

        assert_eq!(log, vec![c, b, a]);
        assert_eq!(*calls.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_complete_siblings() {
        let storage = Arc::new(Memory::new());
        storage.insert("left");
        storage.insert("right");
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let left = config.artifact("left").run(produce(&storage, &calls));
        let right = config.artifact("right").run(produce(&storage, &calls));
        let root = config
            .artifact("root")
            .requires([left, right])
            .run(produce(&storage, &calls));
        let all = config.action("all").requires([left, right]).run(produce(&storage, &calls));
        let graph = config.finish();

        storage.insert("root");
        let log = graph.runner().storage(storage.as_ref()).run(root).unwrap();
        assert!(log.is_empty());

        // Actions are never complete on their own.
        let log = graph.runner().storage(storage.as_ref()).run(all).unwrap();
        assert_eq!(log, vec![all]);
        assert_eq!(*calls.lock().unwrap(), vec!["all"]);
    }

    #[test]
    fn test_dry_run_matches_build() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let base = config.artifact("base").run(produce(&storage, &calls));
        let left = config.artifact("left").requires([base]).run(produce(&storage, &calls));
        let right = config.artifact("right").requires([base]).run(produce(&storage, &calls));
        let all = config.action("all").requires([left, right]).run(produce(&storage, &calls));
        let graph = config.finish();

        let planned = graph
            .runner()
            .storage(storage.as_ref())
            .dry_run(true)
            .run(all)
            .unwrap();

        assert!(calls.lock().unwrap().is_empty());
        assert!(storage.is_empty());

        let built = graph.runner().storage(storage.as_ref()).run(all).unwrap();

        assert_eq!(planned, built);
        assert_eq!(labels(&graph, &built), vec!["base", "right", "left", "all"]);
        assert_eq!(*calls.lock().unwrap(), vec!["base", "right", "left", "all"]);
    }

    #[test]
    fn test_second_run_is_empty() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let b = config.artifact("b").run(produce(&storage, &calls));
        let a = config.artifact("a").requires([b]).run(produce(&storage, &calls));
        let graph = config.finish();

        let runner = graph.runner().storage(storage.as_ref());
        assert_eq!(runner.run(a).unwrap(), vec![b, a]);
        assert!(runner.run(a).unwrap().is_empty());
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_source() {
        let storage = Memory::new();

        let mut config = Blueprint::new();
        let missing = config.source("missing.txt");
        let graph = config.finish();

        let mut log = Vec::new();
        let err = graph
            .runner()
            .storage(&storage)
            .run_into(missing, &mut log)
            .unwrap_err();

        match err {
            BuildError::MissingInput { path } => assert_eq!(path, "missing.txt"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log, vec![missing]);
    }

    #[test]
    fn test_failure_keeps_partial_log() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let first = config.artifact("first").run(produce(&storage, &calls));
        let broken = config
            .artifact("broken")
            .requires([first])
            .run(|_| anyhow::bail!("compiler exploded"));
        let last = config.action("last").requires([broken]).run(produce(&storage, &calls));
        let graph = config.finish();

        let mut log = Vec::new();
        let err = graph
            .runner()
            .storage(storage.as_ref())
            .run_into(last, &mut log)
            .unwrap_err();

        assert!(matches!(err, BuildError::Action { ref node, .. } if node == "broken"));
        assert_eq!(log, vec![first, broken]);
        assert_eq!(*calls.lock().unwrap(), vec!["first"]);
        // Already built artifacts stay.
        assert!(storage.exists(Utf8Path::new("first")));
    }

    #[test]
    fn test_panic_is_reported() {
        let storage = Memory::new();

        let mut config = Blueprint::new();
        let root = config.action("boom").run(|_| panic!("recipe panicked"));
        let graph = config.finish();

        let err = graph.runner().storage(&storage).run(root).unwrap_err();

        match err {
            BuildError::Panic { node, message } => {
                assert_eq!(node, "boom");
                assert_eq!(message, "recipe panicked");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_shared_action_runs_once() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let setup = config.action("setup").run(produce(&storage, &calls));
        let left = config.artifact("left").requires([setup]).run(produce(&storage, &calls));
        let right = config.artifact("right").requires([setup]).run(produce(&storage, &calls));
        let all = config.action("all").requires([left, right, setup]).run(produce(&storage, &calls));
        let graph = config.finish();

        let log = graph.runner().storage(storage.as_ref()).run(all).unwrap();

        assert_eq!(labels(&graph, &log), vec!["setup", "right", "left", "all"]);
        assert_eq!(*calls.lock().unwrap(), vec!["setup", "right", "left", "all"]);
    }

    #[test]
    fn test_artifact_requiring_action_terminates() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let prepare = config.action("prepare").run(produce(&storage, &calls));
        let root = config.artifact("root").requires([prepare]).run(produce(&storage, &calls));
        let graph = config.finish();

        let log = graph.runner().storage(storage.as_ref()).run(root).unwrap();

        assert_eq!(log, vec![prepare, root]);
    }

    #[test]
    fn test_storage_completion_guards_action_requirement() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let prepare = config.action("prepare").run(produce(&storage, &calls));
        let root = config.artifact("root").requires([prepare]).run(produce(&storage, &calls));
        let graph = config.finish();

        let mut log = Vec::new();
        let err = graph
            .runner()
            .storage(storage.as_ref())
            .completion(Completion::Storage)
            .run_into(root, &mut log)
            .unwrap_err();

        assert!(matches!(err, BuildError::CycleDetected { ref node } if node == "prepare"));
        // The action ran exactly once before the guard tripped.
        assert_eq!(log, vec![prepare]);
        assert_eq!(*calls.lock().unwrap(), vec!["prepare"]);
    }

    #[test]
    fn test_storage_completion_artifact_graph() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let b = config.artifact("b").run(produce(&storage, &calls));
        let a = config.artifact("a").requires([b]).run(produce(&storage, &calls));
        let graph = config.finish();

        let log = graph
            .runner()
            .storage(storage.as_ref())
            .completion(Completion::Storage)
            .run(a)
            .unwrap();

        assert_eq!(log, vec![b, a]);
    }

    #[test]
    fn test_storage_completion_dry_run_matches_build() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let c = config.artifact("c").run(produce(&storage, &calls));
        let b = config.artifact("b").requires([c]).run(produce(&storage, &calls));
        let a = config.artifact("a").requires([b, c]).run(produce(&storage, &calls));
        let graph = config.finish();

        let planned = graph
            .runner()
            .storage(storage.as_ref())
            .completion(Completion::Storage)
            .dry_run(true)
            .run(a)
            .unwrap();

        assert!(storage.is_empty());
        assert!(calls.lock().unwrap().is_empty());

        let built = graph
            .runner()
            .storage(storage.as_ref())
            .completion(Completion::Storage)
            .run(a)
            .unwrap();

        assert_eq!(planned, built);
        assert_eq!(built, vec![c, b, a]);
    }

    #[test]
    fn test_storage_completion_dry_run_guards_action_requirement() {
        let storage = Memory::new();

        let mut config = Blueprint::new();
        let prepare = config.action("prepare").noop();
        let root = config.artifact("root").requires([prepare]).noop();
        let graph = config.finish();

        let err = graph
            .runner()
            .storage(&storage)
            .completion(Completion::Storage)
            .dry_run(true)
            .run(root)
            .unwrap_err();

        assert!(matches!(err, BuildError::CycleDetected { ref node } if node == "prepare"));
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut other = Blueprint::new();
        other.noop("first");
        let foreign = other.noop("second");

        let mut config = Blueprint::new();
        config.noop("only");
        let graph = config.finish();

        assert!(graph.get(foreign).is_none());

        let err = graph.runner().storage(&Memory::new()).run(foreign).unwrap_err();
        assert!(matches!(err, BuildError::UnknownNode { index: 1 }));

        let err = graph.runner().replay(&[foreign]).unwrap_err();
        assert!(matches!(err, BuildError::UnknownNode { index: 1 }));
    }

    #[test]
    fn test_deep_chain() {
        const DEPTH: usize = 200_000;

        let mut config = Blueprint::new();
        let mut last = config.action("0").noop();
        for i in 1..DEPTH {
            last = config.action(i.to_string()).requires([last]).noop();
        }
        let graph = config.finish();

        let log = graph
            .runner()
            .storage(&Memory::new())
            .dry_run(true)
            .run(last)
            .unwrap();

        assert_eq!(log.len(), DEPTH);
        assert_eq!(graph.node(log[0]).label(), "0");
        assert_eq!(log[DEPTH - 1], last);
    }

    #[test]
    fn test_cycle_detected() {
        let storage = Memory::new();

        let mut config = Blueprint::new();
        let a = config.action("a").noop();
        let b = config.action("b").requires([a]).noop();
        let root = config.action("root").requires([b]).noop();
        config.add_requirement(a, b);
        let graph = config.finish();

        let err = graph.runner().storage(&storage).run(root).unwrap_err();

        assert!(matches!(err, BuildError::CycleDetected { ref node } if node == "b"));
    }

    #[test]
    fn test_self_requirement_detected() {
        let storage = Memory::new();

        let mut config = Blueprint::new();
        let a = config.artifact("a").noop();
        config.add_requirement(a, a);
        let graph = config.finish();

        let err = graph.runner().storage(&storage).dry_run(true).run(a).unwrap_err();

        assert!(err.is_cycle());
    }

    #[test]
    fn test_repeated_requirement_is_not_a_cycle() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let shared = config.artifact("shared").run(produce(&storage, &calls));
        let mid = config.artifact("mid").requires([shared]).run(produce(&storage, &calls));
        let root = config
            .action("root")
            .requires([shared, mid, shared])
            .run(produce(&storage, &calls));
        let graph = config.finish();

        let log = graph.runner().storage(storage.as_ref()).run(root).unwrap();

        assert_eq!(labels(&graph, &log), vec!["shared", "mid", "root"]);
    }

    #[test]
    fn test_shared_log_accumulates() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let a = config.action("a").run(produce(&storage, &calls));
        let b = config.action("b").run(produce(&storage, &calls));
        let graph = config.finish();

        let runner = graph.runner().storage(storage.as_ref());
        let mut log = Vec::new();
        runner.run_into(a, &mut log).unwrap();
        runner.run_into(b, &mut log).unwrap();

        assert_eq!(log, vec![a, b]);
    }

    #[test]
    fn test_dry_run_reaches_missing_source() {
        let storage = Memory::new();

        let mut config = Blueprint::new();
        let input = config.source("in.txt");
        let out = config.artifact("out.txt").requires([input]).noop();
        let graph = config.finish();

        let log = graph.runner().storage(&storage).dry_run(true).run(out).unwrap();

        assert_eq!(log, vec![input, out]);
    }

    #[test]
    fn test_replay_plan() {
        let storage = Arc::new(Memory::new());
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let b = config.artifact("b").run(produce(&storage, &calls));
        let a = config.action("a").requires([b]).run(produce(&storage, &calls));
        let graph = config.finish();

        let plan = graph
            .runner()
            .storage(storage.as_ref())
            .dry_run(true)
            .run(a)
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());

        let diagnostics = graph.runner().storage(storage.as_ref()).replay(&plan).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["b", "a"]);
        assert_eq!(diagnostics.execution_times.len(), 2);
    }

    #[test]
    fn test_diagnostics_cover_executed_nodes() {
        let storage = Arc::new(Memory::new());
        storage.insert("ready");
        let calls = Calls::default();

        let mut config = Blueprint::new();
        let ready = config.artifact("ready").run(produce(&storage, &calls));
        let todo = config.artifact("todo").requires([ready]).run(produce(&storage, &calls));
        let graph = config.finish();

        let mut log = Vec::new();
        let diagnostics = graph
            .runner()
            .storage(storage.as_ref())
            .run_into(todo, &mut log)
            .unwrap();

        assert_eq!(diagnostics.execution_times.len(), 1);
        assert!(diagnostics.execution_times.contains_key(&todo));
    }

    #[test]
    fn test_filesystem_default_storage() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let input = root.join("in.txt");
        let output = root.join("out.txt");
        std::fs::write(&input, "hello").unwrap();

        let mut config = Blueprint::new();
        let source = config.source(input.clone());
        let target = config.artifact(output.clone()).requires([source]).run(move |node| {
            let text = std::fs::read_to_string(&input)?;
            std::fs::write(node.label(), text.to_uppercase())?;
            Ok(())
        });
        let graph = config.finish();

        assert_eq!(graph.runner().run(target).unwrap(), vec![target]);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "HELLO");
        assert!(graph.runner().run(target).unwrap().is_empty());
    }
}
