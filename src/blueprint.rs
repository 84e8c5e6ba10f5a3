use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::Graph;
use petgraph::visit::{Dfs, Reversed};

use crate::core::ArcStr;
use crate::engine::{Journal, Runner};
use crate::error::BuildError;
use crate::node::{Handle, Node, Recipe, Target};
use crate::storage::Storage;

/// The blueprint for a build.
///
/// `Blueprint` is used to declare the nodes of the build graph. Every
/// declaration returns a [`Handle`], which later declarations list as a
/// requirement. Once everything is declared, [`finish`](Blueprint::finish)
/// freezes the graph into a [`BuildGraph`] that can be run.
///
/// # Example
///
/// ```rust,no_run
/// use dandori::Blueprint;
///
/// let mut config = Blueprint::new();
/// let input = config.source("input.txt");
/// let output = config
///     .artifact("output.txt")
///     .requires([input])
///     .run(|node| {
///         let text = std::fs::read_to_string("input.txt")?;
///         std::fs::write(node.label(), text.to_uppercase())?;
///         Ok(())
///     });
///
/// let graph = config.finish();
/// let log = graph.runner().run(output)?;
/// # Ok::<(), dandori::BuildError>(())
/// ```
#[derive(Debug, Default)]
pub struct Blueprint {
    pub(crate) graph: Graph<Node, ()>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    pub fn finish(self) -> BuildGraph {
        BuildGraph { graph: self.graph }
    }

    /// Starts declaring a persisted artifact located at `path`.
    pub fn artifact(&mut self, path: impl Into<Utf8PathBuf>) -> NodeDef<'_> {
        NodeDef {
            blueprint: self,
            target: Target::Artifact(path.into()),
            requires: Vec::new(),
        }
    }

    /// Starts declaring an action identified by `name`.
    pub fn action(&mut self, name: impl Into<ArcStr>) -> NodeDef<'_> {
        NodeDef {
            blueprint: self,
            target: Target::Action(name.into()),
            requires: Vec::new(),
        }
    }

    /// Declares an input which must already exist. Reaching it while it is
    /// missing fails the run with [`BuildError::MissingInput`].
    pub fn source(&mut self, path: impl Into<Utf8PathBuf>) -> Handle {
        self.add_node(Node::artifact(path.into(), Recipe::Missing, Vec::new()))
    }

    /// Declares one source per file matched by a glob `pattern`, in sorted
    /// path order.
    pub fn sources(&mut self, pattern: &str) -> Result<Vec<Handle>, BuildError> {
        let mut paths = Vec::new();

        for entry in glob::glob(pattern)? {
            paths.push(Utf8PathBuf::try_from(entry?)?);
        }

        paths.sort();
        tracing::debug!(pattern, count = paths.len(), "declared sources");

        Ok(paths.into_iter().map(|path| self.source(path)).collect())
    }

    /// Declares an action which does nothing and requires nothing, usable as
    /// a join point or a placeholder root.
    pub fn noop(&mut self, name: impl Into<ArcStr>) -> Handle {
        self.add_node(Node::action(name.into(), Recipe::Noop, Vec::new()))
    }

    /// [`noop`](Blueprint::noop) named `NOOP`.
    pub fn noop_default(&mut self) -> Handle {
        self.noop("NOOP")
    }

    /// Appends `requirement` to the requirements of an already declared
    /// `dependent`.
    ///
    /// This allows forward declarations, and is the only way a cycle can end
    /// up in the graph.
    pub fn add_requirement(&mut self, dependent: Handle, requirement: Handle) {
        self.graph[dependent.0].requires.push(requirement);
        self.graph.add_edge(requirement.0, dependent.0, ());
    }

    fn add_node(&mut self, node: Node) -> Handle {
        let requires = node.requires.clone();
        let index = self.graph.add_node(node);

        for requirement in requires {
            self.graph.add_edge(requirement.0, index, ());
        }

        Handle(index)
    }
}

/// A node under construction, see [`Blueprint::artifact`] and
/// [`Blueprint::action`].
pub struct NodeDef<'a> {
    blueprint: &'a mut Blueprint,
    target: Target,
    requires: Vec<Handle>,
}

impl NodeDef<'_> {
    /// Adds requirements, kept in the given order. Siblings are resolved in
    /// this order.
    pub fn requires(mut self, requires: impl IntoIterator<Item = Handle>) -> Self {
        self.requires.extend(requires);
        self
    }

    /// Finishes the declaration with `callback` as the recipe.
    pub fn run<F>(self, callback: F) -> Handle
    where
        F: Fn(&Node) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.finish(Recipe::Run(Arc::new(callback)))
    }

    /// Finishes the declaration with a recipe that does nothing.
    pub fn noop(self) -> Handle {
        self.finish(Recipe::Noop)
    }

    fn finish(self, recipe: Recipe) -> Handle {
        let node = Node {
            target: self.target,
            recipe,
            requires: self.requires,
        };

        self.blueprint.add_node(node)
    }
}

/// An immutable build graph produced by [`Blueprint::finish`].
#[derive(Debug)]
pub struct BuildGraph {
    pub(crate) graph: Graph<Node, ()>,
}

impl BuildGraph {
    pub fn design() -> Blueprint {
        Blueprint::default()
    }

    /// # Panics
    ///
    /// Panics if `handle` was issued by another blueprint and is out of
    /// bounds for this graph. Use [`get`](BuildGraph::get) to check first.
    pub fn node(&self, handle: Handle) -> &Node {
        &self.graph[handle.0]
    }

    pub fn get(&self, handle: Handle) -> Option<&Node> {
        self.graph.node_weight(handle.0)
    }

    /// Handles of all nodes in declaration order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.graph.node_indices().map(Handle)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The requirements of `handle` which are not complete according to
    /// `storage`, in declared order.
    pub fn unmet_requirements(&self, handle: Handle, storage: &dyn Storage) -> Vec<Handle> {
        self.node(handle)
            .requires
            .iter()
            .copied()
            .filter(|&requirement| !self.node(requirement).is_complete(storage))
            .collect()
    }

    /// Verifies up front that no node transitively requires itself.
    pub fn check(&self) -> Result<(), BuildError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| BuildError::CycleDetected {
                node: self.graph[cycle.node_id()].label().to_string(),
            })
    }

    /// A [`Runner`] using the local filesystem, building for real.
    pub fn runner(&self) -> Runner<'_> {
        Runner::new(self)
    }

    /// Removes every existing artifact reachable from `root` through
    /// requirements, except sources. Returns the removed paths.
    pub fn clean(&self, root: Handle, storage: &dyn Storage) -> Result<Vec<Utf8PathBuf>, BuildError> {
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, root.0);
        let mut removed = Vec::new();

        while let Some(index) = dfs.next(reversed) {
            let node = &self.graph[index];

            if node.is_source() {
                continue;
            }

            if let Some(path) = node.path()
                && storage.exists(path)
            {
                storage.remove(path)?;
                tracing::info!(%path, "removed");
                removed.push(path.to_owned());
            }
        }

        Ok(removed)
    }

    /// Records an execution log so it can be persisted and replayed later.
    pub fn journal(&self, log: &[Handle]) -> Journal {
        Journal::record(self, log)
    }

    /// Maps a journal back onto handles of this graph.
    pub fn resolve_journal(&self, journal: &Journal) -> Result<Vec<Handle>, BuildError> {
        journal.resolve(self)
    }

    /// Looks up the artifact declared at `path`.
    pub fn find(&self, path: &Utf8Path) -> Option<Handle> {
        self.handles()
            .find(|&handle| self.node(handle).path() == Some(path))
    }
}

impl std::fmt::Display for BuildGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node.label().replace('"', "\\\""); // Simple escape

            match node.target {
                Target::Artifact(_) if node.is_source() => {
                    writeln!(f, "    {}[/\"{}\"/]", index.index(), name)?
                }
                Target::Artifact(_) => writeln!(f, "    {}[\"{}\"]", index.index(), name)?,
                Target::Action(_) => writeln!(f, "    {}([\"{}\"])", index.index(), name)?,
            }
        }

        for index in self.graph.node_indices() {
            for requirement in &self.graph[index].requires {
                writeln!(f, "    {} --> {}", requirement.0.index(), index.index())?;
            }
        }

        Ok(())
    }
}
