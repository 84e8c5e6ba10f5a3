//! The two kinds of build graph nodes and their completeness predicate.
//!
//! An [`Artifact`](Target::Artifact) is a persisted output, complete once its
//! path exists in [`Storage`]. An [`Action`](Target::Action) is a unit of work
//! with nothing to check, so on its own it is never complete.

use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::core::ArcStr;
use crate::error::BuildError;
use crate::storage::Storage;

/// Callback invoked to build a node.
pub type Callback = Arc<dyn Fn(&Node) -> anyhow::Result<()> + Send + Sync>;

/// A type-safe reference to a node in the build graph.
///
/// Handles are only handed out by [`Blueprint`](crate::Blueprint), so a
/// handle always points at a node which exists in the graph it came from.
/// A handle used with a different graph is rejected by
/// [`Runner`](crate::Runner) with
/// [`BuildError::UnknownNode`](crate::BuildError::UnknownNode) when out of
/// bounds, and otherwise names whatever node sits at the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub(crate) NodeIndex);

impl Handle {
    /// Returns the underlying `NodeIndex` of the node in the graph.
    pub fn index(&self) -> NodeIndex {
        self.0
    }
}

/// Node identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Identified by a path in persistent storage.
    Artifact(Utf8PathBuf),
    /// Identified by a name.
    Action(ArcStr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Artifact,
    Action,
}

/// What happens when a node is built.
#[derive(Clone)]
pub enum Recipe {
    /// Call user code.
    Run(Callback),
    /// Do nothing.
    Noop,
    /// Always fail with [`BuildError::MissingInput`]. Used by source
    /// artifacts, which must already exist and are never produced.
    Missing,
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipe::Run(_) => f.write_str("Run(..)"),
            Recipe::Noop => f.write_str("Noop"),
            Recipe::Missing => f.write_str("Missing"),
        }
    }
}

/// An immutable node record.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) target: Target,
    pub(crate) recipe: Recipe,
    pub(crate) requires: Vec<Handle>,
}

impl Node {
    pub(crate) fn artifact(path: Utf8PathBuf, recipe: Recipe, requires: Vec<Handle>) -> Self {
        Self {
            target: Target::Artifact(path),
            recipe,
            requires,
        }
    }

    pub(crate) fn action(name: ArcStr, recipe: Recipe, requires: Vec<Handle>) -> Self {
        Self {
            target: Target::Action(name),
            recipe,
            requires,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn kind(&self) -> Kind {
        match self.target {
            Target::Artifact(_) => Kind::Artifact,
            Target::Action(_) => Kind::Action,
        }
    }

    /// The artifact path, `None` for actions.
    pub fn path(&self) -> Option<&Utf8Path> {
        match &self.target {
            Target::Artifact(path) => Some(path),
            Target::Action(_) => None,
        }
    }

    /// The path for artifacts, the name for actions.
    pub fn label(&self) -> &str {
        match &self.target {
            Target::Artifact(path) => path.as_str(),
            Target::Action(name) => name.as_ref(),
        }
    }

    /// Requirements in declared order.
    pub fn requires(&self) -> &[Handle] {
        &self.requires
    }

    /// Whether this node is a declared pre-existing input.
    pub fn is_source(&self) -> bool {
        matches!(self.recipe, Recipe::Missing)
    }

    /// Storage-only completeness: an artifact is complete if its path exists
    /// right now, an action never is. Two calls may disagree if storage
    /// changes in between.
    pub fn is_complete(&self, storage: &dyn Storage) -> bool {
        match &self.target {
            Target::Artifact(path) => storage.exists(path),
            Target::Action(_) => false,
        }
    }

    /// Invoke the recipe.
    pub(crate) fn build(&self) -> Result<(), BuildError> {
        match &self.recipe {
            Recipe::Noop => Ok(()),
            Recipe::Missing => Err(BuildError::MissingInput {
                path: self.label().into(),
            }),
            Recipe::Run(callback) => callback(self).map_err(|source| BuildError::Action {
                node: self.label().to_string(),
                source,
            }),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Artifact(path) => write!(f, "artifact '{path}'"),
            Target::Action(name) => write!(f, "action '{name}'"),
        }
    }
}
