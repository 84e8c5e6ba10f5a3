use camino::Utf8PathBuf;
use thiserror::Error;

pub use anyhow::Error as RuntimeError;

#[derive(Debug, Error)]
pub enum BuildError {
    /// A declared source artifact was required but never existed.
    #[error("Missing required input '{path}'")]
    MissingInput { path: Utf8PathBuf },

    #[error("Node '{node}':\n{source}")]
    Action {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Node '{node}' panicked: {message}")]
    Panic { node: String, message: String },

    /// A node was reached again while it was still being resolved, or an
    /// already executed node was surfaced as unmet a second time.
    #[error("Cycle detected at node '{node}'")]
    CycleDetected { node: String },

    /// A handle issued by a different blueprint was passed in.
    #[error("Node {index} does not exist in this build graph")]
    UnknownNode { index: usize },

    #[error("Journal does not match the build graph: {0}")]
    Journal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    Glob(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    GlobWalk(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// Returns `true` if this error was raised by the cycle guard.
    pub fn is_cycle(&self) -> bool {
        matches!(self, BuildError::CycleDetected { .. })
    }
}
