/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = std::sync::Arc<str>;

/// Whether recipes are actually invoked during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Resolve and invoke every recipe.
    #[default]
    Build,
    /// Resolve only. The execution log is identical to the one a build would
    /// produce, but no recipe is invoked and storage is left untouched.
    DryRun,
}

impl Mode {
    pub fn is_dry_run(self) -> bool {
        matches!(self, Mode::DryRun)
    }
}

impl From<bool> for Mode {
    fn from(dry_run: bool) -> Self {
        if dry_run { Mode::DryRun } else { Mode::Build }
    }
}

/// How the resolver decides that a requirement is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// A node counts as complete once it has been executed (or found
    /// complete) in the current run, or when storage says so. Actions run at
    /// most once per run.
    #[default]
    PerRun,
    /// Only storage decides. Actions are never complete, so a parent that
    /// requires an action would re-run it forever; the resolver reports this
    /// as [`BuildError::CycleDetected`](crate::BuildError::CycleDetected)
    /// instead. The same error is raised when an artifact recipe finishes
    /// without producing its artifact and a dependent asks for it again.
    ///
    /// In a dry run an artifact logged earlier in the run is assumed to
    /// exist, so the log matches the one a build would produce.
    Storage,
}
