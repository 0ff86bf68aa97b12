//! Compilation errors for the IR phases.
//!
//! Every phase fails as a whole with one of these variants; nothing is
//! recovered inside a phase. The driver maps each variant to a stable
//! kind tag for the single-line stderr report.

use thiserror::Error;

/// IR result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, analyzing, or transforming the IR.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An IR construction did not match the shape of its target:
    /// an offset tuple naming the wrong dimensions, a second step
    /// dimension, or an operation on a frozen solution.
    #[error("schema error: {0}")]
    Schema(String),

    /// A grid or equation was defined twice under the same identity.
    #[error("name conflict: {0}")]
    NameConflict(String),

    /// An equation's value reads the very point it writes in the same
    /// step, so the equation can never be evaluated.
    #[error("cyclic equation: {0}")]
    Cycle(String),

    /// The inter-bundle dependency graph has a cycle; no total bundle
    /// order exists.
    #[error("dependency cycle between equation bundles: {0}")]
    DependencyCycle(String),

    /// An `--eq-bundles` entry was syntactically invalid or carried an
    /// unparsable regex.
    #[error("invalid eq-bundle target '{0}': {1}")]
    UnknownBundleTarget(String, String),

    /// The requested fold lengths cannot be completed to the target
    /// ISA's lane count.
    #[error("fold mismatch: {0}")]
    FoldMismatch(String),

    /// A settings value was outside its legal range (bad regex, bad
    /// element size, invalid radius).
    #[error("bad option: {0}")]
    BadOption(String),
}

impl Error {
    /// Stable kind tag used in top-level error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Schema(_) => "SchemaError",
            Error::NameConflict(_) => "NameConflict",
            Error::Cycle(_) => "CycleError",
            Error::DependencyCycle(_) => "DependencyCycleError",
            Error::UnknownBundleTarget(_, _) => "UnknownBundleTarget",
            Error::FoldMismatch(_) => "FoldMismatch",
            Error::BadOption(_) => "BadOption",
        }
    }
}
