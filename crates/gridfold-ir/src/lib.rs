//! Gridfold IR
//!
//! The compiler's middle end: the hash-consed expression graph,
//! solution and factory surface, dependency analysis and equation
//! bundling, algebraic optimization, and vector folding.
//!
//! Pipeline: define -> freeze -> analyze -> optimize -> fold -> emit.

pub mod bundle;
pub mod deps;
mod error;
pub mod fold;
pub mod node;
pub mod optimize;
mod settings;
mod solution;

pub use bundle::{make_bundles, BundleSet, EqBundle};
pub use deps::{Certainty, DepEdge, DepGraph};
pub use error::{Error, Result};
pub use fold::{
    classify_access, expand_clusters, resolve_fold, FoldLayout, VecAccess, VecAccessKind,
    VecBundle, VecEquation,
};
pub use node::{BinaryOp, CommOp, GridId, Node, NodeArena, NodeId, NodeKind, UnaryOp};
pub use optimize::{optimize_solution, optimize_vec_bundles, plan_temps, TempPlan};
pub use settings::{Settings, DEFAULT_BUNDLE_BASENAME};
pub use solution::{Equation, Grid, Solution};
