//! Resolved compiler configuration.
//!
//! One [`Settings`] value carries everything the analyzer, optimizer,
//! and folder consume. The CLI assembles it from arguments; library
//! callers fill the fields directly. Defaults match the documented
//! option defaults.

use gridfold_foundation::DimTuple;

/// Base name used for equation bundles when no `--eq-bundles` target
/// matches the written grid.
pub const DEFAULT_BUNDLE_BASENAME: &str = "stencil";

/// The fully resolved configuration record.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bytes per floating-point element: 4 (single) or 8 (double).
    pub elem_bytes: u8,
    /// Explicit step-dimension name; discovered from grids when `None`.
    pub step_dim: Option<String>,
    /// Explicit domain-dimension order; discovery order when empty.
    /// The last entry is the unit-stride dimension.
    pub domain_dims: Vec<String>,
    /// Requested vector fold lengths per domain dimension.
    pub fold: DimTuple,
    /// Requested cluster multiplicities per domain dimension.
    pub cluster: DimTuple,
    /// Only process equations writing grids whose name matches.
    pub var_regex: String,
    /// Bundle targeting rules: `(name-template, var-name-regex)` pairs,
    /// checked in order.
    pub bundle_targets: Vec<(String, String)>,
    /// Base name for bundles with no matching target.
    pub bundle_basename: String,
    /// Allow bundling scratch equations at the cost of scratch-halo
    /// enlargement.
    pub bundle_scratch: bool,
    /// Global halo override; auto-sized per grid when `None`.
    pub halo: Option<i64>,
    /// Global step-allocation override; auto-sized when `None`.
    pub step_alloc: Option<i64>,
    /// Lay misc dimensions innermost (disables dynamic misc resizing).
    pub interleave_misc: bool,
    /// Make the first fold dimension unit stride instead of the last.
    pub first_inner: bool,
    /// Emit direct unaligned loads instead of lane blends.
    pub allow_unaligned_loads: bool,
    /// Optimizer gates.
    pub opt_comb: bool,
    pub opt_cse: bool,
    pub opt_pair: bool,
    pub opt_cluster: bool,
    /// CSE size window, in expanded node count.
    pub min_es: usize,
    pub max_es: usize,
    /// Compute dependency edges between equations.
    pub find_deps: bool,
    /// Log each equation after definition.
    pub print_eqs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            elem_bytes: 4,
            step_dim: None,
            domain_dims: Vec::new(),
            fold: DimTuple::new(),
            cluster: DimTuple::new(),
            var_regex: ".*".to_string(),
            bundle_targets: Vec::new(),
            bundle_basename: DEFAULT_BUNDLE_BASENAME.to_string(),
            bundle_scratch: false,
            halo: None,
            step_alloc: None,
            interleave_misc: false,
            first_inner: false,
            allow_unaligned_loads: false,
            opt_comb: true,
            opt_cse: true,
            opt_pair: true,
            opt_cluster: true,
            min_es: 2,
            max_es: 50,
            find_deps: true,
            print_eqs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_record() {
        let s = Settings::default();
        assert_eq!(s.elem_bytes, 4);
        assert!(s.find_deps);
        assert!(!s.print_eqs);
        assert!(s.fold.is_empty());
        assert!(s.cluster.is_empty());
        assert_eq!(s.var_regex, ".*");
        assert!(!s.bundle_scratch);
        assert!(s.halo.is_none());
        assert!(s.step_alloc.is_none());
        assert!(!s.interleave_misc);
        assert!(!s.first_inner);
        assert!(!s.allow_unaligned_loads);
        assert!(s.opt_comb && s.opt_cse && s.opt_pair && s.opt_cluster);
        assert_eq!((s.min_es, s.max_es), (2, 50));
    }
}
