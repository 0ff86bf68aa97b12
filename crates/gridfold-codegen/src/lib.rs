//! Gridfold Codegen
//!
//! Format-dispatched emitters over the post-vectorization IR. Every
//! formatter implements the same visit contract and produces
//! byte-identical output for identical input: iteration follows bundle
//! and declaration order, never hash order.

use thiserror::Error;

use gridfold_ir::{FoldLayout, Settings, Solution, VecBundle};

mod cpp;
mod dot;
mod expr;
mod pseudo;
mod simd;

/// Codegen result type alias.
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors from format selection.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// The requested format tag is not one of the supported outputs.
    #[error("unknown output format '{0}'")]
    UnknownFormat(String),
}

impl FormatError {
    /// Stable kind tag used in top-level error reports.
    pub fn kind(&self) -> &'static str {
        "UnknownFormat"
    }
}

/// One of the supported output syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Portable scalar C++.
    Cpp,
    /// CORE AVX ISA (256-bit vectors).
    Avx,
    /// CORE AVX2 ISA (256-bit vectors).
    Avx2,
    /// AVX-512 ISAs (512-bit vectors).
    Avx512,
    /// KNC ISA (512-bit vectors).
    Knc,
    /// Human-readable scalar pseudocode.
    Pseudo,
    /// Pseudocode with a named temporary per shared node.
    PseudoLong,
    /// DOT-language description of the expression DAG.
    Dot,
    /// DOT-language description of var accesses only.
    DotLite,
}

impl OutputFormat {
    /// All formats, in documentation order.
    pub const ALL: [OutputFormat; 9] = [
        OutputFormat::Cpp,
        OutputFormat::Avx,
        OutputFormat::Avx2,
        OutputFormat::Avx512,
        OutputFormat::Knc,
        OutputFormat::Pseudo,
        OutputFormat::PseudoLong,
        OutputFormat::Dot,
        OutputFormat::DotLite,
    ];

    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "cpp" => Ok(OutputFormat::Cpp),
            "avx" => Ok(OutputFormat::Avx),
            "avx2" => Ok(OutputFormat::Avx2),
            "avx512" => Ok(OutputFormat::Avx512),
            "knc" => Ok(OutputFormat::Knc),
            "pseudo" => Ok(OutputFormat::Pseudo),
            "pseudo-long" => Ok(OutputFormat::PseudoLong),
            "dot" => Ok(OutputFormat::Dot),
            "dot-lite" => Ok(OutputFormat::DotLite),
            other => Err(FormatError::UnknownFormat(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            OutputFormat::Cpp => "cpp",
            OutputFormat::Avx => "avx",
            OutputFormat::Avx2 => "avx2",
            OutputFormat::Avx512 => "avx512",
            OutputFormat::Knc => "knc",
            OutputFormat::Pseudo => "pseudo",
            OutputFormat::PseudoLong => "pseudo-long",
            OutputFormat::Dot => "dot",
            OutputFormat::DotLite => "dot-lite",
        }
    }

    /// Required SIMD lane count, or `None` for formats without
    /// explicit vector lengths.
    pub fn lanes(&self, elem_bytes: u8) -> Option<i64> {
        match self {
            OutputFormat::Avx => Some(simd::AVX.lanes(elem_bytes)),
            OutputFormat::Avx2 => Some(simd::AVX2.lanes(elem_bytes)),
            OutputFormat::Avx512 => Some(simd::AVX512.lanes(elem_bytes)),
            OutputFormat::Knc => Some(simd::KNC.lanes(elem_bytes)),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Render one equation as a single pseudo-style line, e.g.
/// `p(t+1, x, y) = 0.25 * (p(t, x+1, y) + p(t, x-1, y))`. Used for
/// equation logging.
pub fn render_equation(soln: &Solution, eq_index: usize) -> String {
    use gridfold_ir::{NodeKind, TempPlan};
    let eq = &soln.equations()[eq_index];
    let temps = TempPlan::default();
    let printer = expr::ScalarPrinter {
        arena: soln.arena(),
        soln,
        temps: &temps,
        prefix: "",
    };
    let (grid, offsets, value) = match soln.arena().kind(eq.root) {
        NodeKind::Write {
            grid,
            offsets,
            value,
        } => (*grid, offsets.clone(), *value),
        other => unreachable!("equation root must be a write, got {other:?}"),
    };
    let target = expr::access("", &soln.grid(grid).name, &offsets);
    let body = printer.render(value);
    match eq.cond {
        Some(cond) => format!("if ({}) {target} = {body}", printer.render(cond)),
        None => format!("{target} = {body}"),
    }
}

/// Render the post-vectorization IR in the requested format.
pub fn emit(
    format: OutputFormat,
    soln: &Solution,
    layout: &FoldLayout,
    bundles: &[VecBundle],
    settings: &Settings,
) -> String {
    match format {
        OutputFormat::Cpp => cpp::emit(soln, layout, bundles, settings),
        OutputFormat::Avx => simd::emit(soln, layout, bundles, settings, &simd::AVX),
        OutputFormat::Avx2 => simd::emit(soln, layout, bundles, settings, &simd::AVX2),
        OutputFormat::Avx512 => simd::emit(soln, layout, bundles, settings, &simd::AVX512),
        OutputFormat::Knc => simd::emit(soln, layout, bundles, settings, &simd::KNC),
        OutputFormat::Pseudo => pseudo::emit(soln, layout, bundles, settings, false),
        OutputFormat::PseudoLong => pseudo::emit(soln, layout, bundles, settings, true),
        OutputFormat::Dot => dot::emit(soln, bundles, false),
        OutputFormat::DotLite => dot::emit(soln, bundles, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridfold_foundation::{DimKind, DimTuple};
    use gridfold_ir::{
        expand_clusters, make_bundles, optimize_solution, resolve_fold, DepGraph,
    };

    fn dt(pairs: &[(&str, i64)]) -> DimTuple {
        DimTuple::from_pairs(pairs.iter().map(|&(n, v)| (n, v))).unwrap()
    }

    fn axis_solution() -> Solution {
        let mut s = Solution::new("axis", "axis-sum test stencil");
        let g = s
            .make_grid(
                "p",
                &[("t", DimKind::Step), ("x", DimKind::Domain), ("y", DimKind::Domain)],
            )
            .unwrap();
        let mut terms = Vec::new();
        for off in [-1i64, 0, 1] {
            let r = s.make_read(g, &dt(&[("t", 0), ("x", off), ("y", 0)])).unwrap();
            terms.push(r);
        }
        let quarter = s.make_const(0.25);
        let sum = s.make_add(terms);
        let v = s.make_mul(vec![quarter, sum]);
        s.make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), v, None)
            .unwrap();
        s
    }

    fn pipeline(
        mut s: Solution,
        settings: &Settings,
        format: OutputFormat,
    ) -> (Solution, String) {
        s.freeze(settings).unwrap();
        let deps = DepGraph::analyze(&s);
        let bundles = make_bundles(&mut s, &deps, settings).unwrap();
        optimize_solution(&mut s, &bundles, settings);
        let layout = resolve_fold(&s, settings, format.lanes(settings.elem_bytes)).unwrap();
        let mut vec_bundles = expand_clusters(&mut s, &bundles, &layout);
        gridfold_ir::optimize_vec_bundles(&mut s, &mut vec_bundles, settings);
        let text = emit(format, &s, &layout, &vec_bundles, settings);
        (s, text)
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(matches!(
            OutputFormat::parse("pov-ray"),
            Err(FormatError::UnknownFormat(_))
        ));
        assert_eq!(OutputFormat::parse("avx512").unwrap(), OutputFormat::Avx512);
    }

    #[test]
    fn lane_counts_per_format() {
        assert_eq!(OutputFormat::Avx.lanes(4), Some(8));
        assert_eq!(OutputFormat::Avx2.lanes(8), Some(4));
        assert_eq!(OutputFormat::Avx512.lanes(4), Some(16));
        assert_eq!(OutputFormat::Knc.lanes(8), Some(8));
        assert_eq!(OutputFormat::Pseudo.lanes(4), None);
        assert_eq!(OutputFormat::Cpp.lanes(8), None);
    }

    #[test]
    fn pseudo_output_is_deterministic() {
        let settings = Settings::default();
        let (_, a) = pipeline(axis_solution(), &settings, OutputFormat::Pseudo);
        let (_, b) = pipeline(axis_solution(), &settings, OutputFormat::Pseudo);
        assert_eq!(a, b);
        assert!(a.contains("p(t+1, x, y) ="));
        assert!(a.contains("Equation-bundle 'stencil_0'"));
    }

    /// `(p(t,x+1) + p(t,x-1))` used twice: once scaled, once bare.
    fn shared_solution() -> Solution {
        let mut s = Solution::new("shared", "");
        let g = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let r1 = s.make_read(g, &dt(&[("t", 0), ("x", 1)])).unwrap();
        let r2 = s.make_read(g, &dt(&[("t", 0), ("x", -1)])).unwrap();
        let pair = s.make_add(vec![r1, r2]);
        let two = s.make_const(2.0);
        let scaled = s.make_mul(vec![pair, two]);
        let v = s.make_add(vec![scaled, pair]);
        s.make_write(g, &dt(&[("t", 1), ("x", 0)]), v, None).unwrap();
        s
    }

    #[test]
    fn pseudo_long_names_every_shared_node() {
        // Window excludes the shared pair; short pseudo inlines it,
        // pseudo-long still names it.
        let settings = Settings {
            min_es: 10,
            ..Settings::default()
        };
        let (_, short) = pipeline(shared_solution(), &settings, OutputFormat::Pseudo);
        assert!(!short.contains("temp1"));
        let (_, long) = pipeline(shared_solution(), &settings, OutputFormat::PseudoLong);
        assert!(long.contains("temp1 ="));
    }

    #[test]
    fn disabling_cse_inlines_shared_subtrees() {
        let settings = Settings::default();
        let (_, with_cse) = pipeline(shared_solution(), &settings, OutputFormat::Pseudo);
        let no_cse = Settings {
            opt_cse: false,
            ..Settings::default()
        };
        let (_, without) = pipeline(shared_solution(), &no_cse, OutputFormat::Pseudo);
        // With CSE the shared pair prints once (as a temp); without,
        // every use is inlined.
        assert_eq!(with_cse.matches("p(t, x+1)").count(), 1);
        assert_eq!(without.matches("p(t, x+1)").count(), 2);
        assert!(!without.contains("temp1"));
    }

    #[test]
    fn avx2_output_annotates_alignment() {
        let settings = Settings {
            fold: dt(&[("x", 4), ("y", 2)]),
            ..Settings::default()
        };
        let (_, text) = pipeline(axis_solution(), &settings, OutputFormat::Avx2);
        assert!(text.contains("typedef __m256 real_vec_t;"));
        assert!(text.contains("constexpr idx_t VLEN = 8;"));
        // The center read is aligned; x+1/x-1 stray across vectors.
        assert!(text.contains("// aligned p(t, x, y)"));
        assert!(text.contains("_mm256_store_ps"));
    }

    #[test]
    fn avx512_uses_alignr_for_slow_dim_shifts() {
        let settings = Settings {
            fold: dt(&[("x", 4), ("y", 4)]),
            ..Settings::default()
        };
        let (_, text) = pipeline(axis_solution(), &settings, OutputFormat::Avx512);
        assert!(text.contains("typedef __m512 real_vec_t;"));
        // x is the slowest folded dim; x+1 shifts lanes via alignr.
        assert!(text.contains("vec_align<"));
    }

    #[test]
    fn unaligned_loads_honor_the_flag() {
        let settings = Settings {
            fold: dt(&[("x", 8)]),
            allow_unaligned_loads: true,
            ..Settings::default()
        };
        let (_, text) = pipeline(axis_solution(), &settings, OutputFormat::Avx2);
        assert!(text.contains("_mm256_loadu_ps"));
        assert!(text.contains("// unaligned"));
    }

    #[test]
    fn dot_output_is_graphviz_shaped() {
        let settings = Settings::default();
        let (_, text) = pipeline(axis_solution(), &settings, OutputFormat::Dot);
        assert!(text.starts_with("digraph \"axis\" {"));
        assert!(text.trim_end().ends_with('}'));
        assert!(text.contains("subgraph cluster_0"));

        let (_, lite) = pipeline(axis_solution(), &settings, OutputFormat::DotLite);
        assert!(lite.contains("\"p\" -> \"stencil_0\""));
        assert!(lite.contains("\"stencil_0\" -> \"p\""));
    }

    #[test]
    fn cpp_output_is_scalar() {
        let settings = Settings {
            elem_bytes: 8,
            ..Settings::default()
        };
        let (_, text) = pipeline(axis_solution(), &settings, OutputFormat::Cpp);
        assert!(text.contains("typedef double real_t;"));
        assert!(text.contains("struct axis_stencil_0"));
        assert!(text.contains("ctx.p(t+1, x, y) ="));
        assert!(!text.contains("_mm256"));
    }
}
