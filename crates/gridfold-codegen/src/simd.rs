//! SIMD intrinsic emitters (AVX, AVX2, AVX-512, KNC).
//!
//! Emits header-style fragments: a prelude declaring the vector type,
//! lane count, and blend/compare helpers, then one struct per bundle
//! whose `calc_vec` routine evaluates one cluster of vectors. Every
//! distinct grid read is hoisted into a named load annotated with its
//! alignment class; arithmetic lifts element-wise onto intrinsics.

use indexmap::IndexMap;

use gridfold_ir::{
    classify_access, plan_temps, FoldLayout, NodeArena, NodeId, NodeKind, Settings, Solution,
    TempPlan, VecAccessKind, VecBundle,
};

use crate::expr::format_const;

/// Fixed description of one target ISA.
pub(crate) struct IsaSpec {
    pub tag: &'static str,
    pub vec_bytes: i64,
    /// Whether lane shifts may use an `alignr`-style intrinsic.
    pub has_alignr: bool,
}

pub(crate) const AVX: IsaSpec = IsaSpec {
    tag: "avx",
    vec_bytes: 32,
    has_alignr: false,
};
pub(crate) const AVX2: IsaSpec = IsaSpec {
    tag: "avx2",
    vec_bytes: 32,
    has_alignr: false,
};
pub(crate) const AVX512: IsaSpec = IsaSpec {
    tag: "avx512",
    vec_bytes: 64,
    has_alignr: true,
};
pub(crate) const KNC: IsaSpec = IsaSpec {
    tag: "knc",
    vec_bytes: 64,
    has_alignr: true,
};

impl IsaSpec {
    pub fn lanes(&self, elem_bytes: u8) -> i64 {
        self.vec_bytes / elem_bytes as i64
    }

    fn prefix(&self) -> &'static str {
        if self.vec_bytes == 64 {
            "_mm512"
        } else {
            "_mm256"
        }
    }

    fn suffix(&self, elem_bytes: u8) -> &'static str {
        if elem_bytes == 4 {
            "ps"
        } else {
            "pd"
        }
    }

    fn vtype(&self, elem_bytes: u8) -> &'static str {
        match (self.vec_bytes, elem_bytes) {
            (32, 4) => "__m256",
            (32, _) => "__m256d",
            (64, 4) => "__m512",
            (64, _) => "__m512d",
            _ => unreachable!("vector widths are 32 or 64 bytes"),
        }
    }
}

pub(crate) fn emit(
    soln: &Solution,
    layout: &FoldLayout,
    bundles: &[VecBundle],
    settings: &Settings,
    isa: &IsaSpec,
) -> String {
    let p = isa.prefix();
    let s = isa.suffix(settings.elem_bytes);
    // Direct unaligned loads are only meaningful for one-dimensional
    // folds, where element adjacency matches lane adjacency.
    let one_d = layout.fold.iter().filter(|(_, v)| *v > 1).count() <= 1;
    let allow_ul = settings.allow_unaligned_loads && one_d;

    let mut out = String::new();
    out.push_str("// Generated stencil code; do not edit.\n");
    out.push_str(&format!(
        "// Solution '{}', {} ISA ({} lanes).\n",
        soln.name(),
        isa.tag,
        layout.lanes
    ));
    out.push_str(&format!(
        "// Fold: {} ({}); cluster: {}.\n",
        layout.fold,
        if layout.first_inner { "fus" } else { "lus" },
        layout.cluster
    ));
    out.push_str("#pragma once\n");
    out.push_str("#include <immintrin.h>\n\n");
    out.push_str("typedef long idx_t;\n");
    out.push_str(&format!(
        "typedef {} real_t;\n",
        if settings.elem_bytes == 4 { "float" } else { "double" }
    ));
    out.push_str(&format!(
        "typedef {} real_vec_t;\n",
        isa.vtype(settings.elem_bytes)
    ));
    out.push_str(&format!("constexpr idx_t VLEN = {};\n", layout.lanes));
    out.push_str(&prelude_helpers(isa, settings.elem_bytes));

    for bundle in bundles {
        out.push('\n');
        out.push_str(&format!(
            "// Equation-bundle '{}' ({} vector equation(s) per cluster).\n",
            bundle.name,
            bundle.eqs.len()
        ));
        out.push_str(&format!("struct {}_{} {{\n", soln.name(), bundle.name));
        out.push_str(&format!(
            "    // Vector indices over folded dims; cluster of {} vector(s).\n",
            layout.cluster_product()
        ));
        out.push_str("    template <typename Ctx>\n");
        out.push_str(&format!(
            "    static inline void calc_vec(Ctx& ctx{}) {{\n",
            signature(soln)
        ));

        let mut roots = Vec::new();
        for veq in &bundle.eqs {
            roots.push(veq.root);
            roots.extend(veq.cond);
        }

        // Hoist every distinct read into a named, annotated load.
        let mut loads: IndexMap<NodeId, String> = IndexMap::new();
        for id in soln.arena().postorder(&roots) {
            if let NodeKind::Read { grid, offsets } = soln.arena().kind(id) {
                let name = format!("ld{}", loads.len());
                let gname = &soln.grid(*grid).name;
                let access = classify_access(layout, offsets, allow_ul);
                let (expr, note) = match &access.kind {
                    VecAccessKind::Aligned => (
                        format!(
                            "{p}_load_{s}(ctx.{gname}.vec_ptr({}))",
                            vec_args(layout, &access.vec_offsets)
                        ),
                        "aligned".to_string(),
                    ),
                    VecAccessKind::Unaligned => (
                        format!(
                            "{p}_loadu_{s}(ctx.{gname}.elem_ptr({}))",
                            elem_args(layout, offsets, None)
                        ),
                        "unaligned".to_string(),
                    ),
                    VecAccessKind::Shifted { dim, shift } => {
                        if isa.has_alignr && slowest_folded_dim(layout) == Some(dim.clone()) {
                            let mut lo = access.vec_offsets.clone();
                            let mut hi = access.vec_offsets.clone();
                            hi.set(dim.clone(), hi.get(dim).unwrap_or(0) + 1);
                            let n = layout.lane_of(&access.rem);
                            (
                                format!(
                                    "vec_align<{n}>({p}_load_{s}(ctx.{gname}.vec_ptr({})), \
                                     {p}_load_{s}(ctx.{gname}.vec_ptr({})))",
                                    vec_args(layout, &lo),
                                    vec_args(layout, &hi)
                                ),
                                format!("lane shift {shift} along {dim}"),
                            )
                        } else {
                            (
                                gather_expr(layout, soln, *grid, offsets, isa, settings),
                                format!("construct: lane shift {shift} along {dim}"),
                            )
                        }
                    }
                    VecAccessKind::Gather => (
                        gather_expr(layout, soln, *grid, offsets, isa, settings),
                        "construct from elements".to_string(),
                    ),
                };
                out.push_str(&format!(
                    "        real_vec_t {name} = {expr}; // {note} {}\n",
                    crate::expr::access("", gname, offsets)
                ));
                loads.insert(id, name);
            }
        }

        let temps = plan_temps(soln.arena(), &roots, settings, false);
        let printer = VecPrinter {
            arena: soln.arena(),
            temps: &temps,
            loads: &loads,
            p,
            s,
        };
        let mut emitted_calls: Vec<NodeId> = Vec::new();
        for (&id, name) in &temps.temps {
            match soln.arena().kind(id) {
                NodeKind::CallSlot { call, index } => {
                    if emitted_calls.contains(call) {
                        continue;
                    }
                    emitted_calls.push(*call);
                    let arg = match soln.arena().kind(*call) {
                        NodeKind::Call { args, .. } => printer.render(args[0]),
                        _ => String::from("?"),
                    };
                    let sibling = temps.temps.iter().find_map(|(&o, n)| {
                        match soln.arena().kind(o) {
                            NodeKind::CallSlot { call: c, index: i }
                                if c == call && i != index =>
                            {
                                Some(n.clone())
                            }
                            _ => None,
                        }
                    });
                    match (*index, sibling) {
                        // Both outputs live: one sincos statement.
                        (0, Some(cos_name)) => {
                            out.push_str(&format!("        real_vec_t {cos_name};\n"));
                            out.push_str(&format!(
                                "        real_vec_t {name} = {p}_sincos_{s}(&{cos_name}, {arg});\n"
                            ));
                        }
                        (_, Some(sin_name)) => {
                            out.push_str(&format!("        real_vec_t {name};\n"));
                            out.push_str(&format!(
                                "        real_vec_t {sin_name} = {p}_sincos_{s}(&{name}, {arg});\n"
                            ));
                        }
                        // Lone slot: fall back to the single function.
                        (0, None) => out.push_str(&format!(
                            "        real_vec_t {name} = {p}_sin_{s}({arg});\n"
                        )),
                        (_, None) => out.push_str(&format!(
                            "        real_vec_t {name} = {p}_cos_{s}({arg});\n"
                        )),
                    }
                }
                _ => {
                    let body = printer.render_def(id);
                    out.push_str(&format!("        real_vec_t {name} = {body};\n"));
                }
            }
        }

        for veq in &bundle.eqs {
            let (grid, offsets, value) = match soln.arena().kind(veq.root) {
                NodeKind::Write {
                    grid,
                    offsets,
                    value,
                } => (*grid, offsets.clone(), *value),
                other => unreachable!("equation root must be a write, got {other:?}"),
            };
            let gname = &soln.grid(grid).name;
            let access = classify_access(layout, &offsets, false);
            let value_expr = printer.render(value);
            let store = |value_expr: &str| match access.kind {
                VecAccessKind::Aligned => format!(
                    "{p}_store_{s}(ctx.{gname}.vec_ptr({}), {value_expr})",
                    vec_args(layout, &access.vec_offsets)
                ),
                _ => format!(
                    "{p}_storeu_{s}(ctx.{gname}.elem_ptr({}), {value_expr})",
                    elem_args(layout, &offsets, None)
                ),
            };
            match veq.cond {
                Some(cond) => {
                    let c = printer.render(cond);
                    let prev = format!(
                        "{p}_load_{s}(ctx.{gname}.vec_ptr({}))",
                        vec_args(layout, &access.vec_offsets)
                    );
                    out.push_str(&format!(
                        "        {};\n",
                        store(&format!("vec_select({c}, {value_expr}, {prev})"))
                    ));
                }
                None => out.push_str(&format!("        {};\n", store(&value_expr))),
            }
        }
        out.push_str("    }\n");
        out.push_str("};\n");
    }
    out
}

/// Compare/blend helpers hiding the mask-type differences between the
/// 256-bit and 512-bit ISAs.
fn prelude_helpers(isa: &IsaSpec, elem_bytes: u8) -> String {
    let p = isa.prefix();
    let s = isa.suffix(elem_bytes);
    let mut out = String::new();
    if isa.vec_bytes == 64 {
        let mask = if elem_bytes == 4 {
            "__mmask16"
        } else {
            "__mmask8"
        };
        let (cast_to_i, cast_from_i, alignr) = if elem_bytes == 4 {
            ("_mm512_castps_si512", "_mm512_castsi512_ps", "_mm512_alignr_epi32")
        } else {
            ("_mm512_castpd_si512", "_mm512_castsi512_pd", "_mm512_alignr_epi64")
        };
        out.push_str(&format!("typedef {mask} vmask_t;\n"));
        out.push_str(&format!(
            "static inline vmask_t vec_lt(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}_mask(a, b, _CMP_LT_OQ); }}\n\
             static inline vmask_t vec_le(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}_mask(a, b, _CMP_LE_OQ); }}\n\
             static inline vmask_t vec_gt(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}_mask(a, b, _CMP_GT_OQ); }}\n\
             static inline vmask_t vec_ge(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}_mask(a, b, _CMP_GE_OQ); }}\n\
             static inline vmask_t vec_eq(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}_mask(a, b, _CMP_EQ_OQ); }}\n\
             static inline vmask_t vec_ne(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}_mask(a, b, _CMP_NEQ_UQ); }}\n\
             static inline vmask_t vec_and(vmask_t a, vmask_t b) {{ return a & b; }}\n\
             static inline vmask_t vec_or(vmask_t a, vmask_t b) {{ return a | b; }}\n\
             static inline real_vec_t vec_select(vmask_t m, real_vec_t a, real_vec_t b) {{ return {p}_mask_blend_{s}(m, b, a); }}\n\
             static inline real_vec_t vec_neg(real_vec_t a) {{ return {p}_sub_{s}({p}_setzero_{s}(), a); }}\n"
        ));
        out.push_str(&format!(
            "template <int N>\n\
             static inline real_vec_t vec_align(real_vec_t lo, real_vec_t hi) {{\n\
                 return {cast_from_i}({alignr}({cast_to_i}(hi), {cast_to_i}(lo), N));\n\
             }}\n"
        ));
    } else {
        out.push_str("typedef real_vec_t vmask_t;\n");
        out.push_str(&format!(
            "static inline vmask_t vec_lt(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}(a, b, _CMP_LT_OQ); }}\n\
             static inline vmask_t vec_le(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}(a, b, _CMP_LE_OQ); }}\n\
             static inline vmask_t vec_gt(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}(a, b, _CMP_GT_OQ); }}\n\
             static inline vmask_t vec_ge(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}(a, b, _CMP_GE_OQ); }}\n\
             static inline vmask_t vec_eq(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}(a, b, _CMP_EQ_OQ); }}\n\
             static inline vmask_t vec_ne(real_vec_t a, real_vec_t b) {{ return {p}_cmp_{s}(a, b, _CMP_NEQ_UQ); }}\n\
             static inline vmask_t vec_and(vmask_t a, vmask_t b) {{ return {p}_and_{s}(a, b); }}\n\
             static inline vmask_t vec_or(vmask_t a, vmask_t b) {{ return {p}_or_{s}(a, b); }}\n\
             static inline real_vec_t vec_select(vmask_t m, real_vec_t a, real_vec_t b) {{ return {p}_blendv_{s}(b, a, m); }}\n\
             static inline real_vec_t vec_neg(real_vec_t a) {{ return {p}_sub_{s}({p}_setzero_{s}(), a); }}\n"
        ));
    }
    out
}

/// Slowest-varying folded dimension: the only one an `alignr` lane
/// shift is exact for.
fn slowest_folded_dim(layout: &FoldLayout) -> Option<String> {
    let folded: Vec<&str> = layout
        .fold
        .iter()
        .filter(|(_, v)| *v > 1)
        .map(|(n, _)| n)
        .collect();
    let pick = if layout.first_inner {
        folded.last()
    } else {
        folded.first()
    };
    pick.map(|s| s.to_string())
}

/// `t+1, x, y+2` in vector units.
fn vec_args(_layout: &FoldLayout, vec_offsets: &gridfold_foundation::DimTuple) -> String {
    vec_offsets
        .iter()
        .map(|(n, v)| gridfold_foundation::DimTuple::offset_term(n, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Element-granular index terms: folded dims scale the vector index
/// (`x*4+1`), other dims pass through (`t+1`). `lane` adds that
/// lane's intra-vector coordinates.
fn elem_args(
    layout: &FoldLayout,
    offsets: &gridfold_foundation::DimTuple,
    lane: Option<&gridfold_foundation::DimTuple>,
) -> String {
    offsets
        .iter()
        .map(|(n, off)| {
            let len = layout.fold.get(n).unwrap_or(1);
            if len > 1 {
                let extra = off + lane.and_then(|l| l.get(n)).unwrap_or(0);
                match extra {
                    0 => format!("{n}*{len}"),
                    e if e > 0 => format!("{n}*{len}+{e}"),
                    e => format!("{n}*{len}{e}"),
                }
            } else {
                gridfold_foundation::DimTuple::offset_term(n, off)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-lane construction via the `set` intrinsic (highest lane first).
fn gather_expr(
    layout: &FoldLayout,
    soln: &Solution,
    grid: gridfold_ir::GridId,
    offsets: &gridfold_foundation::DimTuple,
    isa: &IsaSpec,
    settings: &Settings,
) -> String {
    let p = isa.prefix();
    let s = isa.suffix(settings.elem_bytes);
    let gname = &soln.grid(grid).name;
    let mut elems = Vec::with_capacity(layout.lanes as usize);
    for lane in (0..layout.lanes).rev() {
        let coords = layout.unfold(lane);
        elems.push(format!(
            "ctx.{gname}.at({})",
            elem_args(layout, offsets, Some(&coords))
        ));
    }
    format!("{p}_set_{s}({})", elems.join(", "))
}

/// `, idx_t t, idx_t x, idx_t y`: vector indices over folded dims.
fn signature(soln: &Solution) -> String {
    let mut args = String::new();
    if let Some(step) = soln.step_dim() {
        args.push_str(&format!(", idx_t {step}"));
    }
    for d in soln.domain_dims() {
        args.push_str(&format!(", idx_t {d}"));
    }
    for d in soln.misc_dims() {
        args.push_str(&format!(", idx_t {d}"));
    }
    args
}

/// Vector expression printer: loads and temps by name, ops as
/// intrinsics, comparisons through the prelude helpers.
struct VecPrinter<'a> {
    arena: &'a NodeArena,
    temps: &'a TempPlan,
    loads: &'a IndexMap<NodeId, String>,
    p: &'static str,
    s: &'static str,
}

impl VecPrinter<'_> {
    fn render(&self, id: NodeId) -> String {
        self.render_inner(id, None)
    }

    fn render_def(&self, id: NodeId) -> String {
        self.render_inner(id, Some(id))
    }

    fn render_inner(&self, id: NodeId, def_of: Option<NodeId>) -> String {
        if def_of != Some(id) {
            if let Some(name) = self.temps.name_of(id) {
                return name.to_string();
            }
        }
        if let Some(name) = self.loads.get(&id) {
            return name.clone();
        }
        let (p, s) = (self.p, self.s);
        match self.arena.kind(id) {
            NodeKind::Const(c) => format!("{p}_set1_{s}({})", format_const(*c)),
            NodeKind::Param(name) => format!("{p}_set1_{s}(ctx.{name})"),
            NodeKind::Read { .. } => unreachable!("reads are hoisted into loads"),
            NodeKind::Write { .. } => unreachable!("writes render as statements"),
            NodeKind::Unary { op, arg } => {
                let a = self.render_inner(*arg, def_of);
                match op {
                    gridfold_ir::UnaryOp::Neg => format!("vec_neg({a})"),
                    gridfold_ir::UnaryOp::Not => format!("vec_eq({a}, {p}_setzero_{s}())"),
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                use gridfold_ir::BinaryOp::*;
                let l = self.render_inner(*lhs, def_of);
                let r = self.render_inner(*rhs, def_of);
                match op {
                    Sub => format!("{p}_sub_{s}({l}, {r})"),
                    Div => format!("{p}_div_{s}({l}, {r})"),
                    Lt => format!("vec_lt({l}, {r})"),
                    Le => format!("vec_le({l}, {r})"),
                    Gt => format!("vec_gt({l}, {r})"),
                    Ge => format!("vec_ge({l}, {r})"),
                    Eq => format!("vec_eq({l}, {r})"),
                    Ne => format!("vec_ne({l}, {r})"),
                    And => format!("vec_and({l}, {r})"),
                    Or => format!("vec_or({l}, {r})"),
                }
            }
            NodeKind::Commutative { op, operands } => {
                let name = match op {
                    gridfold_ir::CommOp::Add => "add",
                    gridfold_ir::CommOp::Mul => "mul",
                };
                let mut it = operands.iter();
                let first = self.render_inner(*it.next().expect("nonempty multiset"), def_of);
                it.fold(first, |acc, o| {
                    let rhs = self.render_inner(*o, def_of);
                    format!("{p}_{name}_{s}({acc}, {rhs})")
                })
            }
            NodeKind::Call { name, args } => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.render_inner(*a, def_of))
                    .collect();
                format!("{p}_{name}_{s}({})", parts.join(", "))
            }
            NodeKind::CallSlot { call, index } => {
                // Unpaired slot: fall back to the single function.
                let arg = match self.arena.kind(*call) {
                    NodeKind::Call { args, .. } => self.render_inner(args[0], def_of),
                    _ => String::from("?"),
                };
                let f = if *index == 0 { "sin" } else { "cos" };
                format!("{p}_{f}_{s}({arg})")
            }
            NodeKind::IfElse { cond, then_, else_ } => {
                let c = self.render_inner(*cond, def_of);
                let t = self.render_inner(*then_, def_of);
                let e = self.render_inner(*else_, def_of);
                format!("vec_select({c}, {t}, {e})")
            }
        }
    }
}
