//! Portable scalar C++ output.
//!
//! Emits one struct per equation-bundle with a per-point `calc`
//! routine over plain array accessors; no intrinsics. The runtime
//! supplies a context type with one callable accessor per grid.

use gridfold_ir::{plan_temps, FoldLayout, NodeKind, Settings, Solution, VecBundle};

use crate::expr::{temp_statements, ScalarPrinter, TempStmt};

pub(crate) fn emit(
    soln: &Solution,
    _layout: &FoldLayout,
    bundles: &[VecBundle],
    settings: &Settings,
) -> String {
    let mut out = String::new();
    out.push_str("// Generated stencil code; do not edit.\n");
    out.push_str(&format!(
        "// Solution '{}': portable scalar C++.\n",
        soln.name()
    ));
    out.push_str("#pragma once\n\n");
    out.push_str("typedef long idx_t;\n");
    out.push_str(&format!(
        "typedef {} real_t;\n",
        if settings.elem_bytes == 4 { "float" } else { "double" }
    ));

    for (_, grid) in soln.grids() {
        out.push_str(&format!(
            "// var {}({}){}: halo {}, step-alloc {}.\n",
            grid.name,
            grid.dims
                .iter()
                .map(|(n, _)| n.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            if grid.scratch { " [scratch]" } else { "" },
            if grid.halo.is_empty() {
                "none".to_string()
            } else {
                grid.halo.to_string()
            },
            grid.step_alloc
                .map(|a| a.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
        ));
    }

    let point_args = calc_signature(soln);
    for bundle in bundles {
        out.push('\n');
        out.push_str(&format!(
            "// Equation-bundle '{}' ({} equation(s)).\n",
            bundle.name,
            bundle.eqs.len()
        ));
        out.push_str(&format!("struct {}_{} {{\n", soln.name(), bundle.name));
        out.push_str("    template <typename Ctx>\n");
        out.push_str(&format!(
            "    static inline void calc(Ctx& ctx{point_args}) {{\n"
        ));

        let mut roots = Vec::new();
        for veq in &bundle.eqs {
            roots.push(veq.root);
            roots.extend(veq.cond);
        }
        let temps = plan_temps(soln.arena(), &roots, settings, false);
        let printer = ScalarPrinter {
            arena: soln.arena(),
            soln,
            temps: &temps,
            prefix: "ctx.",
        };
        for stmt in temp_statements(&printer) {
            match stmt {
                TempStmt::Plain { name, body } => {
                    out.push_str(&format!("        real_t {name} = {body};\n"));
                }
                TempStmt::SinCos { sin, cos, arg } => {
                    out.push_str(&format!("        real_t {sin}, {cos};\n"));
                    out.push_str(&format!("        sincos({arg}, &{sin}, &{cos});\n"));
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
            let target = crate::expr::access("ctx.", &soln.grid(grid).name, &offsets);
            let body = printer.render(value);
            match veq.cond {
                Some(cond) => {
                    let c = printer.render(cond);
                    out.push_str(&format!("        if ({c}) {target} = {body};\n"));
                }
                None => out.push_str(&format!("        {target} = {body};\n")),
            }
        }
        out.push_str("    }\n");
        out.push_str("};\n");
    }
    out
}

/// `, idx_t t, idx_t x, idx_t y` in step-then-domain order.
fn calc_signature(soln: &Solution) -> String {
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
