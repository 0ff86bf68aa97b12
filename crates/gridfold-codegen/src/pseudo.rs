//! Human-readable single-assignment pseudocode.
//!
//! `pseudo` inlines expressions below the CSE window; `pseudo-long`
//! names a temporary for every shared node.

use gridfold_ir::{plan_temps, FoldLayout, NodeKind, Settings, Solution, VecBundle};

use crate::expr::{temp_statements, ScalarPrinter, TempStmt};

pub(crate) fn emit(
    soln: &Solution,
    layout: &FoldLayout,
    bundles: &[VecBundle],
    settings: &Settings,
    long: bool,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("////// Stencil solution '{}' //////\n", soln.name()));
    if !soln.description().is_empty() {
        out.push_str(&format!("// {}\n", soln.description()));
    }
    out.push_str(&format!(
        "// {} var(s), {} equation(s), {} bundle(s).\n",
        soln.num_grids(),
        soln.equations().len(),
        bundles.len()
    ));
    if let Some(step) = soln.step_dim() {
        out.push_str(&format!("// Step dim: {step}.\n"));
    }
    if !soln.domain_dims().is_empty() {
        out.push_str(&format!(
            "// Domain dims: {} (unit stride: {}).\n",
            soln.domain_dims().join(", "),
            soln.domain_dims().last().map(String::as_str).unwrap_or(""),
        ));
    }
    out.push_str(&format!(
        "// Fold: {} ({}); cluster: {}.\n",
        layout.fold,
        if layout.first_inner { "fus" } else { "lus" },
        layout.cluster
    ));

    for bundle in bundles {
        out.push('\n');
        out.push_str(&format!(
            "////// Equation-bundle '{}' ({} equation(s)) //////\n",
            bundle.name,
            bundle.eqs.len()
        ));
        let mut roots = Vec::new();
        for veq in &bundle.eqs {
            roots.push(veq.root);
            roots.extend(veq.cond);
        }
        let temps = plan_temps(soln.arena(), &roots, settings, long);
        let printer = ScalarPrinter {
            arena: soln.arena(),
            soln,
            temps: &temps,
            prefix: "",
        };
        for stmt in temp_statements(&printer) {
            match stmt {
                TempStmt::Plain { name, body } => {
                    out.push_str(&format!("{name} = {body};\n"));
                }
                TempStmt::SinCos { sin, cos, arg } => {
                    out.push_str(&format!("({sin}, {cos}) = sincos({arg});\n"));
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
            let target = crate::expr::access("", &soln.grid(grid).name, &offsets);
            let body = printer.render(value);
            match veq.cond {
                Some(cond) => {
                    let c = printer.render(cond);
                    out.push_str(&format!("if ({c}) {target} = {body};\n"));
                }
                None => out.push_str(&format!("{target} = {body};\n")),
            }
        }
    }
    out
}
