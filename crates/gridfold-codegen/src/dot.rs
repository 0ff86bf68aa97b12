//! Graphviz DOT output.
//!
//! `dot` renders the full expression DAG per bundle; `dot-lite`
//! restricts the graph to grids and their access edges. Node
//! identifiers are structural fingerprints, so identical subgraphs
//! across runs get identical names.

use gridfold_ir::{NodeKind, Solution, VecBundle};

use crate::expr::format_const;

pub(crate) fn emit(soln: &Solution, bundles: &[VecBundle], lite: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", soln.name()));
    out.push_str("    rankdir=BT;\n");
    if lite {
        emit_lite(soln, bundles, &mut out);
    } else {
        emit_full(soln, bundles, &mut out);
    }
    out.push_str("}\n");
    out
}

fn emit_full(soln: &Solution, bundles: &[VecBundle], out: &mut String) {
    out.push_str("    node [shape=box];\n");
    let arena = soln.arena();
    for (i, bundle) in bundles.iter().enumerate() {
        let mut roots = Vec::new();
        for veq in &bundle.eqs {
            roots.push(veq.root);
            roots.extend(veq.cond);
        }
        out.push_str(&format!("    subgraph cluster_{i} {{\n"));
        out.push_str(&format!("        label=\"{}\";\n", bundle.name));
        for id in arena.postorder(&roots) {
            let label = match arena.kind(id) {
                NodeKind::Const(c) => format_const(*c),
                NodeKind::Param(name) => name.clone(),
                NodeKind::Read { grid, offsets } => {
                    crate::expr::access("", &soln.grid(*grid).name, offsets)
                }
                NodeKind::Write { grid, offsets, .. } => format!(
                    "{} =",
                    crate::expr::access("", &soln.grid(*grid).name, offsets)
                ),
                NodeKind::Unary { op, .. } => op.symbol().to_string(),
                NodeKind::Binary { op, .. } => op.symbol().to_string(),
                NodeKind::Commutative { op, .. } => op.symbol().to_string(),
                NodeKind::Call { name, .. } => format!("{name}()"),
                NodeKind::CallSlot { index, .. } => format!("out{index}"),
                NodeKind::IfElse { .. } => "?:".to_string(),
            };
            out.push_str(&format!(
                "        \"{}\" [label=\"{}\"];\n",
                node_name(arena.fingerprint(id)),
                escape(&label)
            ));
        }
        out.push_str("    }\n");
        for id in arena.postorder(&roots) {
            for child in arena.children(id) {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\";\n",
                    node_name(arena.fingerprint(id)),
                    node_name(arena.fingerprint(child))
                ));
            }
        }
    }
}

/// Grids and their access edges only: read edges point grid -> bundle,
/// write edges bundle -> grid.
fn emit_lite(soln: &Solution, bundles: &[VecBundle], out: &mut String) {
    out.push_str("    node [shape=ellipse];\n");
    for (_, grid) in soln.grids() {
        let shape = if grid.scratch { "diamond" } else { "ellipse" };
        out.push_str(&format!(
            "    \"{}\" [shape={shape}];\n",
            escape(&grid.name)
        ));
    }
    let arena = soln.arena();
    for bundle in bundles {
        out.push_str(&format!("    \"{}\" [shape=box];\n", bundle.name));
        let mut read_grids: Vec<String> = Vec::new();
        let mut write_grids: Vec<String> = Vec::new();
        for veq in &bundle.eqs {
            let mut roots = vec![veq.root];
            roots.extend(veq.cond);
            for id in arena.postorder(&roots) {
                match arena.kind(id) {
                    NodeKind::Read { grid, .. } => {
                        let name = soln.grid(*grid).name.clone();
                        if !read_grids.contains(&name) {
                            read_grids.push(name);
                        }
                    }
                    NodeKind::Write { grid, .. } => {
                        let name = soln.grid(*grid).name.clone();
                        if !write_grids.contains(&name) {
                            write_grids.push(name);
                        }
                    }
                    _ => {}
                }
            }
        }
        for g in read_grids {
            out.push_str(&format!("    \"{g}\" -> \"{}\";\n", bundle.name));
        }
        for g in write_grids {
            out.push_str(&format!("    \"{}\" -> \"{g}\";\n", bundle.name));
        }
    }
}

fn node_name(fp: u64) -> String {
    format!("n{fp:016x}")
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
