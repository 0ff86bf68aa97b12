//! Shared scalar expression rendering.
//!
//! The pseudo and C++ printers walk the same IR with the same temp
//! plan; only the grid-access spelling differs. SIMD rendering lives
//! in `simd` (it names loads and maps ops to intrinsics).

use gridfold_foundation::DimTuple;
use gridfold_ir::{NodeArena, NodeId, NodeKind, Solution, TempPlan};

/// Deterministic floating-point literal: always carries a decimal
/// point or exponent so emitted code stays type-stable.
pub(crate) fn format_const(c: f64) -> String {
    format!("{c:?}")
}

/// `p(t, x+1, y)` with an optional receiver prefix (`ctx.` for C++).
pub(crate) fn access(prefix: &str, name: &str, offsets: &DimTuple) -> String {
    let terms: Vec<String> = offsets
        .iter()
        .map(|(n, v)| DimTuple::offset_term(n, v))
        .collect();
    format!("{prefix}{name}({})", terms.join(", "))
}

/// Scalar expression printer with temp substitution.
pub(crate) struct ScalarPrinter<'a> {
    pub arena: &'a NodeArena,
    pub soln: &'a Solution,
    pub temps: &'a TempPlan,
    /// Receiver prefix for grid accesses: `""` or `"ctx."`.
    pub prefix: &'a str,
}

impl ScalarPrinter<'_> {
    /// Render an expression, substituting named temps.
    pub fn render(&self, id: NodeId) -> String {
        self.render_inner(id, false, None)
    }

    /// Render the defining body of a temp (no self-substitution).
    pub fn render_def(&self, id: NodeId) -> String {
        self.render_inner(id, false, Some(id))
    }

    fn render_inner(&self, id: NodeId, operand: bool, def_of: Option<NodeId>) -> String {
        if def_of != Some(id) {
            if let Some(name) = self.temps.name_of(id) {
                return name.to_string();
            }
        }
        match self.arena.kind(id) {
            NodeKind::Const(c) => format_const(*c),
            NodeKind::Param(name) => name.clone(),
            NodeKind::Read { grid, offsets } => {
                access(self.prefix, &self.soln.grid(*grid).name, offsets)
            }
            NodeKind::Write { .. } => unreachable!("writes render as statements"),
            NodeKind::Unary { op, arg } => {
                let inner = self.render_inner(*arg, true, def_of);
                format!("{}{}", op.symbol(), inner)
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let l = self.render_inner(*lhs, true, def_of);
                let r = self.render_inner(*rhs, true, def_of);
                let body = format!("{l} {} {r}", op.symbol());
                if operand {
                    format!("({body})")
                } else {
                    body
                }
            }
            NodeKind::Commutative { op, operands } => {
                let parts: Vec<String> = operands
                    .iter()
                    .map(|c| self.render_inner(*c, true, def_of))
                    .collect();
                let body = parts.join(&format!(" {} ", op.symbol()));
                if operand {
                    format!("({body})")
                } else {
                    body
                }
            }
            NodeKind::Call { name, args } => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.render_inner(*a, false, def_of))
                    .collect();
                format!("{name}({})", parts.join(", "))
            }
            NodeKind::CallSlot { call, index } => {
                // Only reached when the slot escaped the temp plan;
                // fall back to the unpaired function.
                let arg = match self.arena.kind(*call) {
                    NodeKind::Call { args, .. } => self.render_inner(args[0], false, def_of),
                    _ => String::from("?"),
                };
                let f = if *index == 0 { "sin" } else { "cos" };
                format!("{f}({arg})")
            }
            NodeKind::IfElse { cond, then_, else_ } => {
                let c = self.render_inner(*cond, true, def_of);
                let t = self.render_inner(*then_, true, def_of);
                let e = self.render_inner(*else_, true, def_of);
                let body = format!("{c} ? {t} : {e}");
                if operand {
                    format!("({body})")
                } else {
                    body
                }
            }
        }
    }
}

/// One temp-definition statement, with multi-result calls grouped.
pub(crate) enum TempStmt {
    Plain {
        name: String,
        body: String,
    },
    /// `(sin_name, cos_name) = sincos(arg)`.
    SinCos {
        sin: String,
        cos: String,
        arg: String,
    },
}

/// Temp definitions in plan order, pairing the two slots of each
/// `sincos` call into one statement.
pub(crate) fn temp_statements(printer: &ScalarPrinter<'_>) -> Vec<TempStmt> {
    let mut stmts = Vec::new();
    let mut emitted_calls: Vec<NodeId> = Vec::new();
    for (&id, name) in &printer.temps.temps {
        match printer.arena.kind(id) {
            NodeKind::CallSlot { call, index } => {
                if emitted_calls.contains(call) {
                    continue;
                }
                emitted_calls.push(*call);
                let arg = match printer.arena.kind(*call) {
                    NodeKind::Call { args, .. } => printer.render(args[0]),
                    _ => String::from("?"),
                };
                let sibling = printer.temps.temps.iter().find_map(|(&other, n)| {
                    match printer.arena.kind(other) {
                        NodeKind::CallSlot {
                            call: c,
                            index: other_index,
                        } if c == call && other_index != index => Some(n.clone()),
                        _ => None,
                    }
                });
                let (sin, cos) = match (*index, sibling) {
                    (0, Some(sib)) => (name.clone(), sib),
                    (0, None) => (name.clone(), format!("{name}_unused")),
                    (_, Some(sib)) => (sib, name.clone()),
                    (_, None) => (format!("{name}_unused"), name.clone()),
                };
                stmts.push(TempStmt::SinCos { sin, cos, arg });
            }
            _ => stmts.push(TempStmt::Plain {
                name: name.clone(),
                body: printer.render_def(id),
            }),
        }
    }
    stmts
}
