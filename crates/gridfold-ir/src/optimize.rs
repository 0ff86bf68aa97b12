//! Algebraic optimization over bundle DAGs.
//!
//! Passes, in order: constant folding (always on), commutative
//! combination (`opt_comb`), CSE surfacing (`opt_cse`, realized as the
//! temporary plan emitters consume), and function pairing (`opt_pair`).
//! The cluster-level pass re-runs the same rewrites over the expanded
//! cluster IR.
//!
//! Rewrites rebuild nodes through the arena, so canonicalization is
//! re-applied on every pass and a second run is a no-op: the optimizer
//! is idempotent by construction.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::bundle::BundleSet;
use crate::fold::VecBundle;
use crate::node::{BinaryOp, CommOp, NodeArena, NodeId, NodeKind, UnaryOp};
use crate::settings::Settings;
use crate::solution::Solution;

/// Run the scalar optimizer over each bundle's combined DAG, updating
/// equation roots in place.
pub fn optimize_solution(soln: &mut Solution, bundles: &BundleSet, settings: &Settings) {
    for bundle in &bundles.bundles {
        let slots: Vec<(usize, NodeId, Option<NodeId>)> = bundle
            .eqs
            .iter()
            .map(|&i| {
                let eq = &soln.equations()[i];
                (i, eq.root, eq.cond)
            })
            .collect();

        let mut roots: Vec<NodeId> = Vec::new();
        for (_, root, cond) in &slots {
            roots.push(*root);
            roots.extend(*cond);
        }
        let before = roots.len();
        let rewritten = optimize_roots(soln.arena_mut(), &roots, settings);
        debug_assert_eq!(before, rewritten.len());

        let mut it = rewritten.into_iter();
        for (i, _, cond) in slots {
            let new_root = it.next().expect("root count preserved");
            let new_cond = cond.map(|_| it.next().expect("root count preserved"));
            let eq = soln.equation_mut(i);
            eq.root = new_root;
            eq.cond = new_cond;
        }
        debug!(bundle = %bundle.name, "scalar optimization complete");
    }
}

/// Cluster-level pass: the same rewrites over the expanded vector IR,
/// where each cluster slot's offsets are distinct values.
pub fn optimize_vec_bundles(soln: &mut Solution, bundles: &mut [VecBundle], settings: &Settings) {
    if !settings.opt_cluster {
        return;
    }
    for bundle in bundles.iter_mut() {
        let mut roots: Vec<NodeId> = Vec::new();
        for veq in &bundle.eqs {
            roots.push(veq.root);
            roots.extend(veq.cond);
        }
        let rewritten = optimize_roots(soln.arena_mut(), &roots, settings);
        let mut it = rewritten.into_iter();
        for veq in bundle.eqs.iter_mut() {
            veq.root = it.next().expect("root count preserved");
            if veq.cond.is_some() {
                veq.cond = Some(it.next().expect("root count preserved"));
            }
        }
    }
}

/// Rewrite a set of roots: constant folding, combination, pairing.
pub(crate) fn optimize_roots(
    arena: &mut NodeArena,
    roots: &[NodeId],
    settings: &Settings,
) -> Vec<NodeId> {
    let mut rw = Rewriter {
        opt_comb: settings.opt_comb,
        elem_bytes: settings.elem_bytes,
        memo: HashMap::new(),
    };
    let mut out: Vec<NodeId> = roots.iter().map(|&r| rw.rewrite(arena, r)).collect();
    if settings.opt_pair {
        pair_functions(arena, &mut out);
    }
    out
}

struct Rewriter {
    opt_comb: bool,
    elem_bytes: u8,
    memo: HashMap<NodeId, NodeId>,
}

impl Rewriter {
    fn rewrite(&mut self, arena: &mut NodeArena, id: NodeId) -> NodeId {
        if let Some(&done) = self.memo.get(&id) {
            return done;
        }
        let kind = arena.kind(id).clone();
        let new = match kind {
            NodeKind::Const(_) | NodeKind::Param(_) | NodeKind::Read { .. } => id,
            NodeKind::Write {
                grid,
                offsets,
                value,
            } => {
                let value = self.rewrite(arena, value);
                arena.intern(NodeKind::Write {
                    grid,
                    offsets,
                    value,
                })
            }
            NodeKind::Unary { op, arg } => {
                let arg = self.rewrite(arena, arg);
                match const_of(arena, arg) {
                    Some(c) => {
                        let v = match op {
                            UnaryOp::Neg => -c,
                            UnaryOp::Not => bool_to_fp(c == 0.0),
                        };
                        arena.intern(NodeKind::Const(self.round(v)))
                    }
                    None => arena.intern(NodeKind::Unary { op, arg }),
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let lhs = self.rewrite(arena, lhs);
                let rhs = self.rewrite(arena, rhs);
                match (const_of(arena, lhs), const_of(arena, rhs)) {
                    (Some(a), Some(b)) => {
                        let v = eval_binary(op, a, b);
                        arena.intern(NodeKind::Const(self.round(v)))
                    }
                    _ => arena.intern(NodeKind::Binary { op, lhs, rhs }),
                }
            }
            NodeKind::Commutative { op, operands } => {
                let mut rewritten: Vec<NodeId> = operands
                    .into_iter()
                    .map(|c| self.rewrite(arena, c))
                    .collect();
                // Merge constants in the selected precision before the
                // arena re-merges; absorb identities when combining.
                let mut constant: Option<f64> = None;
                let mut rest = Vec::with_capacity(rewritten.len());
                for cid in rewritten.drain(..) {
                    match arena.kind(cid) {
                        NodeKind::Const(c) => {
                            let folded =
                                op.apply(constant.unwrap_or_else(|| op.identity()), *c);
                            constant = Some(self.round(folded));
                        }
                        _ => rest.push(cid),
                    }
                }
                if self.opt_comb {
                    match (op, constant) {
                        // x * 0 collapses the whole product.
                        (CommOp::Mul, Some(c)) if c == 0.0 => {
                            let zero = arena.intern(NodeKind::Const(0.0));
                            return self.finish(id, zero);
                        }
                        // Identity operands vanish when peers remain.
                        (_, Some(c)) if c == op.identity() && !rest.is_empty() => {
                            constant = None;
                        }
                        _ => {}
                    }
                }
                if let Some(c) = constant {
                    rest.push(arena.intern(NodeKind::Const(c)));
                }
                arena.commutative(op, rest)
            }
            NodeKind::Call { name, args } => {
                let args: Vec<NodeId> = args.into_iter().map(|a| self.rewrite(arena, a)).collect();
                let const_args: Option<Vec<f64>> = args
                    .iter()
                    .map(|a| match arena.kind(*a) {
                        NodeKind::Const(c) => Some(*c),
                        _ => None,
                    })
                    .collect();
                match const_args.and_then(|vals| eval_call(&name, &vals)) {
                    Some(v) => arena.intern(NodeKind::Const(self.round(v))),
                    None => arena.intern(NodeKind::Call { name, args }),
                }
            }
            NodeKind::CallSlot { call, index } => {
                let call = self.rewrite(arena, call);
                arena.intern(NodeKind::CallSlot { call, index })
            }
            NodeKind::IfElse { cond, then_, else_ } => {
                let cond = self.rewrite(arena, cond);
                let then_ = self.rewrite(arena, then_);
                let else_ = self.rewrite(arena, else_);
                match const_of(arena, cond) {
                    Some(c) if c != 0.0 => then_,
                    Some(_) => else_,
                    None => arena.intern(NodeKind::IfElse { cond, then_, else_ }),
                }
            }
        };
        self.finish(id, new)
    }

    fn finish(&mut self, old: NodeId, new: NodeId) -> NodeId {
        self.memo.insert(old, new);
        new
    }

    /// Round a folded constant to the working element precision.
    fn round(&self, v: f64) -> f64 {
        if self.elem_bytes == 4 {
            v as f32 as f64
        } else {
            v
        }
    }
}

fn const_of(arena: &NodeArena, id: NodeId) -> Option<f64> {
    match arena.kind(id) {
        NodeKind::Const(c) => Some(*c),
        _ => None,
    }
}

fn bool_to_fp(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Div => a / b,
        BinaryOp::Eq => bool_to_fp(a == b),
        BinaryOp::Ne => bool_to_fp(a != b),
        BinaryOp::Lt => bool_to_fp(a < b),
        BinaryOp::Le => bool_to_fp(a <= b),
        BinaryOp::Gt => bool_to_fp(a > b),
        BinaryOp::Ge => bool_to_fp(a >= b),
        BinaryOp::And => bool_to_fp(a != 0.0 && b != 0.0),
        BinaryOp::Or => bool_to_fp(a != 0.0 || b != 0.0),
    }
}

fn eval_call(name: &str, args: &[f64]) -> Option<f64> {
    match (name, args) {
        ("sin", [x]) => Some(x.sin()),
        ("cos", [x]) => Some(x.cos()),
        ("tan", [x]) => Some(x.tan()),
        ("exp", [x]) => Some(x.exp()),
        ("log", [x]) => Some(x.ln()),
        ("sqrt", [x]) => Some(x.sqrt()),
        ("abs", [x]) => Some(x.abs()),
        ("pow", [x, y]) => Some(x.powf(*y)),
        ("min", [x, y]) => Some(x.min(*y)),
        ("max", [x, y]) => Some(x.max(*y)),
        _ => None,
    }
}

/// Replace coexisting `sin(x)`/`cos(x)` calls over the same argument
/// with one `sincos(x)` call whose outputs feed the original uses.
fn pair_functions(arena: &mut NodeArena, roots: &mut [NodeId]) {
    let mut sin_by_arg: IndexMap<u64, NodeId> = IndexMap::new();
    let mut cos_by_arg: IndexMap<u64, NodeId> = IndexMap::new();
    for id in arena.postorder(roots) {
        if let NodeKind::Call { name, args } = arena.kind(id) {
            if args.len() == 1 {
                let arg_fp = arena.fingerprint(args[0]);
                match name.as_str() {
                    "sin" => {
                        sin_by_arg.insert(arg_fp, id);
                    }
                    "cos" => {
                        cos_by_arg.insert(arg_fp, id);
                    }
                    _ => {}
                }
            }
        }
    }

    let mut subst: HashMap<NodeId, NodeId> = HashMap::new();
    for (arg_fp, &sin_id) in &sin_by_arg {
        let Some(&cos_id) = cos_by_arg.get(arg_fp) else {
            continue;
        };
        let arg = match arena.kind(sin_id) {
            NodeKind::Call { args, .. } => args[0],
            _ => unreachable!("sin table holds call nodes"),
        };
        let call = arena.intern(NodeKind::Call {
            name: "sincos".to_string(),
            args: vec![arg],
        });
        subst.insert(sin_id, arena.intern(NodeKind::CallSlot { call, index: 0 }));
        subst.insert(cos_id, arena.intern(NodeKind::CallSlot { call, index: 1 }));
    }
    if subst.is_empty() {
        return;
    }

    let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
    for root in roots.iter_mut() {
        *root = substitute(arena, *root, &subst, &mut memo);
    }
}

/// Structural rebuild applying a node substitution map.
fn substitute(
    arena: &mut NodeArena,
    id: NodeId,
    subst: &HashMap<NodeId, NodeId>,
    memo: &mut HashMap<NodeId, NodeId>,
) -> NodeId {
    if let Some(&done) = memo.get(&id) {
        return done;
    }
    if let Some(&replacement) = subst.get(&id) {
        memo.insert(id, replacement);
        return replacement;
    }
    let kind = arena.kind(id).clone();
    let new = match kind {
        NodeKind::Const(_) | NodeKind::Param(_) | NodeKind::Read { .. } => id,
        NodeKind::Write {
            grid,
            offsets,
            value,
        } => {
            let value = substitute(arena, value, subst, memo);
            arena.intern(NodeKind::Write {
                grid,
                offsets,
                value,
            })
        }
        NodeKind::Unary { op, arg } => {
            let arg = substitute(arena, arg, subst, memo);
            arena.intern(NodeKind::Unary { op, arg })
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let lhs = substitute(arena, lhs, subst, memo);
            let rhs = substitute(arena, rhs, subst, memo);
            arena.intern(NodeKind::Binary { op, lhs, rhs })
        }
        NodeKind::Commutative { op, operands } => {
            let operands: Vec<NodeId> = operands
                .into_iter()
                .map(|c| substitute(arena, c, subst, memo))
                .collect();
            arena.commutative(op, operands)
        }
        NodeKind::Call { name, args } => {
            let args: Vec<NodeId> = args
                .into_iter()
                .map(|a| substitute(arena, a, subst, memo))
                .collect();
            arena.intern(NodeKind::Call { name, args })
        }
        NodeKind::CallSlot { call, index } => {
            let call = substitute(arena, call, subst, memo);
            arena.intern(NodeKind::CallSlot { call, index })
        }
        NodeKind::IfElse { cond, then_, else_ } => {
            let cond = substitute(arena, cond, subst, memo);
            let then_ = substitute(arena, then_, subst, memo);
            let else_ = substitute(arena, else_, subst, memo);
            arena.intern(NodeKind::IfElse { cond, then_, else_ })
        }
    };
    memo.insert(id, new);
    new
}

/// The named-temporary plan for one bundle: which shared or oversized
/// nodes the emitters surface as intermediates, in definition order.
#[derive(Debug, Default)]
pub struct TempPlan {
    pub temps: IndexMap<NodeId, String>,
}

impl TempPlan {
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.temps.get(&id).map(String::as_str)
    }
}

/// Select the nodes worth naming: multi-result call slots always;
/// shared subtrees inside the `[min_es, max_es]` window when CSE is on
/// (every shared subtree when `force_shared`, the `pseudo-long` rule);
/// and oversized subtrees, split so no printed expression exceeds
/// `max_es` effective nodes.
pub fn plan_temps(
    arena: &NodeArena,
    roots: &[NodeId],
    settings: &Settings,
    force_shared: bool,
) -> TempPlan {
    let counts = arena.use_counts(roots);
    let mut eff: HashMap<NodeId, usize> = HashMap::new();
    let mut plan = TempPlan::default();

    for id in arena.postorder(roots) {
        let kind = arena.kind(id);
        let leaf = matches!(
            kind,
            NodeKind::Const(_) | NodeKind::Param(_) | NodeKind::Read { .. }
        );
        let size: usize = 1 + arena
            .children(id)
            .into_iter()
            .map(|c| {
                if plan.temps.contains_key(&c) {
                    1
                } else {
                    eff.get(&c).copied().unwrap_or(1)
                }
            })
            .sum::<usize>();
        eff.insert(id, size);

        if leaf || matches!(kind, NodeKind::Write { .. }) {
            continue;
        }
        let shared = counts.get(&id).copied().unwrap_or(0) >= 2;
        let is_slot = matches!(kind, NodeKind::CallSlot { .. });
        let window = arena.tree_size(id) >= settings.min_es && arena.tree_size(id) <= settings.max_es;
        let wanted = is_slot
            || (shared && (force_shared || (settings.opt_cse && window)))
            || (settings.opt_cse && size > settings.max_es);
        if wanted {
            let name = format!("temp{}", plan.temps.len() + 1);
            plan.temps.insert(id, name);
            eff.insert(id, 1);
        }
    }
    plan
}
