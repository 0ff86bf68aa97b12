//! Expression-graph nodes and the hash-consing arena.
//!
//! Every expression in a solution lives in one [`NodeArena`]. Nodes are
//! interned by structural fingerprint: building a node that is
//! structurally equal to an existing one (after canonicalization)
//! returns the existing handle, so common subexpressions share storage
//! by construction and fingerprint equality is identity.
//!
//! Canonicalization performed by the builders:
//! - commutative operands are kept sorted by fingerprint,
//! - associative peers are flattened (`(a+b)+c` becomes `+{a,b,c}`),
//! - constant operands of a commutative op are merged into one constant.
//!
//! Identity absorption (`x+0`, `x*1`, `x*0`) is an optimizer concern,
//! not a builder concern; see `optimize`.

use gridfold_foundation::stable_hash::FNV1A_OFFSET_BASIS_64;
use gridfold_foundation::DimTuple;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;

/// Handle to a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// Handle to a grid in the owning solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub(crate) u32);

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// Non-commutative binary operators, including the comparison and
/// logical operators used by equation conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Sub,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Sub => "-",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Commutative, associative operators carried as sorted multisets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommOp {
    Add,
    Mul,
}

impl CommOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CommOp::Add => "+",
            CommOp::Mul => "*",
        }
    }

    /// Identity element of the operation.
    pub fn identity(self) -> f64 {
        match self {
            CommOp::Add => 0.0,
            CommOp::Mul => 1.0,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            CommOp::Add => a + b,
            CommOp::Mul => a * b,
        }
    }
}

/// The tagged node variants of the expression graph.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Floating-point constant. `-0.0` is normalized to `0.0` on intern.
    Const(f64),
    /// Named scalar parameter supplied by the runtime (e.g. a coefficient).
    Param(String),
    /// Read of one grid point at a constant offset per grid dimension.
    Read { grid: GridId, offsets: DimTuple },
    /// Write of `value` to one grid point; the root of an equation.
    Write {
        grid: GridId,
        offsets: DimTuple,
        value: NodeId,
    },
    Unary {
        op: UnaryOp,
        arg: NodeId,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// Sorted multiset of operands under a commutative/associative op.
    Commutative {
        op: CommOp,
        operands: Vec<NodeId>,
    },
    /// Call to a named math function.
    Call {
        name: String,
        args: Vec<NodeId>,
    },
    /// Projection of one output of a multi-result call (`sincos`).
    CallSlot {
        call: NodeId,
        index: u8,
    },
    /// Conditional expression.
    IfElse {
        cond: NodeId,
        then_: NodeId,
        else_: NodeId,
    },
}

/// One interned node: its kind plus the structural fingerprint.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub fingerprint: u64,
}

/// Append-only hash-consing arena. Owned by a solution for its lifetime.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
    interned: IndexMap<u64, NodeId>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0 as usize].kind
    }

    pub fn fingerprint(&self, id: NodeId) -> u64 {
        self.nodes[id.0 as usize].fingerprint
    }

    /// Intern a node, returning the existing handle when a structurally
    /// equal node is already present. `Commutative` kinds must go through
    /// [`NodeArena::commutative`] so their canonical form is maintained.
    pub fn intern(&mut self, kind: NodeKind) -> NodeId {
        let kind = match kind {
            // Normalize the two floating zero encodings to one constant.
            NodeKind::Const(c) if c == 0.0 => NodeKind::Const(0.0),
            other => other,
        };
        let fp = self.fingerprint_of(&kind);
        if let Some(&id) = self.interned.get(&fp) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            fingerprint: fp,
        });
        self.interned.insert(fp, id);
        id
    }

    /// Build a canonical commutative node: flatten same-op children,
    /// merge constant operands, sort by fingerprint, and collapse
    /// degenerate forms (one operand, or none).
    pub fn commutative(&mut self, op: CommOp, operands: Vec<NodeId>) -> NodeId {
        let mut flat = Vec::with_capacity(operands.len());
        let mut constant: Option<f64> = None;
        let mut pending = operands;
        // Flatten nested same-op nodes without recursion.
        while let Some(id) = pending.pop() {
            match self.kind(id) {
                NodeKind::Commutative { op: inner, operands } if *inner == op => {
                    pending.extend(operands.iter().copied());
                }
                NodeKind::Const(c) => {
                    let merged = op.apply(constant.unwrap_or_else(|| op.identity()), *c);
                    constant = Some(merged);
                }
                _ => flat.push(id),
            }
        }
        if let Some(c) = constant {
            flat.push(self.intern(NodeKind::Const(c)));
        }
        flat.sort_by_key(|id| (self.fingerprint(*id), *id));
        match flat.len() {
            0 => self.intern(NodeKind::Const(op.identity())),
            1 => flat[0],
            _ => self.intern(NodeKind::Commutative { op, operands: flat }),
        }
    }

    /// Direct children of a node, in canonical order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::Const(_) | NodeKind::Param(_) | NodeKind::Read { .. } => Vec::new(),
            NodeKind::Write { value, .. } => vec![*value],
            NodeKind::Unary { arg, .. } => vec![*arg],
            NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::Commutative { operands, .. } => operands.clone(),
            NodeKind::Call { args, .. } => args.clone(),
            NodeKind::CallSlot { call, .. } => vec![*call],
            NodeKind::IfElse { cond, then_, else_ } => vec![*cond, *then_, *else_],
        }
    }

    /// Number of parent edges pointing at `id` across the whole arena.
    pub fn refcount(&self, id: NodeId) -> usize {
        let mut count = 0;
        for i in 0..self.nodes.len() {
            for child in self.children(NodeId(i as u32)) {
                if child == id {
                    count += 1;
                }
            }
        }
        count
    }

    /// Expanded tree size of the subexpression at `id`: the node count
    /// the expression would have with all sharing inlined. This is the
    /// size the CSE window `[min_es, max_es]` is measured in.
    pub fn tree_size(&self, id: NodeId) -> usize {
        fn go(arena: &NodeArena, id: NodeId, memo: &mut HashMap<NodeId, usize>) -> usize {
            if let Some(&s) = memo.get(&id) {
                return s;
            }
            let s = 1 + arena
                .children(id)
                .into_iter()
                .map(|c| go(arena, c, memo))
                .sum::<usize>();
            memo.insert(id, s);
            s
        }
        go(self, id, &mut HashMap::new())
    }

    /// Unique nodes reachable from `roots`, children before parents,
    /// in deterministic root-then-child order.
    pub fn postorder(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen: HashMap<NodeId, bool> = HashMap::new();
        for &root in roots {
            self.postorder_visit(root, &mut seen, &mut order);
        }
        order
    }

    fn postorder_visit(
        &self,
        id: NodeId,
        seen: &mut HashMap<NodeId, bool>,
        order: &mut Vec<NodeId>,
    ) {
        if seen.contains_key(&id) {
            return;
        }
        seen.insert(id, true);
        for child in self.children(id) {
            self.postorder_visit(child, seen, order);
        }
        order.push(id);
    }

    /// Parent-edge counts over the subgraph reachable from `roots`.
    /// Roots themselves get one count each so single-use roots stay
    /// distinguishable from unreachable nodes.
    pub fn use_counts(&self, roots: &[NodeId]) -> IndexMap<NodeId, usize> {
        let mut counts: IndexMap<NodeId, usize> = IndexMap::new();
        for id in self.postorder(roots) {
            counts.entry(id).or_insert(0);
            for child in self.children(id) {
                *counts.entry(child).or_insert(0) += 1;
            }
        }
        for &root in roots {
            *counts.entry(root).or_insert(0) += 1;
        }
        counts
    }

    /// All grid reads in the subexpression at `root`.
    pub fn reads_in(&self, root: NodeId) -> Vec<(GridId, DimTuple)> {
        let mut reads = Vec::new();
        for id in self.postorder(&[root]) {
            if let NodeKind::Read { grid, offsets } = self.kind(id) {
                reads.push((*grid, offsets.clone()));
            }
        }
        reads
    }

    fn fingerprint_of(&self, kind: &NodeKind) -> u64 {
        use gridfold_foundation::stable_hash::{mix_str, mix_u64};
        let h = FNV1A_OFFSET_BASIS_64;
        match kind {
            NodeKind::Const(c) => mix_u64(mix_u64(h, 1), c.to_bits()),
            NodeKind::Param(name) => mix_str(mix_u64(h, 2), name),
            NodeKind::Read { grid, offsets } => {
                let h = mix_u64(mix_u64(h, 3), grid.0 as u64);
                mix_offsets(h, offsets)
            }
            NodeKind::Write {
                grid,
                offsets,
                value,
            } => {
                let h = mix_u64(mix_u64(h, 4), grid.0 as u64);
                let h = mix_offsets(h, offsets);
                mix_u64(h, self.fingerprint(*value))
            }
            NodeKind::Unary { op, arg } => {
                let h = mix_u64(mix_u64(h, 5), *op as u64);
                mix_u64(h, self.fingerprint(*arg))
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let h = mix_u64(mix_u64(h, 6), *op as u64);
                let h = mix_u64(h, self.fingerprint(*lhs));
                mix_u64(h, self.fingerprint(*rhs))
            }
            NodeKind::Commutative { op, operands } => {
                let mut h = mix_u64(mix_u64(h, 7), *op as u64);
                h = mix_u64(h, operands.len() as u64);
                for id in operands {
                    h = mix_u64(h, self.fingerprint(*id));
                }
                h
            }
            NodeKind::Call { name, args } => {
                let mut h = mix_str(mix_u64(h, 8), name);
                h = mix_u64(h, args.len() as u64);
                for id in args {
                    h = mix_u64(h, self.fingerprint(*id));
                }
                h
            }
            NodeKind::CallSlot { call, index } => {
                let h = mix_u64(mix_u64(h, 9), self.fingerprint(*call));
                mix_u64(h, *index as u64)
            }
            NodeKind::IfElse { cond, then_, else_ } => {
                let h = mix_u64(mix_u64(h, 10), self.fingerprint(*cond));
                let h = mix_u64(h, self.fingerprint(*then_));
                mix_u64(h, self.fingerprint(*else_))
            }
        }
    }
}

pub(crate) fn mix_offsets(mut h: u64, offsets: &DimTuple) -> u64 {
    use gridfold_foundation::stable_hash::{mix_i64, mix_str, mix_u64};
    h = mix_u64(h, offsets.len() as u64);
    for (name, val) in offsets.iter() {
        h = mix_str(h, name);
        h = mix_i64(h, val);
    }
    h
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(pairs: &[(&str, i64)]) -> DimTuple {
        DimTuple::from_pairs(pairs.iter().map(|&(n, v)| (n, v))).unwrap()
    }

    #[test]
    fn interning_shares_structurally_equal_nodes() {
        let mut a = NodeArena::new();
        let c1 = a.intern(NodeKind::Const(2.5));
        let c2 = a.intern(NodeKind::Const(2.5));
        assert_eq!(c1, c2);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn negative_zero_normalizes() {
        let mut a = NodeArena::new();
        let z1 = a.intern(NodeKind::Const(0.0));
        let z2 = a.intern(NodeKind::Const(-0.0));
        assert_eq!(z1, z2);
    }

    #[test]
    fn commutative_sorts_by_fingerprint() {
        let mut a = NodeArena::new();
        let x = a.intern(NodeKind::Param("x".into()));
        let y = a.intern(NodeKind::Param("y".into()));
        let s1 = a.commutative(CommOp::Add, vec![x, y]);
        let s2 = a.commutative(CommOp::Add, vec![y, x]);
        assert_eq!(s1, s2);
    }

    #[test]
    fn commutative_flattens_associative_peers() {
        let mut a = NodeArena::new();
        let x = a.intern(NodeKind::Param("x".into()));
        let y = a.intern(NodeKind::Param("y".into()));
        let z = a.intern(NodeKind::Param("z".into()));
        let xy = a.commutative(CommOp::Add, vec![x, y]);
        let nested = a.commutative(CommOp::Add, vec![xy, z]);
        let flat = a.commutative(CommOp::Add, vec![x, y, z]);
        assert_eq!(nested, flat);
        match a.kind(nested) {
            NodeKind::Commutative { operands, .. } => assert_eq!(operands.len(), 3),
            other => panic!("expected commutative node, got {other:?}"),
        }
    }

    #[test]
    fn commutative_merges_constants() {
        let mut a = NodeArena::new();
        let x = a.intern(NodeKind::Param("x".into()));
        let c2 = a.intern(NodeKind::Const(2.0));
        let c3 = a.intern(NodeKind::Const(3.0));
        let sum = a.commutative(CommOp::Add, vec![c2, x, c3]);
        match a.kind(sum) {
            NodeKind::Commutative { operands, .. } => {
                assert_eq!(operands.len(), 2);
                let consts: Vec<f64> = operands
                    .iter()
                    .filter_map(|id| match a.kind(*id) {
                        NodeKind::Const(c) => Some(*c),
                        _ => None,
                    })
                    .collect();
                assert_eq!(consts, [5.0]);
            }
            other => panic!("expected commutative node, got {other:?}"),
        }
    }

    #[test]
    fn commutative_collapses_degenerate_forms() {
        let mut a = NodeArena::new();
        let x = a.intern(NodeKind::Param("x".into()));
        assert_eq!(a.commutative(CommOp::Mul, vec![x]), x);
        let empty = a.commutative(CommOp::Add, vec![]);
        assert_eq!(a.kind(empty), &NodeKind::Const(0.0));
    }

    #[test]
    fn tree_size_counts_expanded_form() {
        let mut a = NodeArena::new();
        let x = a.intern(NodeKind::Param("x".into()));
        let y = a.intern(NodeKind::Param("y".into()));
        let xy = a.commutative(CommOp::Mul, vec![x, y]);
        // (x*y) + (x*y) canonicalizes operands to the same handle twice.
        let sum = a.commutative(CommOp::Add, vec![xy, xy]);
        // expanded: + over two copies of (*, x, y) = 1 + 2*3
        assert_eq!(a.tree_size(sum), 7);
    }

    #[test]
    fn use_counts_see_shared_handles() {
        let mut a = NodeArena::new();
        let x = a.intern(NodeKind::Param("x".into()));
        let y = a.intern(NodeKind::Param("y".into()));
        let xy = a.commutative(CommOp::Mul, vec![x, y]);
        let sum = a.commutative(CommOp::Add, vec![xy, xy]);
        let counts = a.use_counts(&[sum]);
        // The commutative multiset holds xy twice.
        assert_eq!(counts[&xy], 2);
        assert_eq!(counts[&sum], 1);
    }

    #[test]
    fn reads_are_collected() {
        let mut a = NodeArena::new();
        let g = GridId(0);
        let r1 = a.intern(NodeKind::Read {
            grid: g,
            offsets: offsets(&[("t", 0), ("x", 1)]),
        });
        let r2 = a.intern(NodeKind::Read {
            grid: g,
            offsets: offsets(&[("t", 0), ("x", -1)]),
        });
        let sum = a.commutative(CommOp::Add, vec![r1, r2]);
        assert_eq!(a.reads_in(sum).len(), 2);
    }
}
