//! Vector folding and cluster expansion.
//!
//! A *fold* factors a SIMD vector into per-dimension lane counts over
//! the domain dimensions; a *cluster* groups several vectors into one
//! evaluation step so adjacent slots can share operands. The folder
//! resolves the requested fold against the target ISA's lane count,
//! classifies every grid access as aligned/shifted/unaligned relative
//! to the fold, and expands the cluster by cloning each bundle's
//! equations with per-slot offsets.

use std::collections::HashMap;

use gridfold_foundation::DimTuple;
use tracing::debug;

use crate::bundle::BundleSet;
use crate::error::{Error, Result};
use crate::node::{NodeArena, NodeId, NodeKind};
use crate::settings::Settings;
use crate::solution::Solution;

/// Resolved fold and cluster layout for one output format.
#[derive(Debug, Clone)]
pub struct FoldLayout {
    /// Lane counts per domain dimension, in solution domain order.
    /// Dimensions not folded carry length 1.
    pub fold: DimTuple,
    /// Vector multiplicity per domain dimension; 1 when unclustered.
    pub cluster: DimTuple,
    /// True when the first fold dimension is unit stride (`fus`);
    /// false for the default last-inner layout (`lus`).
    pub first_inner: bool,
    /// Total lanes: the product of the fold lengths.
    pub lanes: i64,
}

impl FoldLayout {
    pub fn is_scalar(&self) -> bool {
        self.lanes == 1
    }

    /// Lane index of an intra-vector remainder tuple. Mixed radix over
    /// the fold dimensions; the unit-stride dimension varies fastest.
    pub fn lane_of(&self, rem: &DimTuple) -> i64 {
        let dims: Vec<(&str, i64)> = self.fold.iter().collect();
        let mut lane = 0;
        let mut stride = 1;
        let order: Vec<&(&str, i64)> = if self.first_inner {
            dims.iter().collect()
        } else {
            dims.iter().rev().collect()
        };
        for &(name, len) in order {
            lane += rem.get(name).unwrap_or(0) * stride;
            stride *= len;
        }
        lane
    }

    /// Inverse of [`FoldLayout::lane_of`]: per-dimension coordinates of
    /// a lane.
    pub fn unfold(&self, lane: i64) -> DimTuple {
        let dims: Vec<(String, i64)> = self
            .fold
            .iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        let mut rem = lane;
        let mut out = DimTuple::new();
        let order: Vec<&(String, i64)> = if self.first_inner {
            dims.iter().collect()
        } else {
            dims.iter().rev().collect()
        };
        for entry in order {
            let (name, len) = (&entry.0, entry.1);
            out.set(name.clone(), rem % len);
            rem /= len;
        }
        // Restore domain order for display stability.
        let mut ordered = DimTuple::new();
        for (name, _) in self.fold.iter() {
            ordered.set(name, out.get(name).unwrap_or(0));
        }
        ordered
    }

    /// Number of cluster slots.
    pub fn cluster_product(&self) -> i64 {
        self.cluster.product()
    }
}

/// Resolve the requested fold and cluster against a target lane count.
///
/// `lanes` is `None` for formats without explicit SIMD lengths, which
/// get a scalar (all-ones) layout. When the requested fold's product
/// does not match, the last-declared domain dimension absorbs the
/// residual; if no exact completion exists the fold fails.
pub fn resolve_fold(soln: &Solution, settings: &Settings, lanes: Option<i64>) -> Result<FoldLayout> {
    let domain = soln.domain_dims();

    for (name, len) in settings.fold.iter().chain(settings.cluster.iter()) {
        if !domain.iter().any(|d| d == name) {
            return Err(Error::FoldMismatch(format!(
                "'{name}' is not a domain dimension of solution '{}'",
                soln.name()
            )));
        }
        if len < 1 {
            return Err(Error::FoldMismatch(format!(
                "length {len} for dimension '{name}' must be >= 1"
            )));
        }
    }

    let mut fold = DimTuple::new();
    let mut cluster = DimTuple::new();
    for d in domain {
        fold.set(d.clone(), settings.fold.get(d).unwrap_or(1));
        cluster.set(d.clone(), settings.cluster.get(d).unwrap_or(1));
    }

    let lanes = match lanes {
        None => {
            // Scalar output: one point per evaluation.
            for d in domain {
                fold.set(d.clone(), 1);
                cluster.set(d.clone(), 1);
            }
            1
        }
        Some(n) => {
            let product = fold.product();
            if product != n {
                let Some((last, _)) = fold.last().map(|(n, v)| (n.to_string(), v)) else {
                    return Err(Error::FoldMismatch(format!(
                        "solution '{}' has no domain dimensions to fold across {n} lanes",
                        soln.name()
                    )));
                };
                let rest: i64 = fold
                    .iter()
                    .filter(|(name, _)| *name != last)
                    .map(|(_, v)| v)
                    .product();
                if rest > 0 && n % rest == 0 {
                    debug!(
                        dim = %last,
                        len = n / rest,
                        "adjusting unit-stride fold length to match {n} lanes"
                    );
                    fold.set(last, n / rest);
                } else {
                    return Err(Error::FoldMismatch(format!(
                        "fold ({}) cannot be completed to {n} lanes",
                        settings.fold
                    )));
                }
            }
            n
        }
    };

    Ok(FoldLayout {
        fold,
        cluster,
        first_inner: settings.first_inner,
        lanes,
    })
}

/// Alignment class of one vectorized grid access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VecAccessKind {
    /// All offsets fall on vector boundaries: one aligned load/store.
    Aligned,
    /// Direct unaligned load from the element address.
    Unaligned,
    /// Lane blend of two adjacent vectors along one dimension.
    Shifted { dim: String, shift: i64 },
    /// Offsets stray across vectors in several dimensions; the vector
    /// is constructed lane by lane.
    Gather,
}

/// A grid access expressed in vector coordinates.
#[derive(Debug, Clone)]
pub struct VecAccess {
    /// Offsets in whole vectors per dimension (step and misc dims pass
    /// through unchanged).
    pub vec_offsets: DimTuple,
    /// Intra-vector remainder per folded dimension.
    pub rem: DimTuple,
    pub kind: VecAccessKind,
}

/// Classify an element-offset access against the fold layout.
pub fn classify_access(layout: &FoldLayout, offsets: &DimTuple, allow_unaligned: bool) -> VecAccess {
    let mut vec_offsets = DimTuple::new();
    let mut rem = DimTuple::new();
    for (name, off) in offsets.iter() {
        let len = layout.fold.get(name).unwrap_or(1);
        vec_offsets.set(name, off.div_euclid(len));
        let r = off.rem_euclid(len);
        if len > 1 {
            rem.set(name, r);
        }
    }
    let moved: Vec<(&str, i64)> = rem.iter().filter(|(_, r)| *r != 0).collect();
    let kind = match moved.as_slice() {
        [] => VecAccessKind::Aligned,
        _ if allow_unaligned => VecAccessKind::Unaligned,
        [(dim, shift)] => VecAccessKind::Shifted {
            dim: dim.to_string(),
            shift: *shift,
        },
        _ => VecAccessKind::Gather,
    };
    VecAccess {
        vec_offsets,
        rem,
        kind,
    }
}

/// One equation instance within the expanded cluster.
#[derive(Debug, Clone)]
pub struct VecEquation {
    /// Index of the source equation in the solution.
    pub eq: usize,
    /// Cluster slot, in vector units per clustered dimension.
    pub slot: DimTuple,
    pub root: NodeId,
    pub cond: Option<NodeId>,
}

/// A bundle after cluster expansion.
#[derive(Debug, Clone)]
pub struct VecBundle {
    pub name: String,
    pub eqs: Vec<VecEquation>,
}

/// Expand each bundle across the cluster: one copy of every equation
/// per cluster slot, with offsets shifted by `slot * fold_length` in
/// each clustered dimension.
pub fn expand_clusters(
    soln: &mut Solution,
    bundles: &BundleSet,
    layout: &FoldLayout,
) -> Vec<VecBundle> {
    let slots = cluster_slots(layout);
    let mut out = Vec::with_capacity(bundles.bundles.len());
    for bundle in &bundles.bundles {
        let mut eqs = Vec::with_capacity(bundle.eqs.len() * slots.len());
        for slot in &slots {
            let mut shift = DimTuple::new();
            for (name, s) in slot.iter() {
                let fold_len = layout.fold.get(name).unwrap_or(1);
                if s != 0 {
                    shift.set(name, s * fold_len);
                }
            }
            for &eq_index in &bundle.eqs {
                let eq = &soln.equations()[eq_index];
                let (root0, cond0) = (eq.root, eq.cond);
                let mut memo = HashMap::new();
                let root = shift_offsets(soln.arena_mut(), root0, &shift, &mut memo);
                let cond = cond0.map(|c| shift_offsets(soln.arena_mut(), c, &shift, &mut memo));
                eqs.push(VecEquation {
                    eq: eq_index,
                    slot: slot.clone(),
                    root,
                    cond,
                });
            }
        }
        out.push(VecBundle {
            name: bundle.name.clone(),
            eqs,
        });
    }
    out
}

/// Enumerate cluster slots in row-major order, last dimension fastest.
fn cluster_slots(layout: &FoldLayout) -> Vec<DimTuple> {
    let dims: Vec<(String, i64)> = layout
        .cluster
        .iter()
        .filter(|(_, v)| *v > 1)
        .map(|(n, v)| (n.to_string(), v))
        .collect();
    let total: i64 = dims.iter().map(|(_, v)| *v).product();
    let mut slots = Vec::with_capacity(total as usize);
    for mut i in 0..total {
        let mut slot = DimTuple::new();
        for (name, len) in dims.iter().rev() {
            slot.set(name.clone(), i % len);
            i /= len;
        }
        let mut ordered = DimTuple::new();
        for (name, _) in &dims {
            ordered.set(name.clone(), slot.get(name).unwrap_or(0));
        }
        slots.push(ordered);
    }
    slots
}

/// Rebuild a subexpression with every grid access shifted by `shift`
/// in the dimensions the access carries.
fn shift_offsets(
    arena: &mut NodeArena,
    id: NodeId,
    shift: &DimTuple,
    memo: &mut HashMap<NodeId, NodeId>,
) -> NodeId {
    if shift.is_empty() {
        return id;
    }
    if let Some(&done) = memo.get(&id) {
        return done;
    }
    let kind = arena.kind(id).clone();
    let new = match kind {
        NodeKind::Const(_) | NodeKind::Param(_) => id,
        NodeKind::Read { grid, offsets } => {
            let applicable = shift.filtered(|d| offsets.contains(d));
            arena.intern(NodeKind::Read {
                grid,
                offsets: offsets.add(&applicable),
            })
        }
        NodeKind::Write {
            grid,
            offsets,
            value,
        } => {
            let value = shift_offsets(arena, value, shift, memo);
            let applicable = shift.filtered(|d| offsets.contains(d));
            arena.intern(NodeKind::Write {
                grid,
                offsets: offsets.add(&applicable),
                value,
            })
        }
        NodeKind::Unary { op, arg } => {
            let arg = shift_offsets(arena, arg, shift, memo);
            arena.intern(NodeKind::Unary { op, arg })
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let lhs = shift_offsets(arena, lhs, shift, memo);
            let rhs = shift_offsets(arena, rhs, shift, memo);
            arena.intern(NodeKind::Binary { op, lhs, rhs })
        }
        NodeKind::Commutative { op, operands } => {
            let operands: Vec<NodeId> = operands
                .into_iter()
                .map(|c| shift_offsets(arena, c, shift, memo))
                .collect();
            arena.commutative(op, operands)
        }
        NodeKind::Call { name, args } => {
            let args: Vec<NodeId> = args
                .into_iter()
                .map(|a| shift_offsets(arena, a, shift, memo))
                .collect();
            arena.intern(NodeKind::Call { name, args })
        }
        NodeKind::CallSlot { call, index } => {
            let call = shift_offsets(arena, call, shift, memo);
            arena.intern(NodeKind::CallSlot { call, index })
        }
        NodeKind::IfElse { cond, then_, else_ } => {
            let cond = shift_offsets(arena, cond, shift, memo);
            let then_ = shift_offsets(arena, then_, shift, memo);
            let else_ = shift_offsets(arena, else_, shift, memo);
            arena.intern(NodeKind::IfElse { cond, then_, else_ })
        }
    };
    memo.insert(id, new);
    new
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::make_bundles;
    use crate::deps::DepGraph;
    use gridfold_foundation::DimKind;

    fn dt(pairs: &[(&str, i64)]) -> DimTuple {
        DimTuple::from_pairs(pairs.iter().map(|&(n, v)| (n, v))).unwrap()
    }

    fn solution_3d() -> Solution {
        let mut s = Solution::new("wave", "");
        let g = s
            .make_grid(
                "p",
                &[
                    ("t", DimKind::Step),
                    ("x", DimKind::Domain),
                    ("y", DimKind::Domain),
                    ("z", DimKind::Domain),
                ],
            )
            .unwrap();
        let r = s
            .make_read(g, &dt(&[("t", 0), ("x", 0), ("y", 0), ("z", 0)]))
            .unwrap();
        s.make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0), ("z", 0)]), r, None)
            .unwrap();
        s
    }

    #[test]
    fn exact_fold_is_kept() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 4), ("y", 4)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let layout = resolve_fold(&s, &settings, Some(16)).unwrap();
        assert_eq!(layout.fold.get("x"), Some(4));
        assert_eq!(layout.fold.get("y"), Some(4));
        assert_eq!(layout.fold.get("z"), Some(1));
        assert_eq!(layout.lanes, 16);
    }

    #[test]
    fn last_domain_dim_absorbs_residual() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 4)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        // 16 lanes requested, x=4 fixed: z (unit stride) takes 4.
        let layout = resolve_fold(&s, &settings, Some(16)).unwrap();
        assert_eq!(layout.fold.get("x"), Some(4));
        assert_eq!(layout.fold.get("y"), Some(1));
        assert_eq!(layout.fold.get("z"), Some(4));
    }

    #[test]
    fn impossible_fold_fails() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 3), ("y", 5)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let err = resolve_fold(&s, &settings, Some(16)).unwrap_err();
        assert!(matches!(err, Error::FoldMismatch(_)));
    }

    #[test]
    fn scalar_formats_force_unit_fold() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 4), ("y", 4)]),
            cluster: dt(&[("y", 2)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let layout = resolve_fold(&s, &settings, None).unwrap();
        assert!(layout.is_scalar());
        assert_eq!(layout.cluster_product(), 1);
    }

    #[test]
    fn unknown_fold_dim_is_rejected() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("q", 4)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let err = resolve_fold(&s, &settings, Some(16)).unwrap_err();
        assert!(matches!(err, Error::FoldMismatch(_)));
    }

    #[test]
    fn lane_indexing_last_inner() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 4), ("y", 2)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let layout = resolve_fold(&s, &settings, Some(8)).unwrap();
        // lus: the last fold dimension (y here, z folds to 1) varies
        // fastest.
        assert_eq!(layout.lane_of(&dt(&[("x", 0), ("y", 0)])), 0);
        assert_eq!(layout.lane_of(&dt(&[("x", 0), ("y", 1)])), 1);
        assert_eq!(layout.lane_of(&dt(&[("x", 1), ("y", 0)])), 2);
        let rt = layout.unfold(3);
        assert_eq!(rt.get("x"), Some(1));
        assert_eq!(rt.get("y"), Some(1));
    }

    #[test]
    fn access_classification() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 4), ("y", 2)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let layout = resolve_fold(&s, &settings, Some(8)).unwrap();

        let aligned = classify_access(&layout, &dt(&[("t", 0), ("x", 4), ("y", 0), ("z", 2)]), false);
        assert_eq!(aligned.kind, VecAccessKind::Aligned);
        assert_eq!(aligned.vec_offsets.get("x"), Some(1));
        assert_eq!(aligned.vec_offsets.get("z"), Some(2));

        let shifted = classify_access(&layout, &dt(&[("t", 0), ("x", 1), ("y", 0), ("z", 0)]), false);
        assert_eq!(
            shifted.kind,
            VecAccessKind::Shifted {
                dim: "x".to_string(),
                shift: 1
            }
        );

        let negative = classify_access(&layout, &dt(&[("t", 0), ("x", -1), ("y", 0), ("z", 0)]), false);
        assert_eq!(negative.vec_offsets.get("x"), Some(-1));
        assert_eq!(negative.rem.get("x"), Some(3));

        let unaligned = classify_access(&layout, &dt(&[("t", 0), ("x", 1), ("y", 0), ("z", 0)]), true);
        assert_eq!(unaligned.kind, VecAccessKind::Unaligned);

        let gather = classify_access(&layout, &dt(&[("t", 0), ("x", 1), ("y", 1), ("z", 0)]), false);
        assert_eq!(gather.kind, VecAccessKind::Gather);
    }

    #[test]
    fn cluster_expansion_shifts_offsets() {
        let mut s = solution_3d();
        let settings = Settings {
            fold: dt(&[("x", 4)]),
            cluster: dt(&[("y", 2)]),
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        let deps = DepGraph::analyze(&s);
        let bundles = make_bundles(&mut s, &deps, &settings).unwrap();
        let layout = resolve_fold(&s, &settings, Some(4)).unwrap();
        let vec_bundles = expand_clusters(&mut s, &bundles, &layout);

        assert_eq!(vec_bundles.len(), 1);
        let eqs = &vec_bundles[0].eqs;
        assert_eq!(eqs.len(), 2);
        assert_eq!(eqs[0].slot.get("y"), Some(0));
        assert_eq!(eqs[1].slot.get("y"), Some(1));
        // Slot 1 writes y + fold_y (= 1 vector over, 1 element here).
        match s.arena().kind(eqs[1].root) {
            NodeKind::Write { offsets, .. } => assert_eq!(offsets.get("y"), Some(1)),
            other => panic!("expected write, got {other:?}"),
        }
    }
}
