//! Dependency analysis between stencil equations.
//!
//! An equation *depends on* another when it reads a grid point the
//! other writes within the same step. Cross-step accesses (a read at
//! `t-k`, k>0, of a grid written at `t`) reference the previous
//! iteration's data and do not constrain same-step scheduling, so they
//! produce no edge here. Scratch grids carry no step dimension; any
//! read of a scratch grid another equation writes is an edge.
//!
//! Edges are classified as *certain* (identical offsets: the exact
//! written point is read) or *possible* (differing domain offsets:
//! overlap occurs across iteration points). Both block same-bundle
//! placement; the distinction matters only for scratch bundling.

use gridfold_foundation::DimTuple;

use crate::node::{GridId, NodeKind};
use crate::solution::Solution;

/// How surely two accesses collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    /// The read names exactly the written point.
    Certain,
    /// Offsets differ; the accesses overlap across iteration points.
    Possible,
}

/// One same-step dependency edge: `reader` depends on `writer`.
#[derive(Debug, Clone)]
pub struct DepEdge {
    pub reader: usize,
    pub writer: usize,
    pub grid: GridId,
    pub certainty: Certainty,
    /// Per-domain-dimension |offset| of the conflicting read; the halo
    /// reach scratch bundling must cover.
    pub reach: DimTuple,
}

/// All same-step edges of a solution, in deterministic order.
#[derive(Debug, Default)]
pub struct DepGraph {
    pub edges: Vec<DepEdge>,
}

impl DepGraph {
    /// Compute same-step dependency edges between all equation pairs.
    pub fn analyze(soln: &Solution) -> Self {
        let summaries: Vec<EqAccess> = soln
            .equations()
            .iter()
            .map(|eq| EqAccess::of(soln, eq.root, eq.cond))
            .collect();

        let mut edges = Vec::new();
        for (reader, ra) in summaries.iter().enumerate() {
            for (writer, wa) in summaries.iter().enumerate() {
                if reader == writer {
                    continue;
                }
                for (rg, ro) in &ra.reads {
                    if *rg != wa.write_grid {
                        continue;
                    }
                    let grid = soln.grid(*rg);
                    let step = grid.step_dim();
                    if let Some(step) = step {
                        // Same-step only when the step offsets agree.
                        if ro.get(step) != wa.write_offsets.get(step) {
                            continue;
                        }
                    }
                    let certainty = if *ro == wa.write_offsets {
                        Certainty::Certain
                    } else {
                        Certainty::Possible
                    };
                    let mut reach = DimTuple::new();
                    for (dname, val) in ro.iter() {
                        if Some(dname) != step {
                            reach.set(dname, val.abs());
                        }
                    }
                    edges.push(DepEdge {
                        reader,
                        writer,
                        grid: *rg,
                        certainty,
                        reach,
                    });
                }
            }
        }
        Self { edges }
    }

    /// First edge between `a` and `b` in either direction, if any.
    pub fn conflict(&self, a: usize, b: usize) -> Option<&DepEdge> {
        self.edges.iter().find(|e| {
            (e.reader == a && e.writer == b) || (e.reader == b && e.writer == a)
        })
    }

    /// All edges between `a` and `b` in either direction.
    pub fn conflicts<'a>(&'a self, a: usize, b: usize) -> impl Iterator<Item = &'a DepEdge> {
        self.edges.iter().filter(move |e| {
            (e.reader == a && e.writer == b) || (e.reader == b && e.writer == a)
        })
    }
}

/// Read/write summary of one equation.
struct EqAccess {
    write_grid: GridId,
    write_offsets: DimTuple,
    reads: Vec<(GridId, DimTuple)>,
}

impl EqAccess {
    fn of(soln: &Solution, root: crate::node::NodeId, cond: Option<crate::node::NodeId>) -> Self {
        let (write_grid, write_offsets, value) = match soln.arena().kind(root) {
            NodeKind::Write {
                grid,
                offsets,
                value,
            } => (*grid, offsets.clone(), *value),
            other => unreachable!("equation root must be a write, got {other:?}"),
        };
        let mut reads = soln.arena().reads_in(value);
        if let Some(cond) = cond {
            reads.extend(soln.arena().reads_in(cond));
        }
        Self {
            write_grid,
            write_offsets,
            reads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use gridfold_foundation::DimKind;

    fn dt(pairs: &[(&str, i64)]) -> DimTuple {
        DimTuple::from_pairs(pairs.iter().map(|&(n, v)| (n, v))).unwrap()
    }

    #[test]
    fn cross_step_read_is_not_an_edge() {
        let mut s = Solution::new("t", "");
        let g = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        // p(t+1, x) = p(t, x+1): reads the previous step only.
        let r = s.make_read(g, &dt(&[("t", 0), ("x", 1)])).unwrap();
        s.make_write(g, &dt(&[("t", 1), ("x", 0)]), r, None).unwrap();
        let r2 = s.make_read(g, &dt(&[("t", 0), ("x", -1)])).unwrap();
        s.make_write(g, &dt(&[("t", 1), ("x", 1)]), r2, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let deps = DepGraph::analyze(&s);
        assert!(deps.edges.is_empty());
    }

    #[test]
    fn same_step_read_is_an_edge() {
        let mut s = Solution::new("t", "");
        let a = s
            .make_grid("a", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let b = s
            .make_grid("b", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        // a(t+1, x) = b(t, x)  -- cross-step read of b
        let rb = s.make_read(b, &dt(&[("t", 0), ("x", 0)])).unwrap();
        s.make_write(a, &dt(&[("t", 1), ("x", 0)]), rb, None).unwrap();
        // b(t+1, x) = a(t+1, x+1)  -- same-step read of a's write
        let ra = s.make_read(a, &dt(&[("t", 1), ("x", 1)])).unwrap();
        s.make_write(b, &dt(&[("t", 1), ("x", 0)]), ra, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let deps = DepGraph::analyze(&s);
        assert_eq!(deps.edges.len(), 1);
        let edge = &deps.edges[0];
        assert_eq!(edge.reader, 1);
        assert_eq!(edge.writer, 0);
        assert_eq!(edge.certainty, Certainty::Possible);
        assert_eq!(edge.reach.get("x"), Some(1));
    }

    #[test]
    fn equal_offsets_are_certain() {
        let mut s = Solution::new("t", "");
        let a = s
            .make_grid("a", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let b = s
            .make_grid("b", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let c0 = s.make_const(1.0);
        s.make_write(a, &dt(&[("t", 1), ("x", 0)]), c0, None).unwrap();
        let ra = s.make_read(a, &dt(&[("t", 1), ("x", 0)])).unwrap();
        s.make_write(b, &dt(&[("t", 1), ("x", 0)]), ra, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let deps = DepGraph::analyze(&s);
        assert_eq!(deps.edges.len(), 1);
        assert_eq!(deps.edges[0].certainty, Certainty::Certain);
    }

    #[test]
    fn scratch_reads_are_syntactic_edges() {
        let mut s = Solution::new("t", "");
        let p = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let scratch = s.make_scratch_grid("s", &[("x", DimKind::Domain)]).unwrap();
        // s(x) = p(t, x)
        let rp = s.make_read(p, &dt(&[("t", 0), ("x", 0)])).unwrap();
        s.make_write(scratch, &dt(&[("x", 0)]), rp, None).unwrap();
        // p(t+1, x) = s(x+1)
        let rs = s.make_read(scratch, &dt(&[("x", 1)])).unwrap();
        s.make_write(p, &dt(&[("t", 1), ("x", 0)]), rs, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let deps = DepGraph::analyze(&s);
        assert_eq!(deps.edges.len(), 1);
        let edge = &deps.edges[0];
        assert_eq!((edge.reader, edge.writer), (1, 0));
        assert_eq!(edge.certainty, Certainty::Possible);
    }
}
