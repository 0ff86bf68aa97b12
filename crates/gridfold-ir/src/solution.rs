//! Solutions: grids, equations, and the factory surface.
//!
//! A solution is the unit of compilation. It owns the node arena, the
//! grid table, and the ordered equation list. Stencil definitions
//! populate it through the `make_*` builders; `freeze` then resolves
//! dimension order, halos, and step allocations, after which the IR is
//! read-only for analysis and emission.

use gridfold_foundation::{DimKind, DimTuple};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::node::{BinaryOp, CommOp, GridId, NodeArena, NodeId, NodeKind, UnaryOp};
use crate::settings::Settings;

/// A named multi-dimensional array variable.
#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    /// Declared dimensions, in declaration order.
    pub dims: Vec<(String, DimKind)>,
    /// Halo element count per domain dimension (each side). Auto-sized
    /// at freeze; enlarged by scratch bundling; overridable globally.
    pub halo: DimTuple,
    /// Allocation size in the step dimension, resolved at freeze.
    /// `None` for grids without a step dimension.
    pub step_alloc: Option<i64>,
    /// Scratch grids hold per-step intermediates and have no step dim.
    pub scratch: bool,
    /// Set when misc dims are interleaved innermost; the runtime may
    /// not resize misc dims on such grids.
    pub fixed_misc: bool,
    /// Memory layout order, outermost first. Resolved at freeze.
    pub layout: Vec<String>,
}

impl Grid {
    pub fn dim_names(&self) -> impl Iterator<Item = &str> {
        self.dims.iter().map(|(n, _)| n.as_str())
    }

    pub fn has_dim(&self, name: &str) -> bool {
        self.dims.iter().any(|(n, _)| n == name)
    }

    pub fn step_dim(&self) -> Option<&str> {
        self.dims
            .iter()
            .find(|(_, k)| *k == DimKind::Step)
            .map(|(n, _)| n.as_str())
    }
}

/// One stencil equation: a grid write plus an optional condition
/// restricting the index subdomain it applies to.
#[derive(Debug, Clone)]
pub struct Equation {
    /// Unique auto-assigned name, `<grid>_<n>`.
    pub name: String,
    pub grid: GridId,
    /// The `Write` node.
    pub root: NodeId,
    pub cond: Option<NodeId>,
}

/// A stencil solution under construction or analysis.
#[derive(Debug)]
pub struct Solution {
    name: String,
    description: String,
    arena: NodeArena,
    grids: Vec<Grid>,
    grid_ids: IndexMap<String, GridId>,
    equations: Vec<Equation>,
    /// (grid, normalized offsets fp, condition fp) triples already
    /// claimed by an equation.
    eq_identities: Vec<(GridId, u64, Option<u64>)>,
    step_dim: Option<String>,
    domain_dims: Vec<String>,
    misc_dims: Vec<String>,
    frozen: bool,
}

impl Solution {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arena: NodeArena::new(),
            grids: Vec::new(),
            grid_ids: IndexMap::new(),
            equations: Vec::new(),
            eq_identities: Vec::new(),
            step_dim: None,
            domain_dims: Vec::new(),
            misc_dims: Vec::new(),
            frozen: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn grid(&self, id: GridId) -> &Grid {
        &self.grids[id.0 as usize]
    }

    pub(crate) fn grid_mut(&mut self, id: GridId) -> &mut Grid {
        &mut self.grids[id.0 as usize]
    }

    pub fn find_grid(&self, name: &str) -> Option<GridId> {
        self.grid_ids.get(name).copied()
    }

    pub fn grids(&self) -> impl Iterator<Item = (GridId, &Grid)> {
        self.grids
            .iter()
            .enumerate()
            .map(|(i, g)| (GridId(i as u32), g))
    }

    pub fn num_grids(&self) -> usize {
        self.grids.len()
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub(crate) fn equation_mut(&mut self, index: usize) -> &mut Equation {
        &mut self.equations[index]
    }

    /// Step dimension name, resolved at freeze.
    pub fn step_dim(&self) -> Option<&str> {
        self.step_dim.as_deref()
    }

    /// Domain dimensions in resolved order; the last is unit stride.
    pub fn domain_dims(&self) -> &[String] {
        &self.domain_dims
    }

    pub fn misc_dims(&self) -> &[String] {
        &self.misc_dims
    }

    // ----- factory surface -------------------------------------------------

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::Schema(format!(
                "solution '{}' is frozen; no further definitions allowed",
                self.name
            )));
        }
        Ok(())
    }

    /// Declare a grid with the given dimensions.
    pub fn make_grid(&mut self, name: &str, dims: &[(&str, DimKind)]) -> Result<GridId> {
        self.add_grid(name, dims, false)
    }

    /// Declare a scratch grid: a per-step intermediate without a step
    /// dimension.
    pub fn make_scratch_grid(&mut self, name: &str, dims: &[(&str, DimKind)]) -> Result<GridId> {
        if dims.iter().any(|(_, k)| *k == DimKind::Step) {
            return Err(Error::Schema(format!(
                "scratch grid '{name}' may not carry a step dimension"
            )));
        }
        self.add_grid(name, dims, true)
    }

    fn add_grid(&mut self, name: &str, dims: &[(&str, DimKind)], scratch: bool) -> Result<GridId> {
        self.check_mutable()?;
        if self.grid_ids.contains_key(name) {
            return Err(Error::NameConflict(format!("grid '{name}' already defined")));
        }
        let step_count = dims.iter().filter(|(_, k)| *k == DimKind::Step).count();
        if step_count > 1 {
            return Err(Error::Schema(format!(
                "grid '{name}' declares {step_count} step dimensions"
            )));
        }
        let mut seen = Vec::new();
        for (dname, _) in dims {
            if seen.contains(dname) {
                return Err(Error::Schema(format!(
                    "grid '{name}' declares dimension '{dname}' twice"
                )));
            }
            seen.push(dname);
        }
        let id = GridId(self.grids.len() as u32);
        self.grids.push(Grid {
            name: name.to_string(),
            dims: dims.iter().map(|(n, k)| (n.to_string(), *k)).collect(),
            halo: DimTuple::new(),
            step_alloc: None,
            scratch,
            fixed_misc: false,
            layout: Vec::new(),
        });
        self.grid_ids.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn make_const(&mut self, value: f64) -> NodeId {
        self.arena.intern(NodeKind::Const(value))
    }

    pub fn make_param(&mut self, name: &str) -> NodeId {
        self.arena.intern(NodeKind::Param(name.to_string()))
    }

    /// Read a grid point. The offset tuple must name each grid
    /// dimension exactly once; it is normalized to the grid's
    /// declaration order.
    pub fn make_read(&mut self, grid: GridId, offsets: &DimTuple) -> Result<NodeId> {
        let offsets = self.normalize_offsets(grid, offsets)?;
        Ok(self.arena.intern(NodeKind::Read { grid, offsets }))
    }

    pub fn make_unary(&mut self, op: UnaryOp, arg: NodeId) -> NodeId {
        self.arena.intern(NodeKind::Unary { op, arg })
    }

    pub fn make_binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arena.intern(NodeKind::Binary { op, lhs, rhs })
    }

    pub fn make_commutative(&mut self, op: CommOp, operands: Vec<NodeId>) -> NodeId {
        self.arena.commutative(op, operands)
    }

    /// `a + b`, canonicalized.
    pub fn make_add(&mut self, operands: Vec<NodeId>) -> NodeId {
        self.arena.commutative(CommOp::Add, operands)
    }

    /// `a * b`, canonicalized.
    pub fn make_mul(&mut self, operands: Vec<NodeId>) -> NodeId {
        self.arena.commutative(CommOp::Mul, operands)
    }

    pub fn make_call(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        self.arena.intern(NodeKind::Call {
            name: name.to_string(),
            args,
        })
    }

    pub fn make_if_then_else(&mut self, cond: NodeId, then_: NodeId, else_: NodeId) -> NodeId {
        self.arena.intern(NodeKind::IfElse { cond, then_, else_ })
    }

    /// Write `value` to a grid point, creating an equation. `cond`
    /// optionally restricts the subdomain the equation applies to.
    pub fn make_write(
        &mut self,
        grid: GridId,
        offsets: &DimTuple,
        value: NodeId,
        cond: Option<NodeId>,
    ) -> Result<NodeId> {
        self.check_mutable()?;
        let offsets = self.normalize_offsets(grid, offsets)?;

        // An equation may not read the point it writes in the same step.
        let mut scan_roots = vec![value];
        scan_roots.extend(cond);
        for root in &scan_roots {
            for (rg, ro) in self.arena.reads_in(*root) {
                if rg == grid && ro == offsets {
                    return Err(Error::Cycle(format!(
                        "equation writes and reads '{}' at the same point ({})",
                        self.grid(grid).name,
                        render_offsets(&ro),
                    )));
                }
            }
        }

        // Offsets are already normalized, so a structural hash of the
        // tuple identifies the written point.
        let off_fp = crate::node::mix_offsets(
            gridfold_foundation::stable_hash::FNV1A_OFFSET_BASIS_64,
            &offsets,
        );
        let cond_fp = cond.map(|c| self.arena.fingerprint(c));
        if self
            .eq_identities
            .iter()
            .any(|(g, o, c)| *g == grid && *o == off_fp && *c == cond_fp)
        {
            return Err(Error::NameConflict(format!(
                "duplicate equation for grid '{}' at ({}) under the same condition",
                self.grid(grid).name,
                render_offsets(&offsets),
            )));
        }
        self.eq_identities.push((grid, off_fp, cond_fp));

        let root = self.arena.intern(NodeKind::Write {
            grid,
            offsets,
            value,
        });
        let count = self
            .equations
            .iter()
            .filter(|e| e.grid == grid)
            .count();
        let name = format!("{}_{}", self.grid(grid).name, count);
        self.equations.push(Equation {
            name,
            grid,
            root,
            cond,
        });
        Ok(root)
    }

    fn normalize_offsets(&self, grid: GridId, offsets: &DimTuple) -> Result<DimTuple> {
        let g = self.grid(grid);
        if offsets.len() != g.dims.len() {
            return Err(Error::Schema(format!(
                "offset tuple ({}) does not cover the {} dimensions of grid '{}'",
                offsets,
                g.dims.len(),
                g.name
            )));
        }
        let mut out = DimTuple::new();
        for (dname, _) in &g.dims {
            match offsets.get(dname) {
                Some(v) => out.set(dname.clone(), v),
                None => {
                    return Err(Error::Schema(format!(
                        "offset tuple ({}) is missing dimension '{}' of grid '{}'",
                        offsets, dname, g.name
                    )))
                }
            }
        }
        Ok(out)
    }

    // ----- lifecycle -------------------------------------------------------

    /// Resolve dimension order, halos, step allocations, and layouts,
    /// then seal the solution against further definitions.
    pub fn freeze(&mut self, settings: &Settings) -> Result<()> {
        if self.frozen {
            return Ok(());
        }

        // Resolve the step dimension: at most one across all grids.
        let mut step: Option<String> = None;
        for g in &self.grids {
            if let Some(s) = g.step_dim() {
                match &step {
                    None => step = Some(s.to_string()),
                    Some(prev) if prev != s => {
                        return Err(Error::Schema(format!(
                            "conflicting step dimensions '{prev}' and '{s}'"
                        )))
                    }
                    _ => {}
                }
            }
        }
        if let Some(requested) = &settings.step_dim {
            if let Some(actual) = &step {
                if requested != actual {
                    return Err(Error::Schema(format!(
                        "step dimension is '{actual}', but settings request '{requested}'"
                    )));
                }
            }
        }
        self.step_dim = step;

        // Domain order: explicitly requested dims first (those in use),
        // then remaining dims in discovery order. Last = unit stride.
        let mut discovered: Vec<String> = Vec::new();
        let mut misc: Vec<String> = Vec::new();
        for g in &self.grids {
            for (dname, kind) in &g.dims {
                match kind {
                    DimKind::Domain if !discovered.contains(dname) => {
                        discovered.push(dname.clone())
                    }
                    DimKind::Misc if !misc.contains(dname) => misc.push(dname.clone()),
                    _ => {}
                }
            }
        }
        let mut order: Vec<String> = Vec::new();
        for dname in &settings.domain_dims {
            if discovered.contains(dname) && !order.contains(dname) {
                order.push(dname.clone());
            }
        }
        for dname in discovered {
            if !order.contains(&dname) {
                order.push(dname);
            }
        }
        self.domain_dims = order;
        self.misc_dims = misc;

        self.size_grids(settings);
        self.frozen = true;
        Ok(())
    }

    /// Auto-size halos and step allocations from the accesses each grid
    /// actually sees, then apply global overrides and layout flags.
    fn size_grids(&mut self, settings: &Settings) {
        let mut halos: Vec<DimTuple> = vec![DimTuple::new(); self.grids.len()];
        let mut step_spans: Vec<Option<(i64, i64)>> = vec![None; self.grids.len()];

        let mut accesses: Vec<(GridId, DimTuple)> = Vec::new();
        for eq in &self.equations {
            if let NodeKind::Write {
                grid,
                offsets,
                value,
            } = self.arena.kind(eq.root)
            {
                accesses.push((*grid, offsets.clone()));
                accesses.extend(self.arena.reads_in(*value));
            }
            if let Some(cond) = eq.cond {
                accesses.extend(self.arena.reads_in(cond));
            }
        }

        for (gid, offsets) in accesses {
            let idx = gid.0 as usize;
            let step_name = self.grids[idx].step_dim().map(str::to_string);
            for (dname, val) in offsets.iter() {
                if Some(dname) == step_name.as_deref() {
                    let span = step_spans[idx].get_or_insert((val, val));
                    span.0 = span.0.min(val);
                    span.1 = span.1.max(val);
                } else if self.domain_dims.iter().any(|d| d == dname) {
                    let cur = halos[idx].get(dname).unwrap_or(0);
                    halos[idx].set(dname, cur.max(val.abs()));
                }
            }
        }

        for (idx, g) in self.grids.iter_mut().enumerate() {
            g.halo = match settings.halo {
                Some(h) => {
                    let mut t = DimTuple::new();
                    for (dname, kind) in &g.dims {
                        if *kind == DimKind::Domain {
                            t.set(dname.clone(), h);
                        }
                    }
                    t
                }
                None => halos[idx].clone(),
            };
            g.step_alloc = if g.step_dim().is_some() {
                match settings.step_alloc {
                    Some(a) => Some(a),
                    None => step_spans[idx].map(|(lo, hi)| hi - lo + 1).or(Some(1)),
                }
            } else {
                None
            };
            g.fixed_misc = settings.interleave_misc;

            // Layout: step outermost, then misc, then domain dims in
            // solution order; interleaved misc moves innermost.
            let mut layout: Vec<String> = Vec::new();
            layout.extend(g.step_dim().map(str::to_string));
            let grid_misc: Vec<String> = g
                .dims
                .iter()
                .filter(|(_, k)| *k == DimKind::Misc)
                .map(|(n, _)| n.clone())
                .collect();
            if !settings.interleave_misc {
                layout.extend(grid_misc.iter().cloned());
            }
            for dname in &self.domain_dims {
                if g.dims.iter().any(|(n, _)| n == dname) {
                    layout.push(dname.clone());
                }
            }
            if settings.interleave_misc {
                layout.extend(grid_misc);
            }
            g.layout = layout;
        }
    }

    /// Enlarge a scratch grid's halo to at least `reach` on every
    /// domain dimension it carries. Recorded by the bundler when
    /// scratch bundling requires it.
    pub(crate) fn enlarge_scratch_halo(&mut self, grid: GridId, reach: &DimTuple) {
        let g = self.grid_mut(grid);
        for (dname, val) in reach.iter() {
            let cur = g.halo.get(dname).unwrap_or(0);
            g.halo.set(dname, cur.max(val.abs()));
        }
    }
}

fn render_offsets(offsets: &DimTuple) -> String {
    offsets
        .iter()
        .map(|(n, v)| DimTuple::offset_term(n, v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(pairs: &[(&str, i64)]) -> DimTuple {
        DimTuple::from_pairs(pairs.iter().map(|&(n, v)| (n, v))).unwrap()
    }

    fn simple_solution() -> (Solution, GridId) {
        let mut s = Solution::new("test", "test solution");
        let g = s
            .make_grid(
                "p",
                &[("t", DimKind::Step), ("x", DimKind::Domain), ("y", DimKind::Domain)],
            )
            .unwrap();
        (s, g)
    }

    #[test]
    fn duplicate_grid_is_a_name_conflict() {
        let (mut s, _) = simple_solution();
        let err = s.make_grid("p", &[("x", DimKind::Domain)]).unwrap_err();
        assert!(matches!(err, Error::NameConflict(_)));
    }

    #[test]
    fn offsets_must_cover_grid_dims() {
        let (mut s, g) = simple_solution();
        let err = s.make_read(g, &dt(&[("t", 0), ("x", 1)])).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        let err = s
            .make_read(g, &dt(&[("t", 0), ("x", 1), ("z", 0)]))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn offsets_normalize_to_grid_order() {
        let (mut s, g) = simple_solution();
        let a = s.make_read(g, &dt(&[("y", 1), ("x", 0), ("t", 0)])).unwrap();
        let b = s.make_read(g, &dt(&[("t", 0), ("x", 0), ("y", 1)])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn write_reading_own_point_is_a_cycle() {
        let (mut s, g) = simple_solution();
        let self_read = s
            .make_read(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]))
            .unwrap();
        let err = s
            .make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), self_read, None)
            .unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));
    }

    #[test]
    fn duplicate_equation_identity_conflicts() {
        let (mut s, g) = simple_solution();
        let r = s.make_read(g, &dt(&[("t", 0), ("x", 0), ("y", 0)])).unwrap();
        s.make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), r, None)
            .unwrap();
        let two = s.make_const(2.0);
        let v = s.make_mul(vec![two, r]);
        let err = s
            .make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), v, None)
            .unwrap_err();
        assert!(matches!(err, Error::NameConflict(_)));
        // A different written point is a separate equation (no conflict).
        s.make_write(g, &dt(&[("t", 1), ("x", 1), ("y", 0)]), v, None)
            .unwrap();
    }

    #[test]
    fn freeze_resolves_dims_and_halos() {
        let (mut s, g) = simple_solution();
        let r1 = s.make_read(g, &dt(&[("t", 0), ("x", 2), ("y", 0)])).unwrap();
        let r2 = s
            .make_read(g, &dt(&[("t", 0), ("x", -1), ("y", -3)]))
            .unwrap();
        let sum = s.make_add(vec![r1, r2]);
        s.make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), sum, None)
            .unwrap();
        s.freeze(&Settings::default()).unwrap();

        assert_eq!(s.step_dim(), Some("t"));
        assert_eq!(s.domain_dims(), ["x".to_string(), "y".to_string()]);
        let grid = s.grid(g);
        assert_eq!(grid.halo.get("x"), Some(2));
        assert_eq!(grid.halo.get("y"), Some(3));
        // Accesses span t+0..t+1.
        assert_eq!(grid.step_alloc, Some(2));
        assert_eq!(grid.layout, ["t", "x", "y"]);
    }

    #[test]
    fn frozen_solution_rejects_definitions() {
        let (mut s, g) = simple_solution();
        let r = s.make_read(g, &dt(&[("t", 0), ("x", 0), ("y", 0)])).unwrap();
        s.make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), r, None)
            .unwrap();
        s.freeze(&Settings::default()).unwrap();
        let err = s.make_grid("q", &[("x", DimKind::Domain)]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn domain_dim_order_follows_settings() {
        let (mut s, g) = simple_solution();
        let r = s.make_read(g, &dt(&[("t", 0), ("x", 0), ("y", 0)])).unwrap();
        s.make_write(g, &dt(&[("t", 1), ("x", 0), ("y", 0)]), r, None)
            .unwrap();
        let settings = Settings {
            domain_dims: vec!["y".to_string(), "x".to_string()],
            ..Settings::default()
        };
        s.freeze(&settings).unwrap();
        assert_eq!(s.domain_dims(), ["y".to_string(), "x".to_string()]);
    }
}
