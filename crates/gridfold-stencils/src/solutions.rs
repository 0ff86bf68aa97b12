//! Built-in stencil solutions.
//!
//! Each definition populates a solution through the IR factory only;
//! nothing here knows about folding, bundling, or emission. Radius-
//! parameterized stencils rebuild their reach from the current radius
//! on every `define`.

use gridfold_foundation::{DimKind, DimTuple};
use gridfold_ir::{GridId, NodeId, Result, Solution, UnaryOp};

use crate::StencilDef;

const T: DimKind = DimKind::Step;
const D: DimKind = DimKind::Domain;

/// Offset tuple from literal pairs.
fn pt(pairs: &[(&str, i64)]) -> DimTuple {
    let mut t = DimTuple::new();
    for &(n, v) in pairs {
        t.set(n, v);
    }
    t
}

/// Read of the 4-dim grid `g` at `t` plus a single-axis displacement.
fn axis_read(soln: &mut Solution, g: GridId, dim: &str, off: i64) -> Result<NodeId> {
    let mut offs = pt(&[("t", 0), ("x", 0), ("y", 0), ("z", 0)]);
    offs.set(dim, off);
    soln.make_read(g, &offs)
}

// ---------------------------------------------------------------------------

/// `3axis`: average of the center point and `radius` neighbors along
/// each axis.
pub struct AxisStencil {
    radius: u32,
}

impl AxisStencil {
    pub fn new() -> Self {
        Self { radius: 2 }
    }
}

impl Default for AxisStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl StencilDef for AxisStencil {
    fn name(&self) -> &str {
        "3axis"
    }

    fn description(&self) -> &str {
        "radius-swept average along the three axes"
    }

    fn radius(&self) -> Option<u32> {
        Some(self.radius)
    }

    fn set_radius(&mut self, radius: u32) -> bool {
        if radius == 0 {
            return false;
        }
        self.radius = radius;
        true
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let p = soln.make_grid("p", &[("t", T), ("x", D), ("y", D), ("z", D)])?;
        let mut terms = vec![soln.make_read(p, &pt(&[("t", 0), ("x", 0), ("y", 0), ("z", 0)]))?];
        for r in 1..=self.radius as i64 {
            for dim in ["x", "y", "z"] {
                terms.push(axis_read(soln, p, dim, r)?);
                terms.push(axis_read(soln, p, dim, -r)?);
            }
        }
        let coeff = soln.make_const(1.0 / terms.len() as f64);
        let sum = soln.make_add(terms);
        let value = soln.make_mul(vec![coeff, sum]);
        soln.make_write(p, &pt(&[("t", 1), ("x", 0), ("y", 0), ("z", 0)]), value, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// `9axis`: average along the three axes and the six planar
/// diagonals (nine lines through the center).
pub struct NineAxisStencil {
    radius: u32,
}

impl NineAxisStencil {
    pub fn new() -> Self {
        Self { radius: 2 }
    }
}

impl Default for NineAxisStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl StencilDef for NineAxisStencil {
    fn name(&self) -> &str {
        "9axis"
    }

    fn description(&self) -> &str {
        "radius-swept average along axes and planar diagonals"
    }

    fn radius(&self) -> Option<u32> {
        Some(self.radius)
    }

    fn set_radius(&mut self, radius: u32) -> bool {
        if radius == 0 {
            return false;
        }
        self.radius = radius;
        true
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let p = soln.make_grid("p", &[("t", T), ("x", D), ("y", D), ("z", D)])?;
        let dirs: [(i64, i64, i64); 9] = [
            (1, 0, 0),
            (0, 1, 0),
            (0, 0, 1),
            (1, 1, 0),
            (1, -1, 0),
            (1, 0, 1),
            (1, 0, -1),
            (0, 1, 1),
            (0, 1, -1),
        ];
        let mut terms = vec![soln.make_read(p, &pt(&[("t", 0), ("x", 0), ("y", 0), ("z", 0)]))?];
        for r in 1..=self.radius as i64 {
            for (dx, dy, dz) in dirs {
                for sign in [1, -1] {
                    let offs = pt(&[
                        ("t", 0),
                        ("x", sign * r * dx),
                        ("y", sign * r * dy),
                        ("z", sign * r * dz),
                    ]);
                    terms.push(soln.make_read(p, &offs)?);
                }
            }
        }
        let coeff = soln.make_const(1.0 / terms.len() as f64);
        let sum = soln.make_add(terms);
        let value = soln.make_mul(vec![coeff, sum]);
        soln.make_write(p, &pt(&[("t", 1), ("x", 0), ("y", 0), ("z", 0)]), value, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// `cube`: average over the full `(2r+1)^3` neighborhood.
pub struct CubeStencil {
    radius: u32,
}

impl CubeStencil {
    pub fn new() -> Self {
        Self { radius: 1 }
    }
}

impl Default for CubeStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl StencilDef for CubeStencil {
    fn name(&self) -> &str {
        "cube"
    }

    fn description(&self) -> &str {
        "average over the full cube neighborhood"
    }

    fn radius(&self) -> Option<u32> {
        Some(self.radius)
    }

    fn set_radius(&mut self, radius: u32) -> bool {
        if radius == 0 {
            return false;
        }
        self.radius = radius;
        true
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let p = soln.make_grid("p", &[("t", T), ("x", D), ("y", D), ("z", D)])?;
        let r = self.radius as i64;
        let mut terms = Vec::new();
        for dx in -r..=r {
            for dy in -r..=r {
                for dz in -r..=r {
                    terms.push(
                        soln.make_read(p, &pt(&[("t", 0), ("x", dx), ("y", dy), ("z", dz)]))?,
                    );
                }
            }
        }
        let coeff = soln.make_const(1.0 / terms.len() as f64);
        let sum = soln.make_add(terms);
        let value = soln.make_mul(vec![coeff, sum]);
        soln.make_write(p, &pt(&[("t", 1), ("x", 0), ("y", 0), ("z", 0)]), value, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// `iso3dfd`: second-order-in-time acoustic wave propagation with a
/// radius-swept spatial operator and per-ring coefficients.
pub struct Iso3dfdStencil {
    radius: u32,
}

impl Iso3dfdStencil {
    pub fn new() -> Self {
        Self { radius: 8 }
    }
}

impl Default for Iso3dfdStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl StencilDef for Iso3dfdStencil {
    fn name(&self) -> &str {
        "iso3dfd"
    }

    fn description(&self) -> &str {
        "isotropic acoustic wave kernel with velocity field"
    }

    fn radius(&self) -> Option<u32> {
        Some(self.radius)
    }

    fn set_radius(&mut self, radius: u32) -> bool {
        if radius == 0 || radius > 16 {
            return false;
        }
        self.radius = radius;
        true
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let p = soln.make_grid("p", &[("t", T), ("x", D), ("y", D), ("z", D)])?;
        let vel = soln.make_grid("vel", &[("x", D), ("y", D), ("z", D)])?;

        let center = soln.make_read(p, &pt(&[("t", 0), ("x", 0), ("y", 0), ("z", 0)]))?;
        let c0 = soln.make_param("coeff_0");
        let mut rings = vec![soln.make_mul(vec![c0, center])];
        for r in 1..=self.radius as i64 {
            let cr = soln.make_param(&format!("coeff_{r}"));
            let mut ring = Vec::with_capacity(6);
            for dim in ["x", "y", "z"] {
                ring.push(axis_read(soln, p, dim, r)?);
                ring.push(axis_read(soln, p, dim, -r)?);
            }
            let ring_sum = soln.make_add(ring);
            rings.push(soln.make_mul(vec![cr, ring_sum]));
        }
        let laplacian = soln.make_add(rings);

        let two = soln.make_const(2.0);
        let doubled = soln.make_mul(vec![two, center]);
        let previous = soln.make_read(p, &pt(&[("t", -1), ("x", 0), ("y", 0), ("z", 0)]))?;
        let neg_previous = soln.make_unary(UnaryOp::Neg, previous);
        let v = soln.make_read(vel, &pt(&[("x", 0), ("y", 0), ("z", 0)]))?;
        let propagated = soln.make_mul(vec![v, laplacian]);
        let value = soln.make_add(vec![doubled, neg_previous, propagated]);
        soln.make_write(p, &pt(&[("t", 1), ("x", 0), ("y", 0), ("z", 0)]), value, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// `awp`: simplified 2D staggered-grid elastic wave propagation.
/// Velocity updates read the previous step's stresses; stress updates
/// read the *current* step's velocities, so the analyzer must order
/// the velocity bundle first.
pub struct AwpStencil;

impl StencilDef for AwpStencil {
    fn name(&self) -> &str {
        "awp"
    }

    fn description(&self) -> &str {
        "staggered-grid elastic wave propagation (velocity + stress)"
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let dims: &[(&str, DimKind)] = &[("t", T), ("x", D), ("y", D)];
        let vx = soln.make_grid("vel_x", dims)?;
        let vy = soln.make_grid("vel_y", dims)?;
        let sxx = soln.make_grid("stress_xx", dims)?;
        let syy = soln.make_grid("stress_yy", dims)?;
        let sxy = soln.make_grid("stress_xy", dims)?;

        let rho_inv = soln.make_param("rho_inv");
        let lam = soln.make_param("lambda");
        let mu = soln.make_param("mu");
        let dth = soln.make_param("delta_t_over_h");

        let center = |s: &mut Solution, g| s.make_read(g, &pt(&[("t", 0), ("x", 0), ("y", 0)]));
        let diff = |s: &mut Solution, g, step: i64, d: &str, hi: i64, lo: i64| -> Result<NodeId> {
            let mut at = pt(&[("t", step), ("x", 0), ("y", 0)]);
            at.set(d, hi);
            let a = s.make_read(g, &at)?;
            let mut bt = pt(&[("t", step), ("x", 0), ("y", 0)]);
            bt.set(d, lo);
            let b = s.make_read(g, &bt)?;
            Ok(s.make_binary(gridfold_ir::BinaryOp::Sub, a, b))
        };

        // Velocity from last step's stress divergence.
        let dsxx = diff(soln, sxx, 0, "x", 1, 0)?;
        let dsxy_y = diff(soln, sxy, 0, "y", 0, -1)?;
        let div_x = soln.make_add(vec![dsxx, dsxy_y]);
        let vx0 = center(soln, vx)?;
        let step_x = soln.make_mul(vec![dth, rho_inv, div_x]);
        let vx1 = soln.make_add(vec![vx0, step_x]);
        soln.make_write(vx, &pt(&[("t", 1), ("x", 0), ("y", 0)]), vx1, None)?;

        let dsyy = diff(soln, syy, 0, "y", 1, 0)?;
        let dsxy_x = diff(soln, sxy, 0, "x", 0, -1)?;
        let div_y = soln.make_add(vec![dsyy, dsxy_x]);
        let vy0 = center(soln, vy)?;
        let step_y = soln.make_mul(vec![dth, rho_inv, div_y]);
        let vy1 = soln.make_add(vec![vy0, step_y]);
        soln.make_write(vy, &pt(&[("t", 1), ("x", 0), ("y", 0)]), vy1, None)?;

        // Stress from the freshly written velocities (same-step reads).
        let two = soln.make_const(2.0);
        let two_mu = soln.make_mul(vec![two, mu]);
        let lam_2mu = soln.make_add(vec![lam, two_mu]);

        let dvx_x = diff(soln, vx, 1, "x", 0, -1)?;
        let dvy_y = diff(soln, vy, 1, "y", 0, -1)?;
        let sxx0 = center(soln, sxx)?;
        let sxx_x = soln.make_mul(vec![lam_2mu, dvx_x]);
        let sxx_y = soln.make_mul(vec![lam, dvy_y]);
        let sxx_step = soln.make_add(vec![sxx_x, sxx_y]);
        let sxx_scaled = soln.make_mul(vec![dth, sxx_step]);
        let sxx1 = soln.make_add(vec![sxx0, sxx_scaled]);
        soln.make_write(sxx, &pt(&[("t", 1), ("x", 0), ("y", 0)]), sxx1, None)?;

        let syy0 = center(soln, syy)?;
        let syy_y = soln.make_mul(vec![lam_2mu, dvy_y]);
        let syy_x = soln.make_mul(vec![lam, dvx_x]);
        let syy_step = soln.make_add(vec![syy_y, syy_x]);
        let syy_scaled = soln.make_mul(vec![dth, syy_step]);
        let syy1 = soln.make_add(vec![syy0, syy_scaled]);
        soln.make_write(syy, &pt(&[("t", 1), ("x", 0), ("y", 0)]), syy1, None)?;

        let dvx_y = diff(soln, vx, 1, "y", 1, 0)?;
        let dvy_x = diff(soln, vy, 1, "x", 1, 0)?;
        let shear = soln.make_add(vec![dvx_y, dvy_x]);
        let sxy0 = center(soln, sxy)?;
        let sxy_scaled = soln.make_mul(vec![dth, mu, shear]);
        let sxy1 = soln.make_add(vec![sxy0, sxy_scaled]);
        soln.make_write(sxy, &pt(&[("t", 1), ("x", 0), ("y", 0)]), sxy1, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// `test_func`: exercises function-call pairing; `sin` and `cos` over
/// the same argument should merge into one `sincos`.
pub struct TestFuncStencil;

impl StencilDef for TestFuncStencil {
    fn name(&self) -> &str {
        "test_func"
    }

    fn description(&self) -> &str {
        "sin/cos pairing test shape"
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let p = soln.make_grid("p", &[("t", T), ("x", D)])?;
        let u = soln.make_read(p, &pt(&[("t", 0), ("x", 0)]))?;
        let sin = soln.make_call("sin", vec![u]);
        let cos = soln.make_call("cos", vec![u]);
        let value = soln.make_add(vec![sin, cos]);
        soln.make_write(p, &pt(&[("t", 1), ("x", 0)]), value, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// `test_scratch`: a two-stage pipeline through a scratch grid. The
/// second stage reads the scratch at offset, so bundling the two
/// stages together requires a scratch-halo enlargement.
pub struct TestScratchStencil;

impl StencilDef for TestScratchStencil {
    fn name(&self) -> &str {
        "test_scratch"
    }

    fn description(&self) -> &str {
        "two-stage scratch-grid pipeline"
    }

    fn define(&self, soln: &mut Solution) -> Result<()> {
        let p = soln.make_grid("p", &[("t", T), ("x", D), ("y", D)])?;
        let s = soln.make_scratch_grid("smooth", &[("x", D), ("y", D)])?;

        let left = soln.make_read(p, &pt(&[("t", 0), ("x", -1), ("y", 0)]))?;
        let right = soln.make_read(p, &pt(&[("t", 0), ("x", 1), ("y", 0)]))?;
        let half = soln.make_const(0.5);
        let pair = soln.make_add(vec![left, right]);
        let stage1 = soln.make_mul(vec![half, pair]);
        soln.make_write(s, &pt(&[("x", 0), ("y", 0)]), stage1, None)?;

        let mut terms = Vec::new();
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            terms.push(soln.make_read(s, &pt(&[("x", dx), ("y", dy)]))?);
        }
        let quarter = soln.make_const(0.25);
        let sum = soln.make_add(terms);
        let stage2 = soln.make_mul(vec![quarter, sum]);
        soln.make_write(p, &pt(&[("t", 1), ("x", 0), ("y", 0)]), stage2, None)?;
        Ok(())
    }
}
