//! Gridfold Stencils
//!
//! The embedded-DSL surface: stencil definitions populate a solution
//! through the IR factory, and a process-wide registry maps solution
//! names to definitions. The registry is built explicitly at startup
//! (no global constructors) and read-only afterwards.

mod solutions;

use indexmap::IndexMap;

use gridfold_ir::{Error, Result, Solution};

pub use solutions::{
    AwpStencil, AxisStencil, CubeStencil, Iso3dfdStencil, NineAxisStencil, TestFuncStencil,
    TestScratchStencil,
};

/// One registered stencil solution.
///
/// Implementations describe themselves and populate a [`Solution`]
/// through the factory surface when asked. Radius-parameterized
/// stencils additionally accept a radius before definition.
pub trait StencilDef {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Current radius for radius-parameterized stencils.
    fn radius(&self) -> Option<u32> {
        None
    }

    /// Apply a radius; returns false when this stencil is not
    /// radius-parameterized or the value is out of range.
    fn set_radius(&mut self, _radius: u32) -> bool {
        false
    }

    /// Create equations and grids on an empty solution.
    fn define(&self, soln: &mut Solution) -> Result<()>;
}

/// Name-keyed table of stencil definitions, populated once at startup.
#[derive(Default)]
pub struct StencilRegistry {
    table: IndexMap<String, Box<dyn StencilDef>>,
}

impl StencilRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: Box<dyn StencilDef>) -> Result<()> {
        let name = def.name().to_string();
        if self.table.contains_key(&name) {
            return Err(Error::NameConflict(format!(
                "stencil '{name}' already registered"
            )));
        }
        self.table.insert(name, def);
        Ok(())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn StencilDef + 'static)> {
        self.table.get_mut(name).map(|b| &mut **b)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn StencilDef> {
        self.table.values().map(|b| &**b)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Define the named stencil into a fresh solution.
    pub fn define(&mut self, name: &str) -> Option<Result<Solution>> {
        let def = self.get_mut(name)?;
        let mut soln = Solution::new(def.name(), def.description());
        Some(def.define(&mut soln).map(|()| soln))
    }
}

/// The built-in solution set, registered in a fixed order.
pub fn builtin_registry() -> StencilRegistry {
    let mut reg = StencilRegistry::new();
    let defs: Vec<Box<dyn StencilDef>> = vec![
        Box::new(AxisStencil::new()),
        Box::new(NineAxisStencil::new()),
        Box::new(CubeStencil::new()),
        Box::new(Iso3dfdStencil::new()),
        Box::new(AwpStencil),
        Box::new(TestFuncStencil),
        Box::new(TestScratchStencil),
    ];
    for def in defs {
        reg.register(def).expect("built-in names are distinct");
    }
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_and_define() {
        let mut reg = builtin_registry();
        let names: Vec<String> = reg.names().map(str::to_string).collect();
        assert!(names.contains(&"3axis".to_string()));
        assert!(names.contains(&"iso3dfd".to_string()));
        assert!(names.contains(&"test_scratch".to_string()));

        for name in names {
            let soln = reg
                .define(&name)
                .expect("registered")
                .expect("definition succeeds");
            assert!(!soln.equations().is_empty(), "{name} defines equations");
        }
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let mut reg = StencilRegistry::new();
        reg.register(Box::new(AxisStencil::new())).unwrap();
        let err = reg.register(Box::new(AxisStencil::new())).unwrap_err();
        assert!(matches!(err, Error::NameConflict(_)));
    }

    #[test]
    fn radius_applies_before_definition() {
        let mut reg = builtin_registry();
        let def = reg.get_mut("3axis").unwrap();
        assert_eq!(def.radius(), Some(2));
        assert!(def.set_radius(4));
        assert_eq!(def.radius(), Some(4));
        assert!(!def.set_radius(0));

        // The non-parameterized test stencils reject radii.
        let def = reg.get_mut("test_func").unwrap();
        assert!(!def.set_radius(3));
    }
}
