//! Dimension names and ordered integer tuples.
//!
//! Everything positional in the compiler is expressed through [`DimTuple`]:
//! grid shapes, halo sizes, vector folds, cluster multiplicities, and
//! point offsets. A tuple is an *ordered* sequence of `(dimension, i64)`
//! pairs in which each dimension appears at most once. Order is
//! significant: the last domain dimension in a tuple is the unit-stride
//! dimension of the layouts derived from it.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

/// Role of a dimension within a solution.
///
/// A solution has at most one `Step` dimension (the time-like axis).
/// `Domain` dimensions are traversed within a step; `Misc` dimensions are
/// enumerative axes (e.g. a material index) never traversed in inner loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimKind {
    Step,
    Domain,
    Misc,
}

impl fmt::Display for DimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimKind::Step => write!(f, "step"),
            DimKind::Domain => write!(f, "domain"),
            DimKind::Misc => write!(f, "misc"),
        }
    }
}

/// Errors from tuple construction and lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DimError {
    /// A dimension was added twice to the same tuple.
    #[error("dimension '{0}' already present in tuple")]
    Duplicate(String),

    /// A dimension was referenced that the tuple does not carry.
    #[error("dimension '{0}' not present in tuple")]
    Unknown(String),
}

/// An ordered sequence of `(dimension, i64)` pairs, each dimension unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimTuple {
    entries: IndexMap<String, i64>,
}

impl DimTuple {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tuple from `(name, value)` pairs. Fails on duplicates.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, DimError>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut t = Self::new();
        for (name, val) in pairs {
            t.push(name, val)?;
        }
        Ok(t)
    }

    /// Append a dimension at the end of the order.
    pub fn push(&mut self, name: impl Into<String>, val: i64) -> Result<(), DimError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(DimError::Duplicate(name));
        }
        self.entries.insert(name, val);
        Ok(())
    }

    /// Overwrite the value of an existing dimension, or append it.
    pub fn set(&mut self, name: impl Into<String>, val: i64) {
        self.entries.insert(name.into(), val);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimension names in tuple order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(name, value)` pairs in tuple order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Last dimension in the order, if any. For a tuple of domain
    /// dimensions this is the unit-stride dimension.
    pub fn last(&self) -> Option<(&str, i64)> {
        self.entries.iter().last().map(|(k, v)| (k.as_str(), *v))
    }

    /// Product of all values. The product of a fold tuple is its lane count.
    pub fn product(&self) -> i64 {
        self.entries.values().product()
    }

    /// Element-wise sum over the union of dimensions. Order follows
    /// `self`, with dimensions only in `other` appended in `other`'s order.
    pub fn add(&self, other: &DimTuple) -> DimTuple {
        let mut out = self.clone();
        for (name, val) in other.iter() {
            let cur = out.get(name).unwrap_or(0);
            out.set(name, cur + val);
        }
        out
    }

    /// Element-wise multiply of matching dimensions; dimensions missing
    /// from `other` keep their value.
    pub fn scale_by(&self, other: &DimTuple) -> DimTuple {
        let mut out = self.clone();
        for (name, val) in other.iter() {
            if let Some(cur) = out.get(name) {
                out.set(name, cur * val);
            }
        }
        out
    }

    /// Keep only the dimensions `keep` returns true for, preserving order.
    pub fn filtered(&self, mut keep: impl FnMut(&str) -> bool) -> DimTuple {
        let mut out = DimTuple::new();
        for (name, val) in self.iter() {
            if keep(name) {
                out.set(name, val);
            }
        }
        out
    }

    /// Render an offset suffix for one dimension: `x`, `x+1`, or `x-2`.
    pub fn offset_term(name: &str, val: i64) -> String {
        match val {
            0 => name.to_string(),
            v if v > 0 => format!("{name}+{v}"),
            v => format!("{name}{v}"),
        }
    }
}

impl fmt::Display for DimTuple {
    /// Renders as `x=4, y=2` in tuple order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, val) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={val}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_duplicates() {
        let mut t = DimTuple::new();
        t.push("x", 4).unwrap();
        assert_eq!(t.push("x", 8), Err(DimError::Duplicate("x".into())));
        assert_eq!(t.get("x"), Some(4));
    }

    #[test]
    fn order_is_preserved() {
        let t = DimTuple::from_pairs([("z", 1), ("y", 2), ("x", 4)]).unwrap();
        let names: Vec<_> = t.names().collect();
        assert_eq!(names, ["z", "y", "x"]);
        assert_eq!(t.last(), Some(("x", 4)));
    }

    #[test]
    fn product_of_fold_lengths() {
        let t = DimTuple::from_pairs([("x", 4), ("y", 2)]).unwrap();
        assert_eq!(t.product(), 8);
        assert_eq!(DimTuple::new().product(), 1);
    }

    #[test]
    fn add_unions_dimensions() {
        let a = DimTuple::from_pairs([("t", 1), ("x", 2)]).unwrap();
        let b = DimTuple::from_pairs([("x", -1), ("y", 3)]).unwrap();
        let sum = a.add(&b);
        assert_eq!(sum.get("t"), Some(1));
        assert_eq!(sum.get("x"), Some(1));
        assert_eq!(sum.get("y"), Some(3));
        let names: Vec<_> = sum.names().collect();
        assert_eq!(names, ["t", "x", "y"]);
    }

    #[test]
    fn offset_terms() {
        assert_eq!(DimTuple::offset_term("x", 0), "x");
        assert_eq!(DimTuple::offset_term("x", 2), "x+2");
        assert_eq!(DimTuple::offset_term("y", -1), "y-1");
    }

    #[test]
    fn display_in_order() {
        let t = DimTuple::from_pairs([("x", 4), ("y", 2)]).unwrap();
        assert_eq!(t.to_string(), "x=4, y=2");
    }
}
