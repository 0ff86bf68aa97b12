//! Equation bundling.
//!
//! Bundles group equations that are mutually independent within one
//! step, so a runtime may evaluate every point of a bundle before
//! moving to the next bundle. Bundle assignment is greedy first-fit
//! over the same-step conflict graph; the final bundle order is a
//! deterministic topological sort of inter-bundle edges.

use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use crate::deps::{Certainty, DepGraph};
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::solution::Solution;

/// A named, ordered collection of mutually independent equations.
/// `eqs` holds indices into the solution's equation list, in
/// declaration order.
#[derive(Debug, Clone)]
pub struct EqBundle {
    pub name: String,
    pub base: String,
    pub index: usize,
    pub eqs: Vec<usize>,
}

/// All bundles of a solution, in evaluation order.
#[derive(Debug, Default)]
pub struct BundleSet {
    pub bundles: Vec<EqBundle>,
}

impl BundleSet {
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Bundle position of an equation, if the equation survived
    /// filtering.
    pub fn bundle_of(&self, eq: usize) -> Option<usize> {
        self.bundles.iter().position(|b| b.eqs.contains(&eq))
    }
}

/// Partition the solution's equations into bundles.
///
/// Follows the documented algorithm: var-filter, base-name targeting,
/// greedy first-fit coloring, scratch-halo enlargement, topological
/// total order. With `find_deps=false` every equation gets its own
/// bundle in declaration order.
pub fn make_bundles(
    soln: &mut Solution,
    deps: &DepGraph,
    settings: &Settings,
) -> Result<BundleSet> {
    let var_re = Regex::new(&settings.var_regex)
        .map_err(|e| Error::BadOption(format!("invalid var regex '{}': {e}", settings.var_regex)))?;
    let targets = compile_targets(&settings.bundle_targets)?;

    // 1. Drop equations whose written grid does not match the filter.
    let kept: Vec<usize> = (0..soln.equations().len())
        .filter(|&i| {
            let grid = soln.equations()[i].grid;
            var_re.is_match(&soln.grid(grid).name)
        })
        .collect();

    // 2. Choose a base name per equation.
    let bases: IndexMap<usize, String> = kept
        .iter()
        .map(|&i| {
            let gname = soln.grid(soln.equations()[i].grid).name.clone();
            (i, base_name_for(&gname, &targets, &settings.bundle_basename))
        })
        .collect();

    // 3. Greedy first-fit coloring within each base-name class.
    let mut bundles: Vec<EqBundle> = Vec::new();
    let mut next_index: IndexMap<String, usize> = IndexMap::new();
    for &eq in &kept {
        let base = &bases[&eq];
        let mut placed = false;
        if settings.find_deps {
            for bundle in bundles.iter_mut().filter(|b| &b.base == base) {
                let mut enlargements = Vec::new();
                if fits(soln, deps, settings, eq, &bundle.eqs, &mut enlargements) {
                    for (grid, reach) in enlargements {
                        debug!(
                            grid = %soln.grid(grid).name,
                            "enlarging scratch halo for bundling"
                        );
                        soln.enlarge_scratch_halo(grid, &reach);
                    }
                    bundle.eqs.push(eq);
                    placed = true;
                    break;
                }
            }
        }
        if !placed {
            let index = *next_index
                .entry(base.clone())
                .and_modify(|i| *i += 1)
                .or_insert(0);
            bundles.push(EqBundle {
                name: format!("{base}_{index}"),
                base: base.clone(),
                index,
                eqs: vec![eq],
            });
        }
    }

    // 4. Topological total order over inter-bundle edges.
    let ordered = topo_order(&bundles, deps)?;
    debug!(bundles = ordered.len(), "equation bundling complete");
    Ok(BundleSet { bundles: ordered })
}

/// Can `eq` join a bundle already holding `members`? Fills
/// `enlargements` with scratch-halo growth the placement requires.
fn fits(
    soln: &Solution,
    deps: &DepGraph,
    settings: &Settings,
    eq: usize,
    members: &[usize],
    enlargements: &mut Vec<(crate::node::GridId, gridfold_foundation::DimTuple)>,
) -> bool {
    for &m in members {
        for edge in deps.conflicts(eq, m) {
            let scratch = soln.grid(edge.grid).scratch;
            let tolerable =
                settings.bundle_scratch && scratch && edge.certainty == Certainty::Possible;
            if !tolerable {
                return false;
            }
            enlargements.push((edge.grid, edge.reach.clone()));
        }
    }
    true
}

fn compile_targets(targets: &[(String, String)]) -> Result<Vec<(String, Regex)>> {
    targets
        .iter()
        .map(|(template, pattern)| {
            if template.is_empty() {
                return Err(Error::UnknownBundleTarget(
                    pattern.clone(),
                    "empty bundle name template".to_string(),
                ));
            }
            let re = Regex::new(pattern)
                .map_err(|e| Error::UnknownBundleTarget(template.clone(), e.to_string()))?;
            Ok((template.clone(), re))
        })
        .collect()
}

/// First matching target wins; `$&` and `$1`… expand from the match.
fn base_name_for(grid_name: &str, targets: &[(String, Regex)], default_base: &str) -> String {
    for (template, re) in targets {
        if let Some(caps) = re.captures(grid_name) {
            // `$&` is the whole-match token in the original option
            // syntax; the regex crate spells it `${0}`.
            let template = template.replace("$&", "${0}");
            let mut expanded = String::new();
            caps.expand(&template, &mut expanded);
            return sanitize_base(&expanded);
        }
    }
    default_base.to_string()
}

/// Bundle names become identifiers in emitted code.
fn sanitize_base(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Kahn's algorithm over inter-bundle edges, surfacing cycles. Ready
/// bundles are taken in (base, index) order.
fn topo_order(bundles: &[EqBundle], deps: &DepGraph) -> Result<Vec<EqBundle>> {
    let bundle_of = |eq: usize| bundles.iter().position(|b| b.eqs.contains(&eq));

    // writer bundle -> reader bundle edges, deduplicated.
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); bundles.len()];
    let mut in_degree: Vec<usize> = vec![0; bundles.len()];
    for edge in &deps.edges {
        let (Some(wb), Some(rb)) = (bundle_of(edge.writer), bundle_of(edge.reader)) else {
            continue; // filtered out
        };
        if wb == rb {
            continue; // tolerated scratch placement
        }
        if !succs[wb].contains(&rb) {
            succs[wb].push(rb);
            in_degree[rb] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..bundles.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(bundles.len());
    while !ready.is_empty() {
        ready.sort_by(|&a, &b| {
            (&bundles[a].base, bundles[a].index).cmp(&(&bundles[b].base, bundles[b].index))
        });
        let next = ready.remove(0);
        ordered.push(bundles[next].clone());
        for &succ in &succs[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push(succ);
            }
        }
    }

    if ordered.len() != bundles.len() {
        let stuck: Vec<&str> = (0..bundles.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| bundles[i].name.as_str())
            .collect();
        return Err(Error::DependencyCycle(stuck.join(", ")));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DepGraph;
    use gridfold_foundation::{DimKind, DimTuple};

    fn dt(pairs: &[(&str, i64)]) -> DimTuple {
        DimTuple::from_pairs(pairs.iter().map(|&(n, v)| (n, v))).unwrap()
    }

    /// Four grids matched by `b[aeiou]r`, bundled by capture template.
    #[test]
    fn capture_group_templates_partition_by_match() {
        let mut s = Solution::new("t", "");
        let dims: &[(&str, DimKind)] = &[("t", DimKind::Step), ("x", DimKind::Domain)];
        for name in ["bar_x", "bar_y", "ber_x", "ber_y"] {
            let g = s.make_grid(name, dims).unwrap();
            let c = s.make_const(1.0);
            s.make_write(g, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        }
        s.freeze(&Settings::default()).unwrap();

        let settings = Settings {
            bundle_targets: vec![("g_$&".to_string(), "b[aeiou]r".to_string())],
            ..Settings::default()
        };
        let deps = DepGraph::analyze(&s);
        let set = make_bundles(&mut s, &deps, &settings).unwrap();

        let names: Vec<&str> = set.bundles.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["g_bar_0", "g_ber_0"]);
        assert_eq!(set.bundles[0].eqs.len(), 2);
        assert_eq!(set.bundles[1].eqs.len(), 2);
    }

    #[test]
    fn independent_writes_share_a_bundle() {
        let mut s = Solution::new("t", "");
        let g = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let c = s.make_const(1.0);
        s.make_write(g, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        let c2 = s.make_const(2.0);
        s.make_write(g, &dt(&[("t", 1), ("x", 1)]), c2, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let deps = DepGraph::analyze(&s);
        let set = make_bundles(&mut s, &deps, &Settings::default()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.bundles[0].eqs, [0, 1]);
    }

    #[test]
    fn no_find_deps_separates_in_declaration_order() {
        let mut s = Solution::new("t", "");
        let g = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let c = s.make_const(1.0);
        s.make_write(g, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        let c2 = s.make_const(2.0);
        s.make_write(g, &dt(&[("t", 1), ("x", 1)]), c2, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let settings = Settings {
            find_deps: false,
            ..Settings::default()
        };
        let deps = DepGraph::default();
        let set = make_bundles(&mut s, &deps, &settings).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.bundles[0].name, "stencil_0");
        assert_eq!(set.bundles[0].eqs, [0]);
        assert_eq!(set.bundles[1].name, "stencil_1");
        assert_eq!(set.bundles[1].eqs, [1]);
    }

    #[test]
    fn dependent_equations_split_and_order() {
        let mut s = Solution::new("t", "");
        let a = s
            .make_grid("a", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let b = s
            .make_grid("b", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        // Declare the reader first so topo order must reorder bundles.
        let ra = s.make_read(a, &dt(&[("t", 1), ("x", 1)])).unwrap();
        s.make_write(b, &dt(&[("t", 1), ("x", 0)]), ra, None).unwrap();
        let c = s.make_const(1.0);
        s.make_write(a, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let deps = DepGraph::analyze(&s);
        let set = make_bundles(&mut s, &deps, &Settings::default()).unwrap();
        assert_eq!(set.len(), 2);
        // The writer of 'a' must evaluate before the reader.
        assert_eq!(set.bundles[0].eqs, [1]);
        assert_eq!(set.bundles[1].eqs, [0]);
    }

    #[test]
    fn var_filter_drops_non_matching_grids() {
        let mut s = Solution::new("t", "");
        let dims: &[(&str, DimKind)] = &[("t", DimKind::Step), ("x", DimKind::Domain)];
        let keep = s.make_grid("pressure", dims).unwrap();
        let drop = s.make_grid("velocity", dims).unwrap();
        let c = s.make_const(1.0);
        s.make_write(keep, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        s.make_write(drop, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let settings = Settings {
            var_regex: "^press".to_string(),
            ..Settings::default()
        };
        let deps = DepGraph::analyze(&s);
        let set = make_bundles(&mut s, &deps, &settings).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.bundles[0].eqs, [0]);
    }

    #[test]
    fn scratch_bundling_enlarges_halo() {
        let mut s = Solution::new("t", "");
        let p = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let scratch = s.make_scratch_grid("sc", &[("x", DimKind::Domain)]).unwrap();
        let rp = s.make_read(p, &dt(&[("t", 0), ("x", 0)])).unwrap();
        s.make_write(scratch, &dt(&[("x", 0)]), rp, None).unwrap();
        let rs = s.make_read(scratch, &dt(&[("x", 2)])).unwrap();
        s.make_write(p, &dt(&[("t", 1), ("x", 0)]), rs, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        // Without scratch bundling: two bundles, writer first.
        let deps = DepGraph::analyze(&s);
        let set = make_bundles(&mut s, &deps, &Settings::default()).unwrap();
        assert_eq!(set.len(), 2);

        // With scratch bundling: one bundle, halo recorded.
        let settings = Settings {
            bundle_scratch: true,
            ..Settings::default()
        };
        let set = make_bundles(&mut s, &deps, &settings).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(s.grid(scratch).halo.get("x"), Some(2));
    }

    #[test]
    fn invalid_bundle_target_is_reported() {
        let mut s = Solution::new("t", "");
        let g = s
            .make_grid("p", &[("t", DimKind::Step), ("x", DimKind::Domain)])
            .unwrap();
        let c = s.make_const(1.0);
        s.make_write(g, &dt(&[("t", 1), ("x", 0)]), c, None).unwrap();
        s.freeze(&Settings::default()).unwrap();

        let settings = Settings {
            bundle_targets: vec![("a".to_string(), "[".to_string())],
            ..Settings::default()
        };
        let deps = DepGraph::analyze(&s);
        let err = make_bundles(&mut s, &deps, &settings).unwrap_err();
        assert!(matches!(err, Error::UnknownBundleTarget(_, _)));
    }
}
