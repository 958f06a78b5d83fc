//! Matching instance over the defects and their boundary twins.
use std::collections::{BTreeMap, BTreeSet};

use completegraph::{CompleteGraph, Distance, Reach};
use log::trace;
use weightedmatch::{MatchingEngine, SolverConfig, Weight};

use crate::{Error, Result};

/// For `d` defects, engine vertex `i < d` is `defects[i]` and vertex
/// `i + d` is its boundary twin.
#[derive(Debug)]
pub(crate) struct Expansion {
    pub defect_count: usize,
    /// Nearest virtual vertex of each defect, with its distance.
    pub boundary: Vec<Option<(usize, Distance)>>,
    pub engine: MatchingEngine,
}

/// Rejects malformed requests before anything is loaded or searched.
pub(crate) fn check_request(
    graph: &CompleteGraph,
    defects: &[usize],
    virtuals: &[usize],
) -> Result<()> {
    if graph.vertex_count() == 0 {
        return Err(Error::EmptyGraph);
    }
    let mut seen_virtuals = BTreeSet::new();
    for &v in virtuals {
        graph.check_vertex(v)?;
        if !seen_virtuals.insert(v) {
            return Err(Error::DuplicateVirtual(v));
        }
    }
    let mut seen_defects = BTreeSet::new();
    for &v in defects {
        graph.check_vertex(v)?;
        if seen_virtuals.contains(&v) {
            return Err(Error::DefectIsVirtual(v));
        }
        if !seen_defects.insert(v) {
            return Err(Error::DuplicateDefect(v));
        }
    }
    Ok(())
}

/// Fails when some group of mutually reachable defects has odd size and no
/// way to a boundary.
fn check_solvable(
    trees: &[BTreeMap<usize, Reach>],
    defects: &[usize],
    boundary: &[Option<(usize, Distance)>],
) -> Result<()> {
    for (i, tree) in trees.iter().enumerate() {
        let members: Vec<usize> = (0..defects.len())
            .filter(|&j| tree.contains_key(&defects[j]))
            .collect();
        if members.first() != Some(&i) {
            continue;
        }
        if members.len() % 2 == 1 && members.iter().all(|&j| boundary[j].is_none()) {
            return Err(Error::Unsolvable {
                defect: defects[i],
                count: members.len(),
            });
        }
    }
    Ok(())
}

pub(crate) fn expand(
    graph: &mut CompleteGraph,
    defects: &[usize],
    virtuals: &[usize],
    config: SolverConfig,
) -> Result<Expansion> {
    let d = defects.len();
    let trees = defects
        .iter()
        .map(|&v| graph.all_edges(v))
        .collect::<completegraph::Result<Vec<_>>>()?;
    let boundary = defects
        .iter()
        .map(|&v| graph.nearest(v, virtuals))
        .collect::<completegraph::Result<Vec<_>>>()?;
    check_solvable(&trees, defects, &boundary)?;

    let vertex_count = 2 * d;
    let bound = Weight::MAX as u64 / vertex_count.max(1) as u64;
    let weight = |distance: Distance| -> Result<Weight> {
        if distance > bound {
            Err(Error::WeightOverflow {
                weight: distance,
                bound,
            })
        } else {
            Ok(distance as Weight)
        }
    };

    let pair_count = d * d.saturating_sub(1) / 2;
    let mut engine = MatchingEngine::with_config(vertex_count, d + 2 * pair_count, config);
    for i in 0..d {
        if let Some((_, distance)) = boundary[i] {
            engine.add_edge(i, i + d, weight(distance)?)?;
        }
        for j in i + 1..d {
            if let Some(reach) = trees[i].get(&defects[j]) {
                engine.add_edge(i, j, weight(reach.distance)?)?;
            }
            // Twins left over pair up for free.
            engine.add_edge(i + d, j + d, 0)?;
        }
    }
    trace!(
        "expanded {} defects into {} vertices, {} edges",
        d,
        vertex_count,
        engine.edge_count()
    );

    Ok(Expansion {
        defect_count: d,
        boundary,
        engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> CompleteGraph {
        // 0 - 1 - 2 - 3   4 - 5
        CompleteGraph::new(6, vec![(0, 1, 4), (1, 2, 6), (2, 3, 3), (4, 5, 1)]).unwrap()
    }

    #[test]
    fn request_checks() {
        let graph = line();
        assert_eq!(check_request(&graph, &[1, 2], &[0]), Ok(()));
        assert_eq!(
            check_request(&graph, &[1, 1], &[0]),
            Err(Error::DuplicateDefect(1))
        );
        assert_eq!(
            check_request(&graph, &[1], &[0, 0]),
            Err(Error::DuplicateVirtual(0))
        );
        assert_eq!(
            check_request(&graph, &[0], &[0]),
            Err(Error::DefectIsVirtual(0))
        );
        assert!(matches!(
            check_request(&graph, &[9], &[]),
            Err(Error::Graph(_))
        ));
        let empty = CompleteGraph::new(0, vec![]).unwrap();
        assert_eq!(check_request(&empty, &[], &[]), Err(Error::EmptyGraph));
    }

    #[test]
    fn instance_layout() {
        let mut graph = line();
        let e = expand(&mut graph, &[1, 2], &[0, 3], SolverConfig::default()).unwrap();
        assert_eq!(e.defect_count, 2);
        assert_eq!(e.boundary, vec![Some((0, 4)), Some((3, 3))]);
        let edges: Vec<(usize, usize, Weight)> = (0..e.engine.edge_count())
            .filter_map(|k| e.engine.edge(k))
            .map(|m| (m.u, m.v, m.cost))
            .collect();
        assert_eq!(edges, vec![(0, 2, 4), (0, 1, 6), (2, 3, 0), (1, 3, 3)]);
        assert_eq!(e.engine.vertex_count(), 4);
    }

    #[test]
    fn boundary_tie() {
        // 1 - 0 - 2, both arms of weight 2.
        let mut graph = CompleteGraph::new(4, vec![(0, 1, 2), (0, 2, 2), (2, 3, 5)]).unwrap();
        let e = expand(&mut graph, &[0, 3], &[2, 1], SolverConfig::default()).unwrap();
        assert_eq!(e.boundary, vec![Some((1, 2)), Some((2, 5))]);
        let e = expand(&mut graph, &[0, 3], &[], SolverConfig::default()).unwrap();
        assert_eq!(e.boundary, vec![None, None]);
    }

    #[test]
    fn odd_group_without_boundary() {
        let mut graph = line();
        let err = expand(&mut graph, &[1, 2, 4], &[], SolverConfig::default()).unwrap_err();
        assert_eq!(err, Error::Unsolvable { defect: 4, count: 1 });
        assert!(expand(&mut graph, &[4, 5], &[], SolverConfig::default()).is_ok());
    }

    #[test]
    fn weight_bound() {
        let mut graph = CompleteGraph::new(2, vec![(0, 1, u32::MAX)]).unwrap();
        let err = expand(&mut graph, &[0, 1], &[], SolverConfig::default()).unwrap_err();
        assert_eq!(
            err,
            Error::WeightOverflow {
                weight: u64::from(u32::MAX),
                bound: Weight::MAX as u64 / 4
            }
        );
    }
}
