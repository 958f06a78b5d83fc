use completegraph::CompleteGraph;
use log::debug;

use crate::boundary::{check_request, expand};
use crate::mapping::map_result;
use crate::models::{DecodeRequest, DecoderConfig, Decoding};
use crate::Result;

/// Pairs every defect of `request` with another defect or with its nearest
/// virtual vertex, at minimum total shortest-path weight.
///
/// The request's erasures and dynamic weights are applied for this call
/// only; `graph` carries its original weights again when this returns,
/// whether it succeeds or not.
pub fn solve_decoding(
    graph: &mut CompleteGraph,
    request: &DecodeRequest,
    config: &DecoderConfig,
) -> Result<Decoding> {
    check_request(graph, &request.defects, &request.virtuals)?;
    let overlay = request.overlay();
    graph.check_overlay(&overlay)?;
    if request.defects.is_empty() {
        return Ok(Decoding::default());
    }
    graph.load_overlay(&overlay)?;
    let result = decode_loaded(graph, request, config);
    graph.reset();
    result
}

fn decode_loaded(
    graph: &mut CompleteGraph,
    request: &DecodeRequest,
    config: &DecoderConfig,
) -> Result<Decoding> {
    let mut expansion = expand(graph, &request.defects, &request.virtuals, config.solver)?;
    expansion.engine.solve()?;
    let decoding = map_result(&expansion, &request.defects)?;
    debug!(
        "decoded {} defects, {} absorbed, weight {}",
        request.defects.len(),
        decoding.boundary_count(),
        decoding.total_weight
    );
    Ok(decoding)
}

/// A skeleton graph kept across decode calls.
#[derive(Debug)]
pub struct Decoder {
    graph: CompleteGraph,
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(graph: CompleteGraph, config: DecoderConfig) -> Self {
        Decoder { graph, config }
    }

    pub fn graph(&self) -> &CompleteGraph {
        &self.graph
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn decode(&mut self, request: &DecodeRequest) -> Result<Decoding> {
        solve_decoding(&mut self.graph, request, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pairing;
    use crate::{Error, ErrorKind};
    use completegraph::{EdgeWeight, GraphError};
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use weightedmatch::SolverConfig;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn checked() -> DecoderConfig {
        DecoderConfig {
            solver: SolverConfig {
                verify_optimum: true,
                check_delta: true,
            },
        }
    }

    fn triangle_with_boundary() -> CompleteGraph {
        // Defects 0, 1, 2; virtual vertex 3.
        CompleteGraph::new(
            4,
            vec![
                (0, 3, 10),
                (1, 3, 20),
                (2, 3, 30),
                (0, 1, 25),
                (1, 2, 12),
                (0, 2, 50),
            ],
        )
        .unwrap()
    }

    /// Cheapest way to pair or absorb every defect, by enumeration.
    fn brute_force(pair: &[Vec<Option<u64>>], absorb: &[Option<u64>]) -> Option<u64> {
        fn rec(rest: &[usize], pair: &[Vec<Option<u64>>], absorb: &[Option<u64>]) -> Option<u64> {
            let (&a, others) = match rest.split_first() {
                None => return Some(0),
                Some(x) => x,
            };
            let mut best = absorb[a].and_then(|w| rec(others, pair, absorb).map(|s| s + w));
            for (idx, &b) in others.iter().enumerate() {
                if let Some(w) = pair[a][b] {
                    let mut remaining = others.to_vec();
                    remaining.remove(idx);
                    if let Some(s) = rec(&remaining, pair, absorb) {
                        best = Some(best.map_or(w + s, |x: u64| x.min(w + s)));
                    }
                }
            }
            best
        }
        let all: Vec<usize> = (0..absorb.len()).collect();
        rec(&all, pair, absorb)
    }

    #[test]
    fn decode_0() {
        init();
        let mut graph = triangle_with_boundary();
        let request = DecodeRequest::new(vec![0, 1, 2], vec![3]);
        let decoding = solve_decoding(&mut graph, &request, &checked()).unwrap();
        assert_eq!(decoding.partner(0), Some(Pairing::Boundary(3)));
        assert_eq!(decoding.partner(1), Some(Pairing::Defect(2)));
        assert_eq!(decoding.partner(2), Some(Pairing::Defect(1)));
        assert_eq!(decoding.total_weight, 22);
    }

    #[test]
    fn decode_empty() {
        let mut graph = triangle_with_boundary();
        let decoding =
            solve_decoding(&mut graph, &DecodeRequest::new(vec![], vec![3]), &checked()).unwrap();
        assert!(decoding.pairings.is_empty());
        assert_eq!(decoding.total_weight, 0);
    }

    #[test]
    fn decode_error_0() {
        let mut graph = triangle_with_boundary();
        let r = solve_decoding(&mut graph, &DecodeRequest::new(vec![0], vec![]), &checked());
        assert_eq!(r, Err(Error::Unsolvable { defect: 0, count: 1 }));
        assert_eq!(r.unwrap_err().kind(), ErrorKind::Unsolvable);
    }

    #[test]
    fn decode_error_1() {
        let mut graph = triangle_with_boundary();
        let request = DecodeRequest::new(vec![0, 1], vec![3]).with_erasures(vec![(0, 2), (1, 9)]);
        let err = solve_decoding(&mut graph, &request, &checked()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(graph.journal_len(), 0);
        assert_eq!(graph.weight(0, 2), Some(50));
    }

    #[test]
    fn decode_error_2() {
        let mut graph = triangle_with_boundary();
        graph.load_erasures(&[(0, 1)]).unwrap();
        let err = solve_decoding(&mut graph, &DecodeRequest::new(vec![0, 1], vec![]), &checked())
            .unwrap_err();
        assert_eq!(err, Error::Graph(GraphError::JournalNotEmpty(1)));
        assert_eq!(err.kind(), ErrorKind::InternalInvariantViolation);
        assert_eq!(graph.journal_len(), 1);
    }

    #[test]
    fn decode_error_3() {
        let mut graph = triangle_with_boundary();
        let request = DecodeRequest::new(vec![], vec![3]).with_erasures(vec![(0, 99), (1, 2)]);
        let err = solve_decoding(&mut graph, &request, &checked()).unwrap_err();
        assert_eq!(
            err,
            Error::Graph(GraphError::VertexOutOfRange {
                vertex: 99,
                vertex_count: 4
            })
        );
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let request =
            DecodeRequest::new(vec![], vec![]).with_dynamic_weights(vec![(0, 1, 3), (1, 0, 4)]);
        assert!(solve_decoding(&mut graph, &request, &checked()).is_ok());
        let request = DecodeRequest::new(vec![], vec![]).with_dynamic_weights(vec![(0, 1, 3)]);
        let request = request.with_erasures(vec![(3, 3)]);
        assert_eq!(
            solve_decoding(&mut graph, &request, &checked()),
            Err(Error::Graph(GraphError::UnknownEdge(3, 3)))
        );
        assert_eq!(graph.journal_len(), 0);
    }

    #[test]
    fn overlay_reverted_on_failure() {
        let mut graph = CompleteGraph::new(3, vec![(0, 1, u32::MAX), (1, 2, 1)]).unwrap();
        let request = DecodeRequest::new(vec![0, 1], vec![]).with_dynamic_weights(vec![(1, 2, 7)]);
        let err = solve_decoding(&mut graph, &request, &checked()).unwrap_err();
        assert!(matches!(err, Error::WeightOverflow { .. }));
        assert_eq!(graph.journal_len(), 0);
        assert_eq!(graph.weight(1, 2), Some(1));
    }

    #[test]
    fn overlay_changes_outcome() {
        init();
        // 0 - 1 - 2 - 3 with virtual ends.
        let graph = CompleteGraph::new(4, vec![(0, 1, 5), (1, 2, 100), (2, 3, 5)]).unwrap();
        let mut decoder = Decoder::new(graph, checked());
        let plain = DecodeRequest::new(vec![1, 2], vec![0, 3]);

        let d = decoder.decode(&plain).unwrap();
        assert_eq!(d.partner(1), Some(Pairing::Boundary(0)));
        assert_eq!(d.partner(2), Some(Pairing::Boundary(3)));
        assert_eq!(d.total_weight, 10);

        let erased = plain.clone().with_erasures(vec![(2, 1)]);
        let d = decoder.decode(&erased).unwrap();
        assert_eq!(d.partner(1), Some(Pairing::Defect(2)));
        assert_eq!(d.total_weight, 0);

        let reweighted = plain
            .clone()
            .with_dynamic_weights(vec![(0, 1, 200), (2, 3, 200)]);
        let d = decoder.decode(&reweighted).unwrap();
        assert_eq!(d.partner(2), Some(Pairing::Defect(1)));
        assert_eq!(d.total_weight, 100);

        assert_eq!(decoder.decode(&plain).unwrap().total_weight, 10);
        assert_eq!(decoder.graph().weight(1, 2), Some(100));
        assert_eq!(decoder.graph().journal_len(), 0);
    }

    #[test]
    fn separate_components() {
        // Two islands: {0, 1, 2} with virtual 2, and {3, 4}.
        let mut graph = CompleteGraph::new(5, vec![(0, 1, 3), (1, 2, 1), (3, 4, 6)]).unwrap();
        let request = DecodeRequest::new(vec![0, 1, 3, 4], vec![2]);
        let d = solve_decoding(&mut graph, &request, &checked()).unwrap();
        assert_eq!(d.partner(3), Some(Pairing::Defect(4)));
        assert_eq!(d.partner(0), Some(Pairing::Defect(1)));
        assert_eq!(d.total_weight, 9);
        let request = DecodeRequest::new(vec![0, 3, 4], vec![2]);
        let d = solve_decoding(&mut graph, &request, &checked()).unwrap();
        assert_eq!(d.partner(0), Some(Pairing::Boundary(2)));
        assert_eq!(d.total_weight, 10);
    }

    #[test]
    fn random_against_brute_force() {
        init();
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let mut solved = 0;
        for _ in 0..150 {
            let n = rng.gen_range(4..=14);
            let mut edges = Vec::new();
            for a in 0..n {
                for b in a + 1..n {
                    if rng.gen_bool(0.3) {
                        edges.push((a, b, rng.gen_range(1..=20) as EdgeWeight));
                    }
                }
            }
            let mut graph = CompleteGraph::new(n, edges).unwrap();
            let mut vertices: Vec<usize> = (0..n).collect();
            vertices.shuffle(&mut rng);
            let d = rng.gen_range(1..=8.min(n - 1));
            let v = rng.gen_range(0..=2.min(n - d));
            let defects = vertices[..d].to_vec();
            let virtuals = vertices[d..d + v].to_vec();

            let trees: Vec<_> = defects.iter().map(|&s| graph.all_edges(s).unwrap()).collect();
            let pair: Vec<Vec<Option<u64>>> = trees
                .iter()
                .map(|t| defects.iter().map(|x| t.get(x).map(|r| r.distance)).collect())
                .collect();
            let absorb: Vec<Option<u64>> = trees
                .iter()
                .map(|t| virtuals.iter().filter_map(|x| t.get(x).map(|r| r.distance)).min())
                .collect();
            let expected = brute_force(&pair, &absorb);

            let request = DecodeRequest::new(defects.clone(), virtuals);
            match (solve_decoding(&mut graph, &request, &checked()), expected) {
                (Ok(decoding), Some(weight)) => {
                    assert_eq!(decoding.total_weight, weight);
                    assert_eq!(decoding.pairings.len(), d);
                    for (&defect, &pairing) in &decoding.pairings {
                        if let Pairing::Defect(other) = pairing {
                            assert_ne!(other, defect);
                            assert_eq!(decoding.partner(other), Some(Pairing::Defect(defect)));
                        }
                    }
                    solved += 1;
                }
                (Err(err), None) => assert_eq!(err.kind(), ErrorKind::Unsolvable),
                (result, expected) => panic!("{:?} vs {:?}", result, expected),
            }
        }
        assert!(solved > 30);
    }
}
