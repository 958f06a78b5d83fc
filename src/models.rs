use std::collections::BTreeMap;

use completegraph::{EdgeWeight, Overlay};
use serde::{Deserialize, Serialize};
use weightedmatch::SolverConfig;

/// What a defect ended up paired with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pairing {
    Defect(usize),
    /// Absorbed by this virtual vertex, the nearest one.
    Boundary(usize),
}

impl std::fmt::Display for Pairing {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Pairing::Defect(v) => write!(formatter, "{}", v),
            Pairing::Boundary(v) => write!(formatter, "B{}", v),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoding {
    /// Keyed by defect vertex.
    pub pairings: BTreeMap<usize, Pairing>,
    pub total_weight: u64,
}

impl Decoding {
    pub fn partner(&self, defect: usize) -> Option<Pairing> {
        self.pairings.get(&defect).copied()
    }

    pub fn boundary_count(&self) -> usize {
        self.pairings
            .values()
            .filter(|p| matches!(p, Pairing::Boundary(_)))
            .count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeRequest {
    pub defects: Vec<usize>,
    pub virtuals: Vec<usize>,
    pub erasures: Vec<(usize, usize)>,
    pub dynamic_weights: Vec<(usize, usize, EdgeWeight)>,
}

impl DecodeRequest {
    pub fn new(defects: Vec<usize>, virtuals: Vec<usize>) -> Self {
        DecodeRequest {
            defects,
            virtuals,
            ..Default::default()
        }
    }

    pub fn with_erasures(mut self, erasures: Vec<(usize, usize)>) -> Self {
        self.erasures = erasures;
        self
    }

    pub fn with_dynamic_weights(mut self, weights: Vec<(usize, usize, EdgeWeight)>) -> Self {
        self.dynamic_weights = weights;
        self
    }

    pub fn overlay(&self) -> Overlay {
        Overlay {
            erasures: self.erasures.clone(),
            dynamic_weights: self.dynamic_weights.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub solver: SolverConfig,
}
