//! Pairs up defect vertices of a skeleton graph at minimum total path
//! weight, letting defects be absorbed by virtual boundary vertices.
//!
//! A decode call loads the request's weight overlay, computes shortest
//! paths from every defect, builds a perfect matching instance in which
//! every defect has a private boundary twin, solves it exactly with
//! [`weightedmatch::MatchingEngine`] and maps the matching back onto the
//! defects. The overlay is always reverted before returning.

use thiserror::Error;

pub use completegraph::{CompleteGraph, EdgeWeight, GraphError, Overlay};
pub use weightedmatch::{MatchError, SolverConfig};

mod boundary;
mod decode;
mod mapping;
pub mod models;

pub use decode::{solve_decoding, Decoder};
pub use models::{DecodeRequest, DecoderConfig, Decoding, Pairing};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("virtual vertex {0} declared twice")]
    DuplicateVirtual(usize),
    #[error("defect vertex {0} declared twice")]
    DuplicateDefect(usize),
    #[error("vertex {0} is both a defect and a virtual vertex")]
    DefectIsVirtual(usize),
    #[error("skeleton graph has no vertices")]
    EmptyGraph,
    #[error("path weight {weight} exceeds the safe bound {bound}")]
    WeightOverflow { weight: u64, bound: u64 },
    #[error("{count} mutually reachable defects around vertex {defect} reach no boundary")]
    Unsolvable { defect: usize, count: usize },
    #[error("internal inconsistency: {0}")]
    Inconsistency(&'static str),
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something wrong; nothing was changed.
    InvalidInput,
    /// The defects cannot all be paired or absorbed.
    Unsolvable,
    InternalInvariantViolation,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Graph(GraphError::JournalNotEmpty(_)) => ErrorKind::InternalInvariantViolation,
            Error::Graph(_) => ErrorKind::InvalidInput,
            Error::Match(MatchError::OddVertexCount(_)) => ErrorKind::Unsolvable,
            Error::Match(e) if e.is_invalid_input() => ErrorKind::InvalidInput,
            Error::Match(_) => ErrorKind::InternalInvariantViolation,
            Error::DuplicateVirtual(_)
            | Error::DuplicateDefect(_)
            | Error::DefectIsVirtual(_)
            | Error::EmptyGraph
            | Error::WeightOverflow { .. } => ErrorKind::InvalidInput,
            Error::Unsolvable { .. } => ErrorKind::Unsolvable,
            Error::Inconsistency(_) => ErrorKind::InternalInvariantViolation,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            Error::from(GraphError::SelfLoop(3)).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            Error::from(GraphError::JournalNotEmpty(2)).kind(),
            ErrorKind::InternalInvariantViolation
        );
        assert_eq!(
            Error::from(MatchError::OddVertexCount(5)).kind(),
            ErrorKind::Unsolvable
        );
        assert_eq!(
            Error::from(MatchError::Stalled { unmatched: 2 }).kind(),
            ErrorKind::InternalInvariantViolation
        );
        assert_eq!(Error::from(MatchError::Frozen).kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::DefectIsVirtual(1).kind(), ErrorKind::InvalidInput);
        assert_eq!(
            Error::Unsolvable { defect: 0, count: 1 }.kind(),
            ErrorKind::Unsolvable
        );
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            Error::from(GraphError::UnknownEdge(1, 4)).to_string(),
            "no edge (1, 4) in the skeleton"
        );
        assert_eq!(
            Error::DuplicateDefect(7).to_string(),
            "defect vertex 7 declared twice"
        );
    }
}
