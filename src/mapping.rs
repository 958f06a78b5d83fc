use std::collections::BTreeMap;
use std::convert::TryFrom;

use crate::boundary::Expansion;
use crate::models::{Decoding, Pairing};
use crate::{Error, Result};

/// Reads the solved engine back in terms of the defect vertices.
pub(crate) fn map_result(expansion: &Expansion, defects: &[usize]) -> Result<Decoding> {
    let d = expansion.defect_count;
    let mut pairings = BTreeMap::new();
    for (i, &defect) in defects.iter().enumerate() {
        let m = expansion
            .engine
            .get_match(i)
            .ok_or(Error::Inconsistency("defect left unmatched"))?;
        let pairing = if m < d && m != i {
            Pairing::Defect(defects[m])
        } else if m == i + d {
            let (virtual_vertex, _) = expansion.boundary[i]
                .ok_or(Error::Inconsistency("absorbed defect has no boundary"))?;
            Pairing::Boundary(virtual_vertex)
        } else {
            return Err(Error::Inconsistency("defect matched to a foreign twin"));
        };
        pairings.insert(defect, pairing);
    }
    let total_weight = u64::try_from(expansion.engine.compute_perfect_matching_cost())
        .map_err(|_| Error::Inconsistency("negative decoding weight"))?;
    Ok(Decoding {
        pairings,
        total_weight,
    })
}
