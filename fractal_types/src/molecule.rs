//! The molecule store's value type (§4.B).
//!
//! Molecules are deduplicated by a canonical hash rather than by identity, so two submissions
//! describing the same geometry collapse onto a single stored row.

use crate::ids::MoleculeId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single molecular geometry, the unit that compute specifications are run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    /// Assigned on insert; `None` for a molecule not yet stored.
    pub id: Option<MoleculeId>,
    /// Atomic symbols, one per atom.
    pub symbols: Vec<String>,
    /// Flattened `[x0, y0, z0, x1, y1, z1, ...]` Cartesian coordinates, bohr.
    pub geometry: Vec<f64>,
    /// Net molecular charge.
    pub molecular_charge: f64,
    /// Spin multiplicity.
    pub molecular_multiplicity: i32,
    /// Optional user-supplied name, not part of the dedup key.
    pub name: Option<String>,
    /// Optional fragment partition, atom index ranges.
    pub fragments: Option<Vec<Vec<usize>>>,
}

impl Molecule {
    /// Canonical hash used as the dedup key (`molecule_hash` in the spec's glossary). Two
    /// molecules with the same symbols/geometry/charge/multiplicity hash identically regardless
    /// of `name` or insertion order, matching the original implementation's treatment of those
    /// fields as non-canonical.
    pub fn canonical_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for symbol in &self.symbols {
            hasher.update(symbol.as_bytes());
            hasher.update([0u8]);
        }
        for coord in &self.geometry {
            hasher.update(canonicalize_float(*coord).to_le_bytes());
        }
        hasher.update(canonicalize_float(self.molecular_charge).to_le_bytes());
        hasher.update(self.molecular_multiplicity.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Round to 8 decimal places before hashing so that floating point noise in geometries that are
/// "the same molecule" by any practical measure does not produce distinct hashes.
fn canonicalize_float(value: f64) -> u64 {
    (value * 1e8).round() as i64 as u64
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Molecule {
        Molecule {
            id: None,
            symbols: vec!["O".into(), "H".into(), "H".into()],
            geometry: vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            molecular_charge: 0.0,
            molecular_multiplicity: 1,
            name: None,
            fragments: None,
        }
    }

    #[test]
    fn hash_ignores_name() {
        let mut a = sample();
        let mut b = sample();
        a.name = Some("water".into());
        b.name = None;
        assert_eq!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn hash_differs_on_geometry() {
        let a = sample();
        let mut b = sample();
        b.geometry[2] = 0.5;
        assert_ne!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn hash_is_stable() {
        let m = sample();
        assert_eq!(m.canonical_hash(), m.canonical_hash());
    }
}
