//! Shared shapes every per-service advancer (§4.I) is built from: a finished child's result as
//! fed back into the advancer, a new child to submit, and what one tick decided to do.

use fractal_types::{Molecule, MoleculeId, QcSpecification, RecordId, RecordStatus};

/// One child whose task (or own service tick) has reached a terminal status, ready to feed back
/// into the owning service's advancer. Only ever constructed for children the engine has
/// confirmed are `{complete, error}` — see `engine::collect_completed`.
#[derive(Debug, Clone)]
pub struct CompletedChild {
    pub key: String,
    pub position: i32,
    pub extras: serde_json::Value,
    pub record_id: RecordId,
    pub status: RecordStatus,
    /// The child's scalar energy, if it has one: a singlepoint's `return_result` parsed as a
    /// number, or an optimization's last trajectory energy.
    pub energy: Option<f64>,
    /// The child's final geometry, for an optimization child.
    pub final_molecule: Option<Molecule>,
    /// The same geometry's id, for advancers that only need to record *which* molecule it was
    /// (e.g. a torsion drive's `minimum_positions`) rather than carry the full structure forward.
    pub final_molecule_id: Option<MoleculeId>,
    pub properties: Option<serde_json::Value>,
}

/// What kind of child record one advancer submits; every per-service algorithm here only ever
/// needs these two (§4.D: composite records decompose into singlepoints and optimizations).
#[derive(Debug, Clone)]
pub enum NewChildKind {
    Singlepoint {
        specification: QcSpecification,
        molecule: Molecule,
    },
    Optimization {
        specification: QcSpecification,
        initial_molecule: Molecule,
    },
}

/// One child a tick decided to submit, keyed the same way its eventual [`CompletedChild`] will
/// come back.
#[derive(Debug, Clone)]
pub struct NewChild {
    pub key: String,
    pub position: i32,
    pub extras: serde_json::Value,
    pub kind: NewChildKind,
}

/// What an `initial`/`advance` call decided to do this tick (§4.I: "Produce a new batch of child
/// specs" vs "If no new children are produced").
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Submit a new batch of children and wait for them.
    Submit(Vec<NewChild>),
    /// No further children needed; the record's own aggregate fields have already been written
    /// by the caller and it is ready to be marked complete.
    Done,
}
