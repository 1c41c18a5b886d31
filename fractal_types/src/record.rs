//! The record hierarchy (§3, §4.C, §4.D).
//!
//! [`BaseRecord`] is the polymorphic root every record type shares; [`RecordType`] tags which
//! specialization table a given id's row lives in. The specialized payloads mirror the
//! dependency DAG described in §4.D: a torsion drive owns optimization children, an optimization
//! owns singlepoint children, a reaction owns per-component optimization and/or singlepoint
//! children, and so on.

use crate::ids::{MoleculeId, RecordId};
use crate::output_store::OutputStoreId;
use crate::qcspec::QcSpecification;
pub use crate::qcspec::Driver;
use crate::status::{Priority, RecordStatus};
use fractal_time::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which specialization table a record's row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// A single compute call against one molecule.
    Singlepoint,
    /// A geometry optimization.
    Optimization,
    /// A 1-D or N-D torsion scan, built from a grid of optimizations (a service).
    Torsiondrive,
    /// A scan over distance/angle/dihedral dimensions (a service).
    Gridoptimization,
    /// A reaction energy from stoichiometric components (a service).
    Reaction,
    /// An n-body expansion over molecular fragments.
    Manybody,
    /// A nudged elastic band pathway (a service).
    Neb,
}

impl RecordType {
    /// True for record types driven by the service engine's `iterate()` contract (§4.D) rather
    /// than directly by a single task.
    pub fn is_service(self) -> bool {
        matches!(
            self,
            Self::Torsiondrive | Self::Gridoptimization | Self::Reaction | Self::Neb
        )
    }
}

/// Fields common to every record regardless of specialization (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRecord {
    /// Assigned on insert.
    pub id: Option<RecordId>,
    /// Which specialization this id's row belongs to.
    pub record_type: RecordType,
    /// Current lifecycle state (invariant 6).
    pub status: RecordStatus,
    /// The manager that last claimed this record's task, if any (invariant 3).
    pub manager_name: Option<String>,
    /// When this record was first submitted.
    pub created_on: Time,
    /// Last status-affecting change.
    pub modified_on: Time,
    /// Submitting user, if authentication is in use (owned by an external collaborator; opaque
    /// here).
    pub owner: Option<String>,
    /// Arbitrary user-supplied metadata, not interpreted by the core.
    pub extras: serde_json::Value,
    /// Opaque provenance of the most recent compute attempt.
    pub provenance: serde_json::Value,
    /// Full compute attempt history, oldest first (append-only).
    pub compute_history: Vec<crate::compute_history::ComputeHistoryRow>,
    /// User-supplied free-text comments.
    pub comments: Vec<String>,
    /// Captured stdout, if any.
    pub stdout: Option<OutputStoreId>,
    /// Captured stderr, if any.
    pub stderr: Option<OutputStoreId>,
    /// Captured structured error, if the most recent attempt failed.
    pub error: Option<OutputStoreId>,
    /// True for record types driven by the service engine.
    pub is_service: bool,
    /// Compute tag this record's task(s) were (or would be, on reset) queued under.
    pub tag: String,
    /// Scheduling priority this record's task(s) were (or would be, on reset) queued at.
    pub priority: Priority,
}

/// A single compute call against one molecule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglepointRecord {
    pub base: BaseRecord,
    pub specification: QcSpecification,
    pub molecule_id: MoleculeId,
    /// Opaque property map reported by the compute engine on success.
    pub properties: Option<serde_json::Value>,
    /// Raw return value reported by the compute engine on success.
    pub return_result: Option<serde_json::Value>,
}

/// A geometry optimization, whose trajectory is a sequence of singlepoint children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub base: BaseRecord,
    pub specification: QcSpecification,
    pub initial_molecule_id: MoleculeId,
    pub final_molecule_id: Option<MoleculeId>,
    /// Ordered trajectory of singlepoint children, one per optimizer step.
    pub trajectory: Vec<RecordId>,
    /// Energy at each trajectory step, parallel to `trajectory`.
    pub energies: Vec<f64>,
}

/// A 1-D or N-D torsion scan. A service: iterated by the external `torsiondrive`-style adapter
/// and driven to completion by the service engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorsiondriveRecord {
    pub base: BaseRecord,
    pub optimization_specification: QcSpecification,
    pub initial_molecules: Vec<MoleculeId>,
    /// Grid point key (e.g. `"[0]"`, `"[180]"`) to the optimization record computing it.
    pub optimizations: BTreeMap<String, RecordId>,
    /// Opaque state handed to/from the external adapter between iterations.
    pub service_state: serde_json::Value,
    /// Grid point key to its minimum-energy geometry, populated on convergence.
    pub minimum_positions: BTreeMap<String, MoleculeId>,
    /// Grid point key to its minimum energy, populated on convergence.
    pub final_energy_dict: BTreeMap<String, f64>,
}

/// Dimension kind for a grid optimization scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDimensionType {
    Distance,
    Angle,
    Dihedral,
}

/// One scanned coordinate. Steps must be strictly monotonic (§4.D).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDimension {
    pub dimension_type: ScanDimensionType,
    /// Atom indices defining the coordinate (2 for distance, 3 for angle, 4 for dihedral).
    pub indices: Vec<usize>,
    /// Strictly monotonic step values.
    pub steps: Vec<f64>,
    /// If true, `steps` are offsets from the starting molecule's value rather than absolute.
    pub relative: bool,
}

/// A scan over distance/angle/dihedral dimensions, one optimization per grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridoptimizationRecord {
    pub base: BaseRecord,
    pub optimization_specification: QcSpecification,
    pub scan_dimensions: Vec<ScanDimension>,
    pub starting_molecule_id: MoleculeId,
    /// Whether the starting molecule is optimized before the scan begins.
    pub preoptimization: bool,
    /// Grid point key to the optimization record computing it.
    pub optimizations: BTreeMap<String, RecordId>,
    pub service_state: serde_json::Value,
}

/// One component of a reaction's stoichiometric expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionComponent {
    /// Stoichiometric coefficient (negative for reactants, positive for products).
    pub coefficient: f64,
    pub molecule_id: MoleculeId,
    /// The singlepoint and/or optimization child computing this component's energy.
    pub singlepoint_id: Option<RecordId>,
    pub optimization_id: Option<RecordId>,
}

/// A reaction energy from stoichiometric components: `Σ coefficient * E(component)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub base: BaseRecord,
    pub singlepoint_specification: Option<QcSpecification>,
    pub optimization_specification: Option<QcSpecification>,
    pub components: Vec<ReactionComponent>,
    pub service_state: serde_json::Value,
    /// `Σ coefficient * E(component)`, populated once every component has completed.
    pub total_energy: Option<f64>,
}

/// An n-body expansion over molecular fragments, optionally BSSE-corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManybodyRecord {
    pub base: BaseRecord,
    pub specification: QcSpecification,
    pub initial_molecule_id: MoleculeId,
    /// Maximum cluster size to enumerate.
    pub max_nbody: usize,
    /// Whether counterpoise-corrected (ghost-atom) clusters are also computed.
    pub bsse_correction: bool,
    /// Cluster key (sorted fragment indices, `+`-joined, with a `_cp` suffix for counterpoise
    /// clusters) to the singlepoint record computing it.
    pub clusters: BTreeMap<String, RecordId>,
    /// Aggregated per-nbody-level properties, populated once all clusters complete.
    pub results: Option<serde_json::Value>,
}

/// One NEB iteration: a gradient singlepoint per non-endpoint image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NebIteration {
    /// Image index to the singlepoint record computing its gradient.
    pub singlepoints: BTreeMap<usize, RecordId>,
}

/// A nudged elastic band pathway between a fixed initial and final image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NebRecord {
    pub base: BaseRecord,
    pub singlepoint_specification: QcSpecification,
    pub optimization_specification: Option<QcSpecification>,
    pub initial_chain: Vec<MoleculeId>,
    pub iterations: Vec<NebIteration>,
    /// Terminal transition-state optimization, if requested and reached.
    pub ts_optimization_id: Option<RecordId>,
    pub service_state: serde_json::Value,
}

/// A record of any specialization, for code that stores or fetches records polymorphically (the
/// catalog's `record_queue` table and the service engine both need this — neither cares which
/// concrete specialization it's holding until it does).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Singlepoint(SinglepointRecord),
    Optimization(OptimizationRecord),
    Torsiondrive(TorsiondriveRecord),
    Gridoptimization(GridoptimizationRecord),
    Reaction(ReactionRecord),
    Manybody(ManybodyRecord),
    Neb(NebRecord),
}

impl Record {
    pub fn base(&self) -> &BaseRecord {
        match self {
            Self::Singlepoint(r) => &r.base,
            Self::Optimization(r) => &r.base,
            Self::Torsiondrive(r) => &r.base,
            Self::Gridoptimization(r) => &r.base,
            Self::Reaction(r) => &r.base,
            Self::Manybody(r) => &r.base,
            Self::Neb(r) => &r.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseRecord {
        match self {
            Self::Singlepoint(r) => &mut r.base,
            Self::Optimization(r) => &mut r.base,
            Self::Torsiondrive(r) => &mut r.base,
            Self::Gridoptimization(r) => &mut r.base,
            Self::Reaction(r) => &mut r.base,
            Self::Manybody(r) => &mut r.base,
            Self::Neb(r) => &mut r.base,
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.base().record_type
    }
}
