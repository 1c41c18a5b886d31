//! Compute specification shared by single point records and used as a building block by every
//! higher-level record type (§3, §4.C).

use serde::{Deserialize, Serialize};

/// Which quantity a compute specification asks the program to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Single-point energy.
    Energy,
    /// Analytic or numerical gradient.
    Gradient,
    /// Analytic or numerical Hessian.
    Hessian,
    /// Response property (e.g. polarizability).
    Properties,
}

/// A fully resolved request to run one quantum chemistry program on one molecule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcSpecification {
    /// What to compute.
    pub driver: Driver,
    /// Electronic structure program, e.g. `"psi4"`.
    pub program: String,
    /// Method, e.g. `"b3lyp"`.
    pub method: String,
    /// Basis set, e.g. `"def2-svp"`. Absent for methods that don't use one (semiempirical,
    /// force fields).
    pub basis: Option<String>,
    /// Id of the keyword overrides to apply, if any.
    pub keywords: Option<crate::ids::KeywordSetId>,
    /// Protocols controlling what gets kept (wavefunction, stdout, etc), opaque to this layer.
    pub protocols: serde_json::Value,
}

impl QcSpecification {
    /// The programs this spec requires, used by the claim engine's containment check against a
    /// manager's `programs` map (§4.G, §8 open question). A bare `QcSpecification` names exactly
    /// one program and never pins a version; composite record types (optimization, reaction,
    /// ...) union their own spec's requirements with those of their children.
    pub fn required_programs(&self) -> crate::task::RequiredPrograms {
        crate::task::RequiredPrograms::new([self.program.clone()])
    }
}
