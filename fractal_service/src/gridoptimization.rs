//! Grid optimization (§4.D, §4.I): optionally preoptimize the starting molecule, then submit one
//! constrained optimization per grid point — the cartesian product of each scanned dimension's
//! steps, each one carrying its constraint in the child specification's opaque `protocols`.

use std::collections::HashMap;

use fractal_types::{
    GridoptimizationRecord, Molecule, MoleculeId, RecordId, RecordStatus, ScanDimension,
    ScanDimensionType,
};

use crate::model::{CompletedChild, NewChild, NewChildKind, StepOutcome};
use crate::{Error, Result};

const PREOPTIMIZATION_KEY: &str = "preoptimization";

fn malformed(record: &GridoptimizationRecord, detail: impl Into<String>) -> Error {
    Error::MalformedState {
        record_id: record.base.id.unwrap_or(RecordId(0)),
        detail: detail.into(),
    }
}

pub fn initial(
    record: &mut GridoptimizationRecord,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    if record.preoptimization {
        let molecule = molecules
            .get(&record.starting_molecule_id)
            .ok_or_else(|| malformed(record, "starting molecule not resolved"))?;
        return Ok(StepOutcome::Submit(vec![NewChild {
            key: PREOPTIMIZATION_KEY.to_string(),
            position: 0,
            extras: serde_json::json!({}),
            kind: NewChildKind::Optimization {
                specification: record.optimization_specification.clone(),
                initial_molecule: molecule.clone(),
            },
        }]));
    }

    submit_grid(record, record.starting_molecule_id, molecules)
}

pub fn advance(
    record: &mut GridoptimizationRecord,
    completed: &[CompletedChild],
    _molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    if let Some(preopt) = completed.iter().find(|c| c.key == PREOPTIMIZATION_KEY) {
        let molecule_id = preopt
            .final_molecule_id
            .ok_or_else(|| malformed(record, "preoptimization produced no final molecule"))?;
        let molecule = preopt
            .final_molecule
            .clone()
            .ok_or_else(|| malformed(record, "preoptimization final molecule not resolved"))?;
        let mut resolved = HashMap::with_capacity(1);
        resolved.insert(molecule_id, molecule);
        return submit_grid(record, molecule_id, &resolved);
    }

    let all_complete = completed
        .iter()
        .all(|c| matches!(c.status, RecordStatus::Complete));
    if !all_complete {
        return Err(malformed(record, "grid point in unexpected status"));
    }
    Ok(StepOutcome::Done)
}

fn submit_grid(
    record: &GridoptimizationRecord,
    base_molecule_id: MoleculeId,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    let molecule = molecules
        .get(&base_molecule_id)
        .ok_or_else(|| malformed(record, "grid starting molecule not resolved"))?;

    let children = cartesian_steps(&record.scan_dimensions)
        .into_iter()
        .enumerate()
        .map(|(position, (key, constraints))| {
            let mut specification = record.optimization_specification.clone();
            specification.protocols = serde_json::json!({ "constraints": constraints });
            NewChild {
                key,
                position: position as i32,
                extras: serde_json::json!({}),
                kind: NewChildKind::Optimization {
                    specification,
                    initial_molecule: molecule.clone(),
                },
            }
        })
        .collect();

    Ok(StepOutcome::Submit(children))
}

/// The cartesian product of every dimension's steps, each combo paired with its grid-point key
/// (e.g. `"[1.0, 90.0]"`) and the per-dimension constraint list to embed in the child spec.
fn cartesian_steps(dimensions: &[ScanDimension]) -> Vec<(String, serde_json::Value)> {
    let mut combos: Vec<Vec<f64>> = vec![Vec::new()];
    for dim in dimensions {
        let mut next = Vec::with_capacity(combos.len() * dim.steps.len().max(1));
        for existing in &combos {
            for &step in &dim.steps {
                let mut combo = existing.clone();
                combo.push(step);
                next.push(combo);
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|combo| {
            let key = format!(
                "[{}]",
                combo
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let constraints: Vec<serde_json::Value> = dimensions
                .iter()
                .zip(combo.iter())
                .map(|(dim, &value)| {
                    serde_json::json!({
                        "type": scan_dimension_type_str(dim.dimension_type),
                        "indices": dim.indices,
                        "value": value,
                        "relative": dim.relative,
                    })
                })
                .collect();
            (key, serde_json::Value::Array(constraints))
        })
        .collect()
}

fn scan_dimension_type_str(t: ScanDimensionType) -> &'static str {
    match t {
        ScanDimensionType::Distance => "distance",
        ScanDimensionType::Angle => "angle",
        ScanDimensionType::Dihedral => "dihedral",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(steps: Vec<f64>) -> ScanDimension {
        ScanDimension {
            dimension_type: ScanDimensionType::Distance,
            indices: vec![0, 1],
            steps,
            relative: false,
        }
    }

    #[test]
    fn single_dimension_one_key_per_step() {
        let keys: Vec<String> = cartesian_steps(&[dim(vec![1.0, 1.5, 2.0])])
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["[1]", "[1.5]", "[2]"]);
    }

    #[test]
    fn two_dimensions_cross_product_size() {
        let combos = cartesian_steps(&[dim(vec![1.0, 2.0]), dim(vec![90.0, 180.0, 270.0])]);
        assert_eq!(combos.len(), 6);
    }
}
