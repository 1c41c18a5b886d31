//! Reaction energies (§4.D, §4.I): optionally optimize each stoichiometric component, then run a
//! singlepoint on every component's final geometry, then `total_energy = Σ coefficient · E`. Each
//! component is handled independently; a real implementation would additionally dedupe identical
//! components across a reaction and share their child record, which this advancer does not
//! attempt.

use std::collections::HashMap;

use fractal_types::{Molecule, MoleculeId, ReactionRecord, RecordId, RecordStatus};

use crate::model::{CompletedChild, NewChild, NewChildKind, StepOutcome};
use crate::{Error, Result};

fn malformed(record: &ReactionRecord, detail: impl Into<String>) -> Error {
    Error::MalformedState {
        record_id: record.base.id.unwrap_or(RecordId(0)),
        detail: detail.into(),
    }
}

fn component_index(key: &str, record: &ReactionRecord) -> Result<usize> {
    key.split(':')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(record, format!("malformed reaction component key {key:?}")))
}

pub fn initial(
    record: &mut ReactionRecord,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    if let Some(spec) = record.optimization_specification.clone() {
        let mut children = Vec::with_capacity(record.components.len());
        for (index, component) in record.components.iter().enumerate() {
            let molecule = molecules.get(&component.molecule_id).ok_or_else(|| {
                malformed(record, format!("component {index} molecule not resolved"))
            })?;
            children.push(NewChild {
                key: format!("{index}:optimization"),
                position: index as i32,
                extras: serde_json::json!({}),
                kind: NewChildKind::Optimization {
                    specification: spec.clone(),
                    initial_molecule: molecule.clone(),
                },
            });
        }
        return Ok(StepOutcome::Submit(children));
    }

    submit_singlepoints_on_original_geometry(record, molecules)
}

fn submit_singlepoints_on_original_geometry(
    record: &ReactionRecord,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    let spec = record.singlepoint_specification.clone().ok_or_else(|| {
        malformed(
            record,
            "reaction has neither an optimization nor a singlepoint specification",
        )
    })?;

    let mut children = Vec::with_capacity(record.components.len());
    for (index, component) in record.components.iter().enumerate() {
        let molecule = molecules
            .get(&component.molecule_id)
            .ok_or_else(|| malformed(record, format!("component {index} molecule not resolved")))?;
        children.push(NewChild {
            key: format!("{index}:singlepoint"),
            position: index as i32,
            extras: serde_json::json!({}),
            kind: NewChildKind::Singlepoint {
                specification: spec.clone(),
                molecule: molecule.clone(),
            },
        });
    }
    Ok(StepOutcome::Submit(children))
}

pub fn advance(
    record: &mut ReactionRecord,
    completed: &[CompletedChild],
    _molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    let all_complete = completed
        .iter()
        .all(|c| matches!(c.status, RecordStatus::Complete));
    if !all_complete {
        return Err(malformed(record, "reaction component in unexpected status"));
    }

    let in_optimization_phase = completed.iter().all(|c| c.key.ends_with(":optimization"));
    if in_optimization_phase {
        let spec = record.singlepoint_specification.clone().ok_or_else(|| {
            malformed(record, "optimization phase finished with no singlepoint specification")
        })?;
        let mut children = Vec::with_capacity(completed.len());
        for child in completed {
            let index = component_index(&child.key, record)?;
            let molecule = child.final_molecule.clone().ok_or_else(|| {
                malformed(record, format!("component {index} optimization produced no final molecule"))
            })?;
            children.push(NewChild {
                key: format!("{index}:singlepoint"),
                position: index as i32,
                extras: serde_json::json!({}),
                kind: NewChildKind::Singlepoint {
                    specification: spec.clone(),
                    molecule,
                },
            });
        }
        return Ok(StepOutcome::Submit(children));
    }

    let mut total = 0.0;
    for child in completed {
        let index = component_index(&child.key, record)?;
        let energy = child
            .energy
            .ok_or_else(|| malformed(record, format!("component {index} singlepoint produced no energy")))?;
        let coefficient = record
            .components
            .get(index)
            .ok_or_else(|| malformed(record, format!("component {index} out of range")))?
            .coefficient;
        total += coefficient * energy;
    }
    record.total_energy = Some(total);
    Ok(StepOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_types::{BaseRecord, Priority, RecordStatus as Status, RecordType};

    fn base() -> BaseRecord {
        BaseRecord {
            id: Some(RecordId(1)),
            record_type: RecordType::Reaction,
            status: Status::Running,
            manager_name: None,
            created_on: fractal_time::Time::from_datetime(chrono::Utc::now()),
            modified_on: fractal_time::Time::from_datetime(chrono::Utc::now()),
            owner: None,
            extras: serde_json::json!({}),
            provenance: serde_json::json!({}),
            compute_history: Vec::new(),
            comments: Vec::new(),
            stdout: None,
            stderr: None,
            error: None,
            is_service: true,
            tag: "*".to_string(),
            priority: Priority::Normal,
        }
    }

    #[test]
    fn total_energy_is_coefficient_weighted_sum() {
        let mut record = ReactionRecord {
            base: base(),
            singlepoint_specification: None,
            optimization_specification: None,
            components: vec![
                fractal_types::ReactionComponent {
                    coefficient: -1.0,
                    molecule_id: MoleculeId(1),
                    singlepoint_id: None,
                    optimization_id: None,
                },
                fractal_types::ReactionComponent {
                    coefficient: 2.0,
                    molecule_id: MoleculeId(2),
                    singlepoint_id: None,
                    optimization_id: None,
                },
            ],
            service_state: serde_json::json!({}),
            total_energy: None,
        };

        let completed = vec![
            CompletedChild {
                key: "0:singlepoint".to_string(),
                position: 0,
                extras: serde_json::json!({}),
                record_id: RecordId(10),
                status: Status::Complete,
                energy: Some(-10.0),
                final_molecule: None,
                final_molecule_id: None,
                properties: None,
            },
            CompletedChild {
                key: "1:singlepoint".to_string(),
                position: 1,
                extras: serde_json::json!({}),
                record_id: RecordId(11),
                status: Status::Complete,
                energy: Some(-5.0),
                final_molecule: None,
                final_molecule_id: None,
                properties: None,
            },
        ];

        let outcome = advance(&mut record, &completed, &HashMap::new()).unwrap();
        assert!(matches!(outcome, StepOutcome::Done));
        assert_eq!(record.total_energy, Some(-1.0 * -10.0 + 2.0 * -5.0));
    }
}
