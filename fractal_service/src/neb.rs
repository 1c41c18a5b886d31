//! Nudged elastic band (§4.D, §4.I): a deliberately simple chain advancer. It does not perturb
//! image geometries between rounds — it resubmits gradient singlepoints on the caller-submitted
//! chain for a fixed number of rounds, then optionally runs a terminal transition-state
//! optimization. A production NEB adapter would feed gradients back into an optimizer that
//! actually moves the images between rounds; this stands in for that external collaborator the
//! same way the `torsiondrive` module stands in for the external `torsiondrive` package (§9).

use std::collections::HashMap;

use fractal_types::{Molecule, MoleculeId, NebRecord, RecordId, RecordStatus};
use serde::{Deserialize, Serialize};

use crate::model::{CompletedChild, NewChild, NewChildKind, StepOutcome};
use crate::{Error, Result};

const TS_OPTIMIZATION_KEY: &str = "ts_optimization";

#[derive(Debug, Serialize, Deserialize)]
struct State {
    round: usize,
    max_rounds: usize,
    run_ts_optimization: bool,
}

/// What the caller may supply in `service_state` at submission time.
#[derive(Debug, Default, Deserialize)]
struct CallerInput {
    #[serde(default)]
    max_rounds: Option<usize>,
}

fn malformed(record: &NebRecord, detail: impl Into<String>) -> Error {
    Error::MalformedState {
        record_id: record.base.id.unwrap_or(RecordId(0)),
        detail: detail.into(),
    }
}

fn non_endpoint_images(record: &NebRecord) -> Result<&[MoleculeId]> {
    let len = record.initial_chain.len();
    if len < 3 {
        return Err(malformed(record, "NEB chain needs at least 3 images"));
    }
    Ok(&record.initial_chain[1..len - 1])
}

fn submit_round(
    record: &NebRecord,
    round: usize,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<Vec<NewChild>> {
    let images = non_endpoint_images(record)?;
    let mut children = Vec::with_capacity(images.len());
    for (image_index, molecule_id) in images.iter().enumerate() {
        let molecule = molecules
            .get(molecule_id)
            .ok_or_else(|| malformed(record, format!("image {image_index} molecule not resolved")))?;
        children.push(NewChild {
            key: format!("{round}:{image_index}"),
            position: image_index as i32,
            extras: serde_json::json!({}),
            kind: NewChildKind::Singlepoint {
                specification: record.singlepoint_specification.clone(),
                molecule: molecule.clone(),
            },
        });
    }
    Ok(children)
}

pub fn initial(
    record: &mut NebRecord,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    let caller: CallerInput = serde_json::from_value(record.service_state.clone()).unwrap_or_default();
    let state = State {
        round: 0,
        max_rounds: caller.max_rounds.unwrap_or(1).max(1),
        run_ts_optimization: record.optimization_specification.is_some(),
    };

    let children = submit_round(record, 0, molecules)?;
    record.service_state =
        serde_json::to_value(&state).map_err(|source| malformed(record, source.to_string()))?;
    Ok(StepOutcome::Submit(children))
}

pub fn advance(
    record: &mut NebRecord,
    completed: &[CompletedChild],
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    let all_complete = completed
        .iter()
        .all(|c| matches!(c.status, RecordStatus::Complete));
    if !all_complete {
        return Err(malformed(record, "NEB image in unexpected status"));
    }

    if let Some(ts) = completed.iter().find(|c| c.key == TS_OPTIMIZATION_KEY) {
        record.ts_optimization_id = Some(ts.record_id);
        return Ok(StepOutcome::Done);
    }

    let mut state: State = serde_json::from_value(record.service_state.clone())
        .map_err(|source| malformed(record, source.to_string()))?;
    state.round += 1;

    if state.round >= state.max_rounds {
        if state.run_ts_optimization {
            let images = non_endpoint_images(record)?;
            let seed_id = images[images.len() / 2];
            let seed = molecules
                .get(&seed_id)
                .ok_or_else(|| malformed(record, "TS optimization seed image not resolved"))?;
            let specification = record
                .optimization_specification
                .clone()
                .expect("run_ts_optimization only set when Some");

            record.service_state = serde_json::to_value(&state)
                .map_err(|source| malformed(record, source.to_string()))?;
            return Ok(StepOutcome::Submit(vec![NewChild {
                key: TS_OPTIMIZATION_KEY.to_string(),
                position: 0,
                extras: serde_json::json!({}),
                kind: NewChildKind::Optimization {
                    specification,
                    initial_molecule: seed.clone(),
                },
            }]));
        }

        record.service_state = serde_json::to_value(&state)
            .map_err(|source| malformed(record, source.to_string()))?;
        return Ok(StepOutcome::Done);
    }

    let children = submit_round(record, state.round, molecules)?;
    record.service_state =
        serde_json::to_value(&state).map_err(|source| malformed(record, source.to_string()))?;
    Ok(StepOutcome::Submit(children))
}
