//! The molecule store (§4.B, §4.C): hash-indexed, immutable after insert.

use async_trait::async_trait;
use fractal_types::{InsertMetadata, Molecule, MoleculeId};
use std::collections::HashMap;

use crate::interface::PostgresTxn;
use crate::storage::{self, DedupBackend};
use crate::Result;

/// Molecule storage, keyed by `molecule_hash` (invariant 4).
#[async_trait]
pub trait MoleculeRepo: Send {
    /// Deduplicating insert: a molecule already present by hash is left alone.
    async fn insert(
        &mut self,
        molecules: Vec<Molecule>,
    ) -> Result<(InsertMetadata, Vec<Option<MoleculeId>>)>;

    /// Fetch molecules by id, in input order. `missing_ok = false` surfaces a `NotFound` error
    /// for any id absent from the store; `missing_ok = true` leaves that slot `None`.
    async fn get(&mut self, ids: Vec<MoleculeId>, missing_ok: bool) -> Result<Vec<Option<Molecule>>>;

    /// Look a single molecule up by its canonical hash.
    async fn get_by_hash(&mut self, hash: &str) -> Result<Option<Molecule>>;
}

#[async_trait]
impl DedupBackend<Molecule, String, MoleculeId> for PostgresTxn {
    async fn lookup_existing(&mut self, keys: Vec<String>) -> Result<HashMap<String, MoleculeId>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"SELECT id, molecule_hash FROM molecules WHERE molecule_hash = ANY($1)"#,
        )
        .bind(&keys)
        .fetch_all(self.conn())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, hash)| (hash, MoleculeId(id)))
            .collect())
    }

    async fn insert_new(
        &mut self,
        items: Vec<Molecule>,
    ) -> Result<Vec<(String, MoleculeId)>> {
        let mut out = Vec::with_capacity(items.len());
        for molecule in items {
            let hash = molecule.canonical_hash();
            let symbols = serde_json::to_value(&molecule.symbols)?;
            let row = sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO molecules
                    (molecule_hash, symbols, geometry, molecular_charge, molecular_multiplicity, name)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (molecule_hash) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(&hash)
            .bind(symbols)
            .bind(&molecule.geometry)
            .bind(molecule.molecular_charge)
            .bind(molecule.molecular_multiplicity)
            .bind(&molecule.name)
            .fetch_optional(self.conn())
            .await?;

            // a concurrent insert of the same hash between our lookup and this insert loses the
            // `ON CONFLICT DO NOTHING` race; re-fetch rather than treat it as an error.
            let id = match row {
                Some((id,)) => id,
                None => {
                    let (id,): (i64,) = sqlx::query_as(
                        r#"SELECT id FROM molecules WHERE molecule_hash = $1"#,
                    )
                    .bind(&hash)
                    .fetch_one(self.conn())
                    .await?;
                    id
                }
            };
            out.push((hash, MoleculeId(id)));
        }
        Ok(out)
    }
}

#[async_trait]
impl MoleculeRepo for PostgresTxn {
    async fn insert(
        &mut self,
        molecules: Vec<Molecule>,
    ) -> Result<(InsertMetadata, Vec<Option<MoleculeId>>)> {
        storage::insert_general(self, molecules, |m| m.canonical_hash()).await
    }

    async fn get(&mut self, ids: Vec<MoleculeId>, missing_ok: bool) -> Result<Vec<Option<Molecule>>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query_as::<_, (i64, String, serde_json::Value, Vec<f64>, f64, i32, Option<String>)>(
            r#"
            SELECT id, molecule_hash, symbols, geometry, molecular_charge, molecular_multiplicity, name
            FROM molecules WHERE id = ANY($1)
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(self.conn())
        .await?;

        let mut by_id: HashMap<i64, Molecule> = HashMap::new();
        for (id, _hash, symbols, geometry, charge, multiplicity, name) in rows {
            let symbols: Vec<String> = serde_json::from_value(symbols)?;
            by_id.insert(
                id,
                Molecule {
                    id: Some(MoleculeId(id)),
                    symbols,
                    geometry,
                    molecular_charge: charge,
                    molecular_multiplicity: multiplicity,
                    name,
                    fragments: None,
                },
            );
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            match by_id.remove(&id.get()) {
                Some(m) => out.push(Some(m)),
                None if missing_ok => out.push(None),
                None => {
                    return Err(crate::Error::NotFound {
                        kind: "molecule",
                        id: id.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    async fn get_by_hash(&mut self, hash: &str) -> Result<Option<Molecule>> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value, Vec<f64>, f64, i32, Option<String>)>(
            r#"
            SELECT id, symbols, geometry, molecular_charge, molecular_multiplicity, name
            FROM molecules WHERE molecule_hash = $1
            "#,
        )
        .bind(hash)
        .fetch_optional(self.conn())
        .await?;

        row.map(|(id, symbols, geometry, charge, multiplicity, name)| {
            Ok(Molecule {
                id: Some(MoleculeId(id)),
                symbols: serde_json::from_value(symbols)?,
                geometry,
                molecular_charge: charge,
                molecular_multiplicity: multiplicity,
                name,
                fragments: None,
            })
        })
        .transpose()
    }
}
