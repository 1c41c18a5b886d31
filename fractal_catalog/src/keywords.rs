//! The keyword set store (§4.B, §4.C): hash-indexed, immutable after insert.

use async_trait::async_trait;
use fractal_types::{InsertMetadata, KeywordSet, KeywordSetId};
use std::collections::HashMap;

use crate::interface::PostgresTxn;
use crate::storage::{self, DedupBackend};
use crate::Result;

/// Keyword set storage, keyed by `hash_index` (invariant 4).
#[async_trait]
pub trait KeywordRepo: Send {
    /// Deduplicating insert.
    async fn insert(
        &mut self,
        keyword_sets: Vec<KeywordSet>,
    ) -> Result<(InsertMetadata, Vec<Option<KeywordSetId>>)>;

    /// Fetch keyword sets by id, in input order.
    async fn get(
        &mut self,
        ids: Vec<KeywordSetId>,
        missing_ok: bool,
    ) -> Result<Vec<Option<KeywordSet>>>;
}

#[async_trait]
impl DedupBackend<KeywordSet, String, KeywordSetId> for PostgresTxn {
    async fn lookup_existing(
        &mut self,
        keys: Vec<String>,
    ) -> Result<HashMap<String, KeywordSetId>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"SELECT id, hash_index FROM keywords WHERE hash_index = ANY($1)"#,
        )
        .bind(&keys)
        .fetch_all(self.conn())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, hash)| (hash, KeywordSetId(id)))
            .collect())
    }

    async fn insert_new(
        &mut self,
        items: Vec<KeywordSet>,
    ) -> Result<Vec<(String, KeywordSetId)>> {
        let mut out = Vec::with_capacity(items.len());
        for kw in items {
            let hash = kw.hash_index();
            let row = sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO keywords (hash_index, values, comments)
                VALUES ($1, $2, $3)
                ON CONFLICT (hash_index) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(&hash)
            .bind(&kw.values)
            .bind(&kw.comments)
            .fetch_optional(self.conn())
            .await?;

            let id = match row {
                Some((id,)) => id,
                None => {
                    let (id,): (i64,) =
                        sqlx::query_as(r#"SELECT id FROM keywords WHERE hash_index = $1"#)
                            .bind(&hash)
                            .fetch_one(self.conn())
                            .await?;
                    id
                }
            };
            out.push((hash, KeywordSetId(id)));
        }
        Ok(out)
    }
}

#[async_trait]
impl KeywordRepo for PostgresTxn {
    async fn insert(
        &mut self,
        keyword_sets: Vec<KeywordSet>,
    ) -> Result<(InsertMetadata, Vec<Option<KeywordSetId>>)> {
        storage::insert_general(self, keyword_sets, |k| k.hash_index()).await
    }

    async fn get(
        &mut self,
        ids: Vec<KeywordSetId>,
        missing_ok: bool,
    ) -> Result<Vec<Option<KeywordSet>>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query_as::<_, (i64, serde_json::Value, Option<String>)>(
            r#"SELECT id, values, comments FROM keywords WHERE id = ANY($1)"#,
        )
        .bind(&raw_ids)
        .fetch_all(self.conn())
        .await?;

        let mut by_id: HashMap<i64, KeywordSet> = rows
            .into_iter()
            .map(|(id, values, comments)| {
                (
                    id,
                    KeywordSet {
                        id: Some(KeywordSetId(id)),
                        values,
                        comments,
                    },
                )
            })
            .collect();

        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            match by_id.remove(&id.get()) {
                Some(k) => out.push(Some(k)),
                None if missing_ok => out.push(None),
                None => {
                    return Err(crate::Error::NotFound {
                        kind: "keyword_set",
                        id: id.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }
}
