//! Generic deduplicating insert/get/delete algorithms (§4.A), and `include`/`exclude`
//! projection parsing (§9 design note).
//!
//! These are deliberately storage-agnostic: each concrete store (molecules, keyword sets,
//! records) implements [`DedupBackend`] against its own table; this module owns only the
//! batching/ordering algorithm, read straight off `db_socket/helpers.py`'s
//! `_insert_general_batch`.

use async_trait::async_trait;
use fractal_types::InsertMetadata;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Batch size used by every deduplicating insert, matching the original implementation's
/// `helpers.py::batchsize`.
pub const BATCH_SIZE: usize = 200;

/// What a concrete store must supply so [`insert_general`]/[`insert_mixed_general`] can run
/// against it. Implementors own the actual `SELECT`/`INSERT` statements; this trait only shapes
/// them so the batching algorithm stays storage-agnostic.
#[async_trait]
pub trait DedupBackend<T, K, R> {
    /// Look up existing rows by dedup key. Keys with no matching row are simply absent from the
    /// returned map.
    async fn lookup_existing(&mut self, keys: Vec<K>) -> crate::Result<HashMap<K, R>>;

    /// Insert rows that did not already exist, returning `(key, return_value)` for each, in any
    /// order.
    async fn insert_new(&mut self, items: Vec<T>) -> crate::Result<Vec<(K, R)>>;
}

/// Additionally resolves a bare id to its return value, for [`insert_mixed_general`].
#[async_trait]
pub trait IdLookupBackend<Id, R> {
    /// Resolve `id`, or `None` if it does not exist.
    async fn lookup_by_id(&mut self, id: Id) -> crate::Result<Option<R>>;
}

/// Run `items` through a deduplicating insert against `backend`: items whose key already exists
/// are left alone, new (and newly-duplicated-within-this-call) keys are inserted once, and the
/// returned list maps 1:1 onto `items` in input order.
pub async fn insert_general<T, K, R, B>(
    backend: &mut B,
    items: Vec<T>,
    search_key: impl Fn(&T) -> K,
) -> crate::Result<(InsertMetadata, Vec<Option<R>>)>
where
    T: Clone,
    K: Eq + Hash + Clone + Ord,
    R: Clone,
    B: DedupBackend<T, K, R> + ?Sized,
{
    let mut metadata = InsertMetadata::default();
    let mut results: Vec<Option<R>> = vec![None; items.len()];

    for batch_start in (0..items.len()).step_by(BATCH_SIZE) {
        let batch_end = (batch_start + BATCH_SIZE).min(items.len());
        let batch_indices: Vec<usize> = (batch_start..batch_end).collect();
        let batch_items: Vec<T> = batch_indices.iter().map(|&i| items[i].clone()).collect();
        let batch_keys: Vec<K> = batch_items.iter().map(&search_key).collect();

        // de-duplicate within-batch keys, remembering the first index that introduced each.
        let mut first_seen: HashMap<K, usize> = HashMap::new();
        for (offset, key) in batch_keys.iter().enumerate() {
            first_seen.entry(key.clone()).or_insert(offset);
        }
        let unique_keys: Vec<K> = first_seen.keys().cloned().collect();

        let existing = backend.lookup_existing(unique_keys).await?;

        let mut to_insert_offsets: Vec<usize> = first_seen
            .iter()
            .filter(|(key, _)| !existing.contains_key(*key))
            .map(|(_, &offset)| offset)
            .collect();
        to_insert_offsets.sort_unstable();

        let to_insert_items: Vec<T> = to_insert_offsets
            .iter()
            .map(|&offset| batch_items[offset].clone())
            .collect();

        let inserted: HashMap<K, R> = if to_insert_items.is_empty() {
            HashMap::new()
        } else {
            backend
                .insert_new(to_insert_items)
                .await?
                .into_iter()
                .collect()
        };

        for (offset, key) in batch_keys.iter().enumerate() {
            let global_idx = batch_indices[offset];
            if let Some(value) = existing.get(key) {
                results[global_idx] = Some(value.clone());
                metadata.existing_idx.push(global_idx);
            } else if let Some(value) = inserted.get(key) {
                results[global_idx] = Some(value.clone());
                // only the first occurrence of a newly-inserted key counts as "inserted"; later
                // duplicates within the same call are "existing" against the row this call just
                // created.
                if first_seen.get(key) == Some(&offset) {
                    metadata.inserted_idx.push(global_idx);
                } else {
                    metadata.existing_idx.push(global_idx);
                }
            } else {
                metadata
                    .errors
                    .push((global_idx, "failed to insert or locate row".to_string()));
            }
        }
    }

    Ok((metadata, results))
}

/// One slot of a mixed insert: either a reference to an existing row by id, or a full object to
/// insert (deduplicating, via [`insert_general`]).
#[derive(Debug, Clone)]
pub enum MixedInput<Id, T> {
    Id(Id),
    Object(T),
}

/// `insert_mixed_general` (§4.A): like [`insert_general`], but each input slot may instead be a
/// bare id, which is resolved against `backend` rather than participating in deduplication.
/// Missing ids become per-index errors without aborting the rest of the batch.
pub async fn insert_mixed_general<Id, T, K, R, B>(
    backend: &mut B,
    items: Vec<MixedInput<Id, T>>,
    search_key: impl Fn(&T) -> K,
) -> crate::Result<(InsertMetadata, Vec<Option<R>>)>
where
    T: Clone,
    K: Eq + Hash + Clone + Ord,
    R: Clone,
    B: DedupBackend<T, K, R> + IdLookupBackend<Id, R> + ?Sized,
{
    let mut results: Vec<Option<R>> = vec![None; items.len()];
    let mut metadata = InsertMetadata::default();

    let mut object_indices = Vec::new();
    let mut object_items = Vec::new();

    for (idx, item) in items.into_iter().enumerate() {
        match item {
            MixedInput::Id(id) => match backend.lookup_by_id(id).await? {
                Some(value) => {
                    results[idx] = Some(value);
                    metadata.existing_idx.push(idx);
                }
                None => {
                    metadata
                        .errors
                        .push((idx, "referenced id does not exist".to_string()));
                }
            },
            MixedInput::Object(obj) => {
                object_indices.push(idx);
                object_items.push(obj);
            }
        }
    }

    if !object_items.is_empty() {
        let (obj_metadata, obj_results) =
            insert_general(backend, object_items, search_key).await?;
        for (offset, &idx) in object_indices.iter().enumerate() {
            results[idx] = obj_results[offset].clone();
        }
        for offset in obj_metadata.inserted_idx {
            metadata.inserted_idx.push(object_indices[offset]);
        }
        for offset in obj_metadata.existing_idx {
            metadata.existing_idx.push(object_indices[offset]);
        }
        for (offset, message) in obj_metadata.errors {
            metadata.errors.push((object_indices[offset], message));
        }
    }

    Ok((metadata, results))
}

/// A parsed `include`/`exclude` projection tree (§9 design note): at each level, partition into
/// local columns/relationship names plus nested projections keyed by relationship name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionSpec {
    /// `true` if `*` was present at this level (all local columns).
    pub all_local: bool,
    /// Local, non-relationship column names requested at this level.
    pub local_columns: HashSet<String>,
    /// Nested projections, keyed by the relationship name that introduces them.
    pub children: HashMap<String, ProjectionSpec>,
}

impl ProjectionSpec {
    /// Parse a flat set of dotted paths (e.g. `{"status", "trajectory.energies"}`) into a tree.
    pub fn parse(paths: &HashSet<String>) -> Self {
        let mut root = Self::default();
        for path in paths {
            if path == "*" {
                root.all_local = true;
                continue;
            }
            insert_path(&mut root, path.splitn(2, '.'));
        }
        root
    }
}

fn insert_path<'a>(spec: &mut ProjectionSpec, mut parts: std::str::SplitN<'a, char>) {
    match (parts.next(), parts.next()) {
        (Some(head), None) => {
            spec.local_columns.insert(head.to_string());
        }
        (Some(head), Some(rest)) => {
            let child = spec.children.entry(head.to_string()).or_default();
            insert_path(child, rest.splitn(2, '.'));
        }
        (None, _) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    struct VecBackend {
        existing: Map<i32, &'static str>,
    }

    #[async_trait]
    impl DedupBackend<i32, i32, &'static str> for VecBackend {
        async fn lookup_existing(
            &mut self,
            keys: Vec<i32>,
        ) -> crate::Result<HashMap<i32, &'static str>> {
            Ok(keys
                .into_iter()
                .filter_map(|k| self.existing.get(&k).map(|v| (k, *v)))
                .collect())
        }

        async fn insert_new(
            &mut self,
            items: Vec<i32>,
        ) -> crate::Result<Vec<(i32, &'static str)>> {
            Ok(items.into_iter().map(|k| (k, "inserted")).collect())
        }
    }

    #[tokio::test]
    async fn insert_general_dedups_within_and_across_calls() {
        let mut backend = VecBackend {
            existing: Map::from([(1, "one")]),
        };
        let items = vec![1, 2, 2, 3];
        let (meta, results) = insert_general(&mut backend, items, |x: &i32| *x)
            .await
            .unwrap();

        assert_eq!(meta.existing_idx, vec![0, 2]);
        assert_eq!(meta.inserted_idx, vec![1, 3]);
        assert_eq!(results[0], Some("one"));
        assert_eq!(results[1], Some("inserted"));
        assert_eq!(results[2], Some("inserted"));
        assert_eq!(results[3], Some("inserted"));
    }

    #[test]
    fn projection_parses_dotted_paths() {
        let paths: HashSet<String> = ["status".to_string(), "trajectory.energies".to_string()]
            .into_iter()
            .collect();
        let spec = ProjectionSpec::parse(&paths);
        assert!(spec.local_columns.contains("status"));
        let child = spec.children.get("trajectory").unwrap();
        assert!(child.local_columns.contains("energies"));
    }

    #[test]
    fn projection_wildcard() {
        let paths: HashSet<String> = ["*".to_string()].into_iter().collect();
        let spec = ProjectionSpec::parse(&paths);
        assert!(spec.all_local);
    }
}
