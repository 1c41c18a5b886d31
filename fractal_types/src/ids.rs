//! Newtype identifiers.
//!
//! Every entity is keyed by an auto-incrementing `i64` in the underlying store, but passing bare
//! `i64`s around invites mixing up a `RecordId` with a `TaskId` at a call site. These newtypes
//! make that a type error instead of a 2am production bug.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// The raw integer id.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(RecordId, "Identifies a row in `base_record` (and its specialization table).");
id_type!(TaskId, "Identifies a row in `task_queue`.");
id_type!(MoleculeId, "Identifies a row in `molecules`.");
id_type!(KeywordSetId, "Identifies a row in `keywords`.");
id_type!(OutputStoreId, "Identifies a row in `output_store`.");

/// Identifies a compute manager. Managers are keyed by name (`cluster-hostname-uuid`), not by a
/// surrogate integer, since the name itself must be unique and is what managers present on
/// every subsequent call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerName(pub String);

impl fmt::Display for ManagerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ManagerName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ManagerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
