//! Named pure functions.
//!
//! Jobs and tasks never carry code. They carry stable ids, and every worker
//! resolves those ids against its own registry. Anything that can cross a
//! process boundary (a job spec file, a task assignment) therefore stays
//! plain data.

use crate::aggregate::{LeafFn, MergeOperator};
use crate::error::JobError;
use crate::mapper::{InitFn, Initializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! function_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

function_id! {
    /// Stable name of a registered record initializer.
    InitFnId
}

function_id! {
    /// Stable name of a registered merge function.
    MergeFnId
}

/// Registry of initializers and merge functions available on this worker.
///
/// ```rust
/// use foldwise::registry::{FunctionRegistry, MergeFnId};
///
/// let registry = FunctionRegistry::with_builtins();
/// let op = registry.merge(&MergeFnId::new("sum")).unwrap();
/// assert_eq!(op.combine(2, 3), 5);
/// ```
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    inits: BTreeMap<InitFnId, InitFn>,
    merges: BTreeMap<MergeFnId, LeafFn>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in initializers and merge functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_init("access_log", crate::mapper::access_log);
        registry.register_init("field_count", crate::mapper::field_count);
        registry.register_merge("sum", crate::aggregate::sum_leaf);
        registry.register_merge("max", crate::aggregate::max_leaf);
        registry.register_merge("min", crate::aggregate::min_leaf);
        registry
    }

    /// Register (or replace) an initializer.
    pub fn register_init(&mut self, id: impl Into<InitFnId>, func: InitFn) -> &mut Self {
        self.inits.insert(id.into(), func);
        self
    }

    /// Register (or replace) a merge leaf function.
    pub fn register_merge(&mut self, id: impl Into<MergeFnId>, leaf: LeafFn) -> &mut Self {
        self.merges.insert(id.into(), leaf);
        self
    }

    pub fn init(&self, id: &InitFnId) -> Result<Initializer, JobError> {
        self.inits
            .get(id)
            .map(|func| Initializer::new(id.clone(), *func))
            .ok_or_else(|| JobError::UnknownFunction {
                kind: "init",
                id: id.to_string(),
            })
    }

    pub fn merge(&self, id: &MergeFnId) -> Result<MergeOperator, JobError> {
        self.merges
            .get(id)
            .map(|leaf| MergeOperator::new(id.clone(), *leaf))
            .ok_or_else(|| JobError::UnknownFunction {
                kind: "merge",
                id: id.to_string(),
            })
    }

    pub fn init_ids(&self) -> impl Iterator<Item = &InitFnId> {
        self.inits.keys()
    }

    pub fn merge_ids(&self) -> impl Iterator<Item = &MergeFnId> {
        self.merges.keys()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("inits", &self.inits.keys().collect::<Vec<_>>())
            .field("merges", &self.merges.keys().collect::<Vec<_>>())
            .finish()
    }
}
