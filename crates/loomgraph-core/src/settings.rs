//! # Engine Settings
//!
//! Tunable limits of the engine, passed explicitly into
//! [`crate::LoomClient::open`]. Every section deserializes with defaults so a
//! partial TOML document is a valid configuration.

use crate::primitives;
use crate::types::LoomError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration of a [`crate::LoomClient`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub storage: StorageSettings,
    pub enumeration: EnumerationSettings,
    pub routes: RouteSettings,
    pub vector_index: VectorIndexSettings,
}

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the redb file; ignored by in-memory stores.
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("loomgraph.redb"),
        }
    }
}

/// Paging defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationSettings {
    pub default_max_results: usize,
    /// Ordering-index keys a cursor reads per batch.
    pub cursor_batch_size: usize,
}

impl Default for EnumerationSettings {
    fn default() -> Self {
        Self {
            default_max_results: primitives::DEFAULT_MAX_RESULTS,
            cursor_batch_size: primitives::DEFAULT_CURSOR_BATCH,
        }
    }
}

/// Safety caps for route discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    /// Longest route, in edges. Requests may lower it, never raise it.
    pub max_hops: usize,
    /// Most routes yielded by one request.
    pub max_routes: usize,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            max_hops: primitives::DEFAULT_MAX_HOPS,
            max_routes: primitives::DEFAULT_MAX_ROUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexSettings {
    pub default_top_k: usize,
}

impl Default for VectorIndexSettings {
    fn default() -> Self {
        Self {
            default_top_k: primitives::DEFAULT_TOP_K,
        }
    }
}

impl EngineSettings {
    /// Reject settings outside the engine's hard bounds.
    pub fn validate(&self) -> Result<(), LoomError> {
        let e = &self.enumeration;
        if e.default_max_results == 0 || e.default_max_results > primitives::MAX_RESULTS {
            return Err(LoomError::bad_request(format!(
                "enumeration.default_max_results must be in 1..={}",
                primitives::MAX_RESULTS
            )));
        }
        if e.cursor_batch_size == 0 {
            return Err(LoomError::bad_request(
                "enumeration.cursor_batch_size must be positive",
            ));
        }
        if self.routes.max_hops == 0 || self.routes.max_routes == 0 {
            return Err(LoomError::bad_request(
                "routes.max_hops and routes.max_routes must be positive",
            ));
        }
        let k = self.vector_index.default_top_k;
        if k == 0 || k > primitives::MAX_TOP_K {
            return Err(LoomError::bad_request(format!(
                "vector_index.default_top_k must be in 1..={}",
                primitives::MAX_TOP_K
            )));
        }
        Ok(())
    }
}
