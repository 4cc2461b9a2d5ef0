//! # Engine Primitives
//!
//! Hardcoded constants for the LoomGraph engine.
//!
//! These are compiled into the binary and immutable at runtime. Tunable
//! limits live in [`crate::settings::EngineSettings`]; the values here are
//! the hard bounds those settings are clamped to.

// =============================================================================
// STORE FORMAT
// =============================================================================

/// Schema version written into the store's metadata table.
///
/// A store created with a different version is refused at open.
pub const SCHEMA_VERSION: u64 = 1;

/// Magic bytes for the vector index artifact header.
///
/// - File Header = Magic Bytes ("LGVX") + Version (u8) before payload.
pub const INDEX_MAGIC_BYTES: &[u8; 4] = b"LGVX";

/// Current vector index artifact format version.
///
/// Increment this when making breaking changes to the artifact payload.
pub const INDEX_FORMAT_VERSION: u8 = 1;

// =============================================================================
// ENUMERATION LIMITS
// =============================================================================

/// Upper bound for `max_results` of a single enumeration page.
pub const MAX_RESULTS: usize = 1000;

/// Page size used when a query does not specify one.
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Number of ordering-index keys a cursor reads per batch.
pub const DEFAULT_CURSOR_BATCH: usize = 64;

// =============================================================================
// TRAVERSAL LIMITS
// =============================================================================

/// Maximum traversal depth for subgraph extraction.
///
/// - All queries must be computationally bounded.
/// - This prevents runaway traversals in large graphs.
pub const MAX_TRAVERSAL_DEPTH: usize = 100;

/// Default cap on the number of edges in a discovered route.
pub const DEFAULT_MAX_HOPS: usize = 32;

/// Default cap on the number of routes a single request yields.
pub const DEFAULT_MAX_ROUTES: usize = 10_000;

// =============================================================================
// VECTOR SEARCH LIMITS
// =============================================================================

/// Upper bound for `top_k` of a similarity search.
pub const MAX_TOP_K: usize = 1000;

/// `top_k` used when a request does not specify one.
pub const DEFAULT_TOP_K: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(INDEX_MAGIC_BYTES, b"LGVX");
    }
}
