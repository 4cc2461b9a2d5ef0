//! # Vector Index Artifact
//!
//! On-disk snapshot of one graph's vector index.
//!
//! Format: Header (5 bytes) + postcard-serialized [`IndexArtifact`].
//! - 4 bytes: Magic ("LGVX")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded. Writes go
//! to a sibling temporary file that is then renamed over the target, so a
//! reader sees the old artifact or the new one.

use super::{IndexedVector, VectorDomain};
use crate::primitives;
use crate::types::{LoomError, Owner};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

/// Largest artifact accepted on read.
pub const MAX_ARTIFACT_SIZE: u64 = 1024 * 1024 * 1024;

const HEADER_LEN: usize = 5;

// =============================================================================
// HEADER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArtifactHeader {
    magic: [u8; 4],
    version: u8,
}

impl ArtifactHeader {
    fn current() -> Self {
        Self {
            magic: *primitives::INDEX_MAGIC_BYTES,
            version: primitives::INDEX_FORMAT_VERSION,
        }
    }

    fn validate(&self) -> Result<(), LoomError> {
        if &self.magic != primitives::INDEX_MAGIC_BYTES {
            return Err(LoomError::Internal(
                "vector index artifact has invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::INDEX_FORMAT_VERSION {
            return Err(LoomError::Internal(format!(
                "unsupported vector index artifact version {} (expected {})",
                self.version,
                primitives::INDEX_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, LoomError> {
        let Some(header) = bytes.get(..HEADER_LEN) else {
            return Err(LoomError::Internal(
                "vector index artifact is shorter than its header".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Everything needed to trust and restore an index without a re-scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct IndexArtifact {
    pub tenant: Uuid,
    pub graph: Uuid,
    pub dimensionality: usize,
    pub domains: BTreeSet<VectorDomain>,
    /// Store generation of the graph when the index was built.
    pub generation: u64,
    pub built_micros: i64,
    pub entries: Vec<(Owner, Vec<IndexedVector>)>,
}

pub(crate) fn to_bytes(artifact: &IndexArtifact) -> Result<Vec<u8>, LoomError> {
    let payload = postcard::to_stdvec(artifact)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&ArtifactHeader::current().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub(crate) fn from_bytes(bytes: &[u8]) -> Result<IndexArtifact, LoomError> {
    if bytes.len() as u64 > MAX_ARTIFACT_SIZE {
        return Err(LoomError::Internal(format!(
            "vector index artifact of {} bytes exceeds the {MAX_ARTIFACT_SIZE} byte limit",
            bytes.len()
        )));
    }
    ArtifactHeader::from_bytes(bytes)?.validate()?;
    Ok(postcard::from_bytes(&bytes[HEADER_LEN..])?)
}

// =============================================================================
// FILE I/O
// =============================================================================

pub(crate) fn write(path: &Path, artifact: &IndexArtifact) -> Result<(), LoomError> {
    let bytes = to_bytes(artifact)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    std::fs::write(&staging, &bytes)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

pub(crate) fn read(path: &Path) -> Result<IndexArtifact, LoomError> {
    let len = std::fs::metadata(path)?.len();
    if len > MAX_ARTIFACT_SIZE {
        return Err(LoomError::Internal(format!(
            "vector index artifact {} is {len} bytes, over the {MAX_ARTIFACT_SIZE} byte limit",
            path.display()
        )));
    }
    from_bytes(&std::fs::read(path)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> IndexArtifact {
        let node = Uuid::new_v4();
        IndexArtifact {
            tenant: Uuid::new_v4(),
            graph: Uuid::new_v4(),
            dimensionality: 2,
            domains: BTreeSet::from([VectorDomain::Node]),
            generation: 7,
            built_micros: 1_700_000_000_000_000,
            entries: vec![(
                Owner::Node(node),
                vec![IndexedVector {
                    guid: Uuid::new_v4(),
                    values: vec![0.5, 0.25],
                }],
            )],
        }
    }

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("index.lgvx");
        let artifact = sample();
        write(&path, &artifact).unwrap();
        assert_eq!(read(&path).unwrap(), artifact);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes[4] = primitives::INDEX_FORMAT_VERSION + 1;
        assert!(from_bytes(&bytes).is_err());
        bytes[0] = b'X';
        assert!(from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_short_and_truncated_input() {
        assert!(from_bytes(b"LGV").is_err());
        let bytes = to_bytes(&sample()).unwrap();
        assert!(from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
