//! Firmware artifacts.
//!
//! A successful build yields either one merged image or the split triple
//! bootloader / partition table / application. Offsets are fixed by the
//! board's partition layout, not computed:
//!
//! | kind            | file suffix            | offset  |
//! |-----------------|------------------------|---------|
//! | merged          | `.ino.merged.bin`      | 0x0     |
//! | bootloader      | `.ino.bootloader.bin`  | 0x0     |
//! | partition table | `.ino.partitions.bin`  | 0x8000  |
//! | application     | `.ino.bin`             | 0x10000 |

mod resolver;
pub mod wire;

use std::fmt;
use std::io;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use resolver::ArtifactResolver;

pub const MERGED_OFFSET: u32 = 0x0;
pub const BOOTLOADER_OFFSET: u32 = 0x0;
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;
pub const APPLICATION_OFFSET: u32 = 0x10000;

/// What an artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Bootloader,
    PartitionTable,
    Application,
    Merged,
}

impl ArtifactKind {
    /// The split kinds, in flash order.
    pub const SPLIT: [ArtifactKind; 3] = [
        ArtifactKind::Bootloader,
        ArtifactKind::PartitionTable,
        ArtifactKind::Application,
    ];

    /// Fixed flash offset for this kind.
    pub fn offset(&self) -> u32 {
        match self {
            Self::Bootloader => BOOTLOADER_OFFSET,
            Self::PartitionTable => PARTITION_TABLE_OFFSET,
            Self::Application => APPLICATION_OFFSET,
            Self::Merged => MERGED_OFFSET,
        }
    }

    /// Name used as the key in the wire artifact map.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader",
            Self::PartitionTable => "partitions",
            Self::Application => "application",
            Self::Merged => "merged",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "bootloader" => Some(Self::Bootloader),
            "partitions" => Some(Self::PartitionTable),
            "application" => Some(Self::Application),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }

    /// File name the compiler gives this artifact for a sketch.
    pub fn file_name(&self, sketch_name: &str) -> String {
        match self {
            Self::Bootloader => format!("{}.ino.bootloader.bin", sketch_name),
            Self::PartitionTable => format!("{}.ino.partitions.bin", sketch_name),
            Self::Application => format!("{}.ino.bin", sketch_name),
            Self::Merged => format!("{}.ino.merged.bin", sketch_name),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One binary image and where it goes in flash. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    offset: u32,
    bytes: Vec<u8>,
}

impl Artifact {
    /// Create an artifact at its kind's fixed offset.
    pub fn new(kind: ArtifactKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            offset: kind.offset(),
            bytes,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Offset as `0x`-prefixed lowercase hex, e.g. "0x10000".
    pub fn offset_hex(&self) -> String {
        format!("{:#x}", self.offset)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 hex digest of the payload.
    pub fn sha256(&self) -> String {
        compute_sha256(&self.bytes)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("offset", &self.offset_hex())
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The artifacts of one build, ordered by ascending offset.
///
/// Holds either a single merged image or any non-empty subset of the split
/// kinds, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    /// Build a set, enforcing the merged-or-split rule.
    ///
    /// A merged image takes precedence: when present, split artifacts are
    /// dropped. Two artifacts of the same kind are an error, as is an empty
    /// input.
    pub fn from_artifacts(artifacts: Vec<Artifact>) -> Result<Self, ArtifactError> {
        if artifacts.is_empty() {
            return Err(ArtifactError::Empty);
        }

        let mut seen = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            if seen.contains(&artifact.kind) {
                return Err(ArtifactError::DuplicateKind(artifact.kind));
            }
            seen.push(artifact.kind);
        }

        let mut artifacts = if seen.contains(&ArtifactKind::Merged) {
            if artifacts.len() > 1 {
                log::debug!("merged image present, ignoring {} split artifacts", artifacts.len() - 1);
            }
            artifacts
                .into_iter()
                .filter(|a| a.kind == ArtifactKind::Merged)
                .collect()
        } else {
            artifacts
        };

        artifacts.sort_by_key(|a| (a.offset, a.kind));
        Ok(Self { artifacts })
    }

    /// Artifacts in ascending offset order, which is also flash order.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn is_merged(&self) -> bool {
        self.artifacts.iter().any(|a| a.kind == ArtifactKind::Merged)
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    /// Split kinds absent from a split set. Empty for a merged set.
    pub fn missing_kinds(&self) -> Vec<ArtifactKind> {
        if self.is_merged() {
            return Vec::new();
        }
        ArtifactKind::SPLIT
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    /// Total payload size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.artifacts.iter().map(Artifact::len).sum()
    }
}

/// Errors from resolving or decoding artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("no binary files generated in {dir}")]
    NoArtifacts { dir: PathBuf },

    #[error("artifact set is empty")]
    Empty,

    #[error("duplicate {0} artifact")]
    DuplicateKind(ArtifactKind),

    #[error("unknown artifact name '{0}'")]
    UnknownName(String),

    #[error("artifact '{name}' has invalid base64: {reason}")]
    InvalidPayload { name: String, reason: String },

    #[error("artifact '{name}' has invalid offset '{value}'")]
    InvalidOffset { name: String, value: String },

    #[error("artifact '{name}' must be written at {expected}, got {actual}")]
    OffsetMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("artifact '{name}' failed integrity check")]
    DigestMismatch { name: String },
}

/// SHA-256 hex digest of a byte slice.
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
