//! Direct-offset file rescue
//!
//! A candidate's bytes are read straight from its first cluster, assuming the
//! extent is contiguous. The FAT is never consulted, so only small files
//! (a few clusters at most) are attempted.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::directory::EntrySet;
use super::VolumeGeometry;
use crate::error::ScanError;
use crate::fs::common::BlockDevice;

/// Default destination directory for rescued files
pub const DEFAULT_RESCUE_DIR: &str = "rescue.dir";

/// Default upper bound on rescued size, in clusters
pub const DEFAULT_MAX_CLUSTERS: u64 = 4;

/// What to do when reading or writing a candidate fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abandon the rest of the directory block being walked
    #[default]
    AbortBlock,
    /// Skip the failed candidate and keep walking
    SkipCandidate,
}

/// Rescue configuration
#[derive(Debug, Clone)]
pub struct RescueConfig {
    pub destination_dir: PathBuf,
    pub max_clusters: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from(DEFAULT_RESCUE_DIR),
            max_clusters: DEFAULT_MAX_CLUSTERS,
            failure_policy: FailurePolicy::AbortBlock,
        }
    }
}

/// Why an entry set is not eligible for rescue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Nothing was ever written
    Empty,
    /// Larger than the contiguous-read bound
    TooLarge { length: u64, limit: u64 },
    /// Name contains characters outside `[A-Za-z0-9_.-]`
    UnsafeName,
    /// First cluster is reserved or unaddressable
    UnaddressableCluster(u32),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "no valid data"),
            RejectReason::TooLarge { length, limit } => {
                write!(f, "{} bytes exceeds the {} byte limit", length, limit)
            }
            RejectReason::UnsafeName => write!(f, "name has unsafe characters"),
            RejectReason::UnaddressableCluster(cluster) => {
                write!(f, "cluster {} is not addressable", cluster)
            }
        }
    }
}

/// An entry set that passed every eligibility check
#[derive(Debug, Clone)]
pub struct RescueCandidate<'e> {
    pub entry: &'e EntrySet,
    /// Image offset of the first cluster
    pub offset: u64,
    pub length: u64,
}

impl RescueCandidate<'_> {
    /// Output file name: `<name>.<first cluster>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.entry.name, self.entry.first_cluster())
    }
}

/// A file written to the destination directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RescuedFile {
    pub name: String,
    pub first_cluster: u32,
    pub source_offset: u64,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Result of one rescue attempt
#[derive(Debug)]
pub enum RescueOutcome {
    Rescued(RescuedFile),
    Rejected(RejectReason),
    Failed(ScanError),
}

/// Names made only of ASCII alphanumerics, `_`, `-` and `.`
///
/// Path separators and control characters never pass, so a corrupted name
/// cannot escape the destination directory.
pub fn is_safe_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Copies plausible small files straight out of the image
pub struct RescueExtractor {
    config: RescueConfig,
}

impl RescueExtractor {
    pub fn new(config: RescueConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RescueConfig {
        &self.config
    }

    /// Largest valid data length that will be rescued
    pub fn size_limit(&self, geometry: &VolumeGeometry) -> u64 {
        self.config
            .max_clusters
            .saturating_mul(geometry.cluster_size())
    }

    /// Check whether an entry set qualifies for rescue
    pub fn evaluate<'e>(
        &self,
        geometry: &VolumeGeometry,
        entry: &'e EntrySet,
    ) -> Result<RescueCandidate<'e>, RejectReason> {
        let length = entry.valid_data_length();
        if length == 0 {
            return Err(RejectReason::Empty);
        }

        let limit = self.size_limit(geometry);
        if length > limit {
            return Err(RejectReason::TooLarge { length, limit });
        }

        if !is_safe_name(&entry.name) {
            return Err(RejectReason::UnsafeName);
        }

        let offset = geometry
            .cluster_offset(entry.first_cluster())
            .ok_or(RejectReason::UnaddressableCluster(entry.first_cluster()))?;

        Ok(RescueCandidate {
            entry,
            offset,
            length,
        })
    }

    /// Where a candidate would be written
    pub fn output_path(&self, candidate: &RescueCandidate<'_>) -> PathBuf {
        self.config.destination_dir.join(candidate.file_name())
    }

    /// Read a candidate's bytes and write them to the destination directory
    pub fn extract(
        &self,
        device: &BlockDevice,
        candidate: &RescueCandidate<'_>,
    ) -> Result<RescuedFile, ScanError> {
        let data = device.read_bytes(candidate.offset, candidate.length)?;
        let path = self.output_path(candidate);
        write_file(&path, data)?;

        let mut hasher = Sha256::new();
        hasher.update(data);

        Ok(RescuedFile {
            name: candidate.entry.name.clone(),
            first_cluster: candidate.entry.first_cluster(),
            source_offset: candidate.offset,
            path,
            bytes: candidate.length,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }

    /// Evaluate and, if eligible, extract one entry set
    pub fn try_rescue(
        &self,
        device: &BlockDevice,
        geometry: &VolumeGeometry,
        entry: &EntrySet,
    ) -> RescueOutcome {
        let candidate = match self.evaluate(geometry, entry) {
            Ok(candidate) => candidate,
            Err(reason) => return RescueOutcome::Rejected(reason),
        };

        match self.extract(device, &candidate) {
            Ok(file) => RescueOutcome::Rescued(file),
            Err(e) => RescueOutcome::Failed(e),
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut output_file = File::create(path)?;
    output_file.write_all(data)?;
    output_file.flush()
}
