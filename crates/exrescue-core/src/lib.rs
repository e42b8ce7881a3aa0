//! exFAT metadata and small-file rescue from raw volume images.
//!
//! The image is never mounted and the File Allocation Table is never read:
//! directory blocks are decoded record by record, optionally across every
//! cluster of the heap, and small files are copied straight from their first
//! cluster.

use std::path::Path;

pub mod error;
pub mod fs;
pub mod session;

pub use error::{Result, ScanError};
pub use fs::common::BlockDevice;
pub use fs::exfat::directory::{Decoded, EntrySet, EntrySetDecoder, RecordStream, SkipReason};
pub use fs::exfat::rescue::{
    FailurePolicy, RejectReason, RescueCandidate, RescueConfig, RescueExtractor, RescueOutcome,
    RescuedFile,
};
pub use fs::exfat::sweep::{ClusterSweepScanner, SweepProgress, SweepSummary};
pub use fs::exfat::walker::{DirectoryWalker, EntrySink, WalkStop, WalkSummary};
pub use fs::exfat::VolumeGeometry;
pub use session::{RescueReport, ScanEvent, ScanSession};

/// An opened image together with its parsed boot sector
pub struct Volume {
    device: BlockDevice,
    geometry: VolumeGeometry,
}

impl Volume {
    /// Open an image file and parse its boot sector
    pub fn open(image_path: &Path) -> Result<Self> {
        tracing::info!("Opening {}", image_path.display());
        Self::from_device(BlockDevice::open(image_path)?)
    }

    /// Parse the boot sector of an already opened image
    pub fn from_device(device: BlockDevice) -> Result<Self> {
        let geometry = VolumeGeometry::read_from(&device)?;

        tracing::info!(
            "exFAT volume: {} clusters of {} bytes, heap at 0x{:x}, root directory cluster {}",
            geometry.cluster_count,
            geometry.cluster_size(),
            geometry.cluster_heap_start(),
            geometry.root_dir_first_cluster
        );

        Ok(Self { device, geometry })
    }

    pub fn device(&self) -> &BlockDevice {
        &self.device
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn walker(&self) -> DirectoryWalker<'_> {
        DirectoryWalker::new(&self.device, &self.geometry)
    }

    pub fn sweep_scanner(&self) -> ClusterSweepScanner<'_> {
        ClusterSweepScanner::new(&self.device, &self.geometry)
    }

    pub fn session(&self) -> ScanSession<'_> {
        ScanSession::new(&self.device, &self.geometry)
    }

    /// Walk the first block of the root directory
    pub fn walk_root(&self, sink: &mut dyn EntrySink) -> Option<WalkSummary> {
        let offset = self.geometry.root_directory_offset()?;
        Some(self.walker().walk_at(offset, sink))
    }
}
