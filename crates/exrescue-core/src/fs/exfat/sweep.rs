//! Brute-force cluster sweep
//!
//! When the directory tree cannot be trusted every cluster of the heap is
//! treated as a candidate directory block. This is deliberately separate from
//! listing the root directory: nothing here follows chains or subdirectories.


use super::walker::{DirectoryWalker, EntrySink, WalkStop};
use super::VolumeGeometry;
use crate::fs::common::BlockDevice;

/// Default number of clusters between progress reports
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 512;

/// Periodic sweep progress
#[derive(Debug, Clone)]
pub struct SweepProgress {
    pub cluster: u32,
    pub offset: u64,
    pub percent_complete: f64,
    pub files_rescued: u64,
}

/// Totals for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub clusters_visited: u64,
    pub entry_sets: u64,
    pub blocks_aborted: u64,
}

/// Walks every cluster from the root directory cluster to the end of the heap
pub struct ClusterSweepScanner<'a> {
    walker: DirectoryWalker<'a>,
    geometry: &'a VolumeGeometry,
    progress_interval: u32,
    progress_callback: Option<Box<dyn FnMut(&SweepProgress) + 'a>>,
}

impl<'a> ClusterSweepScanner<'a> {
    pub fn new(device: &'a BlockDevice, geometry: &'a VolumeGeometry) -> Self {
        Self {
            walker: DirectoryWalker::new(device, geometry),
            geometry,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            progress_callback: None,
        }
    }

    /// Report progress every `interval` clusters (0 disables reporting)
    pub fn with_progress_interval(mut self, interval: u32) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set progress callback
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&SweepProgress) + 'a,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Clusters the sweep covers, in visiting order
    pub fn cluster_range(&self) -> std::ops::Range<u32> {
        self.geometry.root_dir_first_cluster..self.geometry.cluster_count
    }

    /// Walk every cluster in range as a directory block
    pub fn sweep(&mut self, sink: &mut dyn EntrySink) -> SweepSummary {
        let range = self.cluster_range();
        tracing::info!(
            "Sweeping clusters {}..{} for directory entries",
            range.start,
            range.end
        );

        let mut summary = SweepSummary::default();

        for cluster in range {
            let Some(offset) = self.geometry.cluster_offset(cluster) else {
                continue;
            };

            if self.progress_interval != 0 && cluster % self.progress_interval == 0 {
                self.emit_progress(SweepProgress {
                    cluster,
                    offset,
                    percent_complete: f64::from(cluster) / f64::from(self.geometry.cluster_count)
                        * 100.0,
                    files_rescued: sink.files_rescued(),
                });
            }

            let walk = self.walker.walk_at(offset, sink);
            summary.clusters_visited += 1;
            summary.entry_sets += walk.entry_sets;
            if walk.stop == WalkStop::Aborted {
                summary.blocks_aborted += 1;
            }
        }

        tracing::info!(
            "Sweep complete: {} clusters visited, {} entry sets, {} blocks aborted",
            summary.clusters_visited,
            summary.entry_sets,
            summary.blocks_aborted
        );

        summary
    }

    fn emit_progress(&mut self, progress: SweepProgress) {
        if let Some(callback) = self.progress_callback.as_mut() {
            callback(&progress);
        }
    }
}
