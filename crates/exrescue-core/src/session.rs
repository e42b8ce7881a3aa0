//! Scan session: routes decoded entry sets to reporting and rescue
//!
//! The session is the sink handed to the walker and the sweep. It forwards
//! every entry set to a listener, optionally extracts rescue candidates, and
//! keeps a serialisable report of what was written.
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::fs::common::BlockDevice;
use crate::fs::exfat::directory::EntrySet;
use crate::fs::exfat::rescue::{
    FailurePolicy, RejectReason, RescueConfig, RescueExtractor, RescuedFile,
};
use crate::fs::exfat::walker::EntrySink;
use crate::fs::exfat::VolumeGeometry;

/// Something a session observed
#[derive(Debug)]
pub enum ScanEvent<'e> {
    /// An entry set was decoded
    Entry(&'e EntrySet),
    /// A candidate is about to be written
    Saving { entry: &'e EntrySet, path: &'e Path },
    Rescued(&'e RescuedFile),
    Rejected {
        entry: &'e EntrySet,
        reason: &'e RejectReason,
    },
    Failed {
        entry: &'e EntrySet,
        error: &'e ScanError,
    },
}

/// Summary of the files a session rescued
#[derive(Debug, Clone, Default, Serialize)]
pub struct RescueReport {
    pub destination_dir: PathBuf,
    pub entry_sets_seen: u64,
    pub rescued: Vec<RescuedFile>,
    pub duplicates_skipped: u64,
    pub rejected: u64,
    pub failed: u64,
    pub total_bytes_rescued: u64,
}

impl RescueReport {
    /// Export to JSON
    pub fn export_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

type Listener<'a> = Box<dyn FnMut(ScanEvent<'_>) + 'a>;

/// Entry sink that reports entry sets and optionally rescues them
pub struct ScanSession<'a> {
    device: &'a BlockDevice,
    geometry: &'a VolumeGeometry,
    extractor: Option<RescueExtractor>,
    written: HashSet<PathBuf>,
    report: RescueReport,
    listener: Option<Listener<'a>>,
}

impl<'a> ScanSession<'a> {
    /// Session that only reports entry sets
    pub fn new(device: &'a BlockDevice, geometry: &'a VolumeGeometry) -> Self {
        Self {
            device,
            geometry,
            extractor: None,
            written: HashSet::new(),
            report: RescueReport::default(),
            listener: None,
        }
    }

    /// Also rescue eligible entry sets
    pub fn with_rescue(mut self, config: RescueConfig) -> Self {
        self.report.destination_dir = config.destination_dir.clone();
        self.extractor = Some(RescueExtractor::new(config));
        self
    }

    /// Set the event listener
    pub fn set_listener<F>(&mut self, listener: F)
    where
        F: FnMut(ScanEvent<'_>) + 'a,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Whether eligible entry sets are also rescued
    pub fn rescue_enabled(&self) -> bool {
        self.extractor.is_some()
    }

    pub fn report(&self) -> &RescueReport {
        &self.report
    }

    pub fn into_report(self) -> RescueReport {
        self.report
    }

    fn emit(&mut self, event: ScanEvent<'_>) {
        if let Some(listener) = self.listener.as_mut() {
            listener(event);
        }
    }

    fn rescue(&mut self, entry: &EntrySet) -> ControlFlow<()> {
        let Some(extractor) = self.extractor.take() else {
            return ControlFlow::Continue(());
        };
        let flow = self.rescue_with(&extractor, entry);
        self.extractor = Some(extractor);
        flow
    }

    fn rescue_with(&mut self, extractor: &RescueExtractor, entry: &EntrySet) -> ControlFlow<()> {
        let candidate = match extractor.evaluate(self.geometry, entry) {
            Ok(candidate) => candidate,
            Err(reason) => {
                tracing::debug!("Not rescuing {:?}: {}", entry.name, reason);
                self.report.rejected += 1;
                self.emit(ScanEvent::Rejected {
                    entry,
                    reason: &reason,
                });
                return ControlFlow::Continue(());
            }
        };

        let path = extractor.output_path(&candidate);
        if self.written.contains(&path) {
            tracing::debug!("Already rescued {}", path.display());
            self.report.duplicates_skipped += 1;
            return ControlFlow::Continue(());
        }

        self.emit(ScanEvent::Saving {
            entry,
            path: &path,
        });

        match extractor.extract(self.device, &candidate) {
            Ok(file) => {
                tracing::info!("Rescued {} ({} bytes)", file.path.display(), file.bytes);
                self.written.insert(path);
                self.report.total_bytes_rescued += file.bytes;
                self.emit(ScanEvent::Rescued(&file));
                self.report.rescued.push(file);
                ControlFlow::Continue(())
            }
            Err(error) => {
                tracing::warn!("Failed to rescue {}: {}", path.display(), error);
                self.report.failed += 1;
                self.emit(ScanEvent::Failed {
                    entry,
                    error: &error,
                });
                match extractor.config().failure_policy {
                    FailurePolicy::AbortBlock => ControlFlow::Break(()),
                    FailurePolicy::SkipCandidate => ControlFlow::Continue(()),
                }
            }
        }
    }
}

impl EntrySink for ScanSession<'_> {
    fn accept(&mut self, entry: &EntrySet) -> ControlFlow<()> {
        self.report.entry_sets_seen += 1;
        self.emit(ScanEvent::Entry(entry));
        self.rescue(entry)
    }

    fn files_rescued(&self) -> u64 {
        self.report.rescued.len() as u64
    }
}
