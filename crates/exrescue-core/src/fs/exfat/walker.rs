//! Directory block walking
//!
//! A directory block is one cluster's worth of 32-byte records. The walker
//! never trusts SecondaryCount to jump over sets; it reads record by record and
//! lets the decoder pick up file entries.

use std::ops::ControlFlow;

use super::directory::{
    Decoded, EntrySet, EntrySetDecoder, RecordStream, SkipReason, ENTRY_TYPE_END,
    ENTRY_TYPE_FILE,
};
use super::VolumeGeometry;
use crate::fs::common::BlockDevice;

/// Receives every entry set a walk decodes
pub trait EntrySink {
    /// Handle one entry set; `Break` abandons the rest of the current block
    fn accept(&mut self, entry: &EntrySet) -> ControlFlow<()>;

    /// Files written so far, for progress reporting
    fn files_rescued(&self) -> u64 {
        0
    }
}

/// Collects entry sets into a vector
impl EntrySink for Vec<EntrySet> {
    fn accept(&mut self, entry: &EntrySet) -> ControlFlow<()> {
        self.push(entry.clone());
        ControlFlow::Continue(())
    }
}

/// Why a walk stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStop {
    /// Hit a 0x00 record
    EndOfDirectory,
    /// Read a full cluster of records
    BudgetExhausted,
    /// Ran off the end of the image
    StreamExhausted,
    /// The sink asked to stop
    Aborted,
}

/// Outcome of walking one directory block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub records_read: u64,
    pub entry_sets: u64,
    pub stop: WalkStop,
}

/// Walks directory blocks of one volume
pub struct DirectoryWalker<'a> {
    device: &'a BlockDevice,
    geometry: &'a VolumeGeometry,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(device: &'a BlockDevice, geometry: &'a VolumeGeometry) -> Self {
        Self { device, geometry }
    }

    /// Walk the block starting at a cluster; `None` if it has no offset
    pub fn walk_cluster(&self, cluster: u32, sink: &mut dyn EntrySink) -> Option<WalkSummary> {
        let offset = self.geometry.cluster_offset(cluster)?;
        Some(self.walk_at(offset, sink))
    }

    /// Walk one cluster's worth of records starting at a byte offset
    pub fn walk_at(&self, offset: u64, sink: &mut dyn EntrySink) -> WalkSummary {
        let mut stream = RecordStream::new(self.device, offset, self.geometry.record_budget());
        Self::walk(&mut stream, sink)
    }

    /// Walk records until end-of-directory, budget or stream exhaustion
    pub fn walk(stream: &mut RecordStream<'_>, sink: &mut dyn EntrySink) -> WalkSummary {
        let mut entry_sets = 0;

        let stop = loop {
            let Some(record) = stream.next_record() else {
                break if stream.budget_exhausted() {
                    WalkStop::BudgetExhausted
                } else {
                    WalkStop::StreamExhausted
                };
            };

            match record.entry_type() {
                ENTRY_TYPE_FILE => match EntrySetDecoder::decode_from(record, stream) {
                    Decoded::Entry(entry) => {
                        entry_sets += 1;
                        if sink.accept(&entry).is_break() {
                            break WalkStop::Aborted;
                        }
                    }
                    Decoded::Skip(SkipReason::Truncated) => {
                        tracing::debug!("Entry set at 0x{:x} truncated", record.offset);
                    }
                    Decoded::Skip(reason) => {
                        tracing::trace!("Entry set at 0x{:x} skipped: {:?}", record.offset, reason);
                    }
                },
                ENTRY_TYPE_END => break WalkStop::EndOfDirectory,
                _ => {}
            }
        };

        WalkSummary {
            records_read: stream.consumed(),
            entry_sets,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{entry_set_records, record, EntrySpec, TestGeometry, TestImage};
    use super::*;

    struct StopAfterFirst(usize);

    impl EntrySink for StopAfterFirst {
        fn accept(&mut self, _entry: &EntrySet) -> ControlFlow<()> {
            self.0 += 1;
            ControlFlow::Break(())
        }
    }

    #[test]
    fn test_end_marker_first_yields_nothing() {
        let mut image = TestImage::new(TestGeometry::default(), 4);
        image.put_records(2, &[record(0x00), record(0x85)]);
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        let summary = DirectoryWalker::new(&device, &geometry)
            .walk_cluster(2, &mut found)
            .unwrap();

        assert!(found.is_empty());
        assert_eq!(summary.stop, WalkStop::EndOfDirectory);
        assert_eq!(summary.records_read, 1);
    }

    #[test]
    fn test_unknown_records_are_skipped() {
        let mut records = vec![record(0x81), record(0x83), record(0x20)];
        records.extend(entry_set_records(&EntrySpec::file("kept.txt", 12, 6)));
        records.push(record(0x00));

        let mut image = TestImage::new(TestGeometry::default(), 4);
        image.put_records(2, &records);
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        let summary = DirectoryWalker::new(&device, &geometry)
            .walk_cluster(2, &mut found)
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "kept.txt");
        assert_eq!(summary.entry_sets, 1);
        assert_eq!(summary.stop, WalkStop::EndOfDirectory);
        assert_eq!(summary.records_read, 7);
    }

    #[test]
    fn test_multiple_entry_sets_in_order() {
        let mut records = entry_set_records(&EntrySpec::file("one", 1, 3));
        records.extend(entry_set_records(&EntrySpec::file("two", 2, 4)));
        records.extend(entry_set_records(&EntrySpec::file("three", 3, 5)));

        let mut image = TestImage::new(TestGeometry::default(), 4);
        image.put_records(2, &records);
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        DirectoryWalker::new(&device, &geometry).walk_cluster(2, &mut found);

        let names: Vec<&str> = found.iter().map(|e| e.name()).collect();
        assert_eq!(names, ["one", "two", "three"]);
        assert_eq!(found[1].offset, geometry.cluster_offset(2).unwrap() + 3 * 32);
    }

    #[test]
    fn test_budget_limits_walk_to_one_cluster() {
        // Cluster 2 full of inert records, an entry set at the start of cluster 3
        let mut image = TestImage::new(TestGeometry::default(), 4);
        image.put_records(2, &vec![record(0x81); 16]);
        image.put_records(3, &entry_set_records(&EntrySpec::file("next", 1, 4)));
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        let summary = DirectoryWalker::new(&device, &geometry)
            .walk_cluster(2, &mut found)
            .unwrap();

        assert!(found.is_empty());
        assert_eq!(summary.records_read, 16);
        assert_eq!(summary.stop, WalkStop::BudgetExhausted);
    }

    #[test]
    fn test_walk_past_image_end_stops_quietly() {
        let image = TestImage::new(TestGeometry::default(), 2);
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        let summary = DirectoryWalker::new(&device, &geometry)
            .walk_cluster(10, &mut found)
            .unwrap();

        assert_eq!(summary.records_read, 0);
        assert_eq!(summary.stop, WalkStop::StreamExhausted);
    }

    #[test]
    fn test_reserved_cluster_is_not_walked() {
        let image = TestImage::new(TestGeometry::default(), 2);
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        assert!(DirectoryWalker::new(&device, &geometry)
            .walk_cluster(1, &mut found)
            .is_none());
    }

    #[test]
    fn test_sink_break_aborts_block() {
        let mut records = entry_set_records(&EntrySpec::file("one", 1, 3));
        records.extend(entry_set_records(&EntrySpec::file("two", 2, 4)));

        let mut image = TestImage::new(TestGeometry::default(), 4);
        image.put_records(2, &records);
        let device = image.device();
        let geometry = image.geometry();

        let mut sink = StopAfterFirst(0);
        let summary = DirectoryWalker::new(&device, &geometry)
            .walk_cluster(2, &mut sink)
            .unwrap();

        assert_eq!(sink.0, 1);
        assert_eq!(summary.stop, WalkStop::Aborted);
        assert_eq!(summary.records_read, 3);
    }

    #[test]
    fn test_broken_set_does_not_stop_walk() {
        let mut broken = entry_set_records(&EntrySpec::file("lost", 1, 3));
        broken[1][0] = 0xA0; // not a stream extension
        let mut records = broken;
        records.extend(entry_set_records(&EntrySpec::file("found", 2, 4)));

        let mut image = TestImage::new(TestGeometry::default(), 4);
        image.put_records(2, &records);
        let device = image.device();
        let geometry = image.geometry();

        let mut found: Vec<EntrySet> = Vec::new();
        DirectoryWalker::new(&device, &geometry).walk_cluster(2, &mut found);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "found");
    }
}
