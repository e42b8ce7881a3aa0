//! exFAT directory entry set decoding
//!
//! exFAT uses 32-byte directory records. A file is described by an entry set:
//! - 0x85: File entry (attributes, timestamps, checksum)
//! - 0xC0: Stream extension (name length, sizes, first cluster)
//! - 0xC1: File name entry (15 UTF-16 code units each)
//!
//! 0x00 marks the end of a directory. Every other type is inert here.

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use std::io::{self, Cursor};

use super::timestamp::ExFatTimestamp;
use crate::fs::common::BlockDevice;

/// Directory record size in bytes
pub const RECORD_SIZE: usize = 32;

/// Entry type codes
pub const ENTRY_TYPE_END: u8 = 0x00;
pub const ENTRY_TYPE_FILE: u8 = 0x85;
pub const ENTRY_TYPE_STREAM: u8 = 0xC0;
pub const ENTRY_TYPE_FILENAME: u8 = 0xC1;

/// UTF-16 code units carried by one file name record
pub const NAME_UNITS_PER_RECORD: usize = 15;

/// File attributes
pub const ATTR_DIRECTORY: u16 = 0x10;

/// One raw directory record and where it was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub offset: u64,
    pub bytes: [u8; RECORD_SIZE],
}

impl DirectoryRecord {
    pub fn entry_type(&self) -> u8 {
        self.bytes[0]
    }

    /// UTF-16 code units of a file name record
    fn name_units(&self) -> impl Iterator<Item = u16> + '_ {
        self.bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
    }
}

/// Sequential reader over the records of one directory block.
///
/// The stream owns its position and a record budget; it never shares a cursor
/// with anything else reading the image.
pub struct RecordStream<'a> {
    device: &'a BlockDevice,
    position: u64,
    remaining: u64,
    consumed: u64,
}

impl<'a> RecordStream<'a> {
    pub fn new(device: &'a BlockDevice, offset: u64, budget: u64) -> Self {
        Self {
            device,
            position: offset,
            remaining: budget,
            consumed: 0,
        }
    }

    /// Next record, or `None` once the budget or the image is exhausted
    pub fn next_record(&mut self) -> Option<DirectoryRecord> {
        if self.remaining == 0 {
            return None;
        }

        let data = self.device.read_bytes(self.position, RECORD_SIZE as u64).ok()?;
        let mut bytes = [0u8; RECORD_SIZE];
        bytes.copy_from_slice(data);

        let record = DirectoryRecord {
            offset: self.position,
            bytes,
        };
        self.position += RECORD_SIZE as u64;
        self.remaining -= 1;
        self.consumed += 1;

        tracing::trace!("record 0x{:02X} at 0x{:x}", record.entry_type(), record.offset);
        Some(record)
    }

    /// Records read so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn budget_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// File entry (primary record of an entry set)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub secondary_count: u8,
    pub set_checksum: u16,
    pub file_attributes: u16,
    pub created: ExFatTimestamp,
    pub modified: ExFatTimestamp,
    pub accessed: ExFatTimestamp,
}

impl FileEntry {
    /// Parse file entry from raw bytes
    pub fn parse(data: &[u8; RECORD_SIZE]) -> io::Result<Self> {
        let mut cursor = Cursor::new(&data[..]);
        cursor.set_position(1);

        let secondary_count = cursor.read_u8()?;
        let set_checksum = cursor.read_u16::<LittleEndian>()?;
        let file_attributes = cursor.read_u16::<LittleEndian>()?;
        let _reserved1 = cursor.read_u16::<LittleEndian>()?;
        let create_timestamp = cursor.read_u32::<LittleEndian>()?;
        let modify_timestamp = cursor.read_u32::<LittleEndian>()?;
        let access_timestamp = cursor.read_u32::<LittleEndian>()?;

        Ok(FileEntry {
            secondary_count,
            set_checksum,
            file_attributes,
            created: ExFatTimestamp::new(create_timestamp, data[20], data[22]),
            modified: ExFatTimestamp::new(modify_timestamp, data[21], data[23]),
            accessed: ExFatTimestamp::new(access_timestamp, 0, data[24]),
        })
    }

    /// Check if this is a directory
    pub fn is_directory(&self) -> bool {
        self.file_attributes & ATTR_DIRECTORY != 0
    }
}

/// Stream extension entry (contains size and cluster info)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamExtensionEntry {
    /// General flags (NoFatChain bit)
    pub general_flags: u8,
    /// File name length in UTF-16 code units
    pub name_length: u8,
    pub name_hash: u16,
    /// Bytes actually written
    pub valid_data_length: u64,
    pub first_cluster: u32,
    /// Allocated size
    pub data_length: u64,
}

impl StreamExtensionEntry {
    /// Parse stream extension entry from raw bytes
    pub fn parse(data: &[u8; RECORD_SIZE]) -> io::Result<Self> {
        let mut cursor = Cursor::new(&data[..]);
        cursor.set_position(1);

        let general_flags = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let name_length = cursor.read_u8()?;
        let name_hash = cursor.read_u16::<LittleEndian>()?;
        let _reserved2 = cursor.read_u16::<LittleEndian>()?;
        let valid_data_length = cursor.read_u64::<LittleEndian>()?;
        let _reserved3 = cursor.read_u32::<LittleEndian>()?;
        let first_cluster = cursor.read_u32::<LittleEndian>()?;
        let data_length = cursor.read_u64::<LittleEndian>()?;

        Ok(StreamExtensionEntry {
            general_flags,
            name_length,
            name_hash,
            valid_data_length,
            first_cluster,
            data_length,
        })
    }

    /// Check if file uses contiguous allocation (NoFatChain)
    pub fn is_contiguous(&self) -> bool {
        self.general_flags & 0x02 != 0
    }

    /// Number of file name records the name needs
    pub fn expected_name_records(&self) -> usize {
        (self.name_length as usize).div_ceil(NAME_UNITS_PER_RECORD)
    }
}

/// Integrity fields of an entry set compared against what was read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Integrity {
    pub computed_checksum: u16,
    pub checksum_matches: bool,
    pub secondary_count_matches: bool,
}

/// A decoded entry set (File + StreamExtension + FileNames)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySet {
    /// Image offset of the primary record
    pub offset: u64,
    pub file_entry: FileEntry,
    pub stream_extension: StreamExtensionEntry,
    /// Name decoded from the collected UTF-16 units
    pub name: String,
    /// False when unpaired surrogates were replaced
    pub utf16_valid: bool,
    /// Records of another type found where a name record was expected
    pub skipped_records: usize,
    pub integrity: Integrity,
}

impl EntrySet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn valid_data_length(&self) -> u64 {
        self.stream_extension.valid_data_length
    }

    pub fn data_length(&self) -> u64 {
        self.stream_extension.data_length
    }

    pub fn first_cluster(&self) -> u32 {
        self.stream_extension.first_cluster
    }

    pub fn is_directory(&self) -> bool {
        self.file_entry.is_directory()
    }
}

/// Why an attempted entry set was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// First record was not a file entry
    NotPrimary(u8),
    /// Record after the file entry was not a stream extension
    MissingStreamExtension(u8),
    /// Budget or image ran out mid-set
    Truncated,
}

/// Result of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Entry(EntrySet),
    Skip(SkipReason),
}

/// Decodes entry sets from a record stream
pub struct EntrySetDecoder;

impl EntrySetDecoder {
    /// Read a primary record from the stream and decode its entry set
    pub fn decode(stream: &mut RecordStream<'_>) -> Decoded {
        match stream.next_record() {
            Some(primary) => Self::decode_from(primary, stream),
            None => Decoded::Skip(SkipReason::Truncated),
        }
    }

    /// Decode the entry set that starts with an already-read primary record
    pub fn decode_from(primary: DirectoryRecord, stream: &mut RecordStream<'_>) -> Decoded {
        if primary.entry_type() != ENTRY_TYPE_FILE {
            return Decoded::Skip(SkipReason::NotPrimary(primary.entry_type()));
        }

        let stream_record = match stream.next_record() {
            Some(record) => record,
            None => return Decoded::Skip(SkipReason::Truncated),
        };
        if stream_record.entry_type() != ENTRY_TYPE_STREAM {
            return Decoded::Skip(SkipReason::MissingStreamExtension(
                stream_record.entry_type(),
            ));
        }

        let (Ok(file_entry), Ok(stream_extension)) = (
            FileEntry::parse(&primary.bytes),
            StreamExtensionEntry::parse(&stream_record.bytes),
        ) else {
            return Decoded::Skip(SkipReason::Truncated);
        };

        let name_length = stream_extension.name_length as usize;
        let mut units: Vec<u16> = Vec::with_capacity(name_length);
        let mut set_records = vec![primary.bytes, stream_record.bytes];
        let mut skipped_records = 0;

        while units.len() < name_length {
            let record = match stream.next_record() {
                Some(record) => record,
                None => return Decoded::Skip(SkipReason::Truncated),
            };
            if record.entry_type() != ENTRY_TYPE_FILENAME {
                skipped_records += 1;
                continue;
            }

            let take = (name_length - units.len()).min(NAME_UNITS_PER_RECORD);
            units.extend(record.name_units().take(take));
            set_records.push(record.bytes);
        }

        let (name, utf16_valid) = decode_name(&units);

        let computed_checksum = entry_set_checksum(&set_records);
        let integrity = Integrity {
            computed_checksum,
            checksum_matches: computed_checksum == file_entry.set_checksum,
            secondary_count_matches: file_entry.secondary_count as usize == set_records.len() - 1,
        };
        if !integrity.checksum_matches || !integrity.secondary_count_matches {
            tracing::debug!(
                "Entry set at 0x{:x} ({:?}): checksum 0x{:04X} vs stored 0x{:04X}, {} secondary records vs stored {}",
                primary.offset,
                name,
                computed_checksum,
                file_entry.set_checksum,
                set_records.len() - 1,
                file_entry.secondary_count
            );
        }

        Decoded::Entry(EntrySet {
            offset: primary.offset,
            file_entry,
            stream_extension,
            name,
            utf16_valid,
            skipped_records,
            integrity,
        })
    }
}

/// Decode UTF-16 code units; unpaired surrogates become U+FFFD
fn decode_name(units: &[u16]) -> (String, bool) {
    let bytes: Vec<u8> = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
    let (decoded, had_errors) = UTF_16LE.decode_without_bom_handling(&bytes);
    (decoded.into_owned(), !had_errors)
}

/// exFAT entry set checksum over every record of the set, skipping the
/// checksum field itself (bytes 2 and 3 of the primary record)
pub fn entry_set_checksum(records: &[[u8; RECORD_SIZE]]) -> u16 {
    let mut checksum: u16 = 0;
    for (index, record) in records.iter().enumerate() {
        for (position, &byte) in record.iter().enumerate() {
            if index == 0 && (position == 2 || position == 3) {
                continue;
            }
            checksum = checksum.rotate_right(1).wrapping_add(u16::from(byte));
        }
    }
    checksum
}
