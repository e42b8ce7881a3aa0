//! Builders for crafted exFAT images used by unit tests

use super::directory::{
    entry_set_checksum, ENTRY_TYPE_FILE, ENTRY_TYPE_FILENAME, ENTRY_TYPE_STREAM,
    NAME_UNITS_PER_RECORD, RECORD_SIZE,
};
use super::VolumeGeometry;
use crate::fs::common::BlockDevice;

/// Boot sector field values for a test image
#[derive(Debug, Clone)]
pub struct TestGeometry {
    pub partition_offset: u64,
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub root_dir_first_cluster: u32,
    pub volume_serial_number: u32,
    pub file_system_revision: u16,
    pub volume_flags: u16,
    pub bytes_per_sector_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
    pub percent_in_use: u8,
}

impl Default for TestGeometry {
    /// 512-byte sectors and clusters, heap at sector 8, root at cluster 2
    fn default() -> Self {
        Self {
            partition_offset: 0,
            volume_length: 64,
            fat_offset: 4,
            fat_length: 4,
            cluster_heap_offset: 8,
            cluster_count: 16,
            root_dir_first_cluster: 2,
            volume_serial_number: 0x1234_5678,
            file_system_revision: 0x0100,
            volume_flags: 0,
            bytes_per_sector_shift: 9,
            sectors_per_cluster_shift: 0,
            number_of_fats: 1,
            percent_in_use: 0,
        }
    }
}

/// Serialize a 512-byte boot sector
pub fn boot_sector(layout: &TestGeometry) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    sector[0..3].copy_from_slice(&[0xEB, 0x76, 0x90]);
    sector[3..11].copy_from_slice(b"EXFAT   ");
    sector[64..72].copy_from_slice(&layout.partition_offset.to_le_bytes());
    sector[72..80].copy_from_slice(&layout.volume_length.to_le_bytes());
    sector[80..84].copy_from_slice(&layout.fat_offset.to_le_bytes());
    sector[84..88].copy_from_slice(&layout.fat_length.to_le_bytes());
    sector[88..92].copy_from_slice(&layout.cluster_heap_offset.to_le_bytes());
    sector[92..96].copy_from_slice(&layout.cluster_count.to_le_bytes());
    sector[96..100].copy_from_slice(&layout.root_dir_first_cluster.to_le_bytes());
    sector[100..104].copy_from_slice(&layout.volume_serial_number.to_le_bytes());
    sector[104..106].copy_from_slice(&layout.file_system_revision.to_le_bytes());
    sector[106..108].copy_from_slice(&layout.volume_flags.to_le_bytes());
    sector[108] = layout.bytes_per_sector_shift;
    sector[109] = layout.sectors_per_cluster_shift;
    sector[110] = layout.number_of_fats;
    sector[111] = 0x80;
    sector[112] = layout.percent_in_use;
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

/// A record of the given type, otherwise zeroed
pub fn record(entry_type: u8) -> [u8; RECORD_SIZE] {
    let mut rec = [0u8; RECORD_SIZE];
    rec[0] = entry_type;
    rec
}

/// A file name record carrying up to 15 code units
pub fn name_record(units: &[u16]) -> [u8; RECORD_SIZE] {
    let mut rec = record(ENTRY_TYPE_FILENAME);
    for (i, unit) in units.iter().take(NAME_UNITS_PER_RECORD).enumerate() {
        rec[2 + i * 2..4 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    rec
}

/// Description of one entry set to serialize
#[derive(Debug, Clone)]
pub struct EntrySpec {
    pub units: Vec<u16>,
    pub valid_data_length: u64,
    pub data_length: u64,
    pub first_cluster: u32,
    pub attributes: u16,
}

impl EntrySpec {
    pub fn file(name: &str, valid_data_length: u64, first_cluster: u32) -> Self {
        Self::from_units(name.encode_utf16().collect(), valid_data_length, first_cluster)
    }

    pub fn from_units(units: Vec<u16>, valid_data_length: u64, first_cluster: u32) -> Self {
        Self {
            units,
            valid_data_length,
            data_length: 4096,
            first_cluster,
            attributes: 0x20,
        }
    }
}

/// Serialize an entry set with a correct secondary count and checksum
pub fn entry_set_records(spec: &EntrySpec) -> Vec<[u8; RECORD_SIZE]> {
    let name_records: Vec<[u8; RECORD_SIZE]> = spec
        .units
        .chunks(NAME_UNITS_PER_RECORD)
        .map(name_record)
        .collect();

    let mut primary = record(ENTRY_TYPE_FILE);
    primary[1] = (1 + name_records.len()) as u8;
    primary[4..6].copy_from_slice(&spec.attributes.to_le_bytes());

    let mut stream = record(ENTRY_TYPE_STREAM);
    stream[1] = 0x03;
    stream[3] = spec.units.len() as u8;
    stream[8..16].copy_from_slice(&spec.valid_data_length.to_le_bytes());
    stream[20..24].copy_from_slice(&spec.first_cluster.to_le_bytes());
    stream[24..32].copy_from_slice(&spec.data_length.to_le_bytes());

    let mut records = vec![primary, stream];
    records.extend(name_records);

    let checksum = entry_set_checksum(&records);
    records[0][2..4].copy_from_slice(&checksum.to_le_bytes());
    records
}

/// A whole image: boot sector, then `heap_clusters` zeroed clusters
pub struct TestImage {
    pub layout: TestGeometry,
    pub data: Vec<u8>,
}

impl TestImage {
    pub fn new(layout: TestGeometry, heap_clusters: u32) -> Self {
        let sector = 1u64 << layout.bytes_per_sector_shift;
        let cluster = sector << layout.sectors_per_cluster_shift;
        let len = u64::from(layout.cluster_heap_offset) * sector + u64::from(heap_clusters) * cluster;

        let mut data = vec![0u8; len.max(512) as usize];
        data[..512].copy_from_slice(&boot_sector(&layout));
        Self { layout, data }
    }

    pub fn geometry(&self) -> VolumeGeometry {
        VolumeGeometry::parse(&self.data[..512]).expect("test boot sector parses")
    }

    fn cluster_start(&self, cluster: u32) -> usize {
        self.geometry()
            .cluster_offset(cluster)
            .expect("test cluster is addressable") as usize
    }

    /// Write directory records at the start of a cluster
    pub fn put_records(&mut self, cluster: u32, records: &[[u8; RECORD_SIZE]]) -> &mut Self {
        let start = self.cluster_start(cluster);
        let bytes = records.concat();
        self.data[start..start + bytes.len()].copy_from_slice(&bytes);
        self
    }

    /// Write raw bytes at the start of a cluster
    pub fn put_bytes(&mut self, cluster: u32, bytes: &[u8]) -> &mut Self {
        let start = self.cluster_start(cluster);
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn device(&self) -> BlockDevice {
        BlockDevice::from_bytes(self.data.clone())
    }
}
