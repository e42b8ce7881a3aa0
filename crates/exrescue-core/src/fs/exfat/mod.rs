/// exFAT volume geometry and cluster addressing
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use super::common::BlockDevice;
use crate::error::{Result, ScanError};

// Sub-modules
pub mod directory;
pub mod rescue;
pub mod sweep;
pub mod timestamp;
pub mod walker;

#[cfg(test)]
pub(crate) mod test_support;

/// exFAT file system name at offset 3
const EXFAT_SIGNATURE: &[u8; 8] = b"EXFAT   ";

/// Size of the fixed boot sector header
pub const BOOT_SECTOR_SIZE: usize = 512;

/// Trailing boot signature
pub const BOOT_SIGNATURE: u16 = 0xAA55;

/// First addressable cluster of the heap
pub const FIRST_DATA_CLUSTER: u32 = 2;

/// Volume layout parsed from the boot sector.
///
/// Apart from the trailing signature the header is trusted verbatim, so every
/// size derived from it saturates instead of overflowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub file_system_name: [u8; 8],
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

impl VolumeGeometry {
    /// Parse the boot sector from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(ScanError::ShortRead {
                offset: 0,
                needed: BOOT_SECTOR_SIZE as u64,
                available: data.len() as u64,
            });
        }

        let found = u16::from_le_bytes([data[510], data[511]]);
        if found != BOOT_SIGNATURE {
            return Err(ScanError::InvalidSignature { found });
        }

        let mut cursor = Cursor::new(data);

        // Skip jump boot
        cursor.set_position(3);
        let mut file_system_name = [0u8; 8];
        cursor.read_exact(&mut file_system_name)?;

        // Skip must-be-zero area (53 bytes)
        cursor.set_position(64);

        let partition_offset = cursor.read_u64::<LittleEndian>()?;
        let volume_length = cursor.read_u64::<LittleEndian>()?;
        let fat_offset = cursor.read_u32::<LittleEndian>()?;
        let fat_length = cursor.read_u32::<LittleEndian>()?;
        let cluster_heap_offset = cursor.read_u32::<LittleEndian>()?;
        let cluster_count = cursor.read_u32::<LittleEndian>()?;
        let root_dir_first_cluster = cursor.read_u32::<LittleEndian>()?;
        let volume_serial_number = cursor.read_u32::<LittleEndian>()?;
        let file_system_revision = cursor.read_u16::<LittleEndian>()?;
        let volume_flags = cursor.read_u16::<LittleEndian>()?;
        let bytes_per_sector_shift = cursor.read_u8()?;
        let sectors_per_cluster_shift = cursor.read_u8()?;
        let number_of_fats = cursor.read_u8()?;
        let _drive_select = cursor.read_u8()?;
        let percent_in_use = cursor.read_u8()?;

        let geometry = VolumeGeometry {
            file_system_name,
            partition_offset,
            volume_length,
            fat_offset,
            fat_length,
            cluster_heap_offset,
            cluster_count,
            root_dir_first_cluster,
            volume_serial_number,
            file_system_revision,
            volume_flags,
            bytes_per_sector_shift,
            sectors_per_cluster_shift,
            number_of_fats,
            percent_in_use,
        };

        if !geometry.has_exfat_name() {
            tracing::warn!(
                "Boot sector file system name is {:?}, not \"EXFAT   \"; continuing anyway",
                String::from_utf8_lossy(&geometry.file_system_name)
            );
        }

        Ok(geometry)
    }

    /// Read and parse the boot sector at the start of an image
    pub fn read_from(device: &BlockDevice) -> Result<Self> {
        let sector0 = device.read_sector(0)?;
        Self::parse(sector0)
    }

    /// Whether the header carries the standard "EXFAT   " name
    pub fn has_exfat_name(&self) -> bool {
        &self.file_system_name == EXFAT_SIGNATURE
    }

    /// Get bytes per sector
    pub fn bytes_per_sector(&self) -> u64 {
        1u64.checked_shl(u32::from(self.bytes_per_sector_shift))
            .unwrap_or(u64::MAX)
    }

    /// Get sectors per cluster
    pub fn sectors_per_cluster(&self) -> u64 {
        1u64.checked_shl(u32::from(self.sectors_per_cluster_shift))
            .unwrap_or(u64::MAX)
    }

    /// Get bytes per cluster
    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector()
            .saturating_mul(self.sectors_per_cluster())
    }

    /// Number of 32-byte directory records in one cluster
    pub fn record_budget(&self) -> u64 {
        self.cluster_size() / directory::RECORD_SIZE as u64
    }

    /// Byte offset of the cluster heap from the start of the image
    pub fn cluster_heap_start(&self) -> u64 {
        u64::from(self.cluster_heap_offset).saturating_mul(self.bytes_per_sector())
    }

    /// Translate a cluster number to its byte offset in the image.
    ///
    /// Returns `None` for the reserved clusters 0 and 1 and when the offset
    /// does not fit in 64 bits.
    pub fn cluster_offset(&self, cluster: u32) -> Option<u64> {
        let index = u64::from(cluster.checked_sub(FIRST_DATA_CLUSTER)?);
        let heap = u64::from(self.cluster_heap_offset).checked_mul(self.bytes_per_sector())?;
        index
            .checked_mul(self.cluster_size())?
            .checked_add(heap)
    }

    /// Byte offset of the first root directory cluster
    pub fn root_directory_offset(&self) -> Option<u64> {
        self.cluster_offset(self.root_dir_first_cluster)
    }

    /// Human-readable layout summary
    pub fn describe(&self) -> String {
        format!(
            "Partition Offset: {}\n\
             Volume Length: {}\n\
             FAT Offset: {}\n\
             FAT Length: {}\n\
             Cluster Heap Offset: {}\n\
             Total Clusters: {}\n\
             First Cluster of Root Directory: {}\n\
             Volume Serial Number: 0x{:08X}\n\
             File System Revision: {}.{}\n\
             Volume Flags: 0x{:04X}\n\
             Bytes Per Sector: {}\n\
             Sectors Per Cluster: {}\n\
             Number of FATs: {}\n\
             Percent In Use: {}",
            self.partition_offset,
            self.volume_length,
            self.fat_offset,
            self.fat_length,
            self.cluster_heap_offset,
            self.cluster_count,
            self.root_dir_first_cluster,
            self.volume_serial_number,
            self.file_system_revision >> 8,
            self.file_system_revision & 0xFF,
            self.volume_flags,
            self.bytes_per_sector(),
            self.sectors_per_cluster(),
            self.number_of_fats,
            self.percent_in_use
        )
    }
}
