/// Image access and the exFAT on-disk structures
pub mod common;
pub mod exfat;
