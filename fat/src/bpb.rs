// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BIOS Parameter Block parsing and FAT variant dispatch.
//!
//! The 90-byte header at offset 0 of a FAT volume is read as a common
//! 36-byte prefix (fields shared by every FAT width) followed by one
//! of two width-specific tails, picked by whether `fat_size_16` is
//! zero (FAT32) or not (FAT12/16, reclassified after geometry is
//! known).

use fatvol_err::{Error, FsError};
use fatvol_storage::{ByteStore, VolumeStream};
use log::error;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout};

pub(crate) const BPB_LEN: usize = 90;

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
pub(crate) struct BpbCommon {
    pub jmp_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: U16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: U16,
    pub num_fats: u8,
    pub root_entries: U16,
    pub total_sectors_16: U16,
    pub media: u8,
    pub fat_size_16: U16,
    pub sectors_per_track: U16,
    pub num_heads: U16,
    pub hidden_sectors: U32,
    pub total_sectors_32: U32,
}

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
pub(crate) struct Bpb1216 {
    pub drive_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_serial: U32,
    pub label: [u8; 11],
    pub fs_type: [u8; 8],
}

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
pub(crate) struct Bpb32 {
    pub fat_size_32: U32,
    pub ext_flags: U16,
    pub fs_version: U16,
    pub root_cluster: U32,
    pub fs_info: U16,
    pub backup_boot_sector: U16,
    pub reserved: [u8; 12],
    pub drive_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_serial: U32,
    pub label: [u8; 11],
    pub fs_type: [u8; 8],
}

/// Which of the three FAT entry widths this volume uses. Chosen once
/// at mount and carried as a plain tag rather than the source's
/// function-pointer dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

pub(crate) struct ParsedBpb {
    pub variant: FatVariant,
    pub bytes_per_sector: u32,
    pub bytes_per_cluster: u32,
    pub volsize: u64,
    pub first_fat_off: u64,
    pub active_fat_off: u64,
    pub fat_size_bytes: u64,
    pub num_fats: u8,
    pub num_root_entries: u16,
    pub root_cluster: u32,
    pub label_raw: [u8; 11],
    /// Start of the data region (cluster #2), in bytes from the volume base.
    pub data_start: u64,
    /// Start of the fixed root directory region, FAT12/16 only.
    pub root_region_start: u64,
    pub max_cluster_num: u32,
}

pub(crate) fn parse<S: ByteStore>(stream: &VolumeStream<S>) -> fatvol_err::Result<ParsedBpb> {
    let mut buf = [0u8; BPB_LEN];
    stream.read_exact_at(&mut buf, 0)?;

    let common = BpbCommon::ref_from_bytes(&buf[0..36])
        .map_err(|_| Error::Fs(FsError::NotFatFs))?;

    let bytes_per_sector = common.bytes_per_sector.get() as u32;
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
        error!("bytes per sector ({bytes_per_sector}) not one of 512/1024/2048/4096");
        return Err(Error::Fs(FsError::NotFatFs));
    }

    let sectors_per_cluster = common.sectors_per_cluster as u32;
    if sectors_per_cluster == 0 {
        error!("sectors per cluster is zero");
        return Err(Error::Fs(FsError::NotFatFs));
    }

    let root_entries = common.root_entries.get();
    if (root_entries as u32 * 32) % bytes_per_sector != 0 {
        error!("root entry count ({root_entries}) does not align to a sector");
        return Err(Error::Fs(FsError::NotFatFs));
    }

    let num_fats = common.num_fats;
    if num_fats > 0xf {
        error!("number of FATs ({num_fats}) exceeds 15");
        return Err(Error::Fs(FsError::NotFatFs));
    }

    let total_sectors_16 = common.total_sectors_16.get();
    let total_sectors_32 = common.total_sectors_32.get();
    if total_sectors_16 == 0 && total_sectors_32 == 0 {
        error!("neither total_sectors_16 nor total_sectors_32 is set");
        return Err(Error::Fs(FsError::NotFatFs));
    }

    let bytes_per_cluster = bytes_per_sector * sectors_per_cluster;
    let total_sectors = if total_sectors_16 != 0 {
        total_sectors_16 as u64
    } else {
        total_sectors_32 as u64
    };
    let volsize = total_sectors * bytes_per_sector as u64;

    let first_fat_off = common.reserved_sectors.get() as u64 * bytes_per_sector as u64;
    let fat_size_16 = common.fat_size_16.get();

    if fat_size_16 == 0 {
        let fat32 = Bpb32::ref_from_bytes(&buf[36..90]).map_err(|_| Error::Fs(FsError::NotFatFs))?;

        let fat_size_bytes = fat32.fat_size_32.get() as u64 * bytes_per_sector as u64;
        let data_start_off = first_fat_off + num_fats as u64 * fat_size_bytes;

        let mut active_fat_off = first_fat_off;
        if fat32.ext_flags.get() & 0x80 != 0 {
            let active_idx = (fat32.ext_flags.get() & 0xf) as u8;
            if active_idx >= num_fats {
                error!("active FAT index ({active_idx}) out of range ({num_fats} FATs)");
                return Err(Error::Fs(FsError::NotFatFs));
            }
            active_fat_off += fat_size_bytes * active_idx as u64;
        }

        if data_start_off > volsize {
            error!("data area starts ({data_start_off}) beyond the volume ({volsize})");
            return Err(Error::Fs(FsError::NotFatFs));
        }
        let max_cluster_num = ((volsize - data_start_off) / bytes_per_cluster as u64) as u32 + 1;

        let root_cluster = fat32.root_cluster.get();
        if root_cluster < 2 || root_cluster > max_cluster_num {
            error!("root cluster ({root_cluster}) out of range (max {max_cluster_num})");
            return Err(Error::Fs(FsError::NotFatFs));
        }

        Ok(ParsedBpb {
            variant: FatVariant::Fat32,
            bytes_per_sector,
            bytes_per_cluster,
            volsize,
            first_fat_off,
            active_fat_off,
            fat_size_bytes,
            num_fats,
            num_root_entries: 0,
            root_cluster,
            label_raw: fat32.label,
            data_start: data_start_off,
            root_region_start: 0,
            max_cluster_num,
        })
    } else {
        let bpb1216 = Bpb1216::ref_from_bytes(&buf[36..62]).map_err(|_| Error::Fs(FsError::NotFatFs))?;

        let fat_size_bytes = fat_size_16 as u64 * bytes_per_sector as u64;
        let root_region_start = first_fat_off + num_fats as u64 * fat_size_bytes;
        let root_region_len = root_entries as u64 * 32;
        let data_start_off = root_region_start + root_region_len;

        if root_region_start > volsize || data_start_off >= volsize {
            error!("root directory region ({root_region_start}..{data_start_off}) out of volume bounds");
            return Err(Error::Fs(FsError::NotFatFs));
        }

        let max_cluster_num = ((volsize - data_start_off) / bytes_per_cluster as u64) as u32 + 1;
        let variant = if max_cluster_num > 4085 {
            FatVariant::Fat16
        } else {
            FatVariant::Fat12
        };

        Ok(ParsedBpb {
            variant,
            bytes_per_sector,
            bytes_per_cluster,
            volsize,
            first_fat_off,
            active_fat_off: first_fat_off,
            fat_size_bytes,
            num_fats,
            num_root_entries: root_entries,
            root_cluster: 0,
            label_raw: bpb1216.label,
            data_start: data_start_off,
            root_region_start,
            max_cluster_num,
        })
    }
}

/// Strip trailing spaces from the 11-byte on-disk label and widen each
/// byte to a `char`, matching the source's byte-for-byte label decode.
pub(crate) fn decode_label(raw: &[u8; 11]) -> String {
    let mut end = 11;
    while end > 0 && raw[end - 1] == b' ' {
        end -= 1;
    }
    raw[..end].iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_label_strips_trailing_spaces() {
        let raw = *b"MYDISK     ";
        assert_eq!(decode_label(&raw), "MYDISK");
    }

    #[test]
    fn decode_label_keeps_embedded_spaces() {
        let raw = *b"NO NAME    ";
        assert_eq!(decode_label(&raw), "NO NAME");
    }
}
