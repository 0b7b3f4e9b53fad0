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

//! Raw FAT12/16/32 entry accessors, the bounds-checked wrapper around
//! them, and the bulk-buffer variant used by the free-cluster scan.

use fatvol_err::{Error, FsError, Result};

use crate::bpb::FatVariant;
use crate::volume::Fs;
use fatvol_storage::ByteStore;

/// Sentinel written to mark the end of a cluster chain. Each width's
/// write accessor narrows this to its own encoding.
pub(crate) const END_OF_FILE: u32 = u32::MAX;

pub(crate) fn is_valid_cluster(max_cluster_num: u32, cluster: u32) -> bool {
    cluster >= 2 && cluster <= max_cluster_num
}

fn entry_offset(fat_off: u64, variant: FatVariant, cluster: u32) -> u64 {
    match variant {
        FatVariant::Fat12 => fat_off + (cluster as u64 * 3) / 2,
        FatVariant::Fat16 => fat_off + cluster as u64 * 2,
        FatVariant::Fat32 => fat_off + cluster as u64 * 4,
    }
}

/// Read one FAT entry at `cluster` through the active FAT copy,
/// without validating `cluster` itself.
pub(crate) fn read_entry<S: ByteStore>(fs: &Fs<S>, cluster: u32) -> Result<u32> {
    match fs.variant {
        FatVariant::Fat12 => {
            let off = entry_offset(fs.active_fat_off, fs.variant, cluster);
            let mut buf = [0u8; 2];
            fs.stream.read_exact_at(&mut buf, off)?;
            let word = u16::from_le_bytes(buf);
            Ok((if cluster & 1 != 0 {
                word >> 4
            } else {
                word & 0x0fff
            }) as u32)
        }
        FatVariant::Fat16 => {
            let off = entry_offset(fs.active_fat_off, fs.variant, cluster);
            let mut buf = [0u8; 2];
            fs.stream.read_exact_at(&mut buf, off)?;
            Ok(u16::from_le_bytes(buf) as u32)
        }
        FatVariant::Fat32 => {
            let off = entry_offset(fs.active_fat_off, fs.variant, cluster);
            let mut buf = [0u8; 4];
            fs.stream.read_exact_at(&mut buf, off)?;
            Ok(u32::from_le_bytes(buf) & 0x0fff_ffff)
        }
    }
}

/// Write one FAT entry at `cluster`, mirrored across every FAT copy
/// starting at `first_fat_off`.
pub(crate) fn write_entry<S: ByteStore>(fs: &Fs<S>, cluster: u32, value: u32) -> Result<()> {
    for i in 0..fs.num_fats as u64 {
        let fat_off = fs.first_fat_off + i * fs.fat_size_bytes;
        match fs.variant {
            FatVariant::Fat12 => {
                let off = entry_offset(fat_off, fs.variant, cluster);
                let mut buf = [0u8; 2];
                fs.stream.read_exact_at(&mut buf, off)?;
                let mut word = u16::from_le_bytes(buf);
                if cluster & 1 != 0 {
                    word = (word & 0x000f) | ((value as u16) << 4);
                } else {
                    word = (word & 0xf000) | (value as u16 & 0x0fff);
                }
                fs.stream.write_exact_at(&word.to_le_bytes(), off)?;
            }
            FatVariant::Fat16 => {
                let off = entry_offset(fat_off, fs.variant, cluster);
                fs.stream.write_exact_at(&(value as u16).to_le_bytes(), off)?;
            }
            FatVariant::Fat32 => {
                let off = entry_offset(fat_off, fs.variant, cluster);
                fs.stream.write_exact_at(&value.to_le_bytes(), off)?;
            }
        }
    }
    Ok(())
}

/// Validate `cluster`, then read its FAT entry; collapses any
/// out-of-range result (including a terminal EOF marker) to `None` so
/// chain traversal never has to special-case EOF separately.
pub(crate) fn safe_read<S: ByteStore>(fs: &Fs<S>, cluster: u32) -> Result<Option<u32>> {
    if !is_valid_cluster(fs.max_cluster_num, cluster) {
        return Ok(None);
    }
    let next = read_entry(fs, cluster)?;
    Ok(if is_valid_cluster(fs.max_cluster_num, next) {
        Some(next)
    } else {
        None
    })
}

/// Validate `cluster`, then write its FAT entry.
pub(crate) fn safe_write<S: ByteStore>(fs: &Fs<S>, cluster: u32, value: u32) -> Result<()> {
    if !is_valid_cluster(fs.max_cluster_num, cluster) {
        return Err(Error::Fs(FsError::Inval));
    }
    write_entry(fs, cluster, value)
}

/// What a cluster should be linked to: either a concrete next cluster
/// or the end-of-chain marker.
pub(crate) enum Link {
    Cluster(u32),
    Eof,
}

/// Write `cluster`'s FAT entry to point at `target`.
pub(crate) fn link_cluster<S: ByteStore>(fs: &Fs<S>, cluster: u32, target: Link) -> Result<()> {
    match target {
        Link::Cluster(next) => {
            if !is_valid_cluster(fs.max_cluster_num, next) {
                return Err(Error::Fs(FsError::Inval));
            }
            safe_write(fs, cluster, next)
        }
        Link::Eof => safe_write(fs, cluster, END_OF_FILE),
    }
}

/// How many whole FAT entries fit in a 516-byte scan chunk.
pub(crate) fn entries_per_scan_chunk(variant: FatVariant) -> usize {
    match variant {
        FatVariant::Fat12 => 344,
        FatVariant::Fat16 => 258,
        FatVariant::Fat32 => 129,
    }
}

pub(crate) const SCAN_CHUNK_LEN: usize = 516;

/// Read the entry at logical index `idx` out of a raw 516-byte scan
/// chunk (as opposed to [`read_entry`], which reads through the live
/// volume stream one entry at a time).
pub(crate) fn read_entry_from_chunk(variant: FatVariant, chunk: &[u8], idx: usize) -> Option<u32> {
    match variant {
        FatVariant::Fat12 => {
            let byte_off = (idx * 3) / 2;
            if byte_off + 1 >= chunk.len() {
                return None;
            }
            let word = u16::from_le_bytes([chunk[byte_off], chunk[byte_off + 1]]);
            Some((if idx & 1 != 0 { word >> 4 } else { word & 0x0fff }) as u32)
        }
        FatVariant::Fat16 => {
            let byte_off = idx * 2;
            if byte_off + 1 >= chunk.len() {
                return None;
            }
            Some(u16::from_le_bytes([chunk[byte_off], chunk[byte_off + 1]]) as u32)
        }
        FatVariant::Fat32 => {
            let byte_off = idx * 4;
            if byte_off + 3 >= chunk.len() {
                return None;
            }
            Some(
                u32::from_le_bytes([
                    chunk[byte_off],
                    chunk[byte_off + 1],
                    chunk[byte_off + 2],
                    chunk[byte_off + 3],
                ]) & 0x0fff_ffff,
            )
        }
    }
}
