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

//! Free-cluster bookkeeping: the mount-time bulk scan and the
//! allocate/release operations that keep its `first_free`/`num_free`
//! hints up to date.

use fatvol_err::{Error, FsError, Result};
use fatvol_storage::ByteStore;

use crate::fat_table::{
    entries_per_scan_chunk, read_entry, read_entry_from_chunk, safe_write, SCAN_CHUNK_LEN,
};
use crate::volume::Fs;

#[derive(Debug, Default)]
pub(crate) struct AllocState {
    pub first_free: Option<u32>,
    pub num_free: u32,
}

/// Scan the whole active FAT in 516-byte chunks, counting zero entries
/// and recording the lowest index seen. Stops once `max_cluster_num + 1`
/// entries have been examined, matching the bound the cycle guard and
/// the rest of the engine use everywhere else.
pub(crate) fn scan_free_clusters<S: ByteStore>(fs: &Fs<S>) -> Result<(Option<u32>, u32)> {
    let entries_per_chunk = entries_per_scan_chunk(fs.variant);
    let chunk_count = fs.fat_size_bytes / SCAN_CHUNK_LEN as u64;

    let mut first_free = None;
    let mut num_free = 0u32;
    let mut budget = fs.max_cluster_num as u64 + 1;

    'chunks: for chunk_idx in 0..chunk_count {
        let mut chunk = [0u8; SCAN_CHUNK_LEN];
        fs.stream
            .read_exact_at(&mut chunk, fs.active_fat_off + chunk_idx * SCAN_CHUNK_LEN as u64)?;

        for j in 0..entries_per_chunk {
            if budget == 0 {
                break 'chunks;
            }
            budget -= 1;

            let Some(value) = read_entry_from_chunk(fs.variant, &chunk, j) else {
                break;
            };
            if value == 0 {
                let idx = chunk_idx * entries_per_chunk as u64 + j as u64;
                num_free += 1;
                if first_free.is_none() {
                    first_free = Some(idx as u32);
                }
            }
        }
    }

    Ok((first_free, num_free))
}

/// Hand out `first_free`, then advance the hint to the next zero entry
/// found past it, rescanning from the start of the FAT if none remain
/// ahead.
pub(crate) fn allocate_cluster<S: ByteStore>(fs: &Fs<S>) -> Result<u32> {
    let mut state = fs.alloc.borrow_mut();
    if state.num_free == 0 {
        return Err(Error::Fs(FsError::FullDisk));
    }
    let allocated = state.first_free.ok_or(Error::Fs(FsError::FullDisk))?;
    state.num_free -= 1;
    state.first_free = None;

    for candidate in (allocated + 1)..=fs.max_cluster_num {
        if read_entry(fs, candidate)? == 0 {
            state.first_free = Some(candidate);
            break;
        }
    }

    if state.first_free.is_none() {
        let (first_free, num_free) = scan_free_clusters(fs)?;
        state.first_free = first_free;
        state.num_free = num_free;
    }

    Ok(allocated)
}

/// Zero a cluster's FAT entry. Deliberately does not touch the
/// free-cluster hints: `shrink`'s release-then-relink sequence (see
/// `file::File::shrink`) briefly releases a cluster it is about to
/// re-link as EOF, and folding that transient release into `num_free`/
/// `first_free` would let a later `allocate_cluster` hand out a
/// cluster that is still live on disk. The hints go stale until the
/// next mount's scan or until `allocate_cluster` happens to walk past
/// this cluster — matching the source, which never updates them here
/// either.
pub(crate) fn release_cluster<S: ByteStore>(fs: &Fs<S>, cluster: u32) -> Result<()> {
    safe_write(fs, cluster, 0)
}
