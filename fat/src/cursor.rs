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

//! The block cursor: a cursor over either a cluster chain or (for
//! FAT12/16) the fixed root directory region, plus the Brent-style
//! cycle guard run before any chain is traversed.

use fatvol_err::Result;
use fatvol_storage::ByteStore;

use crate::alloc::allocate_cluster;
use crate::fat_table::{link_cluster, safe_read, Link};
use crate::volume::Fs;

/// Position within a region of a volume: either a live cluster chain
/// (`cluster: Some`) or the fixed root directory area on FAT12/16, or
/// the zero-length placeholder for a brand new empty file
/// (`cluster: None`, `cur_off == end_off == 0`).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Block {
    pub cur_off: u64,
    pub end_off: u64,
    pub cluster: Option<u32>,
    pub cls_init: Option<u32>,
    pub index: u64,
}

impl Block {
    pub fn new_chain<S: ByteStore>(fs: &Fs<S>, first_cluster: u32) -> Self {
        Self::new_chain_raw(fs.data_start, fs.bytes_per_cluster, first_cluster)
    }

    /// Build a chain cursor without borrowing an [`Fs`], for the one
    /// spot (mount, before the volume value exists) where the caller
    /// only has the parsed geometry at hand.
    pub fn new_chain_raw(data_start: u64, bytes_per_cluster: u32, first_cluster: u32) -> Self {
        let cur_off = data_start + (first_cluster as u64 - 2) * bytes_per_cluster as u64;
        Self {
            cur_off,
            end_off: cur_off + bytes_per_cluster as u64,
            cluster: Some(first_cluster),
            cls_init: Some(first_cluster),
            index: 0,
        }
    }

    pub fn new_fixed_region(start: u64, len: u64) -> Self {
        Self {
            cur_off: start,
            end_off: start + len,
            cluster: None,
            cls_init: None,
            index: 0,
        }
    }

    /// Degenerate cursor for a file with no allocated clusters yet.
    pub fn empty() -> Self {
        Self {
            cur_off: 0,
            end_off: 0,
            cluster: None,
            cls_init: None,
            index: 0,
        }
    }

    fn start_off<S: ByteStore>(&self, fs: &Fs<S>) -> u64 {
        match self.cluster {
            Some(c) => fs.cluster_offset(c),
            None if self.index == 0 => fs.root_region_start(),
            None => self.cur_off,
        }
    }

    /// Step back `amount` bytes, bounded to one block back. When the
    /// step stays within the current block it's a plain subtraction;
    /// when it would cross into the previous block, walk the chain
    /// from `cls_init` forward to the predecessor cluster and land the
    /// requested distance from its end. Fails if there is no previous
    /// block (the very first block of a chain, or the fixed root
    /// region, which never has a predecessor).
    pub fn dec_off<S: ByteStore>(&mut self, fs: &Fs<S>, amount: u64) -> Result<bool> {
        let start = self.start_off(fs);
        if self.cur_off >= start + amount {
            self.cur_off -= amount;
            return Ok(true);
        }

        if self.index == 0 {
            return Ok(false);
        }
        let Some(cls_init) = self.cls_init else {
            return Ok(false);
        };

        let mut predecessor = cls_init;
        for _ in 0..self.index - 1 {
            match safe_read(fs, predecessor)? {
                Some(next) => predecessor = next,
                None => return Ok(false),
            }
        }

        let remaining = amount - (self.cur_off - start);
        let pred_end = fs.cluster_offset(predecessor) + fs.bytes_per_cluster as u64;
        self.cur_off = pred_end - remaining;
        self.end_off = pred_end;
        self.cluster = Some(predecessor);
        self.index -= 1;
        Ok(true)
    }

    /// Advance to the next cluster in the chain. Returns `false` at
    /// end of chain (or on the fixed root region, which never has a
    /// next block) without treating that as an error.
    pub fn goto_next<S: ByteStore>(&mut self, fs: &Fs<S>) -> Result<bool> {
        let Some(cluster) = self.cluster else {
            return Ok(false);
        };
        match safe_read(fs, cluster)? {
            Some(next) => {
                self.cluster = Some(next);
                self.cur_off = fs.cluster_offset(next);
                self.end_off = self.cur_off + fs.bytes_per_cluster as u64;
                self.index += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Advance to the next cluster, allocating and linking a new one
    /// if the chain currently ends here. Only valid on a cursor
    /// already positioned on a cluster (never the fixed root region).
    pub fn advance_or_grow<S: ByteStore>(&mut self, fs: &Fs<S>) -> Result<()> {
        if self.goto_next(fs)? {
            return Ok(());
        }
        let cur = self.cluster.expect("advance_or_grow on a chainless block");
        let next = allocate_cluster(fs)?;
        link_cluster(fs, cur, Link::Cluster(next))?;
        link_cluster(fs, next, Link::Eof)?;
        self.cluster = Some(next);
        self.cur_off = fs.cluster_offset(next);
        self.end_off = self.cur_off + fs.bytes_per_cluster as u64;
        self.index += 1;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, crossing cluster boundaries as
    /// needed. Returns a short count at end of chain or on a short
    /// transfer from the backing store; never grows the chain.
    pub fn read<S: ByteStore>(&mut self, fs: &Fs<S>, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let avail = self.end_off - self.cur_off;
            if avail == 0 {
                if !self.goto_next(fs)? {
                    break;
                }
                continue;
            }
            let want = (buf.len() - done).min(avail as usize);
            let n = fs.stream.read_at(&mut buf[done..done + want], self.cur_off)?;
            self.cur_off += n as u64;
            done += n;
            if n < want {
                break;
            }
        }
        Ok(done)
    }

    /// Write up to `buf.len()` bytes, crossing cluster boundaries as
    /// needed. When `grow` is set, extends the chain with freshly
    /// allocated clusters rather than stopping at its current end.
    pub fn write<S: ByteStore>(&mut self, fs: &Fs<S>, buf: &[u8], grow: bool) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let avail = self.end_off - self.cur_off;
            if avail == 0 {
                let advanced = if grow {
                    self.advance_or_grow(fs)?;
                    true
                } else {
                    self.goto_next(fs)?
                };
                if !advanced {
                    break;
                }
                continue;
            }
            let want = (buf.len() - done).min(avail as usize);
            let n = fs.stream.write_at(&buf[done..done + want], self.cur_off)?;
            self.cur_off += n as u64;
            done += n;
            if n < want {
                break;
            }
        }
        Ok(done)
    }
}

/// Walk the chain rooted at `first_cluster`, checkpointing every 256
/// steps and comparing against the checkpoint on every subsequent
/// step. Returns `true` if a cycle is detected or the walk fails to
/// terminate within `max_cluster_num + 1` steps.
pub(crate) fn check_cyclic<S: ByteStore>(fs: &Fs<S>, first_cluster: u32) -> Result<bool> {
    let mut block = Block::new_chain(fs, first_cluster);
    let mut checkpoint = first_cluster;
    for i in 0..=fs.max_cluster_num {
        if i != 0 && block.cluster == Some(checkpoint) {
            return Ok(true);
        }
        if i != 0 && i % 256 == 0 {
            checkpoint = block.cluster.unwrap_or(checkpoint);
        }
        if !block.goto_next(fs)? {
            return Ok(false);
        }
    }
    Ok(true)
}
