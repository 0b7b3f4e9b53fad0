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

//! Open file handles: mode parsing, `fread`/`fwrite` sized against
//! `filesize`, `fseek`/`ftell` with the "oversize" deferred-growth
//! mechanism, and `truncate`.

use fatvol_err::{Error, FsError, Result};
use fatvol_storage::ByteStore;

use crate::alloc::{allocate_cluster, release_cluster};
use crate::cursor::Block;
use crate::dirent::{update_first_cluster, update_size, DirEnt};
use crate::fat_table::{link_cluster, Link, END_OF_FILE};
use crate::volume::Fs;

/// The parsed form of an `fopen` mode string: `r`, `r+`, `w`, `w+`,
/// `wx`, `w+x`, `a`, `a+`. `create`/`trunc` are consumed by `fopen`
/// itself (creation on a miss is unimplemented); they are kept on the
/// parsed value rather than folded away so a future create-on-`fopen`
/// implementation has a documented seam.
#[derive(Debug, Clone, Copy)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub trunc: bool,
}

impl OpenMode {
    pub(crate) fn parse(mode: &str) -> Result<Self> {
        let b = mode.as_bytes();
        let mut m = OpenMode {
            read: false,
            write: false,
            append: false,
            create: false,
            trunc: false,
        };
        match b.first() {
            Some(b'a') => {
                m.create = true;
                m.append = true;
                if b.get(1) == Some(&b'+') {
                    m.read = true;
                }
            }
            Some(b'r') => {
                m.read = true;
                if b.get(1) == Some(&b'+') {
                    m.write = true;
                }
            }
            Some(b'w') => {
                m.write = true;
                m.create = true;
                m.trunc = true;
                if b.get(1) == Some(&b'+') {
                    m.read = true;
                }
                if b.get(1) == Some(&b'x') || (b.len() > 2 && b[2] == b'x') {
                    m.trunc = false;
                }
            }
            _ => return Err(Error::Fs(FsError::Inval)),
        }
        Ok(m)
    }
}

/// Where a seek's offset is measured from. `Set` still permits a
/// negative raw offset through so the usual `INVAL`-on-negative check
/// applies uniformly to all three.
#[derive(Debug, Clone, Copy)]
pub enum Whence {
    Set(i64),
    Current(i64),
    End(i64),
}

/// An open file: a block cursor over its cluster chain (or the empty
/// sentinel for a brand new zero-length file), the authoritative
/// on-disk size, the oversize carried across a beyond-EOF seek, and
/// the owning directory entry's private offset for write-back.
pub struct File<'fs, S: ByteStore> {
    fs: &'fs Fs<S>,
    block: Block,
    filesize: u64,
    oversize: u64,
    mode: OpenMode,
    privoff: u64,
}

impl<'fs, S: ByteStore> File<'fs, S> {
    pub(crate) fn new(fs: &'fs Fs<S>, entry: DirEnt, mode: OpenMode) -> Self {
        let block = if entry.size == 0 {
            Block::empty()
        } else {
            Block::new_chain(fs, entry.cluster)
        };
        File {
            fs,
            block,
            filesize: entry.size as u64,
            oversize: 0,
            mode,
            privoff: entry.privoff,
        }
    }

    pub fn len(&self) -> u64 {
        self.filesize
    }

    /// Logical position including any pending `oversize`. Matches the
    /// source's quirk: a handle whose cursor never reached a cluster
    /// (a genuinely empty file) reports 0 regardless of a pending
    /// beyond-EOF seek, since that seek has nothing to commit against
    /// until the first `fwrite` allocates a chain.
    pub fn tell(&self) -> u64 {
        let Some(_) = self.block.cluster else {
            return 0;
        };
        let block_start = self.block.end_off - self.fs.bytes_per_cluster as u64;
        let pos_in_block = self.block.cur_off - block_start;
        self.block.index * self.fs.bytes_per_cluster as u64 + pos_in_block + self.oversize
    }

    pub fn seek(&mut self, whence: Whence) -> Result<u64> {
        let resolved = match whence {
            Whence::Set(off) => off,
            Whence::Current(off) => self.tell() as i64 + off,
            Whence::End(off) => self.filesize as i64 + off,
        };
        if resolved < 0 {
            return Err(Error::Fs(FsError::Inval));
        }
        let resolved = resolved as u64;

        if self.block.cls_init.is_some() {
            self.seek_on_chain(resolved)?;
        } else {
            self.oversize = resolved;
        }
        Ok(resolved)
    }

    fn seek_on_chain(&mut self, resolved: u64) -> Result<()> {
        let cls_init = self.block.cls_init.expect("seek_on_chain requires a chain");
        self.block = Block::new_chain(self.fs, cls_init);
        self.oversize = 0;

        let bpc = self.fs.bytes_per_cluster as i64;
        let resolved_i = resolved as i64;
        let filesize_i = self.filesize as i64;
        let nblks = if resolved_i > filesize_i {
            filesize_i / bpc - 1
        } else {
            resolved_i / bpc - 1
        };
        for _ in 0..nblks.max(0) {
            if !self.block.goto_next(self.fs)? {
                break;
            }
        }

        let delta = if resolved_i <= filesize_i {
            resolved_i - self.tell() as i64
        } else {
            filesize_i - self.tell() as i64
        };
        self.block.cur_off = (self.block.cur_off as i64 + delta) as u64;
        self.oversize = (resolved_i - self.tell() as i64).max(0) as u64;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, clamped to `filesize`. Never
    /// consumes `oversize`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.mode.read {
            return Err(Error::Fs(FsError::WrOnly));
        }
        let pos = self.tell();
        let avail = self.filesize.saturating_sub(pos);
        let want = (buf.len() as u64).min(avail) as usize;
        if want == 0 {
            return Ok(0);
        }
        self.block.read(self.fs, &mut buf[..want])
    }

    /// Write `buf`, committing any pending `oversize` first, extending
    /// the chain as needed, and updating `filesize` and the owning
    /// directory entry when the write grows the file.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !(self.mode.write || self.mode.append) {
            return Err(Error::Fs(FsError::RdOnly));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.mode.append {
            self.seek(Whence::End(0))?;
        }

        if self.oversize > 0 {
            let target = self.filesize + self.oversize;
            self.set_len(target)?;
            if !self.mode.append {
                self.seek(Whence::End(0))?;
            }
        } else if self.filesize == 0 {
            self.set_len(1)?;
        }

        let n = self.block.write(self.fs, buf, true)?;

        let pos = self.tell();
        if pos > self.filesize {
            update_size(self.fs, self.privoff, pos as u32)?;
            self.filesize = pos;
        }
        Ok(n)
    }

    /// Grow (zero-filling) or shrink (releasing the tail) the file to
    /// exactly `len`, updating `filesize` and the directory entry.
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        if len == self.filesize {
            return Ok(());
        }
        if len > self.filesize {
            self.expand(len)?;
        } else {
            self.shrink(len)?;
        }
        self.filesize = len;
        update_size(self.fs, self.privoff, len as u32)
    }

    fn expand(&mut self, len: u64) -> Result<()> {
        let mut remaining = len - self.filesize;
        self.seek(Whence::End(0))?;

        if self.filesize == 0 {
            let new_cluster = allocate_cluster(self.fs)?;
            link_cluster(self.fs, new_cluster, Link::Eof)?;
            update_first_cluster(self.fs, self.privoff, new_cluster)?;
            self.block = Block::new_chain(self.fs, new_cluster);
        }

        let saved = self.block;
        let zeros = [0u8; 2048];
        let mut err = None;
        while remaining > 0 {
            let want = remaining.min(zeros.len() as u64) as usize;
            match self.block.write(self.fs, &zeros[..want], true) {
                Ok(0) => break,
                Ok(n) => remaining -= n as u64,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        self.block = saved;
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn shrink(&mut self, len: u64) -> Result<()> {
        self.seek(Whence::Set(len as i64))?;
        let saved = self.block;

        let last_valid = self.block.cluster;
        let mut cluster = self.block.cluster;
        while self.block.goto_next(self.fs)? {
            if let Some(c) = cluster {
                release_cluster(self.fs, c)?;
            }
            cluster = self.block.cluster;
        }
        if cluster != last_valid {
            if let Some(c) = cluster {
                release_cluster(self.fs, c)?;
            }
        }
        if let Some(lv) = last_valid {
            link_cluster(self.fs, lv, Link::Eof)?;
        }

        self.block = saved;

        if len == 0 {
            self.block = Block::empty();
            if let Some(lv) = last_valid {
                release_cluster(self.fs, lv)?;
            }
            update_first_cluster(self.fs, self.privoff, END_OF_FILE)?;
        }
        Ok(())
    }
}
