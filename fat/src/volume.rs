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

//! The mounted volume: BPB-derived geometry, the free-cluster hints,
//! the per-volume error slot, and the `/`-separated path walk that
//! both `opendir` and `fopen` build on.

use std::cell::{Cell, RefCell};

use fatvol_err::{Error, ErrorCode, FsError, Result};
use fatvol_storage::{ByteStore, VolumeStream};
use log::trace;

use crate::alloc::{scan_free_clusters, AllocState};
use crate::bpb::{self, FatVariant};
use crate::cursor::{check_cyclic, Block};
use crate::dir::Dir;
use crate::dirent::decode_next;
use crate::fat_table::is_valid_cluster;
use crate::file::File;

/// A mounted FAT12/16/32 volume over a byte-addressable backing store.
///
/// Owns the store for as long as it is alive; dropping it is the
/// `umount` of the source API — there is nothing else to release once
/// Rust's ownership takes care of the label string and the stream.
pub struct Fs<S: ByteStore> {
    pub(crate) stream: VolumeStream<S>,
    pub(crate) variant: FatVariant,
    pub(crate) bytes_per_sector: u32,
    pub(crate) bytes_per_cluster: u32,
    pub(crate) num_fats: u8,
    pub(crate) fat_size_bytes: u64,
    pub(crate) first_fat_off: u64,
    pub(crate) active_fat_off: u64,
    pub(crate) data_start: u64,
    pub(crate) root_region_start: u64,
    pub(crate) num_root_entries: u16,
    pub(crate) max_cluster_num: u32,
    pub(crate) alloc: RefCell<AllocState>,
    label: String,
    last_error: Cell<ErrorCode>,
    root_block: Block,
}

impl<S: ByteStore> Fs<S> {
    /// Parse the BPB, validate its invariants, run the cycle guard over
    /// the root directory, and scan the active FAT for free clusters.
    pub fn mount(store: S, base_offset: u64, volsize: u64) -> Result<Self> {
        let stream = VolumeStream::new(store, base_offset, volsize)?;
        let parsed = bpb::parse(&stream)?;
        let label = bpb::decode_label(&parsed.label_raw);

        let root_block = match parsed.variant {
            FatVariant::Fat32 => {
                Block::new_chain_raw(parsed.data_start, parsed.bytes_per_cluster, parsed.root_cluster)
            }
            FatVariant::Fat12 | FatVariant::Fat16 => Block::new_fixed_region(
                parsed.root_region_start,
                parsed.num_root_entries as u64 * 32,
            ),
        };

        let mut fs = Fs {
            stream,
            variant: parsed.variant,
            bytes_per_sector: parsed.bytes_per_sector,
            bytes_per_cluster: parsed.bytes_per_cluster,
            num_fats: parsed.num_fats,
            fat_size_bytes: parsed.fat_size_bytes,
            first_fat_off: parsed.first_fat_off,
            active_fat_off: parsed.active_fat_off,
            data_start: parsed.data_start,
            root_region_start: parsed.root_region_start,
            num_root_entries: parsed.num_root_entries,
            max_cluster_num: parsed.max_cluster_num,
            alloc: RefCell::new(AllocState::default()),
            label,
            last_error: Cell::new(ErrorCode::Success),
            root_block,
        };

        if parsed.variant == FatVariant::Fat32 && check_cyclic(&fs, parsed.root_cluster)? {
            return Err(Error::Fs(FsError::Loop));
        }

        let (first_free, num_free) = scan_free_clusters(&fs)?;
        fs.alloc = RefCell::new(AllocState {
            first_free,
            num_free,
        });

        trace!(
            "mounted {:?} volume, {} bytes/cluster, {} free clusters",
            fs.variant,
            fs.bytes_per_cluster,
            num_free
        );
        Ok(fs)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn variant(&self) -> FatVariant {
        self.variant
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    pub fn free_clusters(&self) -> u32 {
        self.alloc.borrow().num_free
    }

    pub fn max_cluster_num(&self) -> u32 {
        self.max_cluster_num
    }

    /// The last error set by a public entry point on this volume,
    /// kept for parity with the source's `fat_error` accessor; prefer
    /// matching on the `Result` itself.
    pub fn error(&self) -> ErrorCode {
        self.last_error.get()
    }

    pub(crate) fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_start + (cluster as u64 - 2) * self.bytes_per_cluster as u64
    }

    pub(crate) fn root_region_start(&self) -> u64 {
        self.root_region_start
    }

    /// Clear the error slot, run `f`, and record its outcome in the
    /// error slot before returning it unchanged. Every public entry
    /// point is built on this.
    fn run<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.last_error.set(ErrorCode::Success);
        match f() {
            Ok(v) => Ok(v),
            Err(e) => {
                self.last_error.set(e.code());
                Err(e)
            }
        }
    }

    /// Walk a `/`-separated path of directory components starting from
    /// the root, returning a directory handle positioned at its end.
    pub fn opendir(&self, path: &str) -> Result<Dir<'_, S>> {
        self.run(|| self.opendir_inner(path))
    }

    fn opendir_inner(&self, path: &str) -> Result<Dir<'_, S>> {
        if path.is_empty() {
            return Err(Error::Fs(FsError::NoEnt));
        }

        let mut block = self.root_block;
        let rest = path.strip_prefix('/').unwrap_or(path);
        if !rest.is_empty() {
            for component in rest.split('/') {
                let entry = find_named_entry(self, &mut block, component)?
                    .ok_or(Error::Fs(FsError::NoEnt))?;
                if !entry.is_dir() {
                    return Err(Error::Fs(FsError::NotDir));
                }
                if check_cyclic(self, entry.cluster)? {
                    return Err(Error::Fs(FsError::Loop));
                }
                block = Block::new_chain(self, entry.cluster);
            }
        }
        Ok(Dir::new(self, block))
    }

    /// Open a file for reading and/or writing. `mode` is one of `r`,
    /// `r+`, `w`, `w+`, `wx`, `w+x`, `a`, `a+`. Creation on a miss is
    /// unimplemented, matching the source's preserved gap.
    pub fn fopen(&self, path: &str, mode: &str) -> Result<File<'_, S>> {
        self.run(|| self.fopen_inner(path, mode))
    }

    fn fopen_inner(&self, path: &str, mode: &str) -> Result<File<'_, S>> {
        let parsed_mode = crate::file::OpenMode::parse(mode)?;
        let (dirpart, filepart) = split_path(path);

        let mut dir = self.opendir_inner(&dirpart)?;
        let filepart = filepart.ok_or(Error::Fs(FsError::IsDir))?;

        let mut found = None;
        while let Some(entry) = dir.readdir()? {
            if entry.name == filepart {
                found = Some(entry);
                break;
            }
        }

        let entry = match found {
            Some(entry) => entry,
            // The source leaves entry creation on a miss unimplemented.
            None => return Err(Error::Fs(FsError::NoEnt)),
        };
        if entry.is_dir() {
            return Err(Error::Fs(FsError::IsDir));
        }
        // An empty archive entry may carry an invalid first-cluster
        // number (the decoder's size==0 exception); only a real chain
        // can be cyclic, so check validity before walking it.
        if is_valid_cluster(self.max_cluster_num, entry.cluster) && check_cyclic(self, entry.cluster)? {
            return Err(Error::Fs(FsError::Loop));
        }

        let mut file = File::new(self, entry, parsed_mode);
        if parsed_mode.trunc {
            file.set_len(0)?;
        }
        Ok(file)
    }

    /// Open `path` for read/write and truncate (grow or shrink) it to
    /// `len`, matching the source's path-based `fat_truncate`.
    pub fn truncate(&self, path: &str, len: u64) -> Result<()> {
        self.run(|| {
            let mut file = self.fopen_inner(path, "r+")?;
            file.set_len(len)
        })
    }
}

/// Scan forward from `block`'s current position looking for an entry
/// named `name`, without perturbing the caller's cursor.
pub(crate) fn find_named_entry<S: ByteStore>(
    fs: &Fs<S>,
    block: &mut Block,
    name: &str,
) -> Result<Option<crate::dirent::DirEnt>> {
    while let Some(entry) = decode_next(fs, block)? {
        if entry.name == name {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// Split a path into its parent directory and final component, the
/// way the source's `split_path` does: `"/a/b.txt"` -> `("/a",
/// Some("b.txt"))`; `"b.txt"` -> `("/", Some("b.txt"))`; a trailing
/// slash yields `None` for the file part (an explicit request to open
/// a directory).
pub(crate) fn split_path(path: &str) -> (String, Option<String>) {
    match path.rfind('/') {
        Some(idx) => {
            let dir = &path[..idx];
            let dir = if dir.is_empty() { "/" } else { dir };
            let file = &path[idx + 1..];
            (dir.to_string(), (!file.is_empty()).then(|| file.to_string()))
        }
        None => ("/".to_string(), (!path.is_empty()).then(|| path.to_string())),
    }
}
