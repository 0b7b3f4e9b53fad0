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

//! Directory handles: `opendir`/`readdir`/`telldir`/`seekdir`/
//! `rewinddir`, built on the block cursor and entry decoder.

use fatvol_err::Result;
use fatvol_storage::ByteStore;

use crate::cursor::Block;
use crate::dirent::{decode_next, DirEnt};
use crate::volume::Fs;

/// An opaque directory stream position, obtained from
/// [`Dir::telldir`] and replayed with [`Dir::seekdir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirPos(u64);

/// A directory traversal in progress. Borrows its parent volume, so it
/// cannot outlive it.
pub struct Dir<'fs, S: ByteStore> {
    fs: &'fs Fs<S>,
    root: Block,
    block: Block,
    entry_index: u64,
    last: Option<DirEnt>,
}

impl<'fs, S: ByteStore> Dir<'fs, S> {
    pub(crate) fn new(fs: &'fs Fs<S>, root: Block) -> Self {
        Self {
            fs,
            root,
            block: root,
            entry_index: 0,
            last: None,
        }
    }

    /// Decode and return the next entry, or `None` at the end of the
    /// directory.
    pub fn readdir(&mut self) -> Result<Option<DirEnt>> {
        let entry = decode_next(self.fs, &mut self.block)?;
        if entry.is_some() {
            self.entry_index += 1;
        }
        self.last = entry.clone();
        Ok(entry)
    }

    /// The most recently decoded entry, if any `readdir` has succeeded
    /// since the last rewind.
    pub fn last(&self) -> Option<&DirEnt> {
        self.last.as_ref()
    }

    pub fn telldir(&self) -> DirPos {
        DirPos(self.entry_index)
    }

    pub fn rewinddir(&mut self) {
        self.block = self.root;
        self.entry_index = 0;
        self.last = None;
    }

    /// Replay the stream from the start up to `pos`, the cheap and
    /// robust way to seek a format with no fixed-size records once
    /// long names are in the mix.
    pub fn seekdir(&mut self, pos: DirPos) -> Result<()> {
        self.rewinddir();
        while self.entry_index < pos.0 {
            if self.readdir()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}
