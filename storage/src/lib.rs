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

//! Byte-addressable backing stores and the bounds-checked window a
//! mounted volume reads and writes through.

use std::cell::RefCell;

use fatvol_err::{Error, IoError};
use log::error;

/// A byte-addressable random access device: a regular file, a block
/// device, or (for tests) a buffer in memory.
pub trait ByteStore {
    /// Total addressable length of the store, in bytes.
    fn len(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually transferred.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;

    /// Write up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually transferred.
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize>;
}

/// Seek-and-read/write at absolute offsets within a volume's window
/// into a [`ByteStore`]: `base_offset..base_offset + volsize`.
pub struct VolumeStream<S: ByteStore> {
    store: S,
    base_offset: u64,
    volsize: u64,
}

impl<S: ByteStore> VolumeStream<S> {
    pub fn new(store: S, base_offset: u64, volsize: u64) -> fatvol_err::Result<Self> {
        if base_offset.checked_add(volsize).is_none() {
            error!("base_offset ({base_offset}) + volsize ({volsize}) overflows");
            return Err(Error::Io(IoError::OutOfBounds));
        }
        Ok(Self {
            store,
            base_offset,
            volsize,
        })
    }

    pub fn volsize(&self) -> u64 {
        self.volsize
    }

    fn check_bounds(&self, len: usize, offset: u64) -> fatvol_err::Result<()> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(Error::Io(IoError::OutOfBounds))?;
        if end > self.volsize {
            return Err(Error::Io(IoError::OutOfBounds));
        }
        Ok(())
    }

    /// Read `buf.len()` bytes at `offset`. Returns the short count on a
    /// transport failure rather than erroring outright, matching the
    /// "partial reads return their short count" propagation rule.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> fatvol_err::Result<usize> {
        self.check_bounds(buf.len(), offset)?;
        match self.store.read_at(buf, self.base_offset + offset) {
            Ok(n) => Ok(n),
            Err(e) => Err(Error::Io(IoError::Device(e))),
        }
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> fatvol_err::Result<usize> {
        self.check_bounds(buf.len(), offset)?;
        match self.store.write_at(buf, self.base_offset + offset) {
            Ok(n) => Ok(n),
            Err(e) => Err(Error::Io(IoError::Device(e))),
        }
    }

    /// Read exactly `buf.len()` bytes, erroring if the store returns fewer.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> fatvol_err::Result<()> {
        let n = self.read_at(buf, offset)?;
        if n != buf.len() {
            return Err(Error::Io(IoError::ShortTransfer {
                expected: buf.len(),
                got: n,
            }));
        }
        Ok(())
    }

    /// Write exactly `buf.len()` bytes, erroring if the store accepts fewer.
    pub fn write_exact_at(&self, buf: &[u8], offset: u64) -> fatvol_err::Result<()> {
        let n = self.write_at(buf, offset)?;
        if n != buf.len() {
            return Err(Error::Io(IoError::ShortTransfer {
                expected: buf.len(),
                got: n,
            }));
        }
        Ok(())
    }
}

#[cfg(unix)]
mod file {
    use std::fs::{File, OpenOptions};
    use std::os::unix::fs::FileExt;
    use std::path::Path;

    use super::ByteStore;

    /// A regular file or block device opened read/write, backing a
    /// [`super::VolumeStream`].
    pub struct StdFile {
        file: File,
        len: u64,
    }

    impl StdFile {
        pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            let len = file.metadata()?.len();
            Ok(Self { file, len })
        }
    }

    impl ByteStore for StdFile {
        fn len(&self) -> u64 {
            self.len
        }

        fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            self.file.read_at(buf, offset)
        }

        fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
            self.file.write_at(buf, offset)
        }
    }
}

#[cfg(unix)]
pub use file::StdFile;

/// An in-memory [`ByteStore`], used to build synthetic FAT images in
/// tests without touching the filesystem.
pub struct MemStore(RefCell<Vec<u8>>);

impl MemStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self(RefCell::new(data))
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0.into_inner()
    }
}

impl ByteStore for MemStore {
    fn len(&self) -> u64 {
        self.0.borrow().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let data = self.0.borrow();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        let mut data = self.0.borrow_mut();
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}
