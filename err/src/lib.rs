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

//! Error types shared by the byte-stream adapter and the FAT engine.
//!
//! [`ErrorCode`] mirrors the stable integer error codes of the C
//! library this crate's on-disk semantics are grounded on: `0` is
//! success, the rest are small positive codes that are safe to expose
//! across an `error(fs)`-style accessor for source-API parity.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not implemented")]
    Unimplemented,
    #[error("I/O: {0}")]
    Io(#[from] IoError),
    #[error("FS: {0}")]
    Fs(FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("offset/length out of volume bounds")]
    OutOfBounds,
    #[error("short transfer: expected {expected} bytes, got {got}")]
    ShortTransfer { expected: usize, got: usize },
    #[error("device error: {0}")]
    Device(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("path does not exist")]
    NoEnt,
    #[error("invalid argument")]
    Inval,
    #[error("allocation error")]
    NoMem,
    #[error("invalid filesystem")]
    NotFatFs,
    #[error("access denied")]
    Access,
    #[error("device is busy")]
    DevBusy,
    #[error("a component of the path is not a directory")]
    NotDir,
    #[error("path is a directory")]
    IsDir,
    #[error("write-only file")]
    WrOnly,
    #[error("read-only file")]
    RdOnly,
    #[error("read/write size is above u32::MAX")]
    MaxSize,
    #[error("disk is full")]
    FullDisk,
    #[error("function is not implemented")]
    NotImpl,
    #[error("cyclic cluster chain")]
    Loop,
}

impl FsError {
    pub fn code(self) -> ErrorCode {
        match self {
            FsError::NoEnt => ErrorCode::NoEnt,
            FsError::Inval => ErrorCode::Inval,
            FsError::NoMem => ErrorCode::NoMem,
            FsError::NotFatFs => ErrorCode::NotFatFs,
            FsError::Access => ErrorCode::Access,
            FsError::DevBusy => ErrorCode::DevBusy,
            FsError::NotDir => ErrorCode::NotDir,
            FsError::IsDir => ErrorCode::IsDir,
            FsError::WrOnly => ErrorCode::WrOnly,
            FsError::RdOnly => ErrorCode::RdOnly,
            FsError::MaxSize => ErrorCode::MaxSize,
            FsError::FullDisk => ErrorCode::FullDisk,
            FsError::NotImpl => ErrorCode::NotImpl,
            FsError::Loop => ErrorCode::Loop,
        }
    }
}

impl Error {
    /// Stable integer code for the `error(fs)`-style accessor. Kept for
    /// source-API parity; prefer matching on the `Error` value itself.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Unimplemented => ErrorCode::NotImpl,
            Error::Io(_) => ErrorCode::Io,
            Error::Fs(e) => e.code(),
        }
    }
}

impl From<FsError> for Error {
    fn from(e: FsError) -> Self {
        Error::Fs(e)
    }
}

/// Stable integer error codes, zero-indexed in declaration order like
/// the source enum this crate's semantics are grounded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    NoEnt,
    Inval,
    NoMem,
    NotFatFs,
    Access,
    DevBusy,
    NotDir,
    IsDir,
    WrOnly,
    RdOnly,
    MaxSize,
    FullDisk,
    Io,
    NotImpl,
    Loop,
}

pub type Result<T> = core::result::Result<T, Error>;
