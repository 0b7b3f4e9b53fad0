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

//! On-disk directory entry layout, VFAT long-name reconstruction, and
//! the short/long name decode that [`crate::dir::Dir`] drives.

use fatvol_err::Result;
use fatvol_storage::ByteStore;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::cursor::Block;
use crate::fat_table::is_valid_cluster;
use crate::volume::Fs;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

const DELETED_MARK: u8 = 0xe5;
const LAST_LONG_ENTRY: u8 = 0x40;

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawDirEntry {
    name: [u8; 11],
    attr: u8,
    nt_reserved: u8,
    create_time_tenth: u8,
    create_time: U16,
    create_date: U16,
    access_date: U16,
    first_cluster_hi: U16,
    write_time: U16,
    write_date: U16,
    first_cluster_lo: U16,
    size: U32,
}

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct RawLongNameEntry {
    ord: u8,
    name1: [U16; 5],
    attr: u8,
    entry_type: u8,
    checksum: u8,
    name2: [U16; 6],
    first_cluster_lo: U16,
    name3: [U16; 2],
}

/// A decoded directory entry: the long name if one was present and
/// reconstructible, otherwise the derived 8.3 name.
#[derive(Debug, Clone)]
pub struct DirEnt {
    pub name: String,
    pub attr: u8,
    pub cluster: u32,
    pub size: u32,
    /// Byte offset, from the volume base, of this entry's own 32-byte
    /// primary record — where `fwrite`/`truncate` rewrite size and
    /// first-cluster on a later open of this entry.
    pub privoff: u64,
}

impl DirEnt {
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

/// Decode one 8.3 short name (with its `.ext` rejoined) into a string,
/// widening each byte to a `char` like the rest of this crate's
/// ASCII-range decoding.
fn decode_short_name(raw: &[u8; 11]) -> String {
    let base_end = raw[0..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let ext_end = raw[8..11].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);

    let mut name: String = raw[0..base_end].iter().map(|&b| b as char).collect();
    if ext_end > 0 {
        name.push('.');
        name.extend(raw[8..8 + ext_end].iter().map(|&b| b as char));
    }
    name
}

fn utf16_chars(units: &[U16]) -> impl Iterator<Item = u16> + '_ {
    units.iter().map(|u| u.get()).take_while(|&u| u != 0 && u != 0xffff)
}

/// Walk backward from a primary entry's position, reassembling the
/// VFAT long name from the sequence of 13-character fragments that
/// precede it. Returns `None` (falling back to the 8.3 name) if the
/// chain of long-name entries is malformed in any way.
fn load_long_name<S: ByteStore>(fs: &Fs<S>, after_primary: &Block) -> Option<String> {
    let mut block = *after_primary;
    let mut units: Vec<u16> = Vec::new();

    for expected_ord in 1u8..=20 {
        if !block.dec_off(fs, 64).ok()? {
            return None;
        }
        let mut buf = [0u8; 32];
        if block.read(fs, &mut buf).ok()? != 32 {
            return None;
        }
        let entry = RawLongNameEntry::ref_from_bytes(&buf).ok()?;

        if entry.attr != ATTR_LONG_NAME {
            return None;
        }
        let seq = entry.ord & !LAST_LONG_ENTRY;
        if entry.ord != LAST_LONG_ENTRY && seq != expected_ord {
            return None;
        }

        units.extend(utf16_chars(&entry.name1));
        units.extend(utf16_chars(&entry.name2));
        units.extend(utf16_chars(&entry.name3));

        if entry.ord & LAST_LONG_ENTRY != 0 {
            break;
        }
    }

    Some(
        char::decode_utf16(units)
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    )
}

/// Decode the next directory entry starting at `block`'s current
/// position, skipping deleted entries, bare long-name fragments and
/// volume-label entries. Returns `None` at a `0x00` end marker or end
/// of the directory region/chain.
pub(crate) fn decode_next<S: ByteStore>(fs: &Fs<S>, block: &mut Block) -> Result<Option<DirEnt>> {
    loop {
        let mut buf = [0u8; 32];
        let n = block.read(fs, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if n != 32 {
            return Ok(None);
        }
        let privoff = block.cur_off - 32;

        if buf[0] == 0 {
            return Ok(None);
        }
        if buf[0] == DELETED_MARK {
            continue;
        }

        let raw = match RawDirEntry::ref_from_bytes(&buf) {
            Ok(raw) => raw,
            Err(_) => continue,
        };

        if raw.attr & ATTR_LONG_NAME == ATTR_LONG_NAME {
            continue;
        }
        if raw.attr & ATTR_VOLUME_ID != 0 {
            continue;
        }

        let cluster = ((raw.first_cluster_hi.get() as u32) << 16) | raw.first_cluster_lo.get() as u32;
        let size = raw.size.get();

        if !is_valid_cluster(fs.max_cluster_num, cluster)
            && !(raw.attr & ATTR_ARCHIVE != 0 && size == 0)
        {
            continue;
        }

        let is_dot = &raw.name[0..2] == b". " || &raw.name[0..3] == b".. ";
        let name = if is_dot {
            decode_short_name(&raw.name)
        } else {
            load_long_name(fs, block).unwrap_or_else(|| decode_short_name(&raw.name))
        };

        return Ok(Some(DirEnt {
            name,
            attr: raw.attr,
            cluster,
            size,
            privoff,
        }));
    }
}

/// Rewrite a primary record's size field in place, the write-back
/// `fwrite`/`truncate` need after growing or shrinking a file.
pub(crate) fn update_size<S: ByteStore>(fs: &Fs<S>, privoff: u64, size: u32) -> Result<()> {
    let mut buf = [0u8; 32];
    fs.stream.read_exact_at(&mut buf, privoff)?;
    let raw = RawDirEntry::mut_from_bytes(&mut buf).expect("32-byte buffer matches layout");
    raw.size = U32::new(size);
    fs.stream.write_exact_at(raw.as_bytes(), privoff)
}

/// Rewrite a primary record's first-cluster field in place.
pub(crate) fn update_first_cluster<S: ByteStore>(fs: &Fs<S>, privoff: u64, cluster: u32) -> Result<()> {
    let mut buf = [0u8; 32];
    fs.stream.read_exact_at(&mut buf, privoff)?;
    let raw = RawDirEntry::mut_from_bytes(&mut buf).expect("32-byte buffer matches layout");
    raw.first_cluster_hi = U16::new((cluster >> 16) as u16);
    raw.first_cluster_lo = U16::new(cluster as u16);
    fs.stream.write_exact_at(raw.as_bytes(), privoff)
}
