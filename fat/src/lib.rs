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

//! Read/write access to FAT12, FAT16 and FAT32 volumes over any
//! byte-addressable backing store.
//!
//! [`Fs::mount`] parses and validates the BIOS Parameter Block, then
//! [`Fs::opendir`]/[`Fs::fopen`] walk `/`-separated paths down to a
//! [`Dir`] or [`File`] handle. Both are built on the same block cursor
//! ([`cursor::Block`]), which is the one abstraction that knows how to
//! walk a cluster chain (or, on FAT12/16, the fixed root directory
//! region) without caring which.
//!
//! Creating new directory entries (`mkdir`, `unlink`, create-on-`fopen`)
//! is out of scope; every operation here acts on entries that already
//! exist on disk.

mod alloc;
mod bpb;
mod cursor;
mod dir;
mod dirent;
mod fat_table;
mod file;
mod volume;

pub use bpb::FatVariant;
pub use dir::{Dir, DirPos};
pub use dirent::DirEnt;
pub use file::{File, OpenMode, Whence};
pub use volume::Fs;

pub use fatvol_err::{Error, ErrorCode, FsError, IoError, Result};
pub use fatvol_storage::{ByteStore, MemStore, VolumeStream};

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::little_endian::{U16, U32};
    use zerocopy::IntoBytes;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    const SECTOR: usize = 512;
    // Sectors per FAT copy. Two sectors (1024 bytes) clears the 516-byte
    // scan-chunk threshold `scan_free_clusters` needs to find anything;
    // one sector would leave every test volume reporting zero free
    // clusters regardless of what the FAT actually holds.
    const FAT_SECTORS: u16 = 2;

    /// Build a minimal FAT image: one FAT, a handful of root entries,
    /// and room for `num_clusters` data clusters. Small enough disks
    /// like these are classified FAT12 by the same cluster-count rule
    /// real FAT volumes use, so every helper here targets FAT12.
    fn build_fat12(root_entries: u16, num_clusters: u32) -> Vec<u8> {
        let bytes_per_sector: u16 = 512;
        let sectors_per_cluster: u8 = 1;
        let reserved_sectors: u16 = 1;
        let num_fats: u8 = 1;
        let root_region_sectors = (root_entries as u32 * 32).div_ceil(bytes_per_sector as u32);
        let data_sectors = num_clusters * sectors_per_cluster as u32;
        let total_sectors = reserved_sectors as u32
            + num_fats as u32 * FAT_SECTORS as u32
            + root_region_sectors
            + data_sectors
            + 4;

        let mut img = vec![0u8; total_sectors as usize * SECTOR];

        img[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
        img[13] = sectors_per_cluster;
        img[14..16].copy_from_slice(&reserved_sectors.to_le_bytes());
        img[16] = num_fats;
        img[17..19].copy_from_slice(&root_entries.to_le_bytes());
        img[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
        img[21] = 0xf8;
        img[22..24].copy_from_slice(&FAT_SECTORS.to_le_bytes());

        img[36] = 0x80;
        img[38] = 0x29;
        img[43..54].copy_from_slice(b"TESTDISK   ");
        img[54..62].copy_from_slice(b"FAT12   ");

        let fat_off = reserved_sectors as usize * SECTOR;
        set_fat12_entry(&mut img, fat_off, 0, 0xff8);
        set_fat12_entry(&mut img, fat_off, 1, 0xfff);

        img
    }

    fn write_short_entry(
        img: &mut [u8],
        off: usize,
        name: &[u8; 11],
        attr: u8,
        cluster: u32,
        size: u32,
    ) {
        img[off..off + 11].copy_from_slice(name);
        img[off + 11] = attr;
        U16::new(cluster as u16)
            .as_bytes()
            .iter()
            .enumerate()
            .for_each(|(i, &b)| img[off + 26 + i] = b);
        U16::new((cluster >> 16) as u16)
            .as_bytes()
            .iter()
            .enumerate()
            .for_each(|(i, &b)| img[off + 20 + i] = b);
        U32::new(size)
            .as_bytes()
            .iter()
            .enumerate()
            .for_each(|(i, &b)| img[off + 28 + i] = b);
    }

    /// Nibble-packed FAT12 write, mirroring `fat_table::write_entry`'s
    /// read-modify-write so the neighboring entry's bits survive.
    fn set_fat12_entry(img: &mut [u8], fat_off: usize, cluster: u32, value: u16) {
        let off = fat_off + (cluster as usize * 3) / 2;
        let mut word = u16::from_le_bytes([img[off], img[off + 1]]);
        if cluster & 1 != 0 {
            word = (word & 0x000f) | (value << 4);
        } else {
            word = (word & 0xf000) | (value & 0x0fff);
        }
        img[off..off + 2].copy_from_slice(&word.to_le_bytes());
    }

    fn root_region_off() -> usize {
        (1 + FAT_SECTORS as usize) * SECTOR
    }

    #[test]
    fn mount_reads_label_and_geometry() {
        init_logging();
        let img = build_fat12(16, 8);
        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        assert_eq!(fs.label(), "TESTDISK");
        assert_eq!(fs.variant(), FatVariant::Fat12);
        assert_eq!(fs.bytes_per_cluster(), 512);
    }

    #[test]
    fn opendir_root_lists_file_entry() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"HELLO   TXT", 0x20, 2, 5);
        let fat_off = 1 * SECTOR;
        set_fat12_entry(&mut img, fat_off, 2, 0xffff);

        let data_off = root_off + 16 * 32;
        let cluster2_off = data_off;
        img[cluster2_off..cluster2_off + 5].copy_from_slice(b"hello");

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut dir = fs.opendir("/").unwrap();
        let entry = dir.readdir().unwrap().unwrap();
        assert_eq!(entry.name, "HELLO.TXT");
        assert_eq!(entry.size, 5);
        assert!(dir.readdir().unwrap().is_none());
    }

    #[test]
    fn fopen_reads_file_contents_across_clusters() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"BIG     TXT", 0x20, 2, 600);
        let fat_off = SECTOR;
        set_fat12_entry(&mut img, fat_off, 2, 3);
        set_fat12_entry(&mut img, fat_off, 3, 0xffff);

        let data_off = root_off + 16 * 32;
        for i in 0..512u8 {
            img[data_off + i as usize] = i;
        }
        for i in 0..88u8 {
            img[data_off + 512 + i as usize] = 0xaa;
        }

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut file = fs.fopen("/BIG.TXT", "r").unwrap();
        let mut buf = vec![0u8; 600];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(n, 600);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[511], 255);
        assert_eq!(buf[512], 0xaa);
        assert_eq!(buf[599], 0xaa);
        assert_eq!(file.tell(), 600);
    }

    #[test]
    fn fopen_write_extends_file_and_updates_size() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"OUT     TXT", 0x20, 0, 0);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        {
            let mut file = fs.fopen("/OUT.TXT", "w").unwrap();
            let n = file.write(b"hello world").unwrap();
            assert_eq!(n, 11);
        }
        let mut file = fs.fopen("/OUT.TXT", "r").unwrap();
        assert_eq!(file.len(), 11);
        let mut buf = [0u8; 11];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn seek_past_eof_then_write_zero_fills_gap() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"GAP     TXT", 0x20, 0, 0);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        {
            let mut file = fs.fopen("/GAP.TXT", "w").unwrap();
            file.seek(Whence::Set(10)).unwrap();
            file.write(b"X").unwrap();
        }
        let mut file = fs.fopen("/GAP.TXT", "r").unwrap();
        assert_eq!(file.len(), 11);
        let mut buf = [0u8; 11];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf[0..10], &[0u8; 10]);
        assert_eq!(buf[10], b'X');
    }

    #[test]
    fn truncate_shrinks_file_and_releases_clusters() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"BIG     TXT", 0x20, 2, 600);
        let fat_off = SECTOR;
        set_fat12_entry(&mut img, fat_off, 2, 3);
        set_fat12_entry(&mut img, fat_off, 3, 0xffff);

        let data_off = root_off + 16 * 32;
        for i in 0..512u8 {
            img[data_off + i as usize] = i;
        }

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        fs.truncate("/BIG.TXT", 100).unwrap();

        let mut file = fs.fopen("/BIG.TXT", "r").unwrap();
        assert_eq!(file.len(), 100);
        let mut buf = vec![0u8; 100];
        file.read(&mut buf).unwrap();
        assert_eq!(buf[0], 0);
        assert_eq!(buf[99], 99);
    }

    #[test]
    fn readdir_skips_deleted_and_stops_at_end_marker() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        img[root_off] = 0xe5;
        write_short_entry(&mut img, root_off + 32, b"KEEP    TXT", 0x20, 0, 0);
        img[root_off + 64] = 0x00;

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut dir = fs.opendir("/").unwrap();
        let entry = dir.readdir().unwrap().unwrap();
        assert_eq!(entry.name, "KEEP.TXT");
        assert!(dir.readdir().unwrap().is_none());
    }

    #[test]
    fn telldir_seekdir_roundtrip() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"A       TXT", 0x20, 0, 0);
        write_short_entry(&mut img, root_off + 32, b"B       TXT", 0x20, 0, 0);
        write_short_entry(&mut img, root_off + 64, b"C       TXT", 0x20, 0, 0);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut dir = fs.opendir("/").unwrap();
        dir.readdir().unwrap();
        let pos = dir.telldir();
        dir.readdir().unwrap();
        dir.readdir().unwrap();
        assert!(dir.readdir().unwrap().is_none());

        dir.seekdir(pos).unwrap();
        let entry = dir.readdir().unwrap().unwrap();
        assert_eq!(entry.name, "B.TXT");

        dir.rewinddir();
        let entry = dir.readdir().unwrap().unwrap();
        assert_eq!(entry.name, "A.TXT");
    }

    #[test]
    fn fopen_missing_file_is_noent() {
        init_logging();
        let img = build_fat12(16, 8);
        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let err = fs.fopen("/NOPE.TXT", "r").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoEnt);
        assert_eq!(fs.error(), ErrorCode::NoEnt);
    }

    #[test]
    fn fopen_directory_path_is_isdir() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"SUBDIR     ", 0x10, 2, 0);
        set_fat12_entry(&mut img, SECTOR, 2, 0xffff);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let err = fs.fopen("/SUBDIR", "r").unwrap_err();
        assert_eq!(err.code(), ErrorCode::IsDir);
    }

    #[test]
    fn opendir_into_subdirectory_finds_nested_file() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"SUBDIR     ", 0x10, 2, 0);
        let fat_off = SECTOR;
        set_fat12_entry(&mut img, fat_off, 2, 0xffff);

        let data_off = root_off + 16 * 32;
        let sub_cluster_off = data_off;
        write_short_entry(&mut img, sub_cluster_off, b".          ", 0x10, 2, 0);
        write_short_entry(&mut img, sub_cluster_off + 32, b"..         ", 0x10, 2, 0);
        write_short_entry(&mut img, sub_cluster_off + 64, b"NESTED  TXT", 0x20, 0, 0);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut dir = fs.opendir("/SUBDIR").unwrap();
        let dot = dir.readdir().unwrap().unwrap();
        assert_eq!(dot.name, ".");
        let dotdot = dir.readdir().unwrap().unwrap();
        assert_eq!(dotdot.name, "..");
        let nested = dir.readdir().unwrap().unwrap();
        assert_eq!(nested.name, "NESTED.TXT");
    }

    /// Write a single VFAT long-name fragment at `off`: one 13-code-unit
    /// slice of `name`, zero-padded and 0xffff-filled per the on-disk
    /// layout `dirent::load_long_name` walks backward through.
    fn write_long_name_entry(img: &mut [u8], off: usize, ord: u8, name: &str) {
        let mut units: Vec<u16> = name.encode_utf16().collect();
        units.push(0);
        while units.len() < 13 {
            units.push(0xffff);
        }
        img[off] = ord;
        img[off + 11] = 0x0f; // ATTR_LONG_NAME
        img[off + 12] = 0;
        img[off + 13] = 0;
        for (i, u) in units[0..5].iter().enumerate() {
            img[off + 1 + i * 2..off + 3 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        for (i, u) in units[5..11].iter().enumerate() {
            img[off + 14 + i * 2..off + 16 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        img[off + 26..off + 28].copy_from_slice(&0u16.to_le_bytes());
        for (i, u) in units[11..13].iter().enumerate() {
            img[off + 28 + i * 2..off + 30 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
    }

    #[test]
    fn readdir_reassembles_long_name_spanning_a_cluster_boundary() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"SUBDIR     ", 0x10, 2, 0);
        let fat_off = SECTOR;
        set_fat12_entry(&mut img, fat_off, 2, 3);
        set_fat12_entry(&mut img, fat_off, 3, 0xffff);

        let cluster2_off = root_off + 16 * 32;
        let cluster3_off = cluster2_off + 512;

        write_short_entry(&mut img, cluster2_off, b".          ", 0x10, 2, 0);
        write_short_entry(&mut img, cluster2_off + 32, b"..         ", 0x10, 2, 0);
        for slot in 2..15 {
            img[cluster2_off + slot * 32] = 0xe5;
        }
        // The sole LFN fragment for the primary entry is the very last
        // record of cluster 2; the primary itself opens cluster 3.
        write_long_name_entry(img.as_mut_slice(), cluster2_off + 15 * 32, 0x41, "longname.txt");
        write_short_entry(&mut img, cluster3_off, b"LFNFILE TXT", 0x20, 0, 0);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut dir = fs.opendir("/SUBDIR").unwrap();
        dir.readdir().unwrap(); // "."
        dir.readdir().unwrap(); // ".."
        let entry = dir.readdir().unwrap().unwrap();
        assert_eq!(entry.name, "longname.txt");
    }

    #[test]
    fn opendir_detects_self_referencing_chain() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"SUBDIR     ", 0x10, 2, 0);
        set_fat12_entry(&mut img, SECTOR, 2, 2);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let err = fs.opendir("/SUBDIR").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Loop);
    }

    #[test]
    fn fopen_detects_self_referencing_chain() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"BAD     TXT", 0x20, 2, 512);
        set_fat12_entry(&mut img, SECTOR, 2, 2);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let err = fs.fopen("/BAD.TXT", "r").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Loop);
    }

    #[test]
    fn fopen_empty_file_with_zero_cluster_is_not_a_false_loop() {
        init_logging();
        let mut img = build_fat12(16, 8);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"EMPTY   TXT", 0x20, 0, 0);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let file = fs.fopen("/EMPTY.TXT", "r").unwrap();
        assert_eq!(file.len(), 0);
    }

    /// A directory whose cluster chain is long enough to cross the
    /// Brent checkpoint at cluster 257 without cycling back on itself:
    /// the checkpoint comparison must run before the checkpoint is
    /// refreshed, or `opendir` misreports this acyclic chain as a loop
    /// (see `cursor::check_cyclic`).
    #[test]
    fn opendir_accepts_acyclic_chain_past_the_checkpoint_stride() {
        init_logging();
        let num_clusters = 260;
        let mut img = build_fat12(16, num_clusters);
        let root_off = root_region_off();
        write_short_entry(&mut img, root_off, b"LONGDIR    ", 0x10, 2, 0);

        let fat_off = SECTOR;
        let last_cluster = num_clusters + 1;
        for cluster in 2..last_cluster {
            set_fat12_entry(&mut img, fat_off, cluster, (cluster + 1) as u16);
        }
        set_fat12_entry(&mut img, fat_off, last_cluster, 0xfff);

        let volsize = img.len() as u64;
        let fs = Fs::mount(MemStore::new(img), 0, volsize).unwrap();
        let mut dir = fs.opendir("/LONGDIR").unwrap();
        assert!(dir.readdir().unwrap().is_none());
    }
}
