//! The ext2/ext3 driver: superblock parsing, the per-group caches, inode
//! decoding, and the inode/block walkers (§4.1-§4.5).

pub mod ea;
pub mod group;
pub mod inode;
pub mod superblock;
pub mod walker;

pub use group::{BitmapKind, ExtBitmapCache, ExtGroupCache, GroupDescriptor};
pub use inode::{decode_inode, ExtInodeCache, RawInode};
pub use superblock::ExtSuper;
pub use walker::ExtHandle;

use std::io::{Read, Seek};

use crate::error::Result;
use crate::image::ImageReader;

/// Opens an ext2/ext3 filesystem at `offset` within `image`, reading and
/// validating the superblock (§4.1) and building an empty set of caches
/// around it.
pub fn ext_open<R: Read + Seek>(image: R, offset: u64) -> Result<ExtHandle<R>> {
    let mut reader = ImageReader::new(image, offset);
    let len = reader.len("ext open")?;
    let sb = ExtSuper::read(&mut reader, len)?;
    Ok(ExtHandle::new(reader, sb))
}

#[cfg(test)]
mod scenarios {
    use super::*;
    use crate::model::{FileType, Flags, WalkControl};
    use std::collections::HashSet;
    use std::io::Cursor;

    const RAW_GROUP_DESC_SIZE: usize = 32;
    const RAW_INODE_SIZE: usize = 128;

    /// Builds a minimal but structurally valid one-group ext2 image with
    /// `inodes_count` inodes, letting the test fill in individual inodes
    /// afterwards via the returned inode-table offset.
    fn build_image(inodes_count: u32, inodes_per_group: u32, large_file: bool) -> (Vec<u8>, u64) {
        let block_size = 1024u32;
        let blocks_count = 512u32;
        let blocks_per_group = 8192u32;

        let mut img = vec![0u8; (blocks_count as usize + 4) * block_size as usize];
        let sb_off = 1024usize;
        img[sb_off..sb_off + 4].copy_from_slice(&inodes_count.to_le_bytes());
        img[sb_off + 4..sb_off + 8].copy_from_slice(&blocks_count.to_le_bytes());
        img[sb_off + 20..sb_off + 24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
        img[sb_off + 24..sb_off + 28].copy_from_slice(&0u32.to_le_bytes()); // block_size_log -> 1024
        img[sb_off + 28..sb_off + 32].copy_from_slice(&0u32.to_le_bytes());
        img[sb_off + 32..sb_off + 36].copy_from_slice(&blocks_per_group.to_le_bytes());
        img[sb_off + 40..sb_off + 44].copy_from_slice(&inodes_per_group.to_le_bytes());
        img[sb_off + 56..sb_off + 58].copy_from_slice(&superblock::EXT2_MAGIC.to_le_bytes());
        img[sb_off + 76..sb_off + 80].copy_from_slice(&1u32.to_le_bytes()); // major_version
        img[sb_off + 88..sb_off + 90].copy_from_slice(&(RAW_INODE_SIZE as u16).to_le_bytes());
        if large_file {
            img[sb_off + 100..sb_off + 104].copy_from_slice(&0x0002u32.to_le_bytes()); // RO_COMPAT_LARGE_FILE
        }

        // Group descriptor table starts at block 2 (right after the
        // superblock's block), per the round-up-aligned rule in §6.
        let gd_off = 2 * block_size as usize;
        let block_bitmap_blk = 3u32;
        let inode_bitmap_blk = 4u32;
        let inode_table_blk = 5u32;
        img[gd_off..gd_off + 4].copy_from_slice(&block_bitmap_blk.to_le_bytes());
        img[gd_off + 4..gd_off + 8].copy_from_slice(&inode_bitmap_blk.to_le_bytes());
        img[gd_off + 8..gd_off + 12].copy_from_slice(&inode_table_blk.to_le_bytes());
        let _ = RAW_GROUP_DESC_SIZE;

        // Inode bitmap: mark every inode unallocated by default (all zero
        // bits); tests flip specific bits as needed.
        let inode_table_off = inode_table_blk as u64 * block_size as u64;

        (img, inode_table_off)
    }

    fn set_inode_bit(img: &mut [u8], bit: u32, value: bool) {
        let bitmap_off = 4 * 1024usize; // inode_bitmap_blk * block_size
        let byte = bitmap_off + (bit / 8) as usize;
        if value {
            img[byte] |= 1 << (bit % 8);
        } else {
            img[byte] &= !(1 << (bit % 8));
        }
    }

    #[test]
    fn scenario_ext_symlink_inline() {
        let (mut img, inode_table_off) = build_image(64, 32, false);
        let inum = 12u32;
        set_inode_bit(&mut img, inum - 1, true);

        let off = inode_table_off as usize + (inum as usize - 1) * RAW_INODE_SIZE;
        img[off..off + 2].copy_from_slice(&0o120777u16.to_le_bytes()); // mode: symlink
        img[off + 12..off + 16].copy_from_slice(&1u32.to_le_bytes()); // ctime != 0
        img[off + 4..off + 8].copy_from_slice(&7u32.to_le_bytes()); // size = 7
        img[off + 40..off + 44].copy_from_slice(b"etc/");
        img[off + 44..off + 48].copy_from_slice(b"foo\0");

        let mut handle = ext_open(Cursor::new(img), 0).unwrap();
        let meta = handle.inode_lookup(inum).unwrap();
        assert_eq!(meta.file_type, FileType::Link);
        assert_eq!(meta.link_target.as_deref(), Some("etc/foo"));
    }

    #[test]
    fn scenario_ext_large_regular() {
        let (mut img, inode_table_off) = build_image(64, 32, true);
        let inum = 13u32;
        set_inode_bit(&mut img, inum - 1, true);
        let off = inode_table_off as usize + (inum as usize - 1) * RAW_INODE_SIZE;
        img[off..off + 2].copy_from_slice(&0o100644u16.to_le_bytes());
        img[off + 12..off + 16].copy_from_slice(&1u32.to_le_bytes());
        img[off + 4..off + 8].copy_from_slice(&0x0000_0200u32.to_le_bytes());
        img[off + 108..off + 112].copy_from_slice(&0x0000_0001u32.to_le_bytes());

        let mut handle = ext_open(Cursor::new(img), 0).unwrap();
        let meta = handle.inode_lookup(inum).unwrap();
        assert_eq!(meta.size, 0x1_0000_0200);
    }

    #[test]
    fn scenario_ext_extended_attributes() {
        let (mut img, inode_table_off) = build_image(64, 32, false);
        let inum = 14u32;
        set_inode_bit(&mut img, inum - 1, true);

        let off = inode_table_off as usize + (inum as usize - 1) * RAW_INODE_SIZE;
        img[off..off + 2].copy_from_slice(&0o100644u16.to_le_bytes());
        img[off + 12..off + 16].copy_from_slice(&1u32.to_le_bytes()); // ctime != 0
        let ea_block = 10u32;
        img[off + 104..off + 108].copy_from_slice(&ea_block.to_le_bytes()); // file_acl

        let ea_off = ea_block as usize * 1024;
        img[ea_off] = 4; // name_len
        img[ea_off + 1] = 7; // name_index
        img[ea_off + 16..ea_off + 20].copy_from_slice(b"user");

        let mut handle = ext_open(Cursor::new(img), 0).unwrap();
        let mut seen = Vec::new();
        handle
            .ext_ea_walk(inum, |entry, name| {
                seen.push((entry.name_index, name.to_vec()));
            })
            .unwrap();
        assert_eq!(seen, vec![(7, b"user".to_vec())]);
    }

    #[test]
    fn scenario_ext_orphan_walk() {
        let (img, _) = build_image(32, 32, false);
        // inode 9: unallocated (bitmap left zero), ctime = 0 already (zeroed
        // inode table), not referenced by any name.
        let mut handle = ext_open(Cursor::new(img), 0).unwrap();
        let named = HashSet::new();
        let mut seen = Vec::new();
        handle
            .inode_walk(
                handle.sb.first_inum,
                handle.sb.last_inum - 1,
                Flags::ORPHAN,
                Some(&named),
                |meta| {
                    seen.push(meta.addr);
                    Ok(WalkControl::Continue)
                },
            )
            .unwrap();
        assert!(seen.contains(&9));
    }
}
