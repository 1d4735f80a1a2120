//! The three single-slot caches keyed by "generation tag" (§3, §4.2):
//! the active group descriptor, the active block/inode bitmaps, and (in
//! `inode.rs`) the active raw inode.
//!
//! Each exposes one operation, "ensure loaded for tag X": allocate the slot
//! if empty, return immediately on a tag hit, otherwise read and validate.
//! The "never loaded" sentinel is `Option<u32>`, not an in-band numeric
//! value (§9) — this is the one place the distilled source's `0xFFFFFFFF`
//! tag does not appear in this crate at all.

use std::io::{Read, Seek};
use std::mem::size_of;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::image::ImageReader;

use super::superblock::ExtSuper;

/// One parsed block-group descriptor.
#[derive(Debug, Clone, Copy)]
pub struct GroupDescriptor {
    pub block_bitmap_addr: u32,
    pub inode_bitmap_addr: u32,
    pub inode_table_addr: u32,
    pub unallocated_blocks: u16,
    pub unallocated_inodes: u16,
    pub directories: u16,
}

const RAW_GROUP_DESC_SIZE: usize = 32;

impl GroupDescriptor {
    fn decode(buf: &[u8], endian: crate::image::Endian) -> Self {
        use crate::image::{getu16, getu32};
        Self {
            block_bitmap_addr: getu32(endian, &buf[0..4]),
            inode_bitmap_addr: getu32(endian, &buf[4..8]),
            inode_table_addr: getu32(endian, &buf[8..12]),
            unallocated_blocks: getu16(endian, &buf[12..14]),
            unallocated_inodes: getu16(endian, &buf[14..16]),
            directories: getu16(endian, &buf[16..18]),
        }
    }
}

/// Single-slot cache of the currently-loaded group descriptor, keyed by
/// group number.
#[derive(Debug, Default)]
pub struct ExtGroupCache {
    tag: Option<u32>,
    slot: Option<GroupDescriptor>,
}

impl ExtGroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures group `g`'s descriptor is loaded, returning a reference to it.
    pub fn ensure<R: Read + Seek>(
        &mut self,
        reader: &mut ImageReader<R>,
        sb: &ExtSuper,
        g: u32,
    ) -> Result<&GroupDescriptor> {
        if self.tag != Some(g) {
            trace!("loading group descriptor {g}");
            let off = sb.groups_offset + g as u64 * size_of::<[u8; RAW_GROUP_DESC_SIZE]>() as u64;
            let mut buf = [0u8; RAW_GROUP_DESC_SIZE];
            reader.read_at("ext group descriptor", off, &mut buf)?;
            let gd = GroupDescriptor::decode(&buf, sb.endian);

            for (name, addr) in [
                ("block bitmap", gd.block_bitmap_addr),
                ("inode bitmap", gd.inode_bitmap_addr),
                ("inode table", gd.inode_table_addr),
            ] {
                if addr > sb.last_block {
                    return Err(Error::corrupt(
                        "ext group descriptor",
                        format!("group {g} {name} address {addr} exceeds last_block {}", sb.last_block),
                    ));
                }
            }

            self.slot = Some(gd);
            self.tag = Some(g);
        } else {
            trace!("group descriptor {g} cache hit");
        }
        Ok(self.slot.as_ref().expect("slot populated above"))
    }
}

/// Which bitmap a [`ExtBitmapCache`] instance holds; block and inode
/// bitmaps are cached independently (the handle owns two of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapKind {
    Block,
    Inode,
}

/// Single-slot cache of one kind of bitmap, keyed by group number.
#[derive(Debug, Default)]
pub struct ExtBitmapCache {
    tag: Option<u32>,
    slot: Vec<u8>,
}

impl ExtBitmapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure<R: Read + Seek>(
        &mut self,
        reader: &mut ImageReader<R>,
        sb: &ExtSuper,
        group_cache: &mut ExtGroupCache,
        kind: BitmapKind,
        g: u32,
    ) -> Result<&[u8]> {
        if self.tag != Some(g) {
            let gd = *group_cache.ensure(reader, sb, g)?;
            let addr = match kind {
                BitmapKind::Block => gd.block_bitmap_addr,
                BitmapKind::Inode => gd.inode_bitmap_addr,
            };
            debug!("loading {kind:?} bitmap for group {g} at block {addr}");
            let mut buf = vec![0u8; sb.block_size as usize];
            reader.read_at(
                "ext bitmap",
                addr as u64 * sb.block_size as u64,
                &mut buf,
            )?;
            self.slot = buf;
            self.tag = Some(g);
        }
        Ok(&self.slot)
    }

    /// Tests bit `i` (little-endian-in-byte, bit 0 = LSB) of the currently
    /// loaded bitmap.
    pub fn bit(&self, i: u32) -> bool {
        let byte = self.slot[(i / 8) as usize];
        (byte >> (i % 8)) & 1 != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::image::CountingReader;
    use std::io::Cursor;

    fn test_sb() -> ExtSuper {
        ExtSuper {
            endian: crate::image::Endian::Little,
            inodes_count: 32,
            blocks_count: 1024,
            first_data_block: 1,
            block_size: 1024,
            inode_size: 128,
            blocks_per_group: 8192,
            inodes_per_group: 32,
            groups_count: 1,
            groups_offset: 2048,
            first_inum: 11,
            last_inum: 33,
            last_block: 1023,
            last_block_act: 1023,
            has_file_type_byte: true,
            large_file: false,
        }
    }

    fn image_with_group_desc() -> Vec<u8> {
        let mut img = vec![0u8; 1024 * 8];
        let off = 2048usize;
        img[off..off + 4].copy_from_slice(&10u32.to_le_bytes()); // block bitmap
        img[off + 4..off + 8].copy_from_slice(&11u32.to_le_bytes()); // inode bitmap
        img[off + 8..off + 12].copy_from_slice(&12u32.to_le_bytes()); // inode table
        img
    }

    #[test]
    fn group_cache_hits_on_repeat_tag() {
        let sb = test_sb();
        let img = image_with_group_desc();
        let mut reader = ImageReader::new(CountingReader::new(Cursor::new(img)), 0);
        let mut cache = ExtGroupCache::new();
        cache.ensure(&mut reader, &sb, 0).unwrap();
        let reads_after_first = reader.get_ref().reads;
        cache.ensure(&mut reader, &sb, 0).unwrap();
        assert_eq!(reader.get_ref().reads, reads_after_first, "second load must be a cache hit");
    }

    #[test]
    fn rejects_descriptor_past_last_block() {
        let sb = test_sb();
        let mut img = image_with_group_desc();
        img[2048..2052].copy_from_slice(&9999u32.to_le_bytes());
        let mut reader = ImageReader::new(Cursor::new(img), 0);
        let mut cache = ExtGroupCache::new();
        let err = cache.ensure(&mut reader, &sb, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }
}
