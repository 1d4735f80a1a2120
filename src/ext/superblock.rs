//! Parsing and validation of the ext2/ext3 superblock.
//!
//! Struct layout follows the on-disk ext2 superblock exactly (field order
//! and widths mirror `mkfs::ext2::Superblock`, the mkfs side of this same
//! filesystem family); this module only ever reads it.

use std::io::{Read, Seek};
use std::mem::size_of;

use crate::error::{Error, Result};
use crate::image::{Endian, ImageReader};

/// Byte offset of the superblock from the start of the partition.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The ext2 magic number, `s_magic`.
pub const EXT2_MAGIC: u16 = 0xef53;

/// RO-compat feature bit: file sizes may use the high 32 bits.
const RO_COMPAT_LARGE_FILE: u32 = 0x0002;
/// Incompat feature bit: directory entries carry a file-type byte.
const INCOMPAT_FILETYPE: u32 = 0x0002;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawSuperblock {
    total_inodes: u32,
    total_blocks: u32,
    superuser_blocks: u32,
    total_unallocated_blocks: u32,
    total_unallocated_inodes: u32,
    first_data_block: u32,
    block_size_log: u32,
    fragment_size_log: u32,
    blocks_per_group: u32,
    fragments_per_group: u32,
    inodes_per_group: u32,
    last_mount_timestamp: u32,
    last_write_timestamp: u32,
    mount_count_since_fsck: u16,
    mount_count_before_fsck: u16,
    signature: u16,
    fs_state: u16,
    error_action: u16,
    minor_version: u16,
    last_fsck_timestamp: u32,
    fsck_interval: u32,
    os_id: u32,
    major_version: u32,
    uid_reserved: u16,
    gid_reserved: u16,

    first_non_reserved_inode: u32,
    inode_size: u16,
    superblock_group: u16,
    feature_compat: u32,
    feature_incompat: u32,
    feature_ro_compat: u32,
    filesystem_id: [u8; 16],
    volume_name: [u8; 16],
    last_mount_path: [u8; 64],
    compression_algorithms: u32,
    files_preallocate_count: u8,
    directories_preallocate_count: u8,
    _unused: u16,
    journal_id: [u8; 16],
    journal_inode: u32,
    journal_device: u32,
    orphan_inode_head: u32,

    _padding: [u8; 788],
}

const RAW_SUPERBLOCK_SIZE: usize = size_of::<RawSuperblock>();

/// Parsed superblock plus the geometry derived from it, as described in
/// §4.1. This is the one structure every other ext component is handed a
/// reference to.
#[derive(Debug, Clone)]
pub struct ExtSuper {
    pub endian: Endian,
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub first_data_block: u32,
    pub block_size: u32,
    pub inode_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub groups_count: u32,
    /// Byte offset of the block-group descriptor table.
    pub groups_offset: u64,
    pub first_inum: u32,
    /// One past the real maximum inode number: reserves the synthetic
    /// orphan directory.
    pub last_inum: u32,
    pub last_block: u32,
    /// `last_block`, clamped to what the image actually contains.
    pub last_block_act: u32,
    pub has_file_type_byte: bool,
    pub large_file: bool,
}

/// Minimum documented size of an ext2 inode; `inode_size` never shrinks
/// below this even if `s_inode_size` claims otherwise.
const DOCUMENTED_INODE_SIZE: u32 = 128;
/// The lowest valid inode number. Inodes 1..10 are reserved for filesystem
/// bookkeeping (2 is the root directory) but still address real inode-table
/// slots, so walks and lookups start here, not past the reserved range.
const FIRST_INUM: u32 = 1;

impl ExtSuper {
    /// Reads and validates the superblock of the image backing `reader`.
    ///
    /// `image_len` is the total number of bytes available from the start of
    /// the partition (used to compute `last_block_act`).
    pub fn read<R: Read + Seek>(reader: &mut ImageReader<R>, image_len: u64) -> Result<Self> {
        let mut buf = [0u8; RAW_SUPERBLOCK_SIZE];
        reader.read_at("ext superblock", SUPERBLOCK_OFFSET, &mut buf)?;

        let endian = guess_endian(&buf)?;
        let raw = decode_raw(&buf, endian);

        let inodes_count = raw.total_inodes;
        // +1 reserves the synthetic orphan directory (§4.1).
        let inum_count = inodes_count + 1;
        if inum_count < 10 {
            return Err(Error::magic(
                "ext superblock",
                format!("inode count too small to be plausible ({inum_count})"),
            ));
        }

        if raw.block_size_log != raw.fragment_size_log {
            return Err(Error::unsupported(
                "ext superblock",
                "fragment size differs from block size; mixed fragment sizes are not modelled",
            ));
        }

        let block_size = 1024u32
            .checked_shl(raw.block_size_log)
            .ok_or_else(|| Error::corrupt("ext superblock", "block size shift overflowed"))?;
        if block_size == 0 {
            return Err(Error::corrupt("ext superblock", "block size computed as zero"));
        }

        let inode_size = if raw.major_version >= 1 {
            raw.inode_size as u32
        } else {
            DOCUMENTED_INODE_SIZE
        }
        .max(DOCUMENTED_INODE_SIZE);

        if raw.blocks_per_group == 0 {
            return Err(Error::corrupt("ext superblock", "blocks_per_group is zero"));
        }
        let groups_count = ceil_div(
            raw.total_blocks.saturating_sub(raw.first_data_block),
            raw.blocks_per_group,
        );

        let groups_offset = round_up(SUPERBLOCK_OFFSET + RAW_SUPERBLOCK_SIZE as u64, block_size as u64);

        let last_block = raw.total_blocks.saturating_sub(1);
        let blocks_in_image = image_len / block_size as u64;
        let last_block_act = last_block.min(blocks_in_image.saturating_sub(1) as u32);

        Ok(Self {
            endian,
            inodes_count,
            blocks_count: raw.total_blocks,
            first_data_block: raw.first_data_block,
            block_size,
            inode_size,
            blocks_per_group: raw.blocks_per_group,
            inodes_per_group: raw.inodes_per_group,
            groups_count,
            groups_offset,
            first_inum: FIRST_INUM,
            last_inum: inodes_count + 1,
            last_block,
            last_block_act,
            has_file_type_byte: raw.feature_incompat & INCOMPAT_FILETYPE != 0,
            large_file: raw.feature_ro_compat & RO_COMPAT_LARGE_FILE != 0,
        })
    }
}

fn ceil_div(n: u32, d: u32) -> u32 {
    if d == 0 {
        0
    } else {
        (n + d - 1) / d
    }
}

fn round_up(n: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        n
    } else {
        n.div_ceil(multiple) * multiple
    }
}

fn guess_endian(buf: &[u8]) -> Result<Endian> {
    // s_magic sits at byte offset 56 within the superblock.
    let magic_off = 56;
    let raw = &buf[magic_off..magic_off + 2];
    if crate::image::getu16(Endian::Little, raw) == EXT2_MAGIC {
        Ok(Endian::Little)
    } else if crate::image::getu16(Endian::Big, raw) == EXT2_MAGIC {
        Ok(Endian::Big)
    } else {
        Err(Error::magic(
            "ext superblock",
            "magic number does not match 0xEF53 in either byte order",
        ))
    }
}

/// Re-reads every multi-byte field of the raw superblock through the
/// detected endian accessor, rather than trusting `#[repr(C, packed)]`'s
/// native-endian field access, since the image may be the opposite
/// endianness of the host.
fn decode_raw(buf: &[u8], endian: Endian) -> RawSuperblock {
    use crate::image::{getu16, getu32};
    let u32_at = |off: usize| getu32(endian, &buf[off..off + 4]);
    let u16_at = |off: usize| getu16(endian, &buf[off..off + 2]);

    let mut filesystem_id = [0u8; 16];
    filesystem_id.copy_from_slice(&buf[104..120]);
    let mut volume_name = [0u8; 16];
    volume_name.copy_from_slice(&buf[120..136]);
    let mut last_mount_path = [0u8; 64];
    last_mount_path.copy_from_slice(&buf[136..200]);
    let mut journal_id = [0u8; 16];
    journal_id.copy_from_slice(&buf[208..224]);

    RawSuperblock {
        total_inodes: u32_at(0),
        total_blocks: u32_at(4),
        superuser_blocks: u32_at(8),
        total_unallocated_blocks: u32_at(12),
        total_unallocated_inodes: u32_at(16),
        first_data_block: u32_at(20),
        block_size_log: u32_at(24),
        fragment_size_log: u32_at(28),
        blocks_per_group: u32_at(32),
        fragments_per_group: u32_at(36),
        inodes_per_group: u32_at(40),
        last_mount_timestamp: u32_at(44),
        last_write_timestamp: u32_at(48),
        mount_count_since_fsck: u16_at(52),
        mount_count_before_fsck: u16_at(54),
        signature: u16_at(56),
        fs_state: u16_at(58),
        error_action: u16_at(60),
        minor_version: u16_at(62),
        last_fsck_timestamp: u32_at(64),
        fsck_interval: u32_at(68),
        os_id: u32_at(72),
        major_version: u32_at(76),
        uid_reserved: u16_at(80),
        gid_reserved: u16_at(82),

        first_non_reserved_inode: u32_at(84),
        inode_size: u16_at(88),
        superblock_group: u16_at(90),
        feature_compat: u32_at(92),
        feature_incompat: u32_at(96),
        feature_ro_compat: u32_at(100),
        filesystem_id,
        volume_name,
        last_mount_path,
        compression_algorithms: u32_at(200),
        files_preallocate_count: buf[204],
        directories_preallocate_count: buf[205],
        _unused: 0,
        journal_id,
        journal_inode: u32_at(224),
        journal_device: u32_at(228),
        orphan_inode_head: u32_at(232),

        _padding: [0; 788],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn make_image(block_size_log: u32, inodes_count: u32) -> Vec<u8> {
        let mut img = vec![0u8; 1024 + RAW_SUPERBLOCK_SIZE + 4096];
        let sb_off = 1024usize;
        img[sb_off..sb_off + 4].copy_from_slice(&inodes_count.to_le_bytes());
        img[sb_off + 4..sb_off + 8].copy_from_slice(&1024u32.to_le_bytes()); // total_blocks
        img[sb_off + 20..sb_off + 24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
        img[sb_off + 24..sb_off + 28].copy_from_slice(&block_size_log.to_le_bytes());
        img[sb_off + 28..sb_off + 32].copy_from_slice(&block_size_log.to_le_bytes()); // frag == block
        img[sb_off + 32..sb_off + 36].copy_from_slice(&8192u32.to_le_bytes()); // blocks_per_group
        img[sb_off + 40..sb_off + 44].copy_from_slice(&32u32.to_le_bytes()); // inodes_per_group
        img[sb_off + 56..sb_off + 58].copy_from_slice(&EXT2_MAGIC.to_le_bytes());
        img[sb_off + 76..sb_off + 80].copy_from_slice(&1u32.to_le_bytes()); // major_version
        img[sb_off + 88..sb_off + 90].copy_from_slice(&128u16.to_le_bytes()); // inode_size
        img
    }

    #[test]
    fn rejects_bad_magic() {
        let img = vec![0u8; 4096];
        let mut reader = ImageReader::new(Cursor::new(img), 0);
        let err = ExtSuper::read(&mut reader, 4096).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Magic);
    }

    #[test]
    fn derives_geometry() {
        let img = make_image(0, 64);
        let len = img.len() as u64;
        let mut reader = ImageReader::new(Cursor::new(img), 0);
        let sb = ExtSuper::read(&mut reader, len).unwrap();
        assert_eq!(sb.block_size, 1024);
        assert_eq!(sb.inode_size, 128);
        assert_eq!(sb.last_inum, 65);
        assert_eq!(sb.first_inum, 1);
    }

    #[test]
    fn rejects_mismatched_fragment_size() {
        let mut img = make_image(0, 64);
        img[1024 + 28..1024 + 32].copy_from_slice(&1u32.to_le_bytes());
        let len = img.len() as u64;
        let mut reader = ImageReader::new(Cursor::new(img), 0);
        let err = ExtSuper::read(&mut reader, len).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }
}
