//! The raw-inode cache (§4.2) and the inode decoder (§4.3).

use std::io::{Read, Seek};

use log::trace;

use crate::error::{Error, Result};
use crate::image::ImageReader;
use crate::model::{FileType, Flags, FsMeta};

use super::superblock::ExtSuper;

/// Documented portion of an on-disk ext2 inode (128 bytes); anything beyond
/// `inode_size` is kept opaque and never interpreted.
#[derive(Debug, Clone, Copy)]
pub struct RawInode {
    pub mode: u16,
    pub uid_low: u16,
    pub size_low: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid_low: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    pub direct_blocks: [i32; 12],
    pub singly_indirect: i32,
    pub doubly_indirect: i32,
    pub triply_indirect: i32,
    pub file_acl: u32,
    pub size_high: u32,
    pub uid_high: u16,
    pub gid_high: u16,
}

const RAW_INODE_DOCUMENTED_SIZE: usize = 128;

impl RawInode {
    fn decode(buf: &[u8], endian: crate::image::Endian) -> Self {
        use crate::image::{getu16, getu32};
        let u32_at = |off: usize| getu32(endian, &buf[off..off + 4]);
        let u16_at = |off: usize| getu16(endian, &buf[off..off + 2]);
        let i32_at = |off: usize| u32_at(off) as i32;

        let mut direct_blocks = [0i32; 12];
        for (i, slot) in direct_blocks.iter_mut().enumerate() {
            *slot = i32_at(40 + i * 4);
        }

        Self {
            mode: u16_at(0),
            uid_low: u16_at(2),
            size_low: u32_at(4),
            atime: u32_at(8),
            ctime: u32_at(12),
            mtime: u32_at(16),
            dtime: u32_at(20),
            gid_low: u16_at(24),
            links_count: u16_at(26),
            blocks: u32_at(28),
            flags: u32_at(32),
            direct_blocks,
            singly_indirect: i32_at(88),
            doubly_indirect: i32_at(92),
            triply_indirect: i32_at(96),
            file_acl: u32_at(104),
            size_high: u32_at(108),
            uid_high: u16_at(120),
            gid_high: u16_at(122),
        }
    }

    /// The 15 block-pointer slots viewed as raw bytes, in the order a
    /// symlink's inline target is decoded from (§4.3).
    fn block_ptr_bytes(&self) -> [u8; 60] {
        let mut out = [0u8; 60];
        for (i, b) in self.direct_blocks.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&b.to_le_bytes());
        }
        out[48..52].copy_from_slice(&self.singly_indirect.to_le_bytes());
        out[52..56].copy_from_slice(&self.doubly_indirect.to_le_bytes());
        out[56..60].copy_from_slice(&self.triply_indirect.to_le_bytes());
        out
    }
}

/// Single-slot cache of the currently-loaded raw inode, keyed by inode
/// number.
#[derive(Debug, Default)]
pub struct ExtInodeCache {
    tag: Option<u32>,
    slot: Option<RawInode>,
}

impl ExtInodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure<R: Read + Seek>(
        &mut self,
        reader: &mut ImageReader<R>,
        sb: &ExtSuper,
        group_cache: &mut super::group::ExtGroupCache,
        inum: u32,
    ) -> Result<&RawInode> {
        if inum < sb.first_inum || inum > sb.last_inum.saturating_sub(1) {
            return Err(Error::argument(
                "ext inode lookup",
                format!("inode {inum} outside [{}, {}]", sb.first_inum, sb.last_inum - 1),
            ));
        }
        if self.tag != Some(inum) {
            trace!("loading inode {inum}");
            let group = (inum - 1) / sb.inodes_per_group;
            let rel = (inum - 1) % sb.inodes_per_group;
            let gd = *group_cache.ensure(reader, sb, group)?;
            let addr = gd.inode_table_addr as u64 * sb.block_size as u64
                + rel as u64 * sb.inode_size as u64;

            let mut buf = vec![0u8; RAW_INODE_DOCUMENTED_SIZE];
            reader.read_at("ext inode", addr, &mut buf)?;
            self.slot = Some(RawInode::decode(&buf, sb.endian));
            self.tag = Some(inum);
        }
        Ok(self.slot.as_ref().expect("slot populated above"))
    }
}

/// Ext file-type dispatch, `i_mode >> 12` — see §9 (closed enum replacing
/// the source's bitmask).
fn file_type_of_mode(mode: u16) -> FileType {
    match mode >> 12 {
        0x1 => FileType::Fifo,
        0x2 => FileType::Char,
        0x4 => FileType::Dir,
        0x6 => FileType::Block,
        0x8 => FileType::Reg,
        0xA => FileType::Link,
        0xC => FileType::Socket,
        _ => FileType::Undef,
    }
}

/// Maximum symlink target length considered for decoding, mirroring the
/// portable `MAXPATHLEN`.
const MAXPATHLEN: u64 = 4096;
/// Inline symlink targets live entirely in the 15 block-pointer slots when
/// shorter than this (4 bytes * 15 slots).
const INLINE_SYMLINK_MAX: u64 = 60;

/// Translates a loaded [`RawInode`] into the generic [`FsMeta`] container,
/// resolving the symlink target inline when applicable (§4.3). `alloc` and
/// `read_block` let the caller supply the inode-bitmap bit and a positional
/// block reader without this function needing to know about caches itself.
pub fn decode_inode<R: Read + Seek>(
    reader: &mut ImageReader<R>,
    sb: &ExtSuper,
    inum: u32,
    raw: &RawInode,
    allocated: bool,
) -> Result<FsMeta> {
    let file_type = file_type_of_mode(raw.mode);

    let size = if file_type == FileType::Reg && sb.large_file {
        raw.size_low as u64 | ((raw.size_high as u64) << 32)
    } else {
        raw.size_low as u64
    };

    let mut flags = if allocated { Flags::ALLOC } else { Flags::UNALLOC };
    flags |= if raw.ctime != 0 { Flags::USED } else { Flags::UNUSED };

    let link_target = if file_type == FileType::Link && size < MAXPATHLEN {
        Some(decode_symlink_target(reader, sb, raw, size)?)
    } else {
        None
    };

    Ok(FsMeta {
        addr: inum as u64,
        file_type,
        mode: raw.mode,
        uid: raw.uid_low as u32 | ((raw.uid_high as u32) << 16),
        gid: raw.gid_low as u32 | ((raw.gid_high as u32) << 16),
        size,
        atime: raw.atime,
        mtime: raw.mtime,
        ctime: raw.ctime,
        dtime: raw.dtime,
        flags,
        link_target,
    })
}

fn decode_symlink_target<R: Read + Seek>(
    reader: &mut ImageReader<R>,
    sb: &ExtSuper,
    raw: &RawInode,
    size: u64,
) -> Result<String> {
    let len = size as usize;
    let raw_bytes = if size < INLINE_SYMLINK_MAX {
        // Inline: the target lives directly in the 15 block-pointer slots.
        raw.block_ptr_bytes()[..len.min(60)].to_vec()
    } else {
        // Out of line: read up to 12 direct blocks' worth of target bytes,
        // advancing the destination cursor by exactly what was read from
        // each block rather than by a running total (§9 resolved open
        // question: the source's `a_ptr + count` stepping is not
        // replicated).
        let mut out = Vec::with_capacity(len);
        for &block in raw.direct_blocks.iter() {
            if out.len() >= len || block <= 0 {
                break;
            }
            let remaining = len - out.len();
            let read_count = remaining.min(sb.block_size as usize);
            let mut block_buf = vec![0u8; read_count];
            reader.read_at(
                "ext symlink target",
                block as u64 * sb.block_size as u64,
                &mut block_buf,
            )?;
            out.extend_from_slice(&block_buf);
        }
        out
    };

    let text = String::from_utf8_lossy(&raw_bytes).into_owned();
    Ok(crate::utf16::clean_control_chars(&text))
}
