//! Composing the index parser, fixup, and orphan map into a full
//! directory listing: allocated entries, tolerantly-recovered deleted
//! entries, and orphaned children (§4.9).

use std::io::{Read, Seek};

use log::warn;

use crate::error::{Error, Result};
use crate::image::getu32;
use crate::model::{FileType, Flags, FsDir, FsName};

use super::filename::FileName;
use super::index::parse_index_entries;
use super::types::{ATYPE_FILE_NAME, ATYPE_INDEX_ALLOCATION, ATYPE_INDEX_ROOT, INDEX_RECORD_MAGIC, ROOT_INODE};
use super::NtfsHandle;

/// Name given to the synthetic directory gathering orphans with no
/// resolvable parent at all (§4.9 step 1, step 9) — orphans whose parent
/// *is* a live directory are attached there instead (step 8), so this
/// entry only ever holds the otherwise-unreachable remainder.
pub const ORPHAN_DIR_NAME: &str = "$OrphanFiles";

/// Outcome of a directory open: `Corrupt` means the listing is usable but
/// some sub-step found bad data and was skipped (§4.9 step 10); `Err`
/// (the `Result::Err` case) means the open could not produce anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirOpenStatus {
    Ok,
    Corrupt,
}

/// Composes `$INDEX_ROOT`, `$INDEX_ALLOCATION`, and the orphan map into
/// a full directory listing for MFT address `addr` (§4.9).
pub fn ntfs_dir_open_meta<R: Read + Seek>(
    handle: &mut NtfsHandle<R>,
    addr: u64,
    dir: &mut FsDir,
) -> Result<DirOpenStatus> {
    *dir = FsDir::new();

    if addr == handle.last_inum {
        return open_synthetic_orphan_dir(handle, dir);
    }

    let mut status = DirOpenStatus::Ok;
    let endian = handle.endian;

    let record = handle.read_record(addr)?;
    if !record.has_any_attribute(endian)? {
        return Err(Error::corrupt("ntfs dir open", format!("record {addr} has no attributes")));
    }

    let index_root = record
        .find_attr(&mut handle.reader, endian, handle.cluster_size, ATYPE_INDEX_ROOT)?
        .ok_or_else(|| Error::corrupt("ntfs dir open", format!("record {addr} has no $INDEX_ROOT")))?;
    if !index_root.resident {
        return Err(Error::corrupt("ntfs dir open", "$INDEX_ROOT must be resident"));
    }
    let root_data = &index_root.data;
    if root_data.len() < 0x10 {
        return Err(Error::corrupt("ntfs dir open", "$INDEX_ROOT shorter than its fixed header"));
    }
    let indexed_attr_type = getu32(endian, &root_data[0x00..0x04]);
    if indexed_attr_type != ATYPE_FILE_NAME {
        return Err(Error::unsupported("ntfs dir open", "only $FILE_NAME-keyed indices are modelled"));
    }

    if addr != ROOT_INODE {
        dir.add(FsName {
            name: ".".to_string(),
            addr,
            parent_addr: addr,
            parent_seq: record.sequence,
            seq: record.sequence,
            file_type: FileType::Dir,
            flags: if record.in_use { Flags::ALLOC } else { Flags::UNALLOC },
        });
        for attr in record.find_attrs(&mut handle.reader, endian, handle.cluster_size, ATYPE_FILE_NAME)? {
            if let Ok(fname) = FileName::decode(&attr.data, endian) {
                dir.add(FsName {
                    name: "..".to_string(),
                    addr: fname.parent.addr,
                    parent_addr: fname.parent.addr,
                    parent_seq: fname.parent.seq,
                    seq: fname.parent.seq,
                    file_type: FileType::Dir,
                    flags: Flags::ALLOC,
                });
            }
        }
    }

    let is_deleted = !record.in_use;
    let last_real_inum = handle.last_inum - 1;

    let begin_off = getu32(endian, &root_data[0x10..0x14]) as usize;
    let seqend_off = getu32(endian, &root_data[0x14..0x18]) as usize;
    let entries_start = 0x10 + begin_off;
    if entries_start > root_data.len() {
        status = DirOpenStatus::Corrupt;
        warn!("ntfs dir {addr}: $INDEX_ROOT begin_off past attribute end");
    } else {
        let used_len = seqend_off.saturating_sub(begin_off);
        parse_index_entries(
            &root_data[entries_start..],
            endian,
            0,
            last_real_inum,
            used_len,
            is_deleted,
            handle.time_upper_bound_100ns,
            &mut dir.entries,
        );
    }

    if let Some(idx_alloc) =
        record.find_attr(&mut handle.reader, endian, handle.cluster_size, ATYPE_INDEX_ALLOCATION)?
    {
        if idx_alloc.resident {
            return Err(Error::corrupt("ntfs dir open", "$INDEX_ALLOCATION must be non-resident"));
        }
        match parse_index_allocation(&idx_alloc.data, handle, addr, is_deleted, last_real_inum, &mut dir.entries) {
            Ok(()) => {}
            Err(_) => status = DirOpenStatus::Corrupt,
        }
    }

    handle.ensure_orphan_map()?;
    if let Some(map) = &handle.orphan_map {
        let children: Vec<u64> = map.get(addr).to_vec();
        for child_addr in children {
            if let Ok(child_record) = handle.read_record(child_addr) {
                if let Ok(fnames) =
                    child_record.find_attrs(&mut handle.reader, handle.endian, handle.cluster_size, ATYPE_FILE_NAME)
                {
                    if let Some(fname) = fnames.iter().find(|f| f.parent.addr == addr) {
                        dir.add(FsName {
                            name: fname.name.clone(),
                            addr: child_addr,
                            parent_addr: addr,
                            parent_seq: fname.parent.seq,
                            seq: child_record.sequence,
                            file_type: if fname.is_directory() { FileType::Dir } else { FileType::Reg },
                            flags: Flags::UNALLOC,
                        });
                    }
                }
            }
        }
    }

    if addr == ROOT_INODE {
        dir.add(FsName {
            name: ORPHAN_DIR_NAME.to_string(),
            addr: handle.last_inum,
            parent_addr: ROOT_INODE,
            parent_seq: 0,
            seq: 0,
            file_type: FileType::Dir,
            flags: Flags::ALLOC,
        });
    }

    Ok(status)
}

/// Finds every `INDX`-tagged record inside `buf`, fixes each one up, and
/// parses its entries — step 6 of §4.9. `buf` is the materialised
/// `$INDEX_ALLOCATION` content (allocated size, slack included).
fn parse_index_allocation<R: Read + Seek>(
    buf: &[u8],
    handle: &NtfsHandle<R>,
    dir_addr: u64,
    is_deleted: bool,
    last_real_inum: u64,
    out: &mut Vec<FsName>,
) -> Result<()> {
    let cluster_size = handle.cluster_size as usize;
    let mut positions = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= buf.len() {
        if buf[pos..pos + 4] == INDEX_RECORD_MAGIC {
            positions.push(pos);
        }
        pos += cluster_size.max(1);
    }

    let mut any_ok = false;
    let mut any_err = false;
    for (i, &start) in positions.iter().enumerate() {
        let end = positions.get(i + 1).copied().unwrap_or(buf.len());
        let mut record = buf[start..end].to_vec();

        let endian = handle.endian;
        let upd_off = crate::image::getu16(endian, &record[4..6]);
        let upd_cnt = crate::image::getu16(endian, &record[6..8]);
        if let Err(e) = super::fixup::apply_fixup(&mut record, endian, upd_off, upd_cnt, handle.sector_size) {
            warn!("ntfs dir {dir_addr}: index allocation record at {start}: {e}");
            any_err = true;
            continue;
        }

        if record.len() < 0x28 {
            any_err = true;
            continue;
        }
        let begin_off = getu32(endian, &record[0x18..0x1C]) as usize;
        let seqend_off = getu32(endian, &record[0x1C..0x20]) as usize;
        let entries_start = 0x18 + begin_off;
        if entries_start > record.len() {
            any_err = true;
            continue;
        }
        let used_len = seqend_off.saturating_sub(begin_off);
        parse_index_entries(
            &record[entries_start..],
            endian,
            0,
            last_real_inum,
            used_len,
            is_deleted,
            handle.time_upper_bound_100ns,
            out,
        );
        any_ok = true;
    }

    if any_err && !any_ok {
        return Err(Error::corrupt("ntfs index allocation", "no index allocation record could be parsed"));
    }
    if any_err {
        return Err(Error::corrupt("ntfs index allocation", "one or more index allocation records were corrupt"));
    }
    Ok(())
}

/// Builds the synthetic orphan directory's listing: every orphan whose
/// `$FILE_NAME.parent_ref` does not name a live, in-use directory record,
/// and so would never be attached anywhere by a normal directory open
/// (§4.9 step 1, "delegate to the external orphan-finder").
fn open_synthetic_orphan_dir<R: Read + Seek>(handle: &mut NtfsHandle<R>, dir: &mut FsDir) -> Result<DirOpenStatus> {
    handle.ensure_orphan_map()?;
    let parents: Vec<u64> = handle
        .orphan_map
        .as_ref()
        .map(|m| m.parents().collect())
        .unwrap_or_default();

    for parent_addr in parents {
        let parent_resolvable = handle
            .read_record(parent_addr)
            .map(|r| r.in_use && r.is_directory)
            .unwrap_or(false);
        if parent_resolvable {
            continue;
        }
        let children: Vec<u64> = handle
            .orphan_map
            .as_ref()
            .map(|m| m.get(parent_addr).to_vec())
            .unwrap_or_default();
        for child_addr in children {
            if let Ok(child_record) = handle.read_record(child_addr) {
                if let Ok(fnames) =
                    child_record.find_attrs(&mut handle.reader, handle.endian, handle.cluster_size, ATYPE_FILE_NAME)
                {
                    if let Some(fname) = fnames.iter().find(|f| f.parent.addr == parent_addr) {
                        dir.add(FsName {
                            name: fname.name.clone(),
                            addr: child_addr,
                            parent_addr,
                            parent_seq: fname.parent.seq,
                            seq: child_record.sequence,
                            file_type: if fname.is_directory() { FileType::Dir } else { FileType::Reg },
                            flags: Flags::UNALLOC,
                        });
                    }
                }
            }
        }
    }

    Ok(DirOpenStatus::Ok)
}
