//! Finding every path that names a given MFT record directly, without a
//! full directory walk (§6 `ntfs_find_file`).
//!
//! Unlike [`super::path::ntfs_resolve_path`] this also filters on the
//! target's own allocation status and, optionally, on the presence of a
//! specific attribute (type and id) before resolving names — mirroring
//! the two checks the distilled source runs before handing the file to
//! its callback.

use std::io::{Read, Seek};

use crate::error::{Error, Result};
use crate::model::{Flags, WalkControl};

use super::path::resolve_all;
use super::types::ATYPE_FILE_NAME;
use super::NtfsHandle;

/// Resolves every full path naming MFT record `inum`, delivering each to
/// `callback` in turn.
///
/// `name_flags` filters on the target's own allocation status (`ALLOC`,
/// `UNALLOC`, or both when neither bit is set, as with the ext walkers);
/// a target whose status isn't admitted yields no callbacks at all, not
/// an error. `type_filter`/`id_filter`, when given, require the record to
/// carry a matching attribute before it is resolved — `id_filter` without
/// `type_filter` is ignored, since an id is only meaningful alongside the
/// type it belongs to.
pub fn ntfs_find_file<R: Read + Seek>(
    handle: &mut NtfsHandle<R>,
    inum: u64,
    type_filter: Option<u32>,
    id_filter: Option<u16>,
    name_flags: Flags,
    mut callback: impl FnMut(std::result::Result<&str, super::path::PathError>) -> Result<WalkControl>,
) -> Result<()> {
    if inum >= handle.last_inum {
        return Err(Error::argument("ntfs find file", format!("invalid inode value: {inum}")));
    }

    let endian = handle.endian;
    let record = handle.read_record(inum)?;

    let admitted = if name_flags.intersects(Flags::ALLOC | Flags::UNALLOC) {
        (record.in_use && name_flags.contains(Flags::ALLOC))
            || (!record.in_use && name_flags.contains(Flags::UNALLOC))
    } else {
        true
    };
    if !admitted {
        return Ok(());
    }

    if let Some(type_code) = type_filter {
        if !record.has_attr(endian, type_code, id_filter)? {
            return Err(Error::corrupt(
                "ntfs find file",
                format!("type {type_code} id {id_filter:?} not found in MFT record {inum}"),
            ));
        }
    }

    let fnames = record.find_attrs(&mut handle.reader, endian, handle.cluster_size, ATYPE_FILE_NAME)?;
    if fnames.is_empty() {
        return Ok(());
    }

    for resolved in resolve_all(handle, &fnames)? {
        let arg = resolved.as_deref().map_err(|e| *e);
        if callback(arg)? == WalkControl::Stop {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn neither_alloc_nor_unalloc_requested_admits_either_status() {
        // Canonicalisation mirrors the ext walkers: an empty allocation
        // filter means "don't filter", not "admit nothing".
        let flags = Flags::empty();
        assert!(!flags.intersects(Flags::ALLOC | Flags::UNALLOC));
    }
}
