//! Reverse-walking `$FILE_NAME.parent_ref` chains to build full paths for
//! a target inode (§4.10).
//!
//! The distilled source writes into a fixed 4096-byte buffer from the
//! right, silently reusing the previous cursor when a level would not
//! fit. This keeps both limits (4096 bytes, 128 levels) but reports
//! [`PathError::Overflow`] instead of swallowing the truncation (§9
//! design notes: "surface truncation instead of swallowing it").

use std::io::{Read, Seek};

use crate::error::Result;

use super::dir::ORPHAN_DIR_NAME;
use super::filename::FileName;
use super::types::ROOT_INODE;
use super::NtfsHandle;

/// Maximum number of parent levels resolved before giving up, mirroring
/// the source's `MAX_DEPTH`.
pub const MAX_DEPTH: usize = 128;
/// Maximum total path length in bytes, mirroring the source's fixed
/// working buffer.
pub const MAX_PATH_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// The assembled path would exceed [`MAX_PATH_BYTES`] or required more
    /// than [`MAX_DEPTH`] parent levels.
    Overflow,
}

/// Builds every full path reaching MFT record `target` by walking each of
/// its `$FILE_NAME.parent_ref` chains back to the root, invoking
/// `callback` once per fully-assembled path.
///
/// A parent lookup that resolves to the wrong type (not a directory) or a
/// sequence-number mismatch reports that segment under
/// [`ORPHAN_DIR_NAME`] instead of continuing to follow it (§4.10).
pub fn ntfs_resolve_path<R: Read + Seek>(
    handle: &mut NtfsHandle<R>,
    target: u64,
    mut callback: impl FnMut(std::result::Result<&str, PathError>),
) -> Result<()> {
    use super::types::ATYPE_FILE_NAME;

    let endian = handle.endian;
    let record = handle.read_record(target)?;
    let fnames = record.find_attrs(&mut handle.reader, endian, handle.cluster_size, ATYPE_FILE_NAME)?;

    if fnames.is_empty() {
        // Nameless inode (e.g. the root itself, or a record with no
        // surviving $FILE_NAME): nothing to reverse-walk.
        return Ok(());
    }

    for resolved in resolve_all(handle, &fnames)? {
        callback(resolved.as_deref().map_err(|e| *e));
    }

    Ok(())
}

/// Reverse-walks each of `fnames`'s `parent` chains back to the root,
/// returning one assembled path per name (or [`PathError::Overflow`] for
/// whichever ran past [`MAX_DEPTH`]/[`MAX_PATH_BYTES`]). Shared between
/// [`ntfs_resolve_path`] and `ntfs_find_file`, which both need the same
/// full-path assembly over a file's `$FILE_NAME` instances.
pub(super) fn resolve_all<R: Read + Seek>(
    handle: &mut NtfsHandle<R>,
    fnames: &[FileName],
) -> Result<Vec<std::result::Result<String, PathError>>> {
    use super::types::ATYPE_FILE_NAME;

    let endian = handle.endian;
    let mut out = Vec::with_capacity(fnames.len());

    for fname in fnames {
        let mut segments: Vec<String> = vec![fname.name.clone()];
        let mut total_len = fname.name.len();
        let mut parent = fname.parent;
        let mut depth = 1usize;
        let mut overflowed = false;

        while parent.addr != ROOT_INODE {
            if depth >= MAX_DEPTH {
                overflowed = true;
                break;
            }

            let parent_record = match handle.read_record(parent.addr) {
                Ok(r) => r,
                Err(_) => {
                    segments.push(ORPHAN_DIR_NAME.to_string());
                    break;
                }
            };
            if !parent_record.is_directory || parent_record.sequence != parent.seq {
                segments.push(ORPHAN_DIR_NAME.to_string());
                break;
            }

            let parent_fnames =
                parent_record.find_attrs(&mut handle.reader, endian, handle.cluster_size, ATYPE_FILE_NAME)?;
            let Some(parent_fname) = parent_fnames.first() else {
                segments.push(ORPHAN_DIR_NAME.to_string());
                break;
            };

            total_len += parent_fname.name.len() + 1;
            if total_len > MAX_PATH_BYTES {
                overflowed = true;
                break;
            }
            segments.push(parent_fname.name.clone());
            parent = parent_fname.parent;
            depth += 1;
        }

        if overflowed {
            out.push(Err(PathError::Overflow));
            continue;
        }

        let mut path = String::with_capacity(total_len + 1);
        for seg in segments.iter().rev() {
            path.push('/');
            path.push_str(seg);
        }
        out.push(Ok(path));
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflow_is_a_distinct_error_kind() {
        assert_eq!(PathError::Overflow, PathError::Overflow);
    }
}
