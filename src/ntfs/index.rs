//! Decoding a buffer of NTFS index entries, tolerant of the corruption
//! and deletion patterns directory indices accumulate over time (§4.7).
//!
//! Mirrors `ntfs_proc_idxentry`: walk entries until the next header would
//! cross the buffer end, validating each candidate before trusting its
//! length, and recovering from any failed check by advancing 4 bytes and
//! retrying rather than aborting the whole buffer.

use log::warn;

use crate::error::Result;
use crate::image::{getu16, Endian};
use crate::model::{FileType, Flags, FsName};

use super::filename::{self, FileName};
use super::types::{MftRef, Namespace};

/// Size of the index-entry header preceding the embedded `$FILE_NAME`
/// stream: child ref (8) + idxlen (2) + strlen (2) + flags (4).
const IDXENTRY_HEADER_LEN: usize = 16;

/// Result of attempting to advance past one entry header: either the walk
/// continues from a new position, or the buffer has been exhausted.
enum Advance {
    Continue(usize),
    EndOfBuffer,
}

/// Advances `pos` by 4 bytes (the recovery step used throughout §4.7),
/// or reports end-of-buffer if that would leave less than a header's
/// worth of bytes.
fn skip_bytes(pos: usize, buf_len: usize) -> Advance {
    let next = pos + 4;
    if next + IDXENTRY_HEADER_LEN > buf_len {
        Advance::EndOfBuffer
    } else {
        Advance::Continue(next)
    }
}

/// Parses the index-entry list starting at `buf[0]`, appending every entry
/// that survives validation to `out`.
///
/// `used_len` marks the boundary beyond which entries are considered
/// deleted-but-maybe-recoverable (slack); `is_deleted` is set by the
/// caller when the containing inode itself is unallocated, in which case
/// every entry here is treated as deleted regardless of its own span.
pub fn parse_index_entries(
    buf: &[u8],
    endian: Endian,
    first_inum: u64,
    last_inum: u64,
    used_len: usize,
    is_deleted: bool,
    time_upper_bound_100ns: u64,
    out: &mut Vec<FsName>,
) {
    let buf_len = buf.len();
    let mut pos = 0usize;

    while pos + IDXENTRY_HEADER_LEN <= buf_len {
        let header = &buf[pos..pos + IDXENTRY_HEADER_LEN];
        let mut child_bytes = [0u8; 8];
        child_bytes.copy_from_slice(&header[0..8]);
        let child = MftRef::decode(&child_bytes);
        let idxlen = getu16(endian, &header[8..10]) as usize;
        let strlen = getu16(endian, &header[10..12]) as usize;

        let structurally_valid = child.addr >= first_inum
            && child.addr <= last_inum
            && idxlen > strlen
            && idxlen % 4 == 0
            && idxlen <= buf_len;
        if !structurally_valid {
            match skip_bytes(pos, buf_len) {
                Advance::Continue(next) => {
                    pos = next;
                    continue;
                }
                Advance::EndOfBuffer => break,
            }
        }

        let span_end = pos + idxlen;
        let apparently_deleted = is_deleted || strlen == 0 || span_end > used_len;

        if strlen == 0 {
            // The on-disk strlen has collapsed, but the $FILE_NAME stream
            // physically follows the header regardless (§4.7): read its
            // fixed portion to recover the real name length from byte
            // 0x40, run the same plausibility pass, and reconstruct the
            // entry's true length from that real nlen rather than from
            // the (now useless) strlen field.
            if pos + IDXENTRY_HEADER_LEN + filename::FIXED_LEN > buf_len {
                match skip_bytes(pos, buf_len) {
                    Advance::Continue(next) => {
                        pos = next;
                        continue;
                    }
                    Advance::EndOfBuffer => break,
                }
            }
            let fixed_buf = &buf[pos + IDXENTRY_HEADER_LEN..pos + IDXENTRY_HEADER_LEN + filename::FIXED_LEN];
            let nlen = fixed_buf[0x40] as usize;
            let full_len = filename::FIXED_LEN + 2 * nlen;
            let reconstructed = ((IDXENTRY_HEADER_LEN + full_len) as u64).div_ceil(4) * 4u64;

            if pos + IDXENTRY_HEADER_LEN + full_len > buf_len {
                match skip_bytes(pos, buf_len) {
                    Advance::Continue(next) => {
                        pos = next;
                        continue;
                    }
                    Advance::EndOfBuffer => break,
                }
            }
            let fname_buf = &buf[pos + IDXENTRY_HEADER_LEN..pos + IDXENTRY_HEADER_LEN + full_len];
            if !passes_deleted_entry_checks(fname_buf, endian, time_upper_bound_100ns) {
                match skip_bytes(pos, buf_len) {
                    Advance::Continue(next) => {
                        pos = next;
                        continue;
                    }
                    Advance::EndOfBuffer => break,
                }
            }
            let fname = match FileName::decode(fname_buf, endian) {
                Ok(f) => f,
                Err(e) => {
                    warn!("skipping unparseable deleted index entry at {pos}: {e}");
                    match skip_bytes(pos, buf_len) {
                        Advance::Continue(next) => {
                            pos = next;
                            continue;
                        }
                        Advance::EndOfBuffer => break,
                    }
                }
            };
            if fname.namespace != Namespace::Dos {
                out.push(FsName {
                    name: fname.name.clone(),
                    addr: child.addr,
                    parent_addr: fname.parent.addr,
                    parent_seq: fname.parent.seq,
                    seq: child.seq,
                    file_type: if fname.is_directory() { FileType::Dir } else { FileType::Reg },
                    flags: Flags::UNALLOC,
                });
            }
            pos += reconstructed as usize;
            continue;
        }

        if apparently_deleted {
            // A "deleted" entry that still carries a full $FILE_NAME
            // stream needs its own plausibility pass (§4.7).
            if pos + IDXENTRY_HEADER_LEN + strlen > buf_len {
                match skip_bytes(pos, buf_len) {
                    Advance::Continue(next) => {
                        pos = next;
                        continue;
                    }
                    Advance::EndOfBuffer => break,
                }
            }
            let fname_buf = &buf[pos + IDXENTRY_HEADER_LEN..pos + IDXENTRY_HEADER_LEN + strlen];
            if !passes_deleted_entry_checks(fname_buf, endian, time_upper_bound_100ns) {
                match skip_bytes(pos, buf_len) {
                    Advance::Continue(next) => {
                        pos = next;
                        continue;
                    }
                    Advance::EndOfBuffer => break,
                }
            }
        }

        if pos + IDXENTRY_HEADER_LEN + strlen > buf_len {
            match skip_bytes(pos, buf_len) {
                Advance::Continue(next) => {
                    pos = next;
                    continue;
                }
                Advance::EndOfBuffer => break,
            }
        }

        let fname_buf = &buf[pos + IDXENTRY_HEADER_LEN..pos + IDXENTRY_HEADER_LEN + strlen];
        let fname = match FileName::decode(fname_buf, endian) {
            Ok(f) => f,
            Err(e) => {
                warn!("skipping unparseable index entry at {pos}: {e}");
                match skip_bytes(pos, buf_len) {
                    Advance::Continue(next) => {
                        pos = next;
                        continue;
                    }
                    Advance::EndOfBuffer => break,
                }
            }
        };

        if fname.namespace == Namespace::Dos {
            // The corresponding long name has been or will be processed
            // under WIN32/WINDOS/POSIX; skip the short-name alias entirely.
        } else {
            let unalloc = apparently_deleted;
            out.push(FsName {
                name: fname.name.clone(),
                addr: child.addr,
                parent_addr: fname.parent.addr,
                parent_seq: fname.parent.seq,
                seq: child.seq,
                file_type: if fname.is_directory() { FileType::Dir } else { FileType::Reg },
                flags: if unalloc { Flags::UNALLOC } else { Flags::ALLOC },
            });
        }

        // strlen > 0 here, so advance by the entry's own recorded length.
        pos += idxlen;
    }
}

/// The extra sanity pass deleted entries (or entries in an already-
/// unallocated directory) must additionally pass, beyond the structural
/// idxlen/strlen checks every candidate undergoes (§4.7).
fn passes_deleted_entry_checks(fname_buf: &[u8], endian: Endian, time_upper_bound_100ns: u64) -> bool {
    if fname_buf.len() < filename::FIXED_LEN {
        return false;
    }
    let namespace_tag = fname_buf[0x41];
    if Namespace::from_tag(namespace_tag).is_none() {
        return false;
    }
    let allocated_size = crate::image::getu64(endian, &fname_buf[0x28..0x30]);
    let real_size = crate::image::getu64(endian, &fname_buf[0x30..0x38]);
    if allocated_size < real_size {
        return false;
    }
    let name_len = fname_buf[0x40];
    if name_len == 0 {
        return false;
    }
    if fname_buf.len() < filename::FIXED_LEN + 2 || fname_buf[filename::FIXED_LEN] == 0 {
        return false;
    }

    let crtime = crate::image::getu64(endian, &fname_buf[0x08..0x10]);
    let atime = crate::image::getu64(endian, &fname_buf[0x20..0x28]);
    let mtime = crate::image::getu64(endian, &fname_buf[0x10..0x18]);
    [crtime, atime, mtime]
        .into_iter()
        .all(|t| filename::is_plausible_time(t, time_upper_bound_100ns))
}

#[cfg(test)]
mod test {
    use super::*;

    fn fname_stream(parent: u64, name: &str, namespace: u8, is_dir: bool) -> Vec<u8> {
        let mut buf = vec![0u8; filename::FIXED_LEN];
        buf[0..8].copy_from_slice(&parent.to_le_bytes());
        let ts = filename::epoch_1970_in_100ns() + 1_000_000;
        buf[0x08..0x10].copy_from_slice(&ts.to_le_bytes());
        buf[0x10..0x18].copy_from_slice(&ts.to_le_bytes());
        buf[0x18..0x20].copy_from_slice(&ts.to_le_bytes());
        buf[0x20..0x28].copy_from_slice(&ts.to_le_bytes());
        buf[0x28..0x30].copy_from_slice(&4096u64.to_le_bytes()); // allocated_size
        buf[0x30..0x38].copy_from_slice(&10u64.to_le_bytes()); // real_size
        if is_dir {
            buf[0x38..0x3C].copy_from_slice(&0x1000_0000u32.to_le_bytes());
        }
        let units: Vec<u16> = name.encode_utf16().collect();
        buf[0x40] = units.len() as u8;
        buf[0x41] = namespace;
        for u in &units {
            buf.extend_from_slice(&u.to_le_bytes());
        }
        buf
    }

    fn idxentry(child_addr: u64, child_seq: u16, fname: &[u8]) -> Vec<u8> {
        let strlen = fname.len() as u16;
        let raw_len = IDXENTRY_HEADER_LEN + fname.len();
        let idxlen = (raw_len as u32).div_ceil(4) * 4;
        let mut buf = vec![0u8; idxlen as usize];
        buf[0..6].copy_from_slice(&child_addr.to_le_bytes()[0..6]);
        buf[6..8].copy_from_slice(&child_seq.to_le_bytes());
        buf[8..10].copy_from_slice(&(idxlen as u16).to_le_bytes());
        buf[10..12].copy_from_slice(&strlen.to_le_bytes());
        buf[IDXENTRY_HEADER_LEN..IDXENTRY_HEADER_LEN + fname.len()].copy_from_slice(fname);
        buf
    }

    #[test]
    fn parses_single_allocated_entry() {
        let fname = fname_stream(5, "hello.txt", 1, false);
        let entry = idxentry(42, 3, &fname);
        let mut out = Vec::new();
        parse_index_entries(
            &entry,
            Endian::Little,
            11,
            1000,
            entry.len(),
            false,
            filename::default_upper_bound_100ns(),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "hello.txt");
        assert_eq!(out[0].addr, 42);
        assert!(out[0].flags.contains(Flags::ALLOC));
    }

    #[test]
    fn recovers_deleted_entry_past_used_len() {
        let fname = fname_stream(100, "secret.txt", 1, false);
        let entry = idxentry(1234, 1, &fname);
        let mut out = Vec::new();
        // used_len = 0: the whole entry spans beyond the "real" content,
        // so it is treated as deleted but still recoverable.
        parse_index_entries(
            &entry,
            Endian::Little,
            11,
            100_000,
            0,
            false,
            filename::default_upper_bound_100ns(),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "secret.txt");
        assert!(out[0].flags.contains(Flags::UNALLOC));
    }

    #[test]
    fn recovers_entry_with_collapsed_strlen() {
        // strlen itself has collapsed to 0, but the $FILE_NAME stream is
        // still physically present right after the header (§4.7 scenario
        // #5): the name must be recovered from the real nlen at byte
        // 0x40 of that stream, not abandoned just because strlen reads 0.
        let fname = fname_stream(100, "secret.txt", 1, false);
        let mut entry = idxentry(1234, 1, &fname);
        entry[10..12].copy_from_slice(&0u16.to_le_bytes()); // strlen -> 0
        let mut out = Vec::new();
        parse_index_entries(
            &entry,
            Endian::Little,
            11,
            100_000,
            entry.len(),
            false,
            filename::default_upper_bound_100ns(),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "secret.txt");
        assert!(out[0].flags.contains(Flags::UNALLOC));
    }

    #[test]
    fn skips_dos_namespace_entries() {
        let fname = fname_stream(5, "HELLO~1.TXT", 2, false);
        let entry = idxentry(42, 3, &fname);
        let mut out = Vec::new();
        parse_index_entries(
            &entry,
            Endian::Little,
            11,
            1000,
            entry.len(),
            false,
            filename::default_upper_bound_100ns(),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn garbage_header_is_skipped_four_bytes_at_a_time() {
        let fname = fname_stream(5, "recovered.txt", 1, false);
        let good = idxentry(42, 3, &fname);
        let mut buf = vec![0xFFu8; 8];
        buf.extend_from_slice(&good);
        let mut out = Vec::new();
        parse_index_entries(
            &buf,
            Endian::Little,
            11,
            1000,
            buf.len(),
            false,
            filename::default_upper_bound_100ns(),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "recovered.txt");
    }
}
