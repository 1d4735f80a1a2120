//! Decoding of the `$FILE_NAME` attribute stream (§6), shared between a
//! record's own `$FILE_NAME` attribute instances and the embedded copy
//! carried by every index entry (§4.7).

use crate::error::{Error, Result};
use crate::image::{getu32, getu64, Endian};
use crate::utf16;

use super::types::{is_directory_fname_flag, MftRef, Namespace};

/// Byte length of the fixed portion of a `$FILE_NAME` stream, before the
/// variable-length UTF-16 name. Also the `66` in the deleted-entry length
/// reconstruction formula of §4.7.
pub const FIXED_LEN: usize = 66;

/// A decoded `$FILE_NAME` stream.
#[derive(Debug, Clone)]
pub struct FileName {
    pub parent: MftRef,
    pub crtime: u64,
    pub mtime: u64,
    pub mft_mtime: u64,
    pub atime: u64,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub namespace: Namespace,
    pub name: String,
}

impl FileName {
    pub fn is_directory(&self) -> bool {
        is_directory_fname_flag(self.flags)
    }

    /// Decodes a `$FILE_NAME` stream from `buf`, which must hold at least
    /// [`FIXED_LEN`] bytes plus `name_len_units * 2` bytes of name.
    pub fn decode(buf: &[u8], endian: Endian) -> Result<Self> {
        if buf.len() < FIXED_LEN {
            return Err(Error::corrupt("ntfs $FILE_NAME", "stream shorter than the fixed header"));
        }
        let mut parent_bytes = [0u8; 8];
        parent_bytes.copy_from_slice(&buf[0..8]);
        let parent = MftRef::decode(&parent_bytes);

        let name_len_units = buf[0x40] as usize;
        let namespace_tag = buf[0x41];
        let namespace = Namespace::from_tag(namespace_tag)
            .ok_or_else(|| Error::corrupt("ntfs $FILE_NAME", format!("unknown name-space tag {namespace_tag}")))?;

        let name_bytes_len = name_len_units * 2;
        if FIXED_LEN + name_bytes_len > buf.len() {
            return Err(Error::corrupt("ntfs $FILE_NAME", "name runs past the stream buffer"));
        }
        let name_raw = utf16::decode_lossy(&buf[FIXED_LEN..FIXED_LEN + name_bytes_len]);
        let name = utf16::clean_control_chars(&name_raw);

        Ok(Self {
            parent,
            crtime: getu64(endian, &buf[0x08..0x10]),
            mtime: getu64(endian, &buf[0x10..0x18]),
            mft_mtime: getu64(endian, &buf[0x18..0x20]),
            atime: getu64(endian, &buf[0x20..0x28]),
            allocated_size: getu64(endian, &buf[0x28..0x30]),
            real_size: getu64(endian, &buf[0x30..0x38]),
            flags: getu32(endian, &buf[0x38..0x3C]),
            namespace,
            name,
        })
    }
}

/// NTFS timestamps are 100ns intervals since 1601-01-01. The time-
/// plausibility check (§9 design notes) keeps the source's 1970-2010
/// window but exposes the upper bound as a parameter rather than a second
/// hard-coded constant, so tests can pin it.
const SEC_BETWEEN_1601_AND_1970: u64 = (369 * 365 + 89) * 24 * 3600;
const HUNDRED_NS_PER_SEC: u64 = 10_000_000;

/// Lower bound of the plausibility window: 1970-01-01, in 100ns units
/// since 1601-01-01.
pub fn epoch_1970_in_100ns() -> u64 {
    SEC_BETWEEN_1601_AND_1970 * HUNDRED_NS_PER_SEC
}

/// Returns whether `t` (100ns units since 1601-01-01) falls within
/// `[1970-01-01, upper_bound]`.
pub fn is_plausible_time(t: u64, upper_bound_100ns: u64) -> bool {
    t >= epoch_1970_in_100ns() && t <= upper_bound_100ns
}

/// Default upper bound of the plausibility window: 2010-01-01.
pub fn default_upper_bound_100ns() -> u64 {
    let sec_1970_to_2010 = (40 * 365 + 10) * 24 * 3600u64;
    epoch_1970_in_100ns() + sec_1970_to_2010 * HUNDRED_NS_PER_SEC
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_buf(name: &str, namespace: u8) -> Vec<u8> {
        let mut buf = vec![0u8; FIXED_LEN];
        buf[0..8].copy_from_slice(&5u64.to_le_bytes()); // parent ref addr=5
        let ts = epoch_1970_in_100ns() + 1_000_000;
        buf[0x08..0x10].copy_from_slice(&ts.to_le_bytes());
        buf[0x10..0x18].copy_from_slice(&ts.to_le_bytes());
        buf[0x18..0x20].copy_from_slice(&ts.to_le_bytes());
        buf[0x20..0x28].copy_from_slice(&ts.to_le_bytes());
        let name_units: Vec<u16> = name.encode_utf16().collect();
        buf[0x40] = name_units.len() as u8;
        buf[0x41] = namespace;
        for u in &name_units {
            buf.extend_from_slice(&u.to_le_bytes());
        }
        buf
    }

    #[test]
    fn decodes_name_and_parent() {
        let buf = sample_buf("secret.txt", 1);
        let fname = FileName::decode(&buf, Endian::Little).unwrap();
        assert_eq!(fname.name, "secret.txt");
        assert_eq!(fname.parent.addr, 5);
        assert_eq!(fname.namespace, Namespace::Win32);
    }

    #[test]
    fn plausibility_window_rejects_far_future() {
        let far_future = default_upper_bound_100ns() + HUNDRED_NS_PER_SEC;
        assert!(!is_plausible_time(far_future, default_upper_bound_100ns()));
        assert!(is_plausible_time(epoch_1970_in_100ns() + 1, default_upper_bound_100ns()));
    }
}
