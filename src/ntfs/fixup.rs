//! Update-sequence ("fixup") repair of multi-sector NTFS records (§4.6).
//!
//! NTFS protects records spanning more than one sector by overwriting the
//! last two bytes of every sector with a rotating sequence value; the
//! original bytes live in an update array near the record header. Fixup
//! must run on a record before any of its sector-spanning contents are
//! parsed, or the stolen bytes corrupt whatever happens to live there.

use crate::error::{Error, Result};
use crate::image::{getu16, Endian};

/// Undoes the update-sequence substitution in place.
///
/// `upd_off`/`upd_cnt` and the sector size come from the record header;
/// the caller is responsible for having read them before calling this.
/// Mirrors `ntfs_fix_idxrec` bit for bit: the first `u16` of the update
/// array is the expected tail value, and each of the following `upd_cnt -
/// 1` entries replaces one sector's stolen tail after checking it still
/// holds that expected value.
pub fn apply_fixup(record: &mut [u8], endian: Endian, upd_off: u16, upd_cnt: u16, sector_size: u32) -> Result<()> {
    if upd_cnt == 0 {
        return Ok(());
    }
    let upd_off = upd_off as usize;
    let array_len = upd_cnt as usize * 2;
    if upd_off + array_len > record.len() {
        return Err(Error::corrupt(
            "ntfs fixup",
            format!("update array at {upd_off} of {array_len} bytes exceeds record of {} bytes", record.len()),
        ));
    }
    if (upd_cnt as u64 - 1) * sector_size as u64 > record.len() as u64 {
        return Err(Error::corrupt(
            "ntfs fixup",
            "more update-sequence entries than the record can hold",
        ));
    }

    let mut upd_array = vec![0u8; array_len];
    upd_array.copy_from_slice(&record[upd_off..upd_off + array_len]);
    let expected = getu16(endian, &upd_array[0..2]);

    for i in 1..upd_cnt as usize {
        let tail_off = i * sector_size as usize - 2;
        if tail_off + 2 > record.len() {
            return Err(Error::corrupt(
                "ntfs fixup",
                format!("sector {i} tail at {tail_off} falls outside the record"),
            ));
        }
        let current = getu16(endian, &record[tail_off..tail_off + 2]);
        if current != expected {
            return Err(Error::corrupt(
                "ntfs fixup",
                format!("sector {i}: update value 0x{expected:04x} does not match tail 0x{current:04x}"),
            ));
        }
        let replacement = &upd_array[i * 2..i * 2 + 2];
        record[tail_off..tail_off + 2].copy_from_slice(replacement);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn build_record(sector_size: u32, sector_count: u16, tails: &[[u8; 2]]) -> (Vec<u8>, u16, u16) {
        let total = sector_size as usize * sector_count as usize;
        let mut record = vec![0u8; total];
        let upd_off = 0x28u16;
        let upd_cnt = sector_count + 1;
        let seq = [0xEF, 0xBE]; // 0xBEEF little-endian

        for i in 0..sector_count as usize {
            let tail_off = (i + 1) * sector_size as usize - 2;
            record[tail_off..tail_off + 2].copy_from_slice(&seq);
        }

        let mut upd_array = Vec::with_capacity(upd_cnt as usize * 2);
        upd_array.extend_from_slice(&seq);
        for t in tails {
            upd_array.extend_from_slice(t);
        }
        record[upd_off as usize..upd_off as usize + upd_array.len()].copy_from_slice(&upd_array);

        (record, upd_off, upd_cnt)
    }

    #[test]
    fn restores_original_sector_tails() {
        let tails: Vec<[u8; 2]> = (0u8..8).map(|i| [i, i.wrapping_add(0xA0)]).collect();
        let (mut record, upd_off, upd_cnt) = build_record(512, 8, &tails);
        apply_fixup(&mut record, Endian::Little, upd_off, upd_cnt, 512).unwrap();

        for (i, t) in tails.iter().enumerate() {
            let tail_off = (i + 1) * 512 - 2;
            assert_eq!(&record[tail_off..tail_off + 2], t.as_slice());
        }
    }

    #[test]
    fn mismatched_tail_is_corrupt() {
        let tails: Vec<[u8; 2]> = (0u8..8).map(|i| [i, i]).collect();
        let (mut record, upd_off, upd_cnt) = build_record(512, 8, &tails);
        // Corrupt one sector's stolen tail so it no longer matches the
        // expected sequence value.
        record[512 - 2] = 0x00;
        record[512 - 1] = 0x00;
        let err = apply_fixup(&mut record, Endian::Little, upd_off, upd_cnt, 512).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }

    #[test]
    fn roundtrips_with_inverse_substitution() {
        let tails: Vec<[u8; 2]> = (0u8..8).map(|i| [i, i.wrapping_mul(3)]).collect();
        let (record, upd_off, upd_cnt) = build_record(512, 8, &tails);
        let before = record.clone();

        let mut fixed = record.clone();
        apply_fixup(&mut fixed, Endian::Little, upd_off, upd_cnt, 512).unwrap();

        // Re-inserting the stolen tails (0xBEEF little-endian) at each
        // sector boundary must reproduce the pre-fixup bytes exactly.
        let mut restored = fixed.clone();
        for i in 0..8usize {
            let tail_off = (i + 1) * 512 - 2;
            restored[tail_off..tail_off + 2].copy_from_slice(&[0xEF, 0xBE]);
        }
        assert_eq!(restored, before);
    }
}
