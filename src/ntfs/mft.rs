//! MFT record access: reading a record by number, applying fixup to it,
//! and resolving its attribute list — including materialising
//! non-resident attribute data through the run list (§4.9 step 2-3, 6).

use std::io::{Read, Seek};

use crate::error::{Error, Result};
use crate::image::{getu16, getu32, getu64, Endian, ImageReader};

use super::fixup::apply_fixup;
use super::runlist::decode_runlist;

/// Magic marker of an MFT FILE record (as opposed to an `INDX` index
/// record — both use the same update-sequence fixup scheme).
pub const FILE_RECORD_MAGIC: [u8; 4] = *b"FILE";

/// Attribute type code terminating an attribute list.
const ATYPE_END: u32 = 0xFFFF_FFFF;

/// One decoded attribute record: its type, resident/non-resident status,
/// and already-materialised data (resident bytes copied out directly,
/// non-resident bytes read from the clusters its run list names).
#[derive(Debug, Clone)]
pub struct Attribute {
    pub type_code: u32,
    pub id: u16,
    pub resident: bool,
    pub data: Vec<u8>,
}

/// A parsed, fixed-up MFT record ready for attribute lookup.
pub struct MftRecord {
    pub addr: u64,
    pub sequence: u16,
    pub in_use: bool,
    pub is_directory: bool,
    attrs_start: usize,
    bytes: Vec<u8>,
}

impl MftRecord {
    /// Parses the fixed record header (post-fixup) and locates the start
    /// of the attribute list.
    fn parse(addr: u64, bytes: Vec<u8>, endian: Endian) -> Result<Self> {
        if bytes.len() < 0x30 || bytes[0..4] != FILE_RECORD_MAGIC {
            return Err(Error::magic("ntfs mft record", format!("record {addr} missing FILE magic")));
        }
        let flags = getu16(endian, &bytes[0x16..0x18]);
        let attrs_start = getu16(endian, &bytes[0x14..0x16]) as usize;
        let sequence = getu16(endian, &bytes[0x10..0x12]);
        if attrs_start > bytes.len() {
            return Err(Error::corrupt("ntfs mft record", format!("record {addr} attribute offset past record end")));
        }
        Ok(Self {
            addr,
            sequence,
            in_use: flags & 0x0001 != 0,
            is_directory: flags & 0x0002 != 0,
            attrs_start,
            bytes,
        })
    }

    /// Iterates this record's attribute headers, yielding type code, id,
    /// residency, and (for resident attributes) a reference to the value
    /// bytes embedded directly in the record.
    fn attr_headers(&self, endian: Endian) -> Result<Vec<RawAttrHeader>> {
        let mut out = Vec::new();
        let mut pos = self.attrs_start;
        while pos + 4 <= self.bytes.len() {
            let type_code = getu32(endian, &self.bytes[pos..pos + 4]);
            if type_code == ATYPE_END {
                break;
            }
            if pos + 0x10 > self.bytes.len() {
                return Err(Error::corrupt("ntfs mft record", format!("record {} attribute header truncated", self.addr)));
            }
            let length = getu32(endian, &self.bytes[pos + 4..pos + 8]) as usize;
            if length < 0x10 || pos + length > self.bytes.len() {
                return Err(Error::corrupt(
                    "ntfs mft record",
                    format!("record {} attribute at {pos} has invalid length {length}", self.addr),
                ));
            }
            let non_resident = self.bytes[pos + 8] != 0;
            let id = getu16(endian, &self.bytes[pos + 0x0E..pos + 0x10]);
            out.push(RawAttrHeader {
                type_code,
                id,
                non_resident,
                record_offset: pos,
                length,
            });
            pos += length;
        }
        Ok(out)
    }

    /// Finds the first attribute of `type_code`, materialising non-resident
    /// data by walking its run list through `reader`.
    pub fn find_attr<R: Read + Seek>(
        &self,
        reader: &mut ImageReader<R>,
        endian: Endian,
        cluster_size: u32,
        type_code: u32,
    ) -> Result<Option<Attribute>> {
        for h in self.attr_headers(endian)? {
            if h.type_code != type_code {
                continue;
            }
            return Ok(Some(self.materialize(reader, endian, cluster_size, &h)?));
        }
        Ok(None)
    }

    /// Like [`Self::find_attr`] but returns every instance with that type
    /// code, for `$FILE_NAME`, of which a file may carry more than one
    /// (one per namespace).
    pub fn find_attrs<R: Read + Seek>(
        &self,
        reader: &mut ImageReader<R>,
        endian: Endian,
        cluster_size: u32,
        type_code: u32,
    ) -> Result<Vec<Attribute>> {
        let mut out = Vec::new();
        for h in self.attr_headers(endian)? {
            if h.type_code == type_code {
                out.push(self.materialize(reader, endian, cluster_size, &h)?);
            }
        }
        Ok(out)
    }

    pub fn has_any_attribute(&self, endian: Endian) -> Result<bool> {
        Ok(!self.attr_headers(endian)?.is_empty())
    }

    /// True if this record carries an attribute of `type_code`, optionally
    /// narrowed to a specific `id` — used by `ntfs_find_file` to check a
    /// type/id filter without materialising the attribute's data.
    pub fn has_attr(&self, endian: Endian, type_code: u32, id: Option<u16>) -> Result<bool> {
        Ok(self
            .attr_headers(endian)?
            .iter()
            .any(|h| h.type_code == type_code && id.map_or(true, |want| h.id == want)))
    }

    /// Decodes the run list of a non-resident attribute without reading
    /// its data — used to bootstrap `$MFT`'s own layout from its record 0
    /// `$DATA` attribute, where materialising the full attribute would
    /// mean reading the entire MFT up front.
    pub fn attr_runs(&self, endian: Endian, type_code: u32) -> Result<Option<Vec<super::runlist::Run>>> {
        for h in self.attr_headers(endian)? {
            if h.type_code != type_code || !h.non_resident {
                continue;
            }
            let base = h.record_offset;
            let runlist_off = getu16(endian, &self.bytes[base + 0x20..base + 0x22]) as usize;
            if base + runlist_off > self.bytes.len() {
                return Err(Error::corrupt("ntfs attribute", "run list offset past record end"));
            }
            let runs = decode_runlist(&self.bytes[base + runlist_off..base + h.length])?;
            return Ok(Some(runs));
        }
        Ok(None)
    }

    /// Reads the `real_size` field of the first non-resident instance of
    /// `type_code`, without materialising its data — used to size `$MFT`
    /// itself (record count) from its `$DATA` attribute.
    pub fn attr_non_resident_real_size(&self, endian: Endian, type_code: u32) -> Result<Option<u64>> {
        for h in self.attr_headers(endian)? {
            if h.type_code != type_code || !h.non_resident {
                continue;
            }
            let base = h.record_offset;
            return Ok(Some(getu64(endian, &self.bytes[base + 0x30..base + 0x38])));
        }
        Ok(None)
    }

    fn materialize<R: Read + Seek>(
        &self,
        reader: &mut ImageReader<R>,
        endian: Endian,
        cluster_size: u32,
        h: &RawAttrHeader,
    ) -> Result<Attribute> {
        let base = h.record_offset;
        if !h.non_resident {
            let value_len = getu32(endian, &self.bytes[base + 0x10..base + 0x14]) as usize;
            let value_off = getu16(endian, &self.bytes[base + 0x14..base + 0x16]) as usize;
            if base + value_off + value_len > self.bytes.len() {
                return Err(Error::corrupt(
                    "ntfs attribute",
                    format!("resident attribute 0x{:x} value runs past record end", h.type_code),
                ));
            }
            let data = self.bytes[base + value_off..base + value_off + value_len].to_vec();
            return Ok(Attribute { type_code: h.type_code, id: h.id, resident: true, data });
        }

        // Non-resident: read `allocated_size` bytes (slack included, per
        // §4.9 step 6) by walking the embedded run list.
        let allocated_size = getu64(endian, &self.bytes[base + 0x28..base + 0x30]);
        let runlist_off = getu16(endian, &self.bytes[base + 0x20..base + 0x22]) as usize;
        if base + runlist_off > self.bytes.len() {
            return Err(Error::corrupt("ntfs attribute", "run list offset past record end"));
        }
        let runs = decode_runlist(&self.bytes[base + runlist_off..h.record_offset + h.length])?;

        let mut data = Vec::with_capacity(allocated_size as usize);
        for run in runs {
            let run_bytes = run.length_clusters as usize * cluster_size as usize;
            let want = run_bytes.min(allocated_size as usize - data.len());
            match run.lcn {
                None => data.resize(data.len() + want, 0),
                Some(lcn) => {
                    let mut buf = vec![0u8; want];
                    reader.read_at("ntfs non-resident attribute", lcn * cluster_size as u64, &mut buf)?;
                    data.extend_from_slice(&buf);
                }
            }
            if data.len() as u64 >= allocated_size {
                break;
            }
        }
        data.resize(allocated_size as usize, 0);

        Ok(Attribute { type_code: h.type_code, id: h.id, resident: false, data })
    }
}

struct RawAttrHeader {
    type_code: u32,
    id: u16,
    non_resident: bool,
    record_offset: usize,
    length: usize,
}

/// Reads and fixes up MFT record `addr`, given its byte offset and the
/// fixed record size.
pub fn read_record<R: Read + Seek>(
    reader: &mut ImageReader<R>,
    endian: Endian,
    offset: u64,
    record_size: u32,
    sector_size: u32,
    addr: u64,
) -> Result<MftRecord> {
    let mut bytes = vec![0u8; record_size as usize];
    reader.read_at("ntfs mft record", offset, &mut bytes)?;
    if bytes[0..4] != FILE_RECORD_MAGIC {
        return Err(Error::magic("ntfs mft record", format!("record {addr} missing FILE magic")));
    }
    let upd_off = getu16(endian, &bytes[4..6]);
    let upd_cnt = getu16(endian, &bytes[6..8]);
    apply_fixup(&mut bytes, endian, upd_off, upd_cnt, sector_size)?;
    MftRecord::parse(addr, bytes, endian)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn minimal_record(in_use: bool, is_dir: bool) -> Vec<u8> {
        let mut r = vec![0u8; 1024];
        r[0..4].copy_from_slice(b"FILE");
        r[4..6].copy_from_slice(&0x30u16.to_le_bytes()); // upd_off
        r[6..8].copy_from_slice(&3u16.to_le_bytes()); // upd_cnt (1 check + 2 sectors)
        r[0x10..0x12].copy_from_slice(&5u16.to_le_bytes()); // sequence
        let mut flags = 0u16;
        if in_use {
            flags |= 0x0001;
        }
        if is_dir {
            flags |= 0x0002;
        }
        r[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
        r[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes()); // attrs_start
        // upd array: check value then 2 replacement words; tails left zero
        // matches the check value (0) so fixup succeeds trivially.
        // end marker attribute
        r[0x38..0x3C].copy_from_slice(&ATYPE_END.to_le_bytes());
        r
    }

    #[test]
    fn parses_flags_and_finds_no_attributes() {
        let mut reader = ImageReader::new(Cursor::new(minimal_record(true, true)), 0);
        let rec = read_record(&mut reader, Endian::Little, 0, 1024, 512, 0).unwrap();
        assert!(rec.in_use);
        assert!(rec.is_directory);
        assert!(!rec.has_any_attribute(Endian::Little).unwrap());
    }
}
