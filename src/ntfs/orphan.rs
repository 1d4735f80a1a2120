//! The parent→children orphan map (§4.8): built once by a full inode walk
//! restricted to unallocated inodes, then consulted by directory opens to
//! attach orphaned files under their last-known parent.
//!
//! The distilled source keeps a singly linked, insertion-sorted structure
//! with a geometric growth policy per bucket. A `BTreeMap` is the
//! straightforward idiomatic drop-in (§9 design notes): ascending-
//! parent-order iteration falls out of the map's own ordering instead of
//! being maintained by hand, and each bucket is a plain `Vec`.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use log::debug;

use crate::error::Result;
use crate::image::{Endian, ImageReader};

use super::mft::read_record;
use super::types::ATYPE_FILE_NAME;

/// Parent MFT address → ascending list of orphaned child addresses.
#[derive(Debug, Default)]
pub struct OrphanMap {
    by_parent: BTreeMap<u64, Vec<u64>>,
}

impl OrphanMap {
    pub fn get(&self, parent_addr: u64) -> &[u64] {
        self.by_parent.get(&parent_addr).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every parent address with at least one orphaned child, in
    /// ascending order.
    pub fn parents(&self) -> impl Iterator<Item = u64> + '_ {
        self.by_parent.keys().copied()
    }

    fn insert(&mut self, parent_addr: u64, child_addr: u64) {
        self.by_parent.entry(parent_addr).or_default().push(child_addr);
    }

    /// Builds the map by walking every MFT record in `[first_inum,
    /// last_real_inum]`, skipping allocated ones and any record that
    /// fails to parse (a corrupt unallocated record simply contributes no
    /// orphan entries, rather than aborting the whole build).
    pub fn build<R: Read + Seek>(
        reader: &mut ImageReader<R>,
        endian: Endian,
        mft_record_offset: impl Fn(u64) -> u64,
        record_size: u32,
        sector_size: u32,
        cluster_size: u32,
        first_inum: u64,
        last_real_inum: u64,
    ) -> Result<Self> {
        let mut map = Self::default();
        for inum in first_inum..=last_real_inum {
            let offset = mft_record_offset(inum);
            let record = match read_record(reader, endian, offset, record_size, sector_size, inum) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.in_use {
                continue;
            }
            let fnames = match record.find_attrs(reader, endian, cluster_size, ATYPE_FILE_NAME) {
                Ok(fs) => fs,
                Err(_) => continue,
            };
            for attr in fnames {
                if let Ok(fname) = super::filename::FileName::decode(&attr.data, endian) {
                    map.insert(fname.parent.addr, inum);
                }
            }
        }
        debug!("orphan map built: {} parents with orphaned children", map.by_parent.len());
        Ok(map)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_parent_returns_empty_slice() {
        let map = OrphanMap::default();
        assert!(map.get(42).is_empty());
    }

    #[test]
    fn insert_groups_children_under_parent_in_insertion_order() {
        let mut map = OrphanMap::default();
        map.insert(100, 7);
        map.insert(100, 9);
        map.insert(50, 3);
        assert_eq!(map.get(100), &[7, 9]);
        assert_eq!(map.get(50), &[3]);
        assert_eq!(map.get(999), &[] as &[u64]);
    }
}
