//! The NTFS directory resolver: `$INDEX_ROOT`/`$INDEX_ALLOCATION` parsing,
//! fixup, the orphan map, directory composition, and path resolution
//! (§4.6-§4.10).

pub mod boot;
pub mod dir;
pub mod filename;
pub mod find_file;
pub mod fixup;
pub mod index;
pub mod mft;
pub mod orphan;
pub mod path;
pub mod runlist;
pub mod types;

use std::io::{Read, Seek};

use log::debug;

use crate::error::{Error, Result};
use crate::image::{Endian, ImageReader};

use boot::BootSector;
use mft::{read_record, MftRecord};
use orphan::OrphanMap;
use runlist::Run;
use types::ATYPE_DATA;

/// Handle to an open NTFS volume: boot-sector geometry, the MFT's own
/// layout (bootstrapped from record 0's `$DATA` run list), and the
/// lazily-built orphan map (§3 "NTFS filesystem handle").
pub struct NtfsHandle<R> {
    reader: ImageReader<R>,
    endian: Endian,
    pub sector_size: u32,
    pub cluster_size: u32,
    pub record_size: u32,
    mft_runs: Vec<Run>,
    /// One past the highest real MFT record number; the synthetic orphan
    /// directory (mirroring ext's own synthetic entry, §4.1) lives here.
    pub last_inum: u64,
    orphan_map: Option<OrphanMap>,
    /// Upper bound of the index-entry time-plausibility window, in 100ns
    /// units since 1601-01-01. A constructor parameter rather than an
    /// environment variable (§1A ambient stack: configuration).
    time_upper_bound_100ns: u64,
}

impl<R: Read + Seek> NtfsHandle<R> {
    fn mft_record_offset(&self, inum: u64) -> Result<u64> {
        let byte_off = inum * self.record_size as u64;
        let mut run_start = 0u64;
        for run in &self.mft_runs {
            let run_len_bytes = run.length_clusters * self.cluster_size as u64;
            if byte_off >= run_start && byte_off < run_start + run_len_bytes {
                let lcn = run.lcn.ok_or_else(|| {
                    Error::corrupt("ntfs mft", format!("record {inum} falls in a sparse run of $MFT"))
                })?;
                let within_run = byte_off - run_start;
                return Ok(lcn * self.cluster_size as u64 + within_run);
            }
            run_start += run_len_bytes;
        }
        Err(Error::argument("ntfs mft", format!("record {inum} is outside $MFT's allocated extent")))
    }

    fn read_record(&mut self, inum: u64) -> Result<MftRecord> {
        let offset = self.mft_record_offset(inum)?;
        read_record(&mut self.reader, self.endian, offset, self.record_size, self.sector_size, inum)
    }

    fn ensure_orphan_map(&mut self) -> Result<()> {
        if self.orphan_map.is_some() {
            return Ok(());
        }
        let mft_runs = self.mft_runs.clone();
        let record_size = self.record_size;
        let sector_size = self.sector_size;
        let cluster_size = self.cluster_size;
        let last_real = self.last_inum - 1;
        let offset_of = |inum: u64| -> u64 {
            let byte_off = inum * record_size as u64;
            let mut run_start = 0u64;
            for run in &mft_runs {
                let run_len_bytes = run.length_clusters * cluster_size as u64;
                if byte_off >= run_start && byte_off < run_start + run_len_bytes {
                    if let Some(lcn) = run.lcn {
                        return lcn * cluster_size as u64 + (byte_off - run_start);
                    }
                }
                run_start += run_len_bytes;
            }
            u64::MAX
        };
        let map = OrphanMap::build(
            &mut self.reader,
            self.endian,
            offset_of,
            record_size,
            sector_size,
            cluster_size,
            0,
            last_real,
        )?;
        self.orphan_map = Some(map);
        Ok(())
    }
}

/// Opens an NTFS volume starting at `offset` within `image`, parsing the
/// boot sector and bootstrapping `$MFT`'s own layout from its record 0.
pub fn ntfs_open<R: Read + Seek>(image: R, offset: u64) -> Result<NtfsHandle<R>> {
    ntfs_open_with_time_bound(image, offset, filename::default_upper_bound_100ns())
}

/// Like [`ntfs_open`], but lets the caller pin the index-entry time-
/// plausibility window's upper bound instead of taking the 2010-01-01
/// default (§9 design notes).
pub fn ntfs_open_with_time_bound<R: Read + Seek>(
    image: R,
    offset: u64,
    time_upper_bound_100ns: u64,
) -> Result<NtfsHandle<R>> {
    let mut reader = ImageReader::new(image, offset);
    let boot = BootSector::read(&mut reader)?;
    let endian = Endian::Little;

    let record0 = read_record(&mut reader, endian, boot.mft_lcn * boot.cluster_size as u64, boot.record_size, boot.sector_size, 0)?;
    let mft_runs = record0
        .attr_runs(endian, ATYPE_DATA)?
        .ok_or_else(|| Error::corrupt("ntfs open", "$MFT record 0 has no non-resident $DATA attribute"))?;
    let mft_size = record0
        .attr_non_resident_real_size(endian, ATYPE_DATA)?
        .ok_or_else(|| Error::corrupt("ntfs open", "$MFT record 0 $DATA attribute missing real size"))?;
    let record_count = mft_size / boot.record_size as u64;
    debug!("ntfs: {record_count} MFT records, record size {}", boot.record_size);

    Ok(NtfsHandle {
        reader,
        endian,
        sector_size: boot.sector_size,
        cluster_size: boot.cluster_size,
        record_size: boot.record_size,
        mft_runs,
        last_inum: record_count,
        orphan_map: None,
        time_upper_bound_100ns,
    })
}

pub use dir::{ntfs_dir_open_meta, DirOpenStatus, ORPHAN_DIR_NAME};
pub use find_file::ntfs_find_file;
pub use path::{ntfs_resolve_path, PathError};
