//! Parsing the handful of NTFS boot-sector fields this crate needs:
//! sector size, cluster size, and the MFT anchor (§3 "NTFS filesystem
//! handle"). The full boot sector carries much more (OEM id, volume
//! serial, boot code) that no component here reads.

use std::io::{Read, Seek};

use crate::error::{Error, Result};
use crate::image::{getu16, getu64, Endian, ImageReader};

/// Byte offset, within the boot sector, of the `bytes_per_sector` field.
const OFF_BYTES_PER_SECTOR: usize = 0x0B;
const OFF_SECTORS_PER_CLUSTER: usize = 0x0D;
const OFF_MFT_LCN: usize = 0x30;
const OFF_CLUSTERS_PER_MFT_RECORD: usize = 0x40;

/// The geometry this crate needs out of the boot sector.
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub sector_size: u32,
    pub cluster_size: u32,
    pub mft_lcn: u64,
    pub record_size: u32,
}

impl BootSector {
    pub fn read<R: Read + Seek>(reader: &mut ImageReader<R>) -> Result<Self> {
        // NTFS is always little-endian on disk; there is no dual-endian
        // question here the way there is for ext (§6).
        let endian = Endian::Little;
        let mut buf = [0u8; 0x48];
        reader.read_at("ntfs boot sector", 0, &mut buf)?;

        let sector_size = getu16(endian, &buf[OFF_BYTES_PER_SECTOR..OFF_BYTES_PER_SECTOR + 2]) as u32;
        let sectors_per_cluster = buf[OFF_SECTORS_PER_CLUSTER] as u32;
        if sector_size == 0 || sectors_per_cluster == 0 {
            return Err(Error::magic("ntfs boot sector", "zero sector or cluster size"));
        }
        let cluster_size = sector_size * sectors_per_cluster;

        let mft_lcn = getu64(endian, &buf[OFF_MFT_LCN..OFF_MFT_LCN + 8]);

        let raw_cpr = buf[OFF_CLUSTERS_PER_MFT_RECORD] as i8;
        let record_size = if raw_cpr > 0 {
            raw_cpr as u32 * cluster_size
        } else {
            1u32.checked_shl((-raw_cpr) as u32)
                .ok_or_else(|| Error::corrupt("ntfs boot sector", "MFT record size shift overflowed"))?
        };
        if record_size == 0 {
            return Err(Error::corrupt("ntfs boot sector", "MFT record size computed as zero"));
        }

        Ok(Self { sector_size, cluster_size, mft_lcn, record_size })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn make_boot(sector_size: u16, sectors_per_cluster: u8, mft_lcn: u64, clusters_per_record: i8) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[OFF_BYTES_PER_SECTOR..OFF_BYTES_PER_SECTOR + 2].copy_from_slice(&sector_size.to_le_bytes());
        buf[OFF_SECTORS_PER_CLUSTER] = sectors_per_cluster;
        buf[OFF_MFT_LCN..OFF_MFT_LCN + 8].copy_from_slice(&mft_lcn.to_le_bytes());
        buf[OFF_CLUSTERS_PER_MFT_RECORD] = clusters_per_record as u8;
        buf
    }

    #[test]
    fn positive_clusters_per_record_multiplies_cluster_size() {
        let buf = make_boot(512, 8, 4, 2);
        let mut reader = ImageReader::new(Cursor::new(buf), 0);
        let boot = BootSector::read(&mut reader).unwrap();
        assert_eq!(boot.cluster_size, 4096);
        assert_eq!(boot.record_size, 8192);
    }

    #[test]
    fn negative_clusters_per_record_is_a_byte_shift() {
        let buf = make_boot(512, 8, 4, -10); // 2^10 = 1024
        let mut reader = ImageReader::new(Cursor::new(buf), 0);
        let boot = BootSector::read(&mut reader).unwrap();
        assert_eq!(boot.record_size, 1024);
    }
}
