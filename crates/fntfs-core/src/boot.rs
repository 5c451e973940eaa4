//! Boot sector: the BPB fields the engine reads and writes.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    VolumeGeometry, read_le_u16, read_le_u64, read_le_u8, write_le_u16, write_le_u64, write_le_u8,
};
use serde::Serialize;

pub const OEM_ID: &[u8; 8] = b"NTFS    ";

const JUMP: [u8; 3] = [0xEB, 0x52, 0x90];
const MEDIA_DESCRIPTOR: u8 = 0xF8;
const END_SIGNATURE: u16 = 0xAA55;

const BOOT_SECTOR_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootSector {
    pub geometry: VolumeGeometry,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub serial_number: u64,
}

impl BootSector {
    #[must_use]
    pub const fn total_clusters(&self) -> u64 {
        self.total_sectors / self.geometry.sectors_per_cluster as u64
    }

    /// One sector holding the boot record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let geometry = &self.geometry;
        let sectors_per_cluster = u8::try_from(geometry.sectors_per_cluster).map_err(|_| {
            NtfsError::InvalidArgument(format!(
                "{} sectors per cluster do not fit the boot sector",
                geometry.sectors_per_cluster
            ))
        })?;
        let mut out = vec![0_u8; geometry.bytes_per_sector as usize];
        out[0..3].copy_from_slice(&JUMP);
        out[0x03..0x0B].copy_from_slice(OEM_ID);
        write_le_u16(&mut out, 0x0B, geometry.bytes_per_sector as u16)?;
        write_le_u8(&mut out, 0x0D, sectors_per_cluster)?;
        write_le_u8(&mut out, 0x15, MEDIA_DESCRIPTOR)?;
        write_le_u64(&mut out, 0x28, self.total_sectors)?;
        write_le_u64(&mut out, 0x30, self.mft_lcn)?;
        write_le_u64(&mut out, 0x38, self.mft_mirror_lcn)?;
        write_le_u8(
            &mut out,
            0x40,
            geometry.encode_record_size(geometry.bytes_per_file_record_segment) as u8,
        )?;
        write_le_u8(
            &mut out,
            0x44,
            geometry.encode_record_size(geometry.bytes_per_index_record) as u8,
        )?;
        write_le_u64(&mut out, 0x48, self.serial_number)?;
        write_le_u16(&mut out, 0x1FE, END_SIGNATURE)?;
        Ok(out)
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < BOOT_SECTOR_LEN {
            return Err(NtfsError::corrupt(
                "boot sector",
                format!("{} bytes, need {BOOT_SECTOR_LEN}", raw.len()),
            ));
        }
        if &raw[0x03..0x0B] != OEM_ID {
            return Err(NtfsError::corrupt("boot sector", "OEM id is not NTFS"));
        }
        if read_le_u16(raw, 0x1FE)? != END_SIGNATURE {
            return Err(NtfsError::corrupt("boot sector", "missing 0x55AA signature"));
        }
        let mut geometry = VolumeGeometry {
            bytes_per_sector: u32::from(read_le_u16(raw, 0x0B)?),
            sectors_per_cluster: u32::from(read_le_u8(raw, 0x0D)?),
            ..VolumeGeometry::default()
        };
        geometry.bytes_per_file_record_segment =
            geometry.decode_record_size(read_le_u8(raw, 0x40)? as i8)?;
        geometry.bytes_per_index_record = geometry.decode_record_size(read_le_u8(raw, 0x44)? as i8)?;
        geometry
            .validate()
            .map_err(|err| NtfsError::corrupt("boot sector", err.to_string()))?;
        Ok(Self {
            geometry,
            total_sectors: read_le_u64(raw, 0x28)?,
            mft_lcn: read_le_u64(raw, 0x30)?,
            mft_mirror_lcn: read_le_u64(raw, 0x38)?,
            serial_number: read_le_u64(raw, 0x48)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BootSector {
        BootSector {
            geometry: VolumeGeometry::default(),
            total_sectors: 65_536,
            mft_lcn: 1,
            mft_mirror_lcn: 1,
            serial_number: 0x1234_5678_9ABC_DEF0,
        }
    }

    #[test]
    fn test_boot_sector_round_trip() {
        let raw = sample().encode().unwrap();
        assert_eq!(&raw[0..3], &JUMP);
        assert_eq!(&raw[0x1FE..0x200], &[0x55, 0xAA]);
        assert_eq!(raw[0x40] as i8, -10, "case=1024_byte_segments_below_cluster");
        assert_eq!(raw[0x44], 1, "case=one_cluster_index_records");
        let parsed = BootSector::parse(&raw).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(parsed.total_clusters(), 8192);
    }

    #[test]
    fn test_boot_sector_rejects_foreign_or_bad_geometry() {
        let mut raw = sample().encode().unwrap();
        raw[0x03] = b'F';
        assert!(BootSector::parse(&raw).unwrap_err().is_corruption());

        let mut raw = sample().encode().unwrap();
        raw[0x1FF] = 0;
        assert!(BootSector::parse(&raw).unwrap_err().is_corruption());

        let mut raw = sample().encode().unwrap();
        raw[0x0D] = 3;
        let err = BootSector::parse(&raw).unwrap_err();
        assert!(err.is_corruption(), "case=odd_cluster_size err={err}");
    }
}
