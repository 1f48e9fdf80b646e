//! Synthetic camera files for tests.
//!
//! Layout: `ftyp`, `moov` (`mvhd`, `trak`/`tkhd`, `trak`/`mdia`/`mdhd`),
//! `mdat` holding an embedded path, then the `inst` vendor box with the
//! protobuf fields, a path and a UTF-16LE file name.

use crate::date::codec::{self, Encoding};
use crate::date::varint::encode_varint;
use crate::date::TimeValue;

/// Wrong local shooting time stamped by the camera.
pub(crate) const OLD: &str = "20260103194656";
/// Correct local shooting time.
pub(crate) const NEW: &str = "20260215143800";
/// Camera time zone; container atoms hold UTC.
pub(crate) const UTC_OFFSET_HOURS: i64 = 9;
/// First GPS fix: 37.123 s after the (UTC) start of recording.
pub(crate) const OLD_GPS_MS: u64 = 1_767_437_253_123;

const PATH: &[u8] = b"/DCIM/Camera01/VID_20260103_194656_00_001.insv";
const FILENAME: &str = "VID_20260103_194656_00_001.insv";
const FILLER: u8 = 0x5A;

enum Variant {
    Standard,
    NoVendorBox,
    V1Tkhd,
}

pub(crate) struct Fixture {
    pub bytes: Vec<u8>,
    /// mvhd, tkhd, mdhd creation/modification field offsets (v0 atoms only).
    pub atom_fields: Vec<usize>,
    pub mdat_payload_at: usize,
    pub ascii_at: Vec<usize>,
    pub compact_at: usize,
    pub creation_at: usize,
    pub gps_at: usize,
    pub utf16_at: usize,
}

fn boxed(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
    out
}

/// Version-0 full atom of `size` bytes with both time slots set.
fn header_atom(fourcc: &[u8; 4], size: usize, secs: u32) -> Vec<u8> {
    let mut payload = vec![0u8; size - 8];
    payload[4..8].copy_from_slice(&secs.to_be_bytes());
    payload[8..12].copy_from_slice(&secs.to_be_bytes());
    boxed(fourcc, &payload)
}

/// Version-1 tkhd: 64-bit times, 104 bytes.
fn tkhd_v1(secs: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 96];
    payload[0] = 1;
    payload[4..12].copy_from_slice(&(secs as u64).to_be_bytes());
    payload[12..20].copy_from_slice(&(secs as u64).to_be_bytes());
    boxed(b"tkhd", &payload)
}

pub(crate) fn utc_secs() -> u32 {
    let old = TimeValue::parse(OLD).unwrap();
    let utc = old.shifted(chrono::TimeDelta::hours(-UTC_OFFSET_HOURS)).unwrap();
    let bytes = codec::encode(&utc, Encoding::Mp4Seconds).unwrap();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl Fixture {
    pub fn standard() -> Self {
        Self::build(Variant::Standard)
    }

    pub fn without_vendor_box() -> Self {
        Self::build(Variant::NoVendorBox)
    }

    pub fn with_v1_tkhd() -> Self {
        Self::build(Variant::V1Tkhd)
    }

    fn build(variant: Variant) -> Self {
        let secs = utc_secs();
        let mut bytes = boxed(b"ftyp", b"isom\0\0\x02\0isomiso2avc1mp41");
        let mut atom_fields = Vec::new();

        // moov
        let mvhd = header_atom(b"mvhd", 108, secs);
        let tkhd = match variant {
            Variant::V1Tkhd => tkhd_v1(secs),
            _ => header_atom(b"tkhd", 92, secs),
        };
        let mdhd = header_atom(b"mdhd", 32, secs);
        let trak1 = boxed(b"trak", &tkhd);
        let trak2 = boxed(b"trak", &boxed(b"mdia", &mdhd));

        let moov_at = bytes.len();
        let mvhd_at = moov_at + 8;
        let tkhd_at = mvhd_at + mvhd.len() + 8;
        let mdhd_at = tkhd_at + tkhd.len() + 8 + 8;
        atom_fields.extend([mvhd_at + 12, mvhd_at + 16]);
        if !matches!(variant, Variant::V1Tkhd) {
            atom_fields.extend([tkhd_at + 12, tkhd_at + 16]);
        }
        atom_fields.extend([mdhd_at + 12, mdhd_at + 16]);

        let mut moov = mvhd;
        moov.extend(trak1);
        moov.extend(trak2);
        bytes.extend(boxed(b"moov", &moov));

        // mdat: filler, a path, a compact stamp, filler
        let mdat_payload_at = bytes.len() + 8;
        let mut mdat = vec![FILLER; 256];
        let ascii_mdat = mdat_payload_at + mdat.len() + PATH.len() - FILENAME.len() + 4;
        mdat.extend_from_slice(PATH);
        mdat.push(0);
        mdat.extend_from_slice(b"t=");
        let compact_at = mdat_payload_at + mdat.len();
        mdat.extend_from_slice(OLD.as_bytes());
        mdat.push(0);
        mdat.extend(vec![FILLER; 64]);
        bytes.extend(boxed(b"mdat", &mdat));

        // vendor box with a protobuf-style record
        let inst_payload_at = bytes.len() + 8;
        let mut pb: Vec<u8> = Vec::new();
        pb.extend_from_slice(&[0x0A, 0x08]);
        pb.extend_from_slice(b"IXSE4321");
        pb.push(0x38);
        let creation_at = inst_payload_at + pb.len();
        pb.extend(encode_varint(OLD.parse::<u64>().unwrap()));
        pb.extend_from_slice(&[0x50, 0x01]);
        pb.extend_from_slice(&[0xA0, 0x02]);
        let gps_at = inst_payload_at + pb.len();
        pb.extend(encode_varint(OLD_GPS_MS));
        // field 3, length-delimited: the source path
        pb.extend_from_slice(&[0x1A, PATH.len() as u8]);
        let ascii_inst = inst_payload_at + pb.len() + PATH.len() - FILENAME.len() + 4;
        pb.extend_from_slice(PATH);
        // field 37, length-delimited: the file name as UTF-16LE
        let name: Vec<u8> = FILENAME.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        pb.extend_from_slice(&[0xAA, 0x02, name.len() as u8]);
        let utf16_at = inst_payload_at + pb.len() + 8;
        pb.extend(name);
        pb.extend_from_slice(&[0x60, 0x02]);

        let vendor_type: &[u8; 4] = match variant {
            Variant::NoVendorBox => b"free",
            _ => b"inst",
        };
        bytes.extend(boxed(vendor_type, &pb));

        Fixture {
            bytes,
            atom_fields,
            mdat_payload_at,
            ascii_at: vec![ascii_mdat, ascii_inst],
            compact_at,
            creation_at,
            gps_at,
            utf16_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_offsets_point_at_fields() {
        let fx = Fixture::standard();
        let secs = utc_secs().to_be_bytes();
        for &at in &fx.atom_fields {
            assert_eq!(&fx.bytes[at..at + 4], secs);
        }
        for &at in &fx.ascii_at {
            assert_eq!(&fx.bytes[at..at + 15], b"20260103_194656");
        }
        assert_eq!(&fx.bytes[fx.compact_at..fx.compact_at + 14], OLD.as_bytes());
        assert_eq!(fx.bytes[fx.creation_at - 1], 0x38);
        assert_eq!(&fx.bytes[fx.gps_at - 2..fx.gps_at], &[0xA0, 0x02]);
        assert_eq!(&fx.bytes[fx.utf16_at..fx.utf16_at + 4], b"2\x000\x00");
        assert_eq!(fx.atom_fields.len(), 6);
    }
}
