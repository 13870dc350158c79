// vim: tw=80

use byteorder::{BigEndian, ByteOrder};
use crate::{
    types::*,
    util::*
};
use divbuf::DivBufShared;
use metrohash::MetroHash64;
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hasher;

/*
 * On-disk Label Format:
 *
 * Magic:       16 bytes
 * Checksum:    8 bytes     MetroHash64.  Covers all of Length and Contents.
 * Length:      8 bytes     Length of Contents in bytes
 * Contents:    variable    bincode-encoded DiskLabel
 * Pad:         variable    0-padding fills the remainder of the label LBA
 *
 * The label occupies the first LBA of every member disk and every hot spare.
 * The data region begins immediately after it.
 */
/// The label magic is "GRAID Disk\0\0\0\0\0\0"
const MAGIC: &[u8; MAGIC_LEN] = b"GRAID Disk\0\0\0\0\0\0";
const MAGIC_LEN: usize = 16;
const CHECKSUM_LEN: usize = 8;
const LENGTH_LEN: usize = 8;
const HEADER_LEN: usize = MAGIC_LEN + CHECKSUM_LEN + LENGTH_LEN;
pub const LABEL_LBAS: LbaT = 1;
pub const LABEL_SIZE: usize = LABEL_LBAS as usize * BYTES_PER_LBA;

/// Reads a label that was previously read raw off of a disk.
pub struct LabelReader {
    buffer: Vec<u8>,
}

impl LabelReader {
    /// Attempt to read a `T` out of the label's contents.
    pub fn deserialize<T>(&self) -> bincode::Result<T>
        where T: DeserializeOwned
    {
        bincode::deserialize(&self.buffer[HEADER_LEN..])
    }

    /// Construct a `LabelReader` from the raw buffer read from disk.
    ///
    /// Fails with [`Error::EINVAL`] if the buffer does not carry a GRAID
    /// label at all, and with [`Error::EINTEGRITY`] if it does but the
    /// checksum doesn't match.
    pub fn new(buffer: Vec<u8>) -> Result<Self> {
        if buffer.len() < HEADER_LEN {
            return Err(Error::EINVAL);
        }
        if MAGIC[..] != buffer[0..MAGIC_LEN] {
            return Err(Error::EINVAL);
        }

        let checksum = BigEndian::read_u64(
            &buffer[MAGIC_LEN..MAGIC_LEN + CHECKSUM_LEN]);
        let length_start = MAGIC_LEN + CHECKSUM_LEN;
        let contents_len = BigEndian::read_u64(
            &buffer[length_start..HEADER_LEN]) as usize;
        if buffer.len() < HEADER_LEN + contents_len {
            return Err(Error::EINVAL);
        }
        let mut hasher = MetroHash64::new();
        hasher.write_u64((contents_len as u64).to_be());
        hasher.write(&buffer[HEADER_LEN..HEADER_LEN + contents_len]);
        if checksum != hasher.finish() {
            return Err(Error::EINTEGRITY);
        }

        Ok(LabelReader { buffer })
    }
}

/// Serializes one label struct into an LBA-sized, checksummed frame.
#[derive(Clone, Debug, Default)]
pub struct LabelWriter {}

impl LabelWriter {
    pub fn new() -> Self {
        LabelWriter {}
    }

    /// Serialize `t` and return an `SGList` suitable for writing to the
    /// first LBA of a disk.  The list is padded to exactly `LABEL_SIZE`
    /// bytes.
    pub fn serialize<T: Serialize>(&self, t: &T) -> bincode::Result<SGList> {
        let contents = bincode::serialize(t)?;
        assert!(contents.len() <= LABEL_SIZE - HEADER_LEN,
                "label contents overflow the label LBA");

        let mut hasher = MetroHash64::new();
        hasher.write_u64((contents.len() as u64).to_be());
        hasher.write(&contents);

        let mut header = vec![0u8; HEADER_LEN];
        header[0..MAGIC_LEN].copy_from_slice(&MAGIC[..]);
        BigEndian::write_u64(&mut header[MAGIC_LEN..], hasher.finish());
        let length_start = MAGIC_LEN + CHECKSUM_LEN;
        BigEndian::write_u64(&mut header[length_start..],
                             contents.len() as u64);

        let pad = LABEL_SIZE - HEADER_LEN - contents.len();
        let mut sglist = SGList::with_capacity(3);
        let hdbs = DivBufShared::from(header);
        sglist.push(hdbs.try_const().unwrap());
        let cdbs = DivBufShared::from(contents);
        sglist.push(cdbs.try_const().unwrap());
        if pad > 0 {
            sglist.extend(zero_sglist(pad));
        }
        Ok(sglist)
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use pretty_assertions::assert_eq;
    use serde_derive::{Deserialize, Serialize};
    use super::*;

    #[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
    struct TLabel {
        x: u64,
        y: Uuid,
    }

    fn flatten(sglist: SGList) -> Vec<u8> {
        let mut v = Vec::new();
        for iov in sglist.into_iter() {
            v.extend(&iov[..]);
        }
        v
    }

    #[test]
    fn round_trip() {
        let lab = TLabel { x: 42, y: Uuid::new_v4() };
        let sglist = LabelWriter::new().serialize(&lab).unwrap();
        let raw = flatten(sglist);
        assert_eq!(raw.len(), LABEL_SIZE);
        let reader = LabelReader::new(raw).unwrap();
        let lab2: TLabel = reader.deserialize().unwrap();
        assert_eq!(lab, lab2);
    }

    #[test]
    fn bad_magic() {
        let lab = TLabel { x: 42, y: Uuid::new_v4() };
        let sglist = LabelWriter::new().serialize(&lab).unwrap();
        let mut raw = flatten(sglist);
        raw[0] ^= 0xff;
        assert_eq!(LabelReader::new(raw).err(), Some(Error::EINVAL));
    }

    #[test]
    fn corrupt_contents() {
        let lab = TLabel { x: 42, y: Uuid::new_v4() };
        let sglist = LabelWriter::new().serialize(&lab).unwrap();
        let mut raw = flatten(sglist);
        raw[HEADER_LEN] ^= 0xff;
        assert_eq!(LabelReader::new(raw).err(), Some(Error::EINTEGRITY));
    }

    #[test]
    fn too_short() {
        assert_eq!(LabelReader::new(vec![0u8; 8]).err(), Some(Error::EINVAL));
    }
}
// LCOV_EXCL_STOP
