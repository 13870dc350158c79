// vim: tw=80
//! Common type definitions used throughout GRAID

use divbuf::{DivBuf, DivBufMut};
use enum_primitive_derive::Primitive;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, SerializeTuple, Serializer},
};
use thiserror::Error;
use std::{
    fmt::{self, Display, Formatter},
    io,
    str::FromStr,
};

/// Our `IoVec`.  Unlike the standard library's, ours is reference-counted so
/// it can have more than one owner.
pub type IoVec = DivBuf;

/// Mutable version of `IoVec`.  Uniquely owned.
pub type IoVecMut = DivBufMut;

/// Indexes an LBA.  LBAs are always 4096 bytes.
pub type LbaT = u64;

/// Indexes a member disk (or a hot spare) within the array.
pub type DiskIdx = i16;

/// Indexes a recovery unit: the granularity at which reconstruction progress
/// is tracked.  Only 24 bits are usable; see
/// [`RECOVERY_UNIT_MAX`](crate::dag::nodefn::RECOVERY_UNIT_MAX).
pub type RuT = u32;

/// GRAID's error type.  Basically just an errno.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq, Primitive)]
pub enum Error {
    // Standard errnos
    #[error("Operation not permitted")]
    EPERM           = libc::EPERM as isize,
    #[error("No such file or directory")]
    ENOENT          = libc::ENOENT as isize,
    #[error("Input/output error")]
    EIO             = libc::EIO as isize,
    #[error("Device not configured")]
    ENXIO           = libc::ENXIO as isize,
    #[error("Cannot allocate memory")]
    ENOMEM          = libc::ENOMEM as isize,
    #[error("Device busy")]
    EBUSY           = libc::EBUSY as isize,
    #[error("File exists")]
    EEXIST          = libc::EEXIST as isize,
    #[error("Operation not supported by device")]
    ENODEV          = libc::ENODEV as isize,
    #[error("Invalid argument")]
    EINVAL          = libc::EINVAL as isize,
    #[error("No space left on device")]
    ENOSPC          = libc::ENOSPC as isize,
    #[error("Resource temporarily unavailable")]
    EAGAIN          = libc::EAGAIN as isize,
    #[error("Operation now in progress")]
    EINPROGRESS     = libc::EINPROGRESS as isize,
    #[error("Operation already in progress")]
    EALREADY        = libc::EALREADY as isize,
    #[error("Value too large to be stored in data type")]
    EOVERFLOW       = libc::EOVERFLOW as isize,
    #[error("Operation canceled")]
    ECANCELED       = libc::ECANCELED as isize,
    #[error("State not recoverable")]
    ENOTRECOVERABLE = libc::ENOTRECOVERABLE as isize,

    //// GRAID custom error types below
    #[error("Unknown error")]
    EUNKNOWN        = 256,
    #[error("Integrity check failed")]
    EINTEGRITY      = 257,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        e.raw_os_error()
            .and_then(Error::from_i32)
            .unwrap_or(Error::EUNKNOWN)
    }
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        match e {
            Error::EUNKNOWN =>
                panic!("Unknown error codes should never be exposed"),
            Error::EINTEGRITY => libc::EIO,
            _ => e.to_i32().unwrap()
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// GRAID UUID type
///
/// This is just like the `Uuid` from the `uuid` crate, except that it
/// serializes as a fixed-size array instead of a slice, which keeps the
/// on-disk label format stable.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn new_v4() -> Self {
        Uuid(uuid::Uuid::new_v4())
    }

    pub fn parse_str(input: &str) -> std::result::Result<Uuid, uuid::Error> {
        uuid::Uuid::parse_str(input).map(Uuid)
    }
}

impl FromStr for Uuid {
    type Err = <uuid::Uuid as FromStr>::Err;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        uuid::Uuid::from_str(s).map(Self)
    }
}

impl<'de> Deserialize<'de> for Uuid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
        where D: Deserializer<'de>
    {
        <[u8; 16]>::deserialize(deserializer)
        .map(|v| Uuid(uuid::Uuid::from_bytes(v)))
    }
}

impl Display for Uuid {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Uuid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where S: Serializer
    {
        let bytes = self.0.as_bytes();
        debug_assert_eq!(bytes.len(), 16);
        let mut tup = serializer.serialize_tuple(16)?;
        for b in bytes.iter() {
            tup.serialize_element(&b)?;
        }
        tup.end()
    }
}

/// Our scatter-gather list.  A slice of reference-counted `IoVec`s.
pub type SGList = Vec<IoVec>;

/// Mutable version of `SGList`.  Uniquely owned.
pub type SGListMut = Vec<IoVecMut>;

// LCOV_EXCL_STOP
