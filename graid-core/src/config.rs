// vim: tw=80
//! Array configuration.
//!
//! The engine consumes an already-parsed configuration; whatever frontend
//! produced it (config file, autodetection from labels) is out of scope.

use serde_derive::{Deserialize, Serialize};

use crate::types::*;

/// RAID placement algorithm.
///
/// This algorithm maps chunks to specific disks and offsets.  It does not
/// encode or decode parity.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum LayoutAlgorithm {
    /// Rotating single parity: stripe `s`'s parity chunk lives on disk
    /// `ndisks - 1 - (s % ndisks)`, data chunks fill the remaining disks in
    /// ascending order.
    RotatingParity,
    /// Every member holds a full copy of the data.  No parity.
    Mirrored,
}

/// Per-array configuration, fixed at format time.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ArrayConfig {
    /// Human-readable array name.  Not used for identity.
    pub name: String,

    /// RAID chunk size in LBAs: the largest amount of data read or written
    /// to a single device before the layout switches to the next one.
    pub chunk_lbas: LbaT,

    /// Number of member disks (not counting hot spares).
    pub ndisks: i16,

    /// RAID placement algorithm.
    pub layout: LayoutAlgorithm,

    /// Degree of redundancy.  Up to this many disks may fail before the
    /// array becomes inoperable.  Always 1 for `RotatingParity`;
    /// `ndisks - 1` for `Mirrored`.
    pub redundancy: i16,

    /// Journal parity images through the parity log before they land on the
    /// parity disk.
    pub journal_parity: bool,

    /// Reconstruction tick budget per scheduling quantum.  The coordinator
    /// voluntarily yields once it has consumed this many ticks without
    /// yielding.
    pub max_recon_exec_ticks: u64,
}

impl ArrayConfig {
    pub const DEFAULT_CHUNK_LBAS: LbaT = 16;
    pub const DEFAULT_MAX_RECON_EXEC_TICKS: u64 = 50;

    /// A rotating-parity array over `ndisks` members.
    pub fn parity(name: &str, ndisks: i16, chunk_lbas: Option<LbaT>) -> Self {
        ArrayConfig {
            name: name.to_owned(),
            chunk_lbas: chunk_lbas.unwrap_or(Self::DEFAULT_CHUNK_LBAS),
            ndisks,
            layout: LayoutAlgorithm::RotatingParity,
            redundancy: 1,
            journal_parity: false,
            max_recon_exec_ticks: Self::DEFAULT_MAX_RECON_EXEC_TICKS,
        }
    }

    /// A mirror over `ndisks` members.
    pub fn mirror(name: &str, ndisks: i16) -> Self {
        ArrayConfig {
            name: name.to_owned(),
            chunk_lbas: Self::DEFAULT_CHUNK_LBAS,
            ndisks,
            layout: LayoutAlgorithm::Mirrored,
            redundancy: ndisks - 1,
            journal_parity: false,
            max_recon_exec_ticks: Self::DEFAULT_MAX_RECON_EXEC_TICKS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_lbas == 0 {
            return Err(Error::EINVAL);
        }
        match self.layout {
            LayoutAlgorithm::RotatingParity => {
                if self.ndisks < 3 || self.redundancy != 1 {
                    return Err(Error::EINVAL);
                }
            },
            LayoutAlgorithm::Mirrored => {
                if self.ndisks < 2 ||
                    self.redundancy != self.ndisks - 1
                {
                    return Err(Error::EINVAL);
                }
                if self.journal_parity {
                    // Mirrors have no parity to journal
                    return Err(Error::EINVAL);
                }
            },
        }
        Ok(())
    }
}

// LCOV_EXCL_STOP
