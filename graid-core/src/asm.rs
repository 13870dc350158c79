// vim: tw=80
//! Address mapping: from a user extent to per-disk chunk accesses.
//!
//! The map is pure arithmetic.  It knows nothing about disk health or
//! buffers; it only answers "which chunks of which disks does this extent
//! touch, and where does each land in the user's buffer".  The DAG builder
//! consumes the map and turns it into nodes.

use crate::{
    config::{ArrayConfig, LayoutAlgorithm},
    label::LABEL_LBAS,
    types::*,
    util::*,
};

/// Location of one whole chunk on one member disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkLoc {
    pub disk: DiskIdx,
    /// First LBA of the chunk on that disk.
    pub lba: LbaT,
}

/// The part of one data chunk that a user access touches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkAccess {
    pub disk: DiskIdx,
    /// First LBA of the accessed region on that disk.
    pub lba: LbaT,
    /// Length of the accessed region in LBAs.
    pub lbas: LbaT,
    /// Byte offset of this region within the user's buffer.
    pub buf_off: usize,
}

impl ChunkAccess {
    pub fn byte_len(&self) -> usize {
        self.lbas as usize * BYTES_PER_LBA
    }
}

/// All of one stripe's share of a user access.
#[derive(Clone, Debug)]
pub struct StripeAccess {
    pub stripe: u64,
    /// Recovery unit covering this stripe.
    pub ru: RuT,
    /// Touched data regions, in user-buffer order.
    ///
    /// For mirrored layouts the `disk` field is not meaningful: the same
    /// LBAs exist on every member, and the DAG builder chooses which
    /// member(s) to touch.
    pub chunks: Vec<ChunkAccess>,
    /// The stripe's parity chunk.  `None` for mirrored layouts.
    pub parity: Option<ChunkLoc>,
    /// True iff the access covers every data LBA of the stripe.
    pub full: bool,
}

/// A user access, decomposed stripe by stripe.
#[derive(Clone, Debug)]
pub struct AccessStripeMap {
    pub stripes: Vec<StripeAccess>,
}

/// The array's geometry.  Fixed at configure time.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    ndisks: i16,
    chunk_lbas: LbaT,
    algorithm: LayoutAlgorithm,
}

impl Layout {
    /// First data LBA on every member disk.  Everything before it is label.
    pub const DATA_START: LbaT = LABEL_LBAS;

    pub fn new(cfg: &ArrayConfig) -> Self {
        Layout {
            ndisks: cfg.ndisks,
            chunk_lbas: cfg.chunk_lbas,
            algorithm: cfg.layout,
        }
    }

    pub fn chunk_lbas(&self) -> LbaT {
        self.chunk_lbas
    }

    pub fn ndisks(&self) -> i16 {
        self.ndisks
    }

    pub fn mirrored(&self) -> bool {
        self.algorithm == LayoutAlgorithm::Mirrored
    }

    /// Data LBAs per stripe, as seen by the user.
    pub fn stripe_lbas(&self) -> LbaT {
        match self.algorithm {
            LayoutAlgorithm::RotatingParity =>
                (self.ndisks - 1) as LbaT * self.chunk_lbas,
            LayoutAlgorithm::Mirrored => self.chunk_lbas,
        }
    }

    /// Usable capacity in LBAs, given the per-disk data region size.
    ///
    /// Only whole stripes count.
    pub fn capacity(&self, disk_data_lbas: LbaT) -> LbaT {
        let stripes = disk_data_lbas / self.chunk_lbas;
        stripes * self.stripe_lbas()
    }

    /// Number of recovery units covering `disk_data_lbas` of each member.
    pub fn recovery_units(&self, disk_data_lbas: LbaT) -> RuT {
        (disk_data_lbas / self.chunk_lbas) as RuT
    }

    /// Which member holds stripe `stripe`'s parity chunk.
    ///
    /// Parity rotates right-to-left, one disk per stripe, so no single
    /// member becomes a parity hot spot.
    pub fn parity_disk(&self, stripe: u64) -> DiskIdx {
        debug_assert_eq!(self.algorithm, LayoutAlgorithm::RotatingParity);
        self.ndisks - 1 - (stripe % self.ndisks as u64) as DiskIdx
    }

    /// Which member holds data column `col` of stripe `stripe`.
    pub fn data_disk(&self, stripe: u64, col: DiskIdx) -> DiskIdx {
        debug_assert!(col < self.ndisks - 1);
        let p = self.parity_disk(stripe);
        if col >= p { col + 1 } else { col }
    }

    /// First LBA of stripe `stripe`'s chunk on whichever disk holds it.
    pub fn chunk_start(&self, stripe: u64) -> LbaT {
        Self::DATA_START + stripe * self.chunk_lbas
    }

    /// Decompose the user extent `lba..lba + nlbas` into per-stripe,
    /// per-chunk accesses.
    pub fn map(&self, lba: LbaT, nlbas: LbaT) -> AccessStripeMap {
        match self.algorithm {
            LayoutAlgorithm::RotatingParity => self.map_parity(lba, nlbas),
            LayoutAlgorithm::Mirrored => self.map_mirror(lba, nlbas),
        }
    }

    fn map_parity(&self, lba: LbaT, nlbas: LbaT) -> AccessStripeMap {
        let stripe_lbas = self.stripe_lbas();
        let mut stripes = Vec::new();
        let mut cur = lba;
        let mut remaining = nlbas;
        let mut buf_off = 0usize;
        while remaining > 0 {
            let stripe = cur / stripe_lbas;
            let in_stripe = cur % stripe_lbas;
            let this = remaining.min(stripe_lbas - in_stripe);
            let mut chunks = Vec::new();
            let mut off = in_stripe;
            let mut left = this;
            while left > 0 {
                let col = (off / self.chunk_lbas) as DiskIdx;
                let in_chunk = off % self.chunk_lbas;
                let n = left.min(self.chunk_lbas - in_chunk);
                chunks.push(ChunkAccess {
                    disk: self.data_disk(stripe, col),
                    lba: self.chunk_start(stripe) + in_chunk,
                    lbas: n,
                    buf_off,
                });
                buf_off += n as usize * BYTES_PER_LBA;
                off += n;
                left -= n;
            }
            stripes.push(StripeAccess {
                stripe,
                ru: stripe as RuT,
                chunks,
                parity: Some(ChunkLoc {
                    disk: self.parity_disk(stripe),
                    lba: self.chunk_start(stripe),
                }),
                full: in_stripe == 0 && this == stripe_lbas,
            });
            cur += this;
            remaining -= this;
        }
        AccessStripeMap { stripes }
    }

    fn map_mirror(&self, lba: LbaT, nlbas: LbaT) -> AccessStripeMap {
        let mut stripes = Vec::new();
        let mut cur = lba;
        let mut remaining = nlbas;
        let mut buf_off = 0usize;
        while remaining > 0 {
            let stripe = cur / self.chunk_lbas;
            let in_chunk = cur % self.chunk_lbas;
            let this = remaining.min(self.chunk_lbas - in_chunk);
            stripes.push(StripeAccess {
                stripe,
                ru: stripe as RuT,
                chunks: vec![ChunkAccess {
                    disk: 0,
                    lba: Self::DATA_START + cur,
                    lbas: this,
                    buf_off,
                }],
                parity: None,
                full: in_chunk == 0 && this == self.chunk_lbas,
            });
            buf_off += this as usize * BYTES_PER_LBA;
            cur += this;
            remaining -= this;
        }
        AccessStripeMap { stripes }
    }
}

// LCOV_EXCL_STOP
