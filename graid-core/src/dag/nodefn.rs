// vim: tw=80
//! The DAG node function library.
//!
//! Each node in an I/O DAG executes exactly one [`NodeOp`].  Node functions
//! are small and single-purpose; all sequencing logic lives in the DAG's
//! edges, never inside a node.  A node that modifies durable state returns an
//! [`UndoEntry`] so the executor can roll the DAG back if a later node fails.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tracing::warn;

use crate::{
    blockdev::BlockDev,
    config::ArrayConfig,
    types::*,
};
use super::xor::XorAlgorithm;

/// Highest representable scheduling priority.
pub const PRIORITY_MAX: u8 = 0xf;

/// Highest representable recovery unit index.
pub const RECOVERY_UNIT_MAX: RuT = 0x00FF_FFFF;

/// Index of a scratch buffer within a DAG's buffer arena.
pub type BufId = usize;

/// Per-node execution parameters.
///
/// These travel alongside every node and pack into a single 64-bit word for
/// compact storage in node headers:
///
/// ```text
///  63      60 59     58       57           24 23                    0
/// +----------+------+--------+---------------+-----------------------+
/// | priority | lock | unlock |   (unused)    |     recovery unit     |
/// +----------+------+--------+---------------+-----------------------+
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NodeParams {
    /// Scheduling priority, 0 through [`PRIORITY_MAX`].
    pub priority: u8,
    /// Acquire this node's disk lock before executing.
    pub lock: bool,
    /// Release this node's disk lock after executing.
    pub unlock: bool,
    /// Recovery unit this node touches, 0 through [`RECOVERY_UNIT_MAX`].
    pub recovery_unit: RuT,
}

impl NodeParams {
    const PRIORITY_SHIFT: u32 = 60;
    const LOCK_BIT: u64 = 1 << 59;
    const UNLOCK_BIT: u64 = 1 << 58;
    const RU_MASK: u64 = RECOVERY_UNIT_MAX as u64;

    pub fn new(priority: u8, recovery_unit: RuT) -> Self {
        assert!(priority <= PRIORITY_MAX);
        assert!(recovery_unit <= RECOVERY_UNIT_MAX);
        NodeParams {
            priority,
            lock: false,
            unlock: false,
            recovery_unit,
        }
    }

    pub fn locking(mut self) -> Self {
        self.lock = true;
        self
    }

    pub fn unlocking(mut self) -> Self {
        self.unlock = true;
        self
    }

    /// Pack into the 64-bit node header representation.
    pub fn pack(&self) -> u64 {
        debug_assert!(self.priority <= PRIORITY_MAX);
        debug_assert!(self.recovery_unit <= RECOVERY_UNIT_MAX);
        (u64::from(self.priority) << Self::PRIORITY_SHIFT) |
        if self.lock { Self::LOCK_BIT } else { 0 } |
        if self.unlock { Self::UNLOCK_BIT } else { 0 } |
        (u64::from(self.recovery_unit) & Self::RU_MASK)
    }

    /// Inverse of [`pack`](Self::pack).  Unused bits are ignored.
    pub fn unpack(word: u64) -> Self {
        NodeParams {
            priority: (word >> Self::PRIORITY_SHIFT) as u8 & PRIORITY_MAX,
            lock: word & Self::LOCK_BIT != 0,
            unlock: word & Self::UNLOCK_BIT != 0,
            recovery_unit: (word & Self::RU_MASK) as RuT,
        }
    }
}

/// A source of bytes for an XOR or write node.
#[derive(Clone, Debug)]
pub enum Operand {
    /// Caller-supplied data, available before the DAG runs.
    Ready(IoVec),
    /// A scratch buffer filled in by a predecessor node.
    Scratch(BufId),
}

impl Operand {
    fn resolve(self, ctx: &ExecCtx) -> IoVec {
        match self {
            Operand::Ready(iov) => iov,
            // The predecessor that filled this buffer has completed and
            // dropped its mutable reference, so try_const cannot fail.
            Operand::Scratch(id) => ctx.bufs[id].try_const().unwrap(),
        }
    }
}

/// Destination of a read or recovery node.
#[derive(Debug)]
pub enum Target {
    /// A window into the caller's buffer, split off at DAG build time.
    Window(IoVecMut),
    /// A scratch buffer within the DAG's arena.
    Scratch(BufId),
}

/// The operation a DAG node performs when it fires.
#[derive(Debug)]
pub enum NodeOp {
    /// Does nothing.  Used as a DAG source or as a fan-in point.
    Null,
    /// The DAG's sink.  Completing this node completes the DAG.
    Terminate,
    /// Read one contiguous extent from a member disk.
    DiskRead {
        disk: DiskIdx,
        lba: LbaT,
        dst: Target,
    },
    /// Write one contiguous extent to a member disk.
    ///
    /// If `old` is supplied it holds the extent's prior contents (captured
    /// by a predecessor read) and the write becomes undoable.
    DiskWrite {
        disk: DiskIdx,
        lba: LbaT,
        src: Operand,
        old: Option<Operand>,
    },
    /// XOR-accumulate all of `srcs` into the scratch buffer `dst`,
    /// which is zeroed first.  Computes parity for a full stripe.
    XorSimple {
        srcs: Vec<Operand>,
        dst: BufId,
    },
    /// XOR-accumulate surviving data plus parity into `dst`, rebuilding a
    /// missing block.  Identical arithmetic to [`NodeOp::XorSimple`]; kept
    /// distinct because its target is usually the caller's own buffer.
    XorRecovery {
        srcs: Vec<Operand>,
        dst: Target,
    },
    /// XOR-accumulate all of `srcs` into `dst` at byte offset `dst_off`,
    /// without zeroing first.  Applies read-modify-write parity deltas;
    /// overlapping deltas may be accumulated in any order.
    XorAccumulate {
        srcs: Vec<Operand>,
        dst: BufId,
        dst_off: usize,
    },
    /// XOR a parity delta into the journaled image for `stripe`.
    ParityLogUpdate {
        stripe: u64,
        delta: Operand,
    },
    /// Replace the journaled image for `stripe` outright.
    ParityLogOverwrite {
        stripe: u64,
        image: Operand,
    },
}

impl NodeOp {
    /// The member disk this node operates on, if any.  Determines which disk
    /// lock the [`NodeParams::lock`] and [`NodeParams::unlock`] flags refer
    /// to.
    pub fn disk(&self) -> Option<DiskIdx> {
        match self {
            NodeOp::DiskRead { disk, .. } |
            NodeOp::DiskWrite { disk, .. } => Some(*disk),
            _ => None,
        }
    }

    /// Execute the node.  On success, returns the entry needed to undo it,
    /// if it changed durable state.
    pub async fn run(self, ctx: &ExecCtx) -> Result<Option<UndoEntry>> {
        match self {
            NodeOp::Null | NodeOp::Terminate => Ok(None),
            NodeOp::DiskRead { disk, lba, dst } => {
                let dev = &ctx.devs[disk as usize];
                match dst {
                    Target::Window(wbuf) => dev.read_at(wbuf, lba).await?,
                    Target::Scratch(id) => {
                        let sbuf = ctx.bufs[id].try_mut().unwrap();
                        dev.read_at(sbuf, lba).await?
                    },
                }
                Ok(None)
            },
            NodeOp::DiskWrite { disk, lba, src, old } => {
                let dev = &ctx.devs[disk as usize];
                let iov = src.resolve(ctx);
                dev.write_at(iov, lba).await?;
                Ok(old.map(|o| UndoEntry::DiskWrite {
                    disk,
                    lba,
                    old: o.resolve(ctx),
                }))
            },
            NodeOp::XorSimple { srcs, dst } => {
                let mut acc = ctx.bufs[dst].try_mut().unwrap();
                acc[..].fill(0);
                for src in srcs.into_iter() {
                    let iov = src.resolve(ctx);
                    ctx.funcs.xor.xor_into(&mut acc[..], &iov[..]);
                }
                Ok(None)
            },
            NodeOp::XorRecovery { srcs, dst } => {
                let mut acc = match dst {
                    Target::Window(wbuf) => wbuf,
                    Target::Scratch(id) => ctx.bufs[id].try_mut().unwrap(),
                };
                acc[..].fill(0);
                for src in srcs.into_iter() {
                    let iov = src.resolve(ctx);
                    ctx.funcs.xor.xor_into(&mut acc[..], &iov[..]);
                }
                Ok(None)
            },
            NodeOp::XorAccumulate { srcs, dst, dst_off } => {
                let mut acc = ctx.bufs[dst].try_mut().unwrap();
                for src in srcs.into_iter() {
                    let iov = src.resolve(ctx);
                    let end = dst_off + iov.len();
                    ctx.funcs.xor.xor_into(&mut acc[dst_off..end], &iov[..]);
                }
                Ok(None)
            },
            NodeOp::ParityLogUpdate { stripe, delta } => {
                let iov = delta.resolve(ctx);
                let plog = ctx.plog.as_ref().ok_or(Error::ENODEV)?;
                plog.lock().unwrap().update(stripe, &iov[..], ctx.funcs.xor);
                Ok(Some(UndoEntry::ParityLogUpdate { stripe, delta: iov }))
            },
            NodeOp::ParityLogOverwrite { stripe, image } => {
                let iov = image.resolve(ctx);
                let plog = ctx.plog.as_ref().ok_or(Error::ENODEV)?;
                let prior = plog.lock().unwrap().overwrite(stripe, &iov[..]);
                Ok(Some(UndoEntry::ParityLogOverwrite { stripe, prior }))
            },
        }
    }
}

/// Everything a node must restore if the DAG rolls back.
///
/// Undo entries are applied in reverse completion order.  Each is the exact
/// inverse of its forward node, so a fully rolled back DAG leaves the array
/// as if the access never started.
#[derive(Debug)]
pub enum UndoEntry {
    /// Restore an extent's prior contents.
    DiskWrite {
        disk: DiskIdx,
        lba: LbaT,
        old: IoVec,
    },
    /// XOR the same delta back out of the journaled image.
    ParityLogUpdate {
        stripe: u64,
        delta: IoVec,
    },
    /// Restore the prior journaled image, or remove the entry if there was
    /// none.
    ParityLogOverwrite {
        stripe: u64,
        prior: Option<Vec<u8>>,
    },
}

impl UndoEntry {
    pub async fn undo(self, ctx: &ExecCtx) -> Result<()> {
        match self {
            UndoEntry::DiskWrite { disk, lba, old } => {
                ctx.devs[disk as usize].write_at(old, lba).await
            },
            UndoEntry::ParityLogUpdate { stripe, delta } => {
                let plog = ctx.plog.as_ref().ok_or(Error::ENODEV)?;
                plog.lock().unwrap().update(stripe, &delta[..], ctx.funcs.xor);
                Ok(())
            },
            UndoEntry::ParityLogOverwrite { stripe, prior } => {
                let plog = ctx.plog.as_ref().ok_or(Error::ENODEV)?;
                plog.lock().unwrap().restore(stripe, prior);
                Ok(())
            },
        }
    }
}

/// The journal of parity images awaiting their home disk.
///
/// Keyed by stripe index.  Updates are XOR-deltas, so they may be applied in
/// any order and are their own inverse.
#[derive(Debug, Default)]
pub struct ParityLog {
    images: BTreeMap<u64, Vec<u8>>,
}

impl ParityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// XOR `delta` into the image for `stripe`, creating a zeroed image if
    /// none exists yet.
    pub fn update(&mut self, stripe: u64, delta: &[u8], alg: XorAlgorithm) {
        let image = self.images.entry(stripe)
            .or_insert_with(|| vec![0u8; delta.len()]);
        assert_eq!(image.len(), delta.len());
        alg.xor_into(image, delta);
    }

    /// Replace the image for `stripe`, returning the prior image if any.
    pub fn overwrite(&mut self, stripe: u64, image: &[u8]) -> Option<Vec<u8>> {
        self.images.insert(stripe, image.to_vec())
    }

    /// Put back what [`overwrite`](Self::overwrite) displaced.
    pub fn restore(&mut self, stripe: u64, prior: Option<Vec<u8>>) {
        match prior {
            Some(image) => {
                self.images.insert(stripe, image);
            },
            None => {
                self.images.remove(&stripe);
            },
        }
    }

    pub fn image(&self, stripe: u64) -> Option<&[u8]> {
        self.images.get(&stripe).map(Vec::as_slice)
    }

    /// Drop the image for `stripe` once it has reached the parity disk.
    pub fn retire(&mut self, stripe: u64) -> Option<Vec<u8>> {
        self.images.remove(&stripe)
    }

    /// Take every image, oldest stripe first, leaving the journal empty.
    pub fn drain(&mut self) -> Vec<(u64, Vec<u8>)> {
        std::mem::take(&mut self.images).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// The table of redundancy functions, fixed when the array is configured.
#[derive(Clone, Copy, Debug)]
pub struct FuncTable {
    pub xor: XorAlgorithm,
    pub journal_parity: bool,
}

impl FuncTable {
    pub fn configure(cfg: &ArrayConfig) -> Self {
        FuncTable {
            xor: XorAlgorithm::Longword,
            journal_parity: cfg.journal_parity,
        }
    }
}

/// Shared state every node sees while its DAG executes.
pub struct ExecCtx {
    /// Member device handles in column order, spares following.
    pub devs: Vec<Arc<dyn BlockDev>>,
    pub funcs: FuncTable,
    pub plog: Option<Arc<Mutex<ParityLog>>>,
    /// The DAG's scratch buffer arena.
    pub bufs: Vec<divbuf::DivBufShared>,
}

impl ExecCtx {
    /// Best-effort rollback of completed nodes, newest first.
    pub async fn rollback(&self, mut entries: Vec<UndoEntry>) {
        while let Some(entry) = entries.pop() {
            if let Err(e) = entry.undo(self).await {
                warn!(error = %e, "rollback step failed");
            }
        }
    }
}

// LCOV_EXCL_STOP
