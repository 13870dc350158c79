// vim: tw=80
//! Compiles stripe maps into executable I/O graphs.
//!
//! The builder is the only place that knows how to express an access as
//! nodes and edges.  It consults disk health to decide between the fast
//! paths and the degraded ones, but it never touches a disk itself; the
//! graphs it emits do all the work.
//!
//! Graph shapes:
//!
//! * Healthy read: one read node per touched chunk region, all feeding the
//!   sink.
//! * Degraded read: the missing region is recovered by reading the same
//!   extent from every other member and XORing, since every chunk of a
//!   stripe lives at the same LBA on its member.
//! * Full-stripe write: data writes fan out of a source; parity is computed
//!   from the caller's data alone and its write always precedes the sink.
//! * Partial write: classic read-modify-write.  Old data and old parity are
//!   read under disk locks, per-region deltas accumulate into the new
//!   parity image, and every write carries its pre-image so it can be
//!   undone.

use crate::{
    asm::{AccessStripeMap, Layout, StripeAccess},
    disk::DiskStatus,
    types::*,
    util::*,
};
use super::{
    Dag,
    NodeId,
    nodefn::{FuncTable, NodeOp, NodeParams, Operand, Target},
};

/// Compiles accesses into [`Dag`]s against a snapshot of the array's state.
///
/// The snapshot (statuses and spare assignments) is taken by the caller
/// under the array lock; the builder itself is pure.
pub struct DagBuilder<'a> {
    pub layout: &'a Layout,
    /// Status of each member, by column.
    pub status: &'a [DiskStatus],
    /// For each member being spared, the column of its hot spare.
    pub spare_of: &'a [Option<DiskIdx>],
    pub funcs: FuncTable,
    /// Scheduling priority for every node this builder emits.
    pub priority: u8,
}

impl DagBuilder<'_> {
    fn ndisks(&self) -> DiskIdx {
        self.status.len() as DiskIdx
    }

    fn params(&self, ru: RuT) -> NodeParams {
        NodeParams::new(self.priority, ru)
    }

    /// Device index (members first, spares following) holding column `col`'s
    /// current data, or `None` if that data is only recoverable via parity.
    fn read_dev(&self, col: DiskIdx) -> Option<DiskIdx> {
        let st = self.status[col as usize];
        if !st.is_dead() {
            Some(col)
        } else if st == DiskStatus::Spared {
            self.spare_of[col as usize].map(|s| self.ndisks() + s)
        } else {
            None
        }
    }

    /// Device indices that a write to column `col` must reach.  Empty means
    /// the column's data can only be memorialized through parity.
    fn write_devs(&self, col: DiskIdx) -> Vec<DiskIdx> {
        let st = self.status[col as usize];
        if !st.is_dead() {
            vec![col]
        } else if matches!(st,
                           DiskStatus::Spared | DiskStatus::Reconstructing)
        {
            self.spare_of[col as usize]
                .map(|s| vec![self.ndisks() + s])
                .unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    /// Can this partially-written stripe be handled by read-modify-write?
    fn rmw_possible(&self, sa: &StripeAccess) -> bool {
        let Some(p) = sa.parity else {
            // Mirrors have no parity to maintain
            return true;
        };
        if self.read_dev(p.disk).is_none() {
            // Old parity is unreadable.  RMW still works if nothing needs
            // the new parity either; otherwise the caller must
            // reconstruct-write the whole stripe.
            return self.write_devs(p.disk).is_empty() &&
                !self.funcs.journal_parity;
        }
        sa.chunks.iter().all(|ca| self.read_dev(ca.disk).is_some())
    }

    /// True if any partially-written stripe cannot be read-modify-written.
    ///
    /// The caller must then widen the access to full stripe boundaries,
    /// reconstruct the stripe's current contents, overlay the new data, and
    /// issue a full-stripe write instead.
    pub fn needs_promotion(&self, asm: &AccessStripeMap) -> bool {
        asm.stripes.iter().any(|sa| !sa.full && !self.rmw_possible(sa))
    }

    /// Compile a read access.  `wbuf` is the caller's destination buffer,
    /// exactly as long as the mapped extent; it is carved into per-region
    /// windows here, at build time, so concurrent read nodes never contend
    /// for it.
    pub fn read(&self, asm: &AccessStripeMap, mut wbuf: IoVecMut)
        -> Result<Dag>
    {
        let mut dag = Dag::new();
        let mut leaves = Vec::new();
        for sa in asm.stripes.iter() {
            for ca in sa.chunks.iter() {
                let window = wbuf.split_to(ca.byte_len());
                if sa.parity.is_none() {
                    let dev = (0..self.ndisks())
                        .find_map(|c| self.read_dev(c))
                        .ok_or(Error::ENOTRECOVERABLE)?;
                    let rd = dag.add_node(NodeOp::DiskRead {
                        disk: dev,
                        lba: ca.lba,
                        dst: Target::Window(window),
                    }, self.params(sa.ru));
                    leaves.push(rd);
                } else if let Some(dev) = self.read_dev(ca.disk) {
                    let rd = dag.add_node(NodeOp::DiskRead {
                        disk: dev,
                        lba: ca.lba,
                        dst: Target::Window(window),
                    }, self.params(sa.ru));
                    leaves.push(rd);
                } else {
                    let xor = self.degraded_read_region(&mut dag, sa,
                        ca.disk, ca.lba, ca.byte_len(),
                        Target::Window(window))?;
                    leaves.push(xor);
                }
            }
        }
        debug_assert_eq!(wbuf.len(), 0, "buffer length != mapped extent");
        let term = dag.add_node(NodeOp::Terminate, self.params(0));
        for l in leaves.into_iter() {
            dag.add_edge(l, term);
        }
        Ok(dag)
    }

    /// Recover `len` bytes of the extent at `lba` on dead column `col` by
    /// XORing the same extent from every other member.  Returns the
    /// recovery node.
    fn degraded_read_region(
        &self,
        dag: &mut Dag,
        sa: &StripeAccess,
        col: DiskIdx,
        lba: LbaT,
        len: usize,
        dst: Target) -> Result<NodeId>
    {
        let mut srcs = Vec::new();
        let mut reads = Vec::new();
        for d in 0..self.ndisks() {
            if d == col {
                continue;
            }
            let dev = self.read_dev(d).ok_or(Error::ENOTRECOVERABLE)?;
            let sb = dag.add_buf(len);
            let rd = dag.add_node(NodeOp::DiskRead {
                disk: dev,
                lba,
                dst: Target::Scratch(sb),
            }, self.params(sa.ru));
            srcs.push(Operand::Scratch(sb));
            reads.push(rd);
        }
        let xor = dag.add_node(NodeOp::XorRecovery { srcs, dst },
                               self.params(sa.ru));
        for r in reads.into_iter() {
            dag.add_edge(r, xor);
        }
        Ok(xor)
    }

    /// Compile a write access.  `buf` is the caller's data, exactly as long
    /// as the mapped extent.
    ///
    /// Fails with [`Error::EAGAIN`] if
    /// [`needs_promotion`](Self::needs_promotion) holds; the caller is
    /// expected to have checked.
    pub fn write(&self, asm: &AccessStripeMap, buf: &IoVec) -> Result<Dag> {
        let mut dag = Dag::new();
        let src = dag.add_node(NodeOp::Null, self.params(0));
        let mut leaves = Vec::new();
        for sa in asm.stripes.iter() {
            if sa.parity.is_none() {
                self.mirror_write_stripe(&mut dag, src, sa, buf,
                                         &mut leaves)?;
            } else if sa.full {
                self.full_stripe_write(&mut dag, src, sa, buf,
                                       &mut leaves)?;
            } else {
                self.rmw_write_stripe(&mut dag, src, sa, buf,
                                      &mut leaves)?;
            }
        }
        let term = dag.add_node(NodeOp::Terminate, self.params(0));
        for l in leaves.into_iter() {
            dag.add_edge(l, term);
        }
        Ok(dag)
    }

    fn mirror_write_stripe(
        &self,
        dag: &mut Dag,
        src: NodeId,
        sa: &StripeAccess,
        buf: &IoVec,
        leaves: &mut Vec<NodeId>) -> Result<()>
    {
        for ca in sa.chunks.iter() {
            let new = buf.slice(ca.buf_off, ca.buf_off + ca.byte_len());
            let mut wrote = false;
            for col in 0..self.ndisks() {
                for dev in self.write_devs(col).into_iter() {
                    let wr = dag.add_node(NodeOp::DiskWrite {
                        disk: dev,
                        lba: ca.lba,
                        src: Operand::Ready(new.clone()),
                        old: None,
                    }, self.params(sa.ru));
                    dag.add_edge(src, wr);
                    leaves.push(wr);
                    wrote = true;
                }
            }
            if !wrote {
                return Err(Error::ENOTRECOVERABLE);
            }
        }
        Ok(())
    }

    fn full_stripe_write(
        &self,
        dag: &mut Dag,
        src: NodeId,
        sa: &StripeAccess,
        buf: &IoVec,
        leaves: &mut Vec<NodeId>) -> Result<()>
    {
        let p = sa.parity.unwrap();
        let pdevs = self.write_devs(p.disk);
        let parity_sink = !pdevs.is_empty() || self.funcs.journal_parity;

        let mut srcs = Vec::with_capacity(sa.chunks.len());
        for ca in sa.chunks.iter() {
            let new = buf.slice(ca.buf_off, ca.buf_off + ca.byte_len());
            srcs.push(Operand::Ready(new.clone()));
            let devs = self.write_devs(ca.disk);
            if devs.is_empty() && !parity_sink {
                // Nowhere to put this column's data, not even implicitly
                return Err(Error::ENOTRECOVERABLE);
            }
            for dev in devs.into_iter() {
                let wr = dag.add_node(NodeOp::DiskWrite {
                    disk: dev,
                    lba: ca.lba,
                    src: Operand::Ready(new.clone()),
                    old: None,
                }, self.params(sa.ru));
                dag.add_edge(src, wr);
                leaves.push(wr);
            }
        }

        if parity_sink {
            let chunk_bytes =
                self.layout.chunk_lbas() as usize * BYTES_PER_LBA;
            let pbuf = dag.add_buf(chunk_bytes);
            let xor = dag.add_node(NodeOp::XorSimple { srcs, dst: pbuf },
                                   self.params(sa.ru));
            dag.add_edge(src, xor);
            let mut prev = xor;
            if self.funcs.journal_parity {
                let pl = dag.add_node(NodeOp::ParityLogOverwrite {
                    stripe: sa.stripe,
                    image: Operand::Scratch(pbuf),
                }, self.params(sa.ru));
                dag.add_edge(prev, pl);
                prev = pl;
            }
            if pdevs.is_empty() {
                leaves.push(prev);
            }
            for dev in pdevs.into_iter() {
                let wp = dag.add_node(NodeOp::DiskWrite {
                    disk: dev,
                    lba: p.lba,
                    src: Operand::Scratch(pbuf),
                    old: None,
                }, self.params(sa.ru));
                dag.add_edge(prev, wp);
                leaves.push(wp);
            }
        }
        Ok(())
    }

    fn rmw_write_stripe(
        &self,
        dag: &mut Dag,
        src: NodeId,
        sa: &StripeAccess,
        buf: &IoVec,
        leaves: &mut Vec<NodeId>) -> Result<()>
    {
        if !self.rmw_possible(sa) {
            return Err(Error::EAGAIN);
        }
        let p = sa.parity.unwrap();
        let pread = self.read_dev(p.disk);
        if pread.is_none() {
            // Parity is gone and nothing wants a new image.  Just write the
            // data, undoably.
            return self.data_only_write(dag, src, sa, buf, leaves);
        }
        let pread = pread.unwrap();
        let chunk_bytes = self.layout.chunk_lbas() as usize * BYTES_PER_LBA;
        let chunk_start = self.layout.chunk_start(sa.stripe);

        let p_old = dag.add_buf(chunk_bytes);
        let p_new = dag.add_buf(chunk_bytes);
        let rp = dag.add_node(NodeOp::DiskRead {
            disk: pread,
            lba: p.lba,
            dst: Target::Scratch(p_old),
        }, self.params(sa.ru).locking());
        dag.add_edge(src, rp);
        // Seed the new image from the old one
        let copy = dag.add_node(NodeOp::XorSimple {
            srcs: vec![Operand::Scratch(p_old)],
            dst: p_new,
        }, self.params(sa.ru));
        dag.add_edge(rp, copy);

        let mut acc_prev = copy;
        for ca in sa.chunks.iter() {
            let new = buf.slice(ca.buf_off, ca.buf_off + ca.byte_len());
            let rdev = self.read_dev(ca.disk).unwrap();
            let old = dag.add_buf(ca.byte_len());
            let rd = dag.add_node(NodeOp::DiskRead {
                disk: rdev,
                lba: ca.lba,
                dst: Target::Scratch(old),
            }, self.params(sa.ru).locking());
            dag.add_edge(src, rd);

            // delta = old ^ new, applied at the region's offset within the
            // parity chunk.  The accumulations are chained, not parallel,
            // because they share the new image buffer.
            let dst_off = (ca.lba - chunk_start) as usize * BYTES_PER_LBA;
            let acc = dag.add_node(NodeOp::XorAccumulate {
                srcs: vec![
                    Operand::Scratch(old),
                    Operand::Ready(new.clone()),
                ],
                dst: p_new,
                dst_off,
            }, self.params(sa.ru));
            dag.add_edge(rd, acc);
            dag.add_edge(acc_prev, acc);
            acc_prev = acc;

            for dev in self.write_devs(ca.disk).into_iter() {
                let mut params = self.params(sa.ru);
                if dev == rdev {
                    params = params.unlocking();
                }
                let wr = dag.add_node(NodeOp::DiskWrite {
                    disk: dev,
                    lba: ca.lba,
                    src: Operand::Ready(new.clone()),
                    old: if dev == rdev {
                        Some(Operand::Scratch(old))
                    } else {
                        None
                    },
                }, params);
                dag.add_edge(rd, wr);
                leaves.push(wr);
            }
        }

        let mut prev = acc_prev;
        if self.funcs.journal_parity {
            let pl = dag.add_node(NodeOp::ParityLogOverwrite {
                stripe: sa.stripe,
                image: Operand::Scratch(p_new),
            }, self.params(sa.ru));
            dag.add_edge(prev, pl);
            prev = pl;
        }
        let pdevs = self.write_devs(p.disk);
        if pdevs.is_empty() {
            leaves.push(prev);
        }
        for dev in pdevs.into_iter() {
            let mut params = self.params(sa.ru);
            if dev == pread {
                params = params.unlocking();
            }
            let wp = dag.add_node(NodeOp::DiskWrite {
                disk: dev,
                lba: p.lba,
                src: Operand::Scratch(p_new),
                old: Some(Operand::Scratch(p_old)),
            }, params);
            dag.add_edge(prev, wp);
            leaves.push(wp);
        }
        Ok(())
    }

    /// Partial write with no parity to maintain.
    fn data_only_write(
        &self,
        dag: &mut Dag,
        src: NodeId,
        sa: &StripeAccess,
        buf: &IoVec,
        leaves: &mut Vec<NodeId>) -> Result<()>
    {
        for ca in sa.chunks.iter() {
            let new = buf.slice(ca.buf_off, ca.buf_off + ca.byte_len());
            let devs = self.write_devs(ca.disk);
            if devs.is_empty() {
                return Err(Error::ENOTRECOVERABLE);
            }
            for dev in devs.into_iter() {
                let old = dag.add_buf(ca.byte_len());
                let rd = dag.add_node(NodeOp::DiskRead {
                    disk: dev,
                    lba: ca.lba,
                    dst: Target::Scratch(old),
                }, self.params(sa.ru));
                dag.add_edge(src, rd);
                let wr = dag.add_node(NodeOp::DiskWrite {
                    disk: dev,
                    lba: ca.lba,
                    src: Operand::Ready(new.clone()),
                    old: Some(Operand::Scratch(old)),
                }, self.params(sa.ru));
                dag.add_edge(rd, wr);
                leaves.push(wr);
            }
        }
        Ok(())
    }

    /// Compile the recovery of `stripe`'s chunk on dead column `col` into
    /// `dst`, a caller-owned chunk-sized buffer.
    ///
    /// Works for data and parity chunks alike, since both are the XOR of
    /// the stripe's other chunks.  Writing the image somewhere is the
    /// caller's business; reconstruction wants the two phases separate.
    pub fn rebuild_image(&self, stripe: u64, col: DiskIdx, window: IoVecMut)
        -> Result<Dag>
    {
        let mut dag = Dag::new();
        let chunk_bytes = self.layout.chunk_lbas() as usize * BYTES_PER_LBA;
        let lba = self.layout.chunk_start(stripe);
        let ru = stripe as RuT;
        debug_assert_eq!(window.len(), chunk_bytes);

        let fill = if self.layout.mirrored() {
            let dev = (0..self.ndisks())
                .filter(|c| *c != col)
                .find_map(|c| self.read_dev(c))
                .ok_or(Error::ENOTRECOVERABLE)?;
            dag.add_node(NodeOp::DiskRead {
                disk: dev,
                lba,
                dst: Target::Window(window),
            }, NodeParams::new(self.priority, ru))
        } else {
            let mut srcs = Vec::new();
            let mut reads = Vec::new();
            for d in 0..self.ndisks() {
                if d == col {
                    continue;
                }
                let dev = self.read_dev(d).ok_or(Error::ENOTRECOVERABLE)?;
                let sb = dag.add_buf(chunk_bytes);
                let rd = dag.add_node(NodeOp::DiskRead {
                    disk: dev,
                    lba,
                    dst: Target::Scratch(sb),
                }, NodeParams::new(self.priority, ru));
                srcs.push(Operand::Scratch(sb));
                reads.push(rd);
            }
            let xor = dag.add_node(NodeOp::XorRecovery {
                srcs,
                dst: Target::Window(window),
            }, NodeParams::new(self.priority, ru));
            for r in reads.into_iter() {
                dag.add_edge(r, xor);
            }
            xor
        };
        let term = dag.add_node(NodeOp::Terminate,
                                NodeParams::new(self.priority, ru));
        dag.add_edge(fill, term);
        Ok(dag)
    }

    /// Compile the write phase of one recovery unit's rebuild: put the
    /// recovered `image` at `stripe`'s chunk position on `spare_dev`.
    pub fn rebuild_write(&self, stripe: u64, spare_dev: DiskIdx,
                         image: IoVec) -> Result<Dag>
    {
        let mut dag = Dag::new();
        let lba = self.layout.chunk_start(stripe);
        let ru = stripe as RuT;
        let wr = dag.add_node(NodeOp::DiskWrite {
            disk: spare_dev,
            lba,
            src: Operand::Ready(image),
            old: None,
        }, NodeParams::new(self.priority, ru));
        let term = dag.add_node(NodeOp::Terminate,
                                NodeParams::new(self.priority, ru));
        dag.add_edge(wr, term);
        Ok(dag)
    }
}

// LCOV_EXCL_STOP
