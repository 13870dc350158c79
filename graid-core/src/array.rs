// vim: tw=80
//! The array orchestrator.
//!
//! A [`RaidArray`] owns everything the other modules only borrow: the disk
//! descriptor set, the per-disk locks, the parity journal, and the one
//! in-progress reconstruction.  User I/O enters here as an [`AccessDesc`]
//! plus a buffer, gets mapped onto stripes, compiled into graphs, and
//! executed; administrative operations (failing a disk, managing spares,
//! rebuilding) mutate the descriptor set under the array's lock.

use std::{
    collections::VecDeque,
    num::NonZeroU8,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use divbuf::DivBufShared;
use futures::{Future, future};
use tracing::{error, info, warn};

use crate::{
    access::{AccessDesc, AccessState, IoType},
    asm::{AccessStripeMap, Layout},
    blockdev::BlockDev,
    config::ArrayConfig,
    dag::{
        build::DagBuilder,
        exec::{self, DiskLock},
        nodefn::{FuncTable, ParityLog, RECOVERY_UNIT_MAX},
    },
    disk::{self, DiskLabel, DiskSet, DiskStatus},
    label::LABEL_LBAS,
    recon::{self, ReconCtx, ReconDesc, TickSource, WallClock},
    types::*,
    util::*,
};

/// Scheduling priority of foreground I/O nodes.
pub const ACCESS_PRIORITY: u8 = 4;

/// Overall array health, rolled up from the member statuses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Health {
    /// Every member is either healthy or fully covered by a spare.
    Online,
    /// Operating with this many members neither present nor spared.
    Degraded(NonZeroU8),
    /// A reconstruction is in progress.
    Rebuilding,
    /// Redundancy was exceeded; writes are refused.
    Faulted,
}

/// A point-in-time report of the array's state.
#[derive(Clone, Debug)]
pub struct ArrayStatus {
    pub name: String,
    pub uuid: Uuid,
    pub health: Health,
    pub capacity_lbas: LbaT,
    /// (name, status) per member, in column order.
    pub members: Vec<(String, DiskStatus)>,
    /// (name, status) per hot spare, in pool order.
    pub spares: Vec<(String, DiskStatus)>,
    /// (recovery units on the spare, total) of the current rebuild.
    pub recon_progress: Option<(usize, usize)>,
}

/// The buffer side of a submitted access.
///
/// For reads the window is carved up at build time, so the submitter may
/// retain its `DivBufShared` and collect the data once the access
/// completes.
pub enum AccessBuf {
    Read(IoVecMut),
    Write(IoVec),
}

type BoxRebuildFut = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// One configured RAID array.
pub struct RaidArray {
    uuid: Uuid,
    cfg: ArrayConfig,
    layout: Layout,
    funcs: FuncTable,
    /// Usable data LBAs per member, the minimum across all of them.
    data_lbas: LbaT,
    disks: RwLock<DiskSet>,
    /// One lock per device, members first, spares following.  Grows with
    /// the spare pool.
    locks: Mutex<Vec<DiskLock>>,
    parity_log: Option<Arc<Mutex<ParityLog>>>,
    /// Set once redundancy is exceeded.  Never cleared.
    fatal: AtomicBool,
    /// The one reconstruction, current or most recent.
    recon: Mutex<Option<Arc<ReconDesc>>>,
    inflight: AtomicUsize,
    ticks: Arc<dyn TickSource>,
}

impl RaidArray {
    /// Write fresh labels to every device of a new array.
    ///
    /// The array does not exist until [`configure`](Self::configure) reads
    /// the labels back.  Members all advertise the same usable size, the
    /// smallest one present; spares advertise their own, which must not be
    /// smaller.
    pub async fn format(
        cfg: &ArrayConfig,
        members: &[Arc<dyn BlockDev>],
        spares: &[Arc<dyn BlockDev>]) -> Result<Uuid>
    {
        cfg.validate()?;
        if members.len() != cfg.ndisks as usize {
            return Err(Error::EINVAL);
        }
        let smallest = members.iter().map(|d| d.size()).min().unwrap();
        if smallest <= LABEL_LBAS {
            return Err(Error::EINVAL);
        }
        let data_lbas = smallest - LABEL_LBAS;
        let array = Uuid::new_v4();
        for (col, dev) in members.iter().enumerate() {
            let label = DiskLabel {
                array,
                disk: Uuid::new_v4(),
                ndisks: cfg.ndisks,
                col: col as DiskIdx,
                spare: false,
                data_lbas,
                chunk_lbas: cfg.chunk_lbas,
            };
            disk::write_label(dev, &label).await?;
        }
        for (scol, dev) in spares.iter().enumerate() {
            if dev.size() < data_lbas + LABEL_LBAS {
                warn!(scol, "spare is smaller than the members");
                return Err(Error::EINVAL);
            }
            let label = DiskLabel {
                array,
                disk: Uuid::new_v4(),
                ndisks: cfg.ndisks,
                col: scol as DiskIdx,
                spare: true,
                data_lbas: dev.size() - LABEL_LBAS,
                chunk_lbas: cfg.chunk_lbas,
            };
            disk::write_label(dev, &label).await?;
        }
        info!(array = %array, name = %cfg.name, "formatted array");
        Ok(array)
    }

    /// Assemble an array from labeled devices.
    pub async fn configure(
        cfg: ArrayConfig,
        members: Vec<(String, Arc<dyn BlockDev>)>,
        spares: Vec<(String, Arc<dyn BlockDev>)>) -> Result<RaidArray>
    {
        let disks = DiskSet::configure(&cfg, members, spares).await?;
        let data_lbas = (0..disks.ndisks())
            .map(|col| disks.disk(col).data_lbas)
            .min()
            .unwrap();
        let nlocks = disks.ndisks() as usize + disks.nspares();
        let locks = (0..nlocks)
            .map(|_| Arc::new(tokio::sync::Mutex::new(())))
            .collect();
        let parity_log = if cfg.journal_parity {
            Some(Arc::new(Mutex::new(ParityLog::new())))
        } else {
            None
        };
        Ok(RaidArray {
            uuid: disks.array_uuid(),
            layout: Layout::new(&cfg),
            funcs: FuncTable::configure(&cfg),
            cfg,
            data_lbas,
            disks: RwLock::new(disks),
            locks: Mutex::new(locks),
            parity_log,
            fatal: AtomicBool::new(false),
            recon: Mutex::new(None),
            inflight: AtomicUsize::new(0),
            ticks: Arc::new(WallClock::new()),
        })
    }

    /// Replace the reconstruction tick source.  Only sensible before any
    /// rebuild starts.
    pub fn set_tick_source(&mut self, ticks: Arc<dyn TickSource>) {
        self.ticks = ticks;
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Usable capacity in LBAs.
    ///
    /// Whole stripes only, and no more stripes than the recovery-unit
    /// field can number.
    pub fn capacity(&self) -> LbaT {
        let stripes = (self.data_lbas / self.layout.chunk_lbas())
            .min(LbaT::from(RECOVERY_UNIT_MAX) + 1);
        stripes * self.layout.stripe_lbas()
    }

    /// User accesses currently somewhere in their lifecycle.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// The current (or most recent) reconstruction, if any.
    pub fn recon(&self) -> Option<Arc<ReconDesc>> {
        self.recon.lock().unwrap().clone()
    }

    pub fn health(&self) -> Health {
        if self.fatal.load(Ordering::Acquire) {
            return Health::Faulted;
        }
        let ds = self.disks.read().unwrap();
        let mut missing = 0u8;
        for col in 0..ds.ndisks() {
            match ds.status(col) {
                DiskStatus::Reconstructing => return Health::Rebuilding,
                // Covered members are not a degradation
                s if s.is_dead() && !s.is_covered() => missing += 1,
                _ => {},
            }
        }
        match NonZeroU8::new(missing) {
            Some(n) => Health::Degraded(n),
            None => Health::Online,
        }
    }

    pub fn status(&self) -> ArrayStatus {
        let health = self.health();
        let ds = self.disks.read().unwrap();
        let members = (0..ds.ndisks())
            .map(|col| (ds.disk(col).name.clone(), ds.status(col)))
            .collect();
        let spares = (0..ds.nspares() as DiskIdx)
            .map(|scol| {
                (ds.spare(scol).name.clone(), ds.spare(scol).status())
            })
            .collect();
        let recon_progress = self.recon.lock().unwrap().as_ref()
            .filter(|rd| rd.running())
            .map(|rd| rd.progress());
        ArrayStatus {
            name: self.cfg.name.clone(),
            uuid: self.uuid,
            health,
            capacity_lbas: self.capacity(),
            members,
            spares,
            recon_progress,
        }
    }

    /// Record the failure of member `col`.
    ///
    /// Returns `Error::ENOTRECOVERABLE` when the failure exhausts the
    /// array's redundancy.  The array then refuses further writes, and any
    /// running reconstruction aborts: there is nothing left to rebuild
    /// from.
    pub fn fault(&self, col: DiskIdx) -> Result<()> {
        let r = self.disks.write().unwrap().fail(col);
        if r == Err(Error::ENOTRECOVERABLE) {
            self.fatal.store(true, Ordering::Release);
            if let Some(rd) = self.recon.lock().unwrap().as_ref() {
                rd.second_failure();
            }
            error!(col, "redundancy exhausted; array is faulted");
        }
        r
    }

    /// Read `buf.len()` bytes starting at `lba`, blocking the task until
    /// the access completes.
    pub async fn read_at(&self, buf: IoVecMut, lba: LbaT) -> Result<()> {
        let nlbas = (buf.len() / BYTES_PER_LBA) as LbaT;
        let ad = Arc::new(AccessDesc::new(IoType::Read, lba, nlbas));
        self.run_access(&ad, AccessBuf::Read(buf)).await;
        ad.result()
    }

    /// Write `buf` starting at `lba`, blocking the task until the access
    /// completes.
    pub async fn write_at(&self, buf: IoVec, lba: LbaT) -> Result<()> {
        let nlbas = (buf.len() / BYTES_PER_LBA) as LbaT;
        let ad = Arc::new(AccessDesc::new(IoType::Write, lba, nlbas));
        self.run_access(&ad, AccessBuf::Write(buf)).await;
        ad.result()
    }

    /// Submit an access without waiting for it.  Completion is reported
    /// through the descriptor: its callback, or [`AccessDesc::wait`].
    pub fn submit(self: &Arc<Self>, ad: Arc<AccessDesc>, buf: AccessBuf) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_access(&ad, buf).await;
        });
    }

    /// Submit an access from a non-async thread and block until it
    /// completes.  `handle` names the runtime that will execute it.
    pub fn submit_blocking(
        self: &Arc<Self>,
        handle: &tokio::runtime::Handle,
        ad: Arc<AccessDesc>,
        buf: AccessBuf) -> Result<()>
    {
        let this = self.clone();
        let ad2 = ad.clone();
        handle.spawn(async move {
            this.run_access(&ad2, buf).await;
        });
        ad.wait()
    }

    /// Walk one access through its whole lifecycle.
    async fn run_access(&self, ad: &Arc<AccessDesc>, buf: AccessBuf) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
        self.do_access(ad, buf).await;
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        debug_assert_eq!(ad.state(), AccessState::Done);
    }

    async fn do_access(&self, ad: &Arc<AccessDesc>, buf: AccessBuf) {
        let nlbas = ad.nlbas();
        let buf_len = match &buf {
            AccessBuf::Read(b) => b.len(),
            AccessBuf::Write(b) => b.len(),
        };
        if buf_len != nlbas as usize * BYTES_PER_LBA {
            ad.abort(Error::EINVAL);
            return;
        }
        if ad.lba() + nlbas > self.capacity() {
            ad.abort(Error::ENXIO);
            return;
        }
        if ad.io() == IoType::Write && self.fatal.load(Ordering::Acquire) {
            ad.abort(Error::ENOTRECOVERABLE);
            return;
        }
        let asm = self.layout.map(ad.lba(), nlbas);
        ad.advance();    // Build

        let (status, spare_of, devs) = self.io_snapshot();
        let locks = self.locks.lock().unwrap().clone();
        let builder = DagBuilder {
            layout: &self.layout,
            status: &status,
            spare_of: &spare_of,
            funcs: self.funcs,
            priority: ACCESS_PRIORITY,
        };

        match buf {
            AccessBuf::Read(wbuf) => {
                let dag = match builder.read(&asm, wbuf) {
                    Ok(dag) => dag,
                    Err(e) => {
                        ad.abort(e);
                        return;
                    },
                };
                ad.advance();    // Exec
                ad.add_pending(1);
                let r = exec::execute(dag, devs, self.funcs,
                                      self.parity_log.clone(), &locks).await;
                ad.advance();    // Cleanup
                ad.dag_done(r);
            },
            AccessBuf::Write(wbuf) => {
                let promote = builder.needs_promotion(&asm);
                // Writes bound for the rebuild target must not interleave
                // with the coordinator's recheck and spare write.  Mark
                // their recovery units before dispatch; a failure unmarks
                // them.
                let recon = self.recon.lock().unwrap().clone()
                    .filter(|rd| rd.running());
                let mut marked = Vec::new();
                let _gate = match &recon {
                    Some(rd) => {
                        let gate = rd.write_gate().await;
                        let mirrored = self.layout.mirrored();
                        for sa in asm.stripes.iter() {
                            if mirrored || promote || sa.full {
                                rd.note_foreground_write(sa.ru);
                                marked.push(sa.ru);
                            }
                        }
                        Some(gate)
                    },
                    None => None,
                };
                let dag = if promote {
                    None
                } else {
                    match builder.write(&asm, &wbuf) {
                        Ok(dag) => Some(dag),
                        Err(e) => {
                            if let Some(rd) = &recon {
                                for ru in marked.iter().copied() {
                                    rd.foreground_write_failed(ru);
                                }
                            }
                            ad.abort(e);
                            return;
                        },
                    }
                };
                ad.advance();    // Exec
                ad.add_pending(1);
                let r = match dag {
                    Some(dag) => {
                        exec::execute(dag, devs, self.funcs,
                                      self.parity_log.clone(), &locks).await
                    },
                    None => {
                        self.promoted_write(&builder, &devs, &locks,
                                            ad.lba(), &wbuf).await
                    },
                };
                ad.advance();    // Cleanup
                match &r {
                    Ok(()) => self.retire_parity(&asm, &status, &spare_of),
                    Err(_) => {
                        if let Some(rd) = &recon {
                            for ru in marked.iter().copied() {
                                rd.foreground_write_failed(ru);
                            }
                        }
                    },
                }
                ad.dag_done(r);
            },
        }
    }

    /// Handle a partial write that read-modify-write can't: widen it to
    /// stripe boundaries, reconstruct the stripes' current contents,
    /// overlay the new data, and write the result as full stripes.
    ///
    /// The two graphs do not run under a common lock, so a concurrent
    /// write to the same stripes can interleave between them.
    async fn promoted_write(
        &self,
        builder: &DagBuilder<'_>,
        devs: &[Arc<dyn BlockDev>],
        locks: &[DiskLock],
        lba: LbaT,
        buf: &IoVec) -> Result<()>
    {
        let nlbas = (buf.len() / BYTES_PER_LBA) as LbaT;
        let stripe_lbas = self.layout.stripe_lbas();
        let start = lba / stripe_lbas * stripe_lbas;
        let end = div_roundup(lba + nlbas, stripe_lbas) * stripe_lbas;
        let full_asm = self.layout.map(start, end - start);
        info!(lba, nlbas, start, end,
              "promoting partial write to full stripes");

        let scratch = DivBufShared::from(
            vec![0u8; (end - start) as usize * BYTES_PER_LBA]);
        let dag = builder.read(&full_asm, scratch.try_mut().unwrap())?;
        exec::execute(dag, devs.to_vec(), self.funcs,
                      self.parity_log.clone(), locks).await?;
        {
            // The read graph has completed, so its windows are gone
            let mut image = scratch.try_mut().unwrap();
            let off = (lba - start) as usize * BYTES_PER_LBA;
            image[off..off + buf.len()].copy_from_slice(&buf[..]);
        }
        let image = scratch.try_const().unwrap();
        let dag = builder.write(&full_asm, &image)?;
        exec::execute(dag, devs.to_vec(), self.funcs,
                      self.parity_log.clone(), locks).await?;
        Ok(())
    }

    /// Retire journal entries whose parity image just reached a real
    /// device.  The journal keeps only images with no home disk.
    fn retire_parity(
        &self,
        asm: &AccessStripeMap,
        status: &[DiskStatus],
        spare_of: &[Option<DiskIdx>])
    {
        let Some(plog) = &self.parity_log else {
            return;
        };
        let mut plog = plog.lock().unwrap();
        for sa in asm.stripes.iter() {
            let Some(p) = sa.parity else {
                continue;
            };
            let st = status[p.disk as usize];
            let landed = !st.is_dead() ||
                (matches!(st, DiskStatus::Spared |
                              DiskStatus::Reconstructing) &&
                 spare_of[p.disk as usize].is_some());
            if landed {
                plog.retire(sa.stripe);
            }
        }
    }

    /// Statuses, spare assignments, and device handles, captured together
    /// under the disk-set lock.
    fn io_snapshot(&self)
        -> (Vec<DiskStatus>, Vec<Option<DiskIdx>>, Vec<Arc<dyn BlockDev>>)
    {
        let ds = self.disks.read().unwrap();
        let status = (0..ds.ndisks()).map(|col| ds.status(col)).collect();
        let spare_of = (0..ds.ndisks())
            .map(|col| ds.disk(col).spare_to())
            .collect();
        (status, spare_of, ds.dev_snapshot())
    }

    /// Start rebuilding failed member `col` onto an idle hot spare.
    ///
    /// Returns the reconstruction descriptor, for progress and dirty
    /// tracking, and the future that drives the rebuild; the caller spawns
    /// or awaits the latter.  On success the spare is incorporated and
    /// takes over the member's reads; on failure the member reverts to
    /// `Failed`.
    pub fn rebuild(self: &Arc<Self>, col: DiskIdx)
        -> Result<(Arc<ReconDesc>, BoxRebuildFut)>
    {
        if self.fatal.load(Ordering::Acquire) {
            return Err(Error::ENOTRECOVERABLE);
        }
        let (desc, ctx) = {
            let mut ds = self.disks.write().unwrap();
            let scol = ds.select_spare().ok_or(Error::ENODEV)?;
            ds.begin_reconstruction(col, scol)?;
            let nrus = (self.capacity() / self.layout.stripe_lbas()) as RuT;
            let desc = Arc::new(ReconDesc::new(
                col, scol, nrus, self.cfg.max_recon_exec_ticks));
            let ctx = ReconCtx {
                layout: self.layout,
                status: (0..ds.ndisks()).map(|c| ds.status(c)).collect(),
                spare_of: (0..ds.ndisks())
                    .map(|c| ds.disk(c).spare_to())
                    .collect(),
                funcs: self.funcs,
                devs: ds.dev_snapshot(),
                locks: self.locks.lock().unwrap().clone(),
            };
            (desc, ctx)
        };
        *self.recon.lock().unwrap() = Some(desc.clone());
        let this = self.clone();
        let rdesc = desc.clone();
        let fut = Box::pin(async move {
            let r = recon::run(&rdesc, &ctx, this.ticks.as_ref()).await;
            let mut ds = this.disks.write().unwrap();
            match r {
                Ok(()) => {
                    ds.incorporate_hot_spare(rdesc.col(), rdesc.spare_col())
                },
                Err(e) => {
                    ds.abort_reconstruction(rdesc.col());
                    Err(e)
                },
            }
        });
        Ok((desc, fut))
    }

    /// Label a fresh device and add it to the hot-spare pool.
    pub async fn add_hot_spare(&self, name: String, dev: Arc<dyn BlockDev>)
        -> Result<DiskIdx>
    {
        if dev.size() < self.data_lbas + LABEL_LBAS {
            warn!(name = %name, "spare is smaller than the members");
            return Err(Error::EINVAL);
        }
        let label = self.disks.read().unwrap().spare_label(dev.size());
        disk::write_label(&dev, &label).await?;
        let scol = self.disks.write().unwrap()
            .add_hot_spare(name, dev, &label)?;
        self.locks.lock().unwrap()
            .push(Arc::new(tokio::sync::Mutex::new(())));
        Ok(scol)
    }

    /// Remove an idle spare from the pool.
    pub fn remove_hot_spare(&self, uuid: Uuid) -> Result<()> {
        let mut ds = self.disks.write().unwrap();
        let scol = ds.remove_hot_spare(uuid)?;
        let idx = ds.ndisks() as usize + scol as usize;
        self.locks.lock().unwrap().remove(idx);
        Ok(())
    }

    /// Promote spare `scol` to carry member `col`'s data without a
    /// rebuild, for data already copied by other means.
    pub fn incorporate_hot_spare(&self, col: DiskIdx, scol: DiskIdx)
        -> Result<()>
    {
        self.disks.write().unwrap().incorporate_hot_spare(col, scol)
    }

    /// Detach a dead member or an idle spare.
    pub fn delete_component(&self, uuid: Uuid) -> Result<()> {
        self.disks.write().unwrap().delete_component(uuid)
    }

    /// Write every journaled parity image to its home disk and retire it.
    ///
    /// Images whose parity column is dead with no spare stay journaled.
    pub async fn flush_parity_log(&self) -> Result<()> {
        let Some(plog) = &self.parity_log else {
            return Ok(());
        };
        let mut entries: VecDeque<_> = plog.lock().unwrap().drain().into();
        let (status, spare_of, devs) = self.io_snapshot();
        let ndisks = status.len() as DiskIdx;
        while let Some((stripe, image)) = entries.pop_front() {
            let pcol = self.layout.parity_disk(stripe);
            let dev = if !status[pcol as usize].is_dead() {
                Some(pcol)
            } else {
                spare_of[pcol as usize].map(|scol| ndisks + scol)
            };
            let Some(dev) = dev else {
                // No home for it yet; keep journaling
                plog.lock().unwrap().restore(stripe, Some(image));
                continue;
            };
            let dbs = DivBufShared::from(image);
            let r = devs[dev as usize]
                .write_at(dbs.try_const().unwrap(),
                          self.layout.chunk_start(stripe))
                .await;
            if let Err(e) = r {
                warn!(stripe, error = %e, "parity log flush failed");
                // Put back the failed image and everything not yet
                // attempted
                let image = Vec::from(&dbs.try_const().unwrap()[..]);
                let mut pl = plog.lock().unwrap();
                pl.restore(stripe, Some(image));
                for (stripe, image) in entries.drain(..) {
                    pl.restore(stripe, Some(image));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Flush every device's write cache.
    pub async fn sync_all(&self) -> Result<()> {
        let devs = self.disks.read().unwrap().dev_snapshot();
        future::try_join_all(devs.iter().map(|d| d.sync_all())).await
            .map(drop)
    }
}

// LCOV_EXCL_STOP
