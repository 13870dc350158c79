// vim: tw=80
//! GRAID disk descriptor layer
//!
//! The single source of truth for per-member-disk state: whether a direct
//! I/O to a given disk is legal, or must be redirected to a spare or
//! synthesized from parity.

use std::sync::Arc;

use divbuf::DivBufShared;
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    blockdev::BlockDev,
    config::ArrayConfig,
    label::*,
    types::*,
    util::*,
};

/// Administrative status of one member disk or hot spare.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiskStatus {
    /// Healthy array member
    Optimal,
    /// Failed, with no spare assigned yet
    Failed,
    /// Failed; reconstruction onto a spare is in progress
    Reconstructing,
    /// Failed; its data now lives distributed across the other members
    DistSpared,
    /// Failed; its data now lives on a dedicated spare
    Spared,
    /// Standing by in the hot-spare pool
    Spare,
    /// A spare that has been incorporated as a regular member
    UsedSpare,
}

impl DiskStatus {
    /// Is this disk inaccessible for direct reads?
    ///
    /// The four dead states have different administrative meanings, but
    /// callers must treat them identically on the I/O path.
    pub fn is_dead(self) -> bool {
        matches!(self,
            DiskStatus::Failed |
            DiskStatus::Reconstructing |
            DiskStatus::Spared |
            DiskStatus::DistSpared)
    }

    /// Is this dead disk's data nonetheless fully present elsewhere?
    pub fn is_covered(self) -> bool {
        matches!(self, DiskStatus::Spared | DiskStatus::DistSpared)
    }

    /// All seven states, for exhaustive tests.
    pub fn all() -> [DiskStatus; 7] {
        [
            DiskStatus::Optimal,
            DiskStatus::Failed,
            DiskStatus::Reconstructing,
            DiskStatus::DistSpared,
            DiskStatus::Spared,
            DiskStatus::Spare,
            DiskStatus::UsedSpare,
        ]
    }
}

/// The per-disk on-disk label contents.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiskLabel {
    /// Identity of the array this disk belongs to
    pub array: Uuid,
    /// Identity of this disk
    pub disk: Uuid,
    /// Number of regular members in the array
    pub ndisks: i16,
    /// This disk's column, or its index in the spare pool
    pub col: DiskIdx,
    /// Is this a hot spare rather than a regular member?
    pub spare: bool,
    /// Usable data LBAs, not counting the label
    pub data_lbas: LbaT,
    /// Chunk size the array was formatted with
    pub chunk_lbas: LbaT,
}

/// Descriptor for one physical drive: a regular member or a hot spare.
pub struct Disk {
    /// Device name, for diagnostics only
    pub name: String,
    pub uuid: Uuid,
    status: DiskStatus,
    /// If this member's data has been redirected, the spare-pool index now
    /// carrying it.
    spare_to: Option<DiskIdx>,
    /// Usable data LBAs, not counting the label
    pub data_lbas: LbaT,
    /// LBA size in bytes.  Currently always `BYTES_PER_LBA`.
    pub lba_size: usize,
    /// Was this disk discovered by tasting labels rather than listed
    /// explicitly?
    pub auto_configured: bool,
    dev: Arc<dyn BlockDev>,
}

impl Disk {
    pub fn dev(&self) -> &Arc<dyn BlockDev> {
        &self.dev
    }

    pub fn spare_to(&self) -> Option<DiskIdx> {
        self.spare_to
    }

    pub fn status(&self) -> DiskStatus {
        self.status
    }
}

/// Read and validate the label from one device.
pub(crate) async fn read_label(dev: &Arc<dyn BlockDev>) -> Result<DiskLabel> {
    let dbs = DivBufShared::from(vec![0u8; LABEL_SIZE]);
    dev.read_at(dbs.try_mut().unwrap(), 0).await?;
    let raw = dbs.try_const().unwrap()[..].to_vec();
    let reader = LabelReader::new(raw)?;
    reader.deserialize().map_err(|_| Error::EINVAL)
}

/// Write a fresh label to one device.
pub(crate) async fn write_label(dev: &Arc<dyn BlockDev>, label: &DiskLabel)
    -> Result<()>
{
    let sglist = LabelWriter::new().serialize(label)
        .map_err(|_| Error::EINVAL)?;
    dev.writev_at(sglist, 0).await
}

/// The array-wide set of disk descriptors.
///
/// Shared array-wide and mutated only by configuration and by the
/// reconstruction coordinator, under the array's lock.
pub struct DiskSet {
    array_uuid: Uuid,
    chunk_lbas: LbaT,
    /// How many members may die before data is lost.
    redundancy: i16,
    members: Vec<Disk>,
    spares: Vec<Disk>,
}

impl DiskSet {
    /// Parse the configuration plus every device's on-disk label and
    /// populate the descriptor set.
    ///
    /// Any inconsistency (bad or missing label, wrong disk count, size
    /// mismatch, label from a different array) is fatal to array startup:
    /// an error is returned and no partial `DiskSet` remains.
    pub async fn configure(
        cfg: &ArrayConfig,
        member_devs: Vec<(String, Arc<dyn BlockDev>)>,
        spare_devs: Vec<(String, Arc<dyn BlockDev>)>)
        -> Result<DiskSet>
    {
        cfg.validate()?;
        if member_devs.len() != cfg.ndisks as usize {
            warn!(want = cfg.ndisks, have = member_devs.len(),
                  "wrong number of member disks");
            return Err(Error::EINVAL);
        }

        let mut array_uuid = None;
        let mut members = Vec::with_capacity(member_devs.len());
        for (col, (name, dev)) in member_devs.into_iter().enumerate() {
            let label = read_label(&dev).await?;
            Self::check_label(cfg, &mut array_uuid, &label, col as DiskIdx,
                              false, &dev)?;
            members.push(Disk {
                name,
                uuid: label.disk,
                status: DiskStatus::Optimal,
                spare_to: None,
                data_lbas: label.data_lbas,
                lba_size: BYTES_PER_LBA,
                auto_configured: false,
                dev,
            });
        }
        let mut spares = Vec::with_capacity(spare_devs.len());
        for (col, (name, dev)) in spare_devs.into_iter().enumerate() {
            let label = read_label(&dev).await?;
            Self::check_label(cfg, &mut array_uuid, &label, col as DiskIdx,
                              true, &dev)?;
            spares.push(Disk {
                name,
                uuid: label.disk,
                status: DiskStatus::Spare,
                spare_to: None,
                data_lbas: label.data_lbas,
                lba_size: BYTES_PER_LBA,
                auto_configured: false,
                dev,
            });
        }
        // array_uuid is Some by now: ndisks >= 2 was validated above
        let array_uuid = array_uuid.unwrap();
        info!(array = %array_uuid, members = members.len(),
              spares = spares.len(), "configured disk set");
        Ok(DiskSet {
            array_uuid,
            chunk_lbas: cfg.chunk_lbas,
            redundancy: cfg.redundancy,
            members,
            spares,
        })
    }

    fn check_label(
        cfg: &ArrayConfig,
        array_uuid: &mut Option<Uuid>,
        label: &DiskLabel,
        col: DiskIdx,
        spare: bool,
        dev: &Arc<dyn BlockDev>)
        -> Result<()>
    {
        match *array_uuid {
            None => *array_uuid = Some(label.array),
            Some(u) if u == label.array => {},
            Some(_) => {
                warn!(col, "label belongs to a different array");
                return Err(Error::EINVAL);
            }
        }
        if label.ndisks != cfg.ndisks ||
            label.chunk_lbas != cfg.chunk_lbas ||
            label.spare != spare ||
            label.col != col
        {
            warn!(col, "mismatched label");
            return Err(Error::EINVAL);
        }
        if label.data_lbas + LABEL_LBAS > dev.size() {
            warn!(col, "device shrank since it was labeled");
            return Err(Error::EINVAL);
        }
        Ok(())
    }

    pub fn array_uuid(&self) -> Uuid {
        self.array_uuid
    }

    pub fn ndisks(&self) -> i16 {
        self.members.len() as i16
    }

    pub fn nspares(&self) -> usize {
        self.spares.len()
    }

    pub fn disk(&self, col: DiskIdx) -> &Disk {
        &self.members[col as usize]
    }

    pub fn spare(&self, scol: DiskIdx) -> &Disk {
        &self.spares[scol as usize]
    }

    /// Status of one member, the [`DiskStatus::is_dead`] gate for the I/O
    /// path.
    pub fn status(&self, col: DiskIdx) -> DiskStatus {
        self.members[col as usize].status
    }

    pub(crate) fn set_status(&mut self, col: DiskIdx, status: DiskStatus) {
        self.members[col as usize].status = status;
    }

    /// Number of members in any of the dead states.
    pub fn ndead(&self) -> usize {
        self.members.iter().filter(|d| d.status.is_dead()).count()
    }

    /// Number of members whose data survives only through parity.
    ///
    /// Spared members don't count: their data lives whole on a spare, so
    /// they no longer consume redundancy.
    pub fn nexposed(&self) -> usize {
        self.members.iter()
            .filter(|d| d.status.is_dead() && !d.status.is_covered())
            .count()
    }

    /// All member device handles, in column order, followed by all spares.
    /// Node operations index into this snapshot.
    pub(crate) fn dev_snapshot(&self) -> Vec<Arc<dyn BlockDev>> {
        self.members.iter()
            .chain(self.spares.iter())
            .map(|d| d.dev.clone())
            .collect()
    }

    /// Mark a member failed.
    ///
    /// Returns `Error::ENOTRECOVERABLE` if the failure exceeds the array's
    /// redundancy.  The status is still recorded in that case; the caller
    /// owns the array-wide fatal transition.
    pub fn fail(&mut self, col: DiskIdx) -> Result<()> {
        if col < 0 || col as usize >= self.members.len() {
            return Err(Error::EINVAL);
        }
        let already_exposed = self.nexposed();
        let disk = &mut self.members[col as usize];
        if disk.status.is_dead() {
            return Err(Error::EALREADY);
        }
        disk.status = DiskStatus::Failed;
        warn!(col, name = %disk.name, "member disk failed");
        if already_exposed as i16 >= self.redundancy {
            Err(Error::ENOTRECOVERABLE)
        } else {
            Ok(())
        }
    }

    /// Mint the label for the next device to join the spare pool.
    ///
    /// The caller writes it to the device, then registers the device with
    /// [`add_hot_spare`](Self::add_hot_spare).  Kept separate so no lock
    /// need be held across the label write.
    pub fn spare_label(&self, dev_size: LbaT) -> DiskLabel {
        DiskLabel {
            array: self.array_uuid,
            disk: Uuid::new_v4(),
            ndisks: self.ndisks(),
            col: self.spares.len() as DiskIdx,
            spare: true,
            data_lbas: dev_size - LABEL_LBAS,
            chunk_lbas: self.chunk_lbas,
        }
    }

    /// Add a device carrying `label` to the hot-spare pool.
    ///
    /// Fails with `Error::EINVAL` if the label doesn't match the pool slot,
    /// which happens when two additions race.
    pub fn add_hot_spare(
        &mut self,
        name: String,
        dev: Arc<dyn BlockDev>,
        label: &DiskLabel) -> Result<DiskIdx>
    {
        let scol = self.spares.len() as DiskIdx;
        if label.array != self.array_uuid || !label.spare ||
            label.col != scol
        {
            return Err(Error::EINVAL);
        }
        self.spares.push(Disk {
            name,
            uuid: label.disk,
            status: DiskStatus::Spare,
            spare_to: None,
            data_lbas: label.data_lbas,
            lba_size: BYTES_PER_LBA,
            auto_configured: false,
            dev,
        });
        Ok(scol)
    }

    /// Remove an idle spare from the pool.  Returns its pool index so the
    /// caller can retire any per-device state of its own.
    pub fn remove_hot_spare(&mut self, uuid: Uuid) -> Result<DiskIdx> {
        let idx = self.spares.iter().position(|d| d.uuid == uuid)
            .ok_or(Error::ENOENT)?;
        if self.spares[idx].status != DiskStatus::Spare ||
            self.spare_busy(idx as DiskIdx)
        {
            // In use by a rebuild, or already incorporated
            return Err(Error::EBUSY);
        }
        self.spares.remove(idx);
        // Re-number the pool
        for d in self.members.iter_mut() {
            if let Some(s) = d.spare_to {
                debug_assert_ne!(s as usize, idx);
                if s as usize > idx {
                    d.spare_to = Some(s - 1);
                }
            }
        }
        Ok(idx as DiskIdx)
    }

    /// Is this spare referenced by any member's redirection?
    fn spare_busy(&self, scol: DiskIdx) -> bool {
        self.members.iter().any(|d| d.spare_to == Some(scol))
    }

    /// Pick an idle spare for a rebuild, without promoting it.
    pub fn select_spare(&self) -> Option<DiskIdx> {
        self.spares.iter()
            .enumerate()
            .position(|(idx, d)| {
                d.status == DiskStatus::Spare &&
                    !self.spare_busy(idx as DiskIdx)
            })
            .map(|idx| idx as DiskIdx)
    }

    /// Begin rebuilding failed member `col` onto idle spare `scol`.
    ///
    /// The member transitions to `Reconstructing` and starts redirecting
    /// its writes to the spare; the spare itself is not promoted until the
    /// rebuild finishes.
    pub fn begin_reconstruction(&mut self, col: DiskIdx, scol: DiskIdx)
        -> Result<()>
    {
        if col < 0 || col as usize >= self.members.len() ||
            scol < 0 || (scol as usize) >= self.spares.len()
        {
            return Err(Error::EINVAL);
        }
        match self.members[col as usize].status {
            DiskStatus::Failed => {},
            DiskStatus::Reconstructing => return Err(Error::EALREADY),
            _ => return Err(Error::EINVAL),
        }
        if self.spares[scol as usize].status != DiskStatus::Spare ||
            self.spare_busy(scol)
        {
            return Err(Error::EBUSY);
        }
        let disk = &mut self.members[col as usize];
        disk.status = DiskStatus::Reconstructing;
        disk.spare_to = Some(scol);
        info!(col, scol, "reconstruction started");
        Ok(())
    }

    /// Undo [`begin_reconstruction`](Self::begin_reconstruction) after a
    /// failed or aborted rebuild.  The spare may hold a partial image, so
    /// the member reverts to plain `Failed` with no redirection.
    pub fn abort_reconstruction(&mut self, col: DiskIdx) {
        let disk = &mut self.members[col as usize];
        debug_assert_eq!(disk.status, DiskStatus::Reconstructing);
        disk.status = DiskStatus::Failed;
        disk.spare_to = None;
        warn!(col, "reconstruction aborted");
    }

    /// Promote spare `scol` to carry failed member `col`'s data.
    ///
    /// The spare transitions to `UsedSpare` and the failed member's
    /// descriptor is updated to reference it.  Called only after
    /// reconstruction has fully completed.
    pub fn incorporate_hot_spare(&mut self, col: DiskIdx, scol: DiskIdx)
        -> Result<()>
    {
        if col < 0 || col as usize >= self.members.len() ||
            scol < 0 || (scol as usize) >= self.spares.len()
        {
            return Err(Error::EINVAL);
        }
        if !self.members[col as usize].status.is_dead() {
            return Err(Error::EINVAL);
        }
        if self.spares[scol as usize].status == DiskStatus::UsedSpare {
            return Err(Error::EBUSY);
        }
        self.spares[scol as usize].status = DiskStatus::UsedSpare;
        let disk = &mut self.members[col as usize];
        disk.status = DiskStatus::Spared;
        disk.spare_to = Some(scol);
        info!(col, scol, "incorporated hot spare");
        Ok(())
    }

    /// Remove a member or spare from the array entirely.
    ///
    /// Only dead members and idle spares may be deleted.
    pub fn delete_component(&mut self, uuid: Uuid) -> Result<()> {
        if let Some(idx) = self.members.iter().position(|d| d.uuid == uuid) {
            if !self.members[idx].status.is_dead() {
                return Err(Error::EBUSY);
            }
            // The column stays; the descriptor merely loses its device
            // handle by remaining dead.  Physical removal is the frontend's
            // problem.  Here we only validate.
            return Ok(());
        }
        self.remove_hot_spare(uuid).map(drop)
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use super::*;
    use crate::blockdev::MemDev;

    fn label(array: Uuid, col: DiskIdx, spare: bool) -> DiskLabel {
        DiskLabel {
            array,
            disk: Uuid::new_v4(),
            ndisks: 3,
            col,
            spare,
            data_lbas: 63,
            chunk_lbas: 16,
        }
    }

    async fn labeled_dev(label: &DiskLabel) -> (String, Arc<dyn BlockDev>) {
        let dev: Arc<dyn BlockDev> = Arc::new(MemDev::new(64));
        write_label(&dev, label).await.unwrap();
        (format!("md{}", label.col), dev)
    }

    async fn mkset() -> DiskSet {
        let cfg = ArrayConfig::parity("t", 3, None);
        let array = Uuid::new_v4();
        let mut members = Vec::new();
        for col in 0..3 {
            members.push(labeled_dev(&label(array, col, false)).await);
        }
        let spares = vec![labeled_dev(&label(array, 0, true)).await];
        DiskSet::configure(&cfg, members, spares).await.unwrap()
    }

    /// The dead-disk predicate, all seven states explicitly.
    #[rstest]
    #[case(DiskStatus::Optimal, false)]
    #[case(DiskStatus::Failed, true)]
    #[case(DiskStatus::Reconstructing, true)]
    #[case(DiskStatus::DistSpared, true)]
    #[case(DiskStatus::Spared, true)]
    #[case(DiskStatus::Spare, false)]
    #[case(DiskStatus::UsedSpare, false)]
    fn dead_disk_predicate(#[case] status: DiskStatus, #[case] dead: bool) {
        assert_eq!(status.is_dead(), dead);
    }

    #[test]
    fn dead_disk_predicate_is_exhaustive() {
        assert_eq!(DiskStatus::all().len(), 7);
        assert_eq!(DiskStatus::all().iter()
                       .filter(|s| s.is_dead()).count(), 4);
    }

    #[tokio::test]
    async fn configure_ok() {
        let ds = mkset().await;
        assert_eq!(ds.ndisks(), 3);
        assert_eq!(ds.nspares(), 1);
        assert_eq!(ds.ndead(), 0);
        for col in 0..3 {
            assert_eq!(ds.status(col), DiskStatus::Optimal);
        }
    }

    #[tokio::test]
    async fn configure_wrong_count() {
        let cfg = ArrayConfig::parity("t", 3, None);
        let array = Uuid::new_v4();
        let members = vec![
            labeled_dev(&label(array, 0, false)).await,
            labeled_dev(&label(array, 1, false)).await,
        ];
        let e = DiskSet::configure(&cfg, members, vec![]).await.err();
        assert_eq!(e, Some(Error::EINVAL));
    }

    #[tokio::test]
    async fn configure_foreign_label() {
        let cfg = ArrayConfig::parity("t", 3, None);
        let array = Uuid::new_v4();
        let members = vec![
            labeled_dev(&label(array, 0, false)).await,
            labeled_dev(&label(Uuid::new_v4(), 1, false)).await,
            labeled_dev(&label(array, 2, false)).await,
        ];
        let e = DiskSet::configure(&cfg, members, vec![]).await.err();
        assert_eq!(e, Some(Error::EINVAL));
    }

    #[tokio::test]
    async fn configure_unlabeled_disk() {
        let cfg = ArrayConfig::parity("t", 3, None);
        let array = Uuid::new_v4();
        let members = vec![
            labeled_dev(&label(array, 0, false)).await,
            labeled_dev(&label(array, 1, false)).await,
            ("blank".to_owned(),
             Arc::new(MemDev::new(64)) as Arc<dyn BlockDev>),
        ];
        let e = DiskSet::configure(&cfg, members, vec![]).await.err();
        assert_eq!(e, Some(Error::EINVAL));
    }

    #[tokio::test]
    async fn fail_and_second_failure() {
        let mut ds = mkset().await;
        ds.fail(1).unwrap();
        assert_eq!(ds.status(1), DiskStatus::Failed);
        assert_eq!(ds.ndead(), 1);
        assert_eq!(ds.fail(1).unwrap_err(), Error::EALREADY);
        // Losing a second member exceeds single-parity fault tolerance
        assert_eq!(ds.fail(2).unwrap_err(), Error::ENOTRECOVERABLE);
        assert_eq!(ds.status(2), DiskStatus::Failed);
    }

    #[tokio::test]
    async fn spare_lifecycle() {
        let mut ds = mkset().await;
        ds.fail(1).unwrap();
        let scol = ds.select_spare().unwrap();
        assert_eq!(scol, 0);
        ds.incorporate_hot_spare(1, scol).unwrap();
        assert_eq!(ds.status(1), DiskStatus::Spared);
        assert_eq!(ds.disk(1).spare_to(), Some(scol));
        assert_eq!(ds.spare(scol).status(), DiskStatus::UsedSpare);
        // The spared member no longer consumes redundancy
        assert_eq!(ds.nexposed(), 0);
        ds.fail(2).unwrap();
        // A used spare can't be removed
        let uuid = ds.spare(scol).uuid;
        assert_eq!(ds.remove_hot_spare(uuid).unwrap_err(), Error::EBUSY);
        // And the pool is now empty
        assert!(ds.select_spare().is_none());
    }

    #[tokio::test]
    async fn begin_reconstruction() {
        let mut ds = mkset().await;
        // Only failed members may be rebuilt
        assert_eq!(ds.begin_reconstruction(1, 0).unwrap_err(),
                   Error::EINVAL);
        ds.fail(1).unwrap();
        ds.begin_reconstruction(1, 0).unwrap();
        assert_eq!(ds.status(1), DiskStatus::Reconstructing);
        assert_eq!(ds.disk(1).spare_to(), Some(0));
        assert_eq!(ds.begin_reconstruction(1, 0).unwrap_err(),
                   Error::EALREADY);
        // The spare is committed: not removable, not selectable
        let uuid = ds.spare(0).uuid;
        assert_eq!(ds.remove_hot_spare(uuid).unwrap_err(), Error::EBUSY);
        assert!(ds.select_spare().is_none());
        // Aborting releases the spare
        ds.abort_reconstruction(1);
        assert_eq!(ds.status(1), DiskStatus::Failed);
        assert_eq!(ds.disk(1).spare_to(), None);
        assert_eq!(ds.select_spare(), Some(0));
    }

    #[tokio::test]
    async fn begin_reconstruction_spare_contention() {
        let cfg = ArrayConfig::mirror("m", 3);
        let array = Uuid::new_v4();
        let mut members = Vec::new();
        for col in 0..3 {
            members.push(labeled_dev(&label(array, col, false)).await);
        }
        let spares = vec![labeled_dev(&label(array, 0, true)).await];
        let mut ds = DiskSet::configure(&cfg, members, spares).await
            .unwrap();
        ds.fail(0).unwrap();
        ds.fail(1).unwrap();
        ds.begin_reconstruction(0, 0).unwrap();
        // The only spare is committed to column 0
        assert_eq!(ds.begin_reconstruction(1, 0).unwrap_err(),
                   Error::EBUSY);
    }

    /// An n-way mirror survives n-1 failures.
    #[tokio::test]
    async fn fail_mirror_members() {
        let cfg = ArrayConfig::mirror("m", 3);
        let array = Uuid::new_v4();
        let mut members = Vec::new();
        for col in 0..3 {
            members.push(labeled_dev(&label(array, col, false)).await);
        }
        let mut ds = DiskSet::configure(&cfg, members, vec![]).await
            .unwrap();
        ds.fail(0).unwrap();
        ds.fail(1).unwrap();
        assert_eq!(ds.fail(2).unwrap_err(), Error::ENOTRECOVERABLE);
    }

    #[tokio::test]
    async fn add_and_remove_hot_spare() {
        let mut ds = mkset().await;
        let dev: Arc<dyn BlockDev> = Arc::new(MemDev::new(64));
        let sl = ds.spare_label(dev.size());
        assert_eq!(sl.col, 1);
        write_label(&dev, &sl).await.unwrap();
        let scol = ds.add_hot_spare("md9".to_owned(), dev, &sl).unwrap();
        assert_eq!(scol, 1);
        assert_eq!(ds.nspares(), 2);
        let uuid = ds.spare(scol).uuid;
        ds.remove_hot_spare(uuid).unwrap();
        assert_eq!(ds.nspares(), 1);
        assert_eq!(ds.remove_hot_spare(uuid).unwrap_err(), Error::ENOENT);
    }

    #[tokio::test]
    async fn delete_component() {
        let mut ds = mkset().await;
        let live = ds.disk(0).uuid;
        assert_eq!(ds.delete_component(live).unwrap_err(), Error::EBUSY);
        ds.fail(0).unwrap();
        ds.delete_component(live).unwrap();
    }
}
// LCOV_EXCL_STOP
