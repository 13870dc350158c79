// vim: tw=80
//! End-to-end reconstruction scenarios.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use pretty_assertions::assert_eq;

use graid_core::{
    array::Health,
    config::ArrayConfig,
    disk::DiskStatus,
    recon::{ReconState, TickSource},
    types::*,
};

use super::*;

fn parity5() -> ArrayConfig {
    ArrayConfig::parity("fr", 5, Some(4))
}

#[tokio::test]
async fn rebuild_restores_redundancy() {
    let a = build(parity5(), 1).await;
    let mut model = Model::new(&a);
    let mut rng = prng(10);
    random_writes(&a, &mut model, &mut rng, 40).await;

    a.fault(1).unwrap();
    let (desc, fut) = a.rebuild(1).unwrap();
    assert_eq!(a.health(), Health::Rebuilding);
    fut.await.unwrap();
    assert_eq!(desc.state(), ReconState::Done);
    assert_eq!(a.health(), Health::Online);
    model.verify(&a).await;

    // The spare fully took over, so losing another member is survivable
    a.fault(3).unwrap();
    assert_eq!(a.health(),
               Health::Degraded(1.try_into().unwrap()));
    model.verify(&a).await;
}

#[tokio::test]
async fn foreground_writes_survive_a_rebuild() {
    let a = build(parity5(), 1).await;
    let mut model = Model::new(&a);
    let mut rng = prng(11);
    random_writes(&a, &mut model, &mut rng, 30).await;

    a.fault(0).unwrap();
    let (desc, fut) = a.rebuild(0).unwrap();
    // Overwrite two whole stripes before the rebuild runs.  They land on
    // the spare directly, and the rebuild must leave them alone.
    let stripe_lbas = 16;
    for stripe in [3u64, 7] {
        let data = rand_lbas(&mut rng, stripe_lbas);
        write(&a, stripe * stripe_lbas, &data).await.unwrap();
        model.write(stripe * stripe_lbas, &data);
    }
    fut.await.unwrap();

    assert_eq!(desc.stats().rus_skipped_dirty, 2);
    assert_eq!(desc.stats().rus_rebuilt, 62);
    model.verify(&a).await;
}

#[tokio::test]
async fn second_failure_aborts_a_rebuild() {
    let a = build(parity5(), 1).await;
    let mut model = Model::new(&a);
    let mut rng = prng(12);
    random_writes(&a, &mut model, &mut rng, 10).await;

    a.fault(0).unwrap();
    let (desc, fut) = a.rebuild(0).unwrap();
    assert_eq!(a.fault(1).unwrap_err(), Error::ENOTRECOVERABLE);
    assert_eq!(fut.await.unwrap_err(), Error::ENOTRECOVERABLE);
    assert_eq!(desc.state(), ReconState::Aborted);
    assert_eq!(a.health(), Health::Faulted);
    // The member reverted; the spare was never incorporated
    assert_eq!(a.status().members[0].1, DiskStatus::Failed);
    assert_eq!(a.status().spares[0].1, DiskStatus::Spare);
}

/// Advances by one tick per observation, so the run loop's budget
/// arithmetic is exact.
struct FakeTicks(AtomicU64);

impl TickSource for FakeTicks {
    fn now(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[tokio::test]
async fn rebuild_yields_on_its_tick_budget() {
    let mut raw = build_raw(parity5(), 1).await;
    raw.set_tick_source(Arc::new(FakeTicks(AtomicU64::new(0))));
    let a = Arc::new(raw);
    let mut model = Model::new(&a);
    let mut rng = prng(13);
    random_writes(&a, &mut model, &mut rng, 20).await;

    a.fault(2).unwrap();
    let (desc, fut) = a.rebuild(2).unwrap();
    fut.await.unwrap();
    // The clock ticks once per observation: one per recovery unit plus
    // one per quantum restart.  64 units against the default 50-tick
    // budget crosses it exactly once.
    assert_eq!(desc.stats().yields, 1);
    assert_eq!(desc.stats().rus_rebuilt, 64);
    model.verify(&a).await;
}
