// vim: tw=80
//! Whole-array I/O scenarios.

use divbuf::DivBufShared;
use futures::stream::{FuturesUnordered, TryStreamExt};
use pretty_assertions::assert_eq;

use graid_core::{
    array::Health,
    config::ArrayConfig,
    types::*,
    util::BYTES_PER_LBA,
};

use super::*;

fn parity5() -> ArrayConfig {
    ArrayConfig::parity("fa", 5, Some(4))
}

#[tokio::test]
async fn healthy_random_io() {
    let a = build(parity5(), 0).await;
    // 256 data LBAs per member, 4-LBA chunks: 64 stripes of 16 LBAs
    assert_eq!(a.capacity(), 1024);
    let mut model = Model::new(&a);
    let mut rng = prng(1);
    random_writes(&a, &mut model, &mut rng, 50).await;
    model.verify(&a).await;
    assert_eq!(a.health(), Health::Online);
}

#[tokio::test]
async fn degraded_random_io() {
    let a = build(parity5(), 0).await;
    let mut model = Model::new(&a);
    let mut rng = prng(2);
    random_writes(&a, &mut model, &mut rng, 25).await;
    a.fault(2).unwrap();
    // Partial writes touching the dead column get promoted to full
    // stripes; everything must still read back correctly
    random_writes(&a, &mut model, &mut rng, 25).await;
    model.verify(&a).await;
}

#[tokio::test]
async fn concurrent_disjoint_writes() {
    let a = build(parity5(), 0).await;
    let mut model = Model::new(&a);
    let mut rng = prng(3);
    // One full stripe per writer, all in flight at once
    let stripe_lbas = 16;
    let bufs: Vec<_> = (0..8)
        .map(|_| rand_lbas(&mut rng, stripe_lbas))
        .collect();
    for (i, data) in bufs.iter().enumerate() {
        model.write(i as LbaT * stripe_lbas, data);
    }
    bufs.iter()
        .enumerate()
        .map(|(i, data)| write(&a, i as LbaT * stripe_lbas, data))
        .collect::<FuturesUnordered<_>>()
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    model.verify(&a).await;
}

#[tokio::test]
async fn fatal_array_rejects_writes() {
    let a = build(ArrayConfig::parity("fc", 3, Some(4)), 0).await;
    let mut model = Model::new(&a);
    let mut rng = prng(4);
    random_writes(&a, &mut model, &mut rng, 10).await;

    a.fault(0).unwrap();
    assert_eq!(a.fault(1).unwrap_err(), Error::ENOTRECOVERABLE);
    assert_eq!(a.health(), Health::Faulted);

    let data = rand_lbas(&mut rng, 4);
    assert_eq!(write(&a, 0, &data).await.unwrap_err(),
               Error::ENOTRECOVERABLE);
    // With two columns gone, degraded reads are impossible too
    assert_eq!(read(&a, 0, 4).await.unwrap_err(), Error::ENOTRECOVERABLE);
}

#[tokio::test]
async fn parity_journal_flush() {
    let mut cfg = ArrayConfig::parity("fj", 3, Some(4));
    cfg.journal_parity = true;
    let a = build(cfg, 0).await;
    let mut model = Model::new(&a);
    let mut rng = prng(5);
    random_writes(&a, &mut model, &mut rng, 20).await;
    a.flush_parity_log().await.unwrap();
    model.verify(&a).await;
}

#[tokio::test]
async fn mirror_serves_from_last_survivor() {
    let a = build(ArrayConfig::mirror("fm", 3), 0).await;
    let mut model = Model::new(&a);
    let mut rng = prng(6);
    random_writes(&a, &mut model, &mut rng, 20).await;
    a.fault(0).unwrap();
    random_writes(&a, &mut model, &mut rng, 10).await;
    a.fault(2).unwrap();
    model.verify(&a).await;
}

#[tokio::test]
async fn misaligned_buffer_is_rejected() {
    let a = build(ArrayConfig::parity("fe", 3, Some(4)), 0).await;
    let dbs = DivBufShared::from(vec![0u8; BYTES_PER_LBA / 2]);
    assert_eq!(a.write_at(dbs.try_const().unwrap(), 0).await.unwrap_err(),
               Error::EINVAL);
}
