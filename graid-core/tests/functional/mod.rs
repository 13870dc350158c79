// vim: tw=80
//! Functional tests exercising whole arrays over memory-backed devices.

mod array;
mod recon;

use std::sync::Arc;

use divbuf::DivBufShared;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use graid_core::{
    array::RaidArray,
    blockdev::{BlockDev, MemDev},
    config::ArrayConfig,
    types::*,
    util::BYTES_PER_LBA,
};

/// Size of every simulated device, in LBAs.
pub const DEV_LBAS: LbaT = 257;

/// Format and assemble an array over fresh [`MemDev`]s.
pub async fn build_raw(cfg: ArrayConfig, nspares: usize) -> RaidArray {
    let ndisks = cfg.ndisks as usize;
    let devs: Vec<Arc<dyn BlockDev>> = (0..ndisks + nspares)
        .map(|_| Arc::new(MemDev::new(DEV_LBAS)) as Arc<dyn BlockDev>)
        .collect();
    let (mdevs, sdevs) = devs.split_at(ndisks);
    RaidArray::format(&cfg, mdevs, sdevs).await.unwrap();
    let members = mdevs.iter()
        .enumerate()
        .map(|(i, d)| (format!("md{i}"), d.clone()))
        .collect();
    let spares = sdevs.iter()
        .enumerate()
        .map(|(i, d)| (format!("sp{i}"), d.clone()))
        .collect();
    RaidArray::configure(cfg, members, spares).await.unwrap()
}

pub async fn build(cfg: ArrayConfig, nspares: usize) -> Arc<RaidArray> {
    Arc::new(build_raw(cfg, nspares).await)
}

pub async fn write(a: &RaidArray, lba: LbaT, data: &[u8]) -> Result<()> {
    let dbs = DivBufShared::from(data.to_vec());
    a.write_at(dbs.try_const().unwrap(), lba).await
}

pub async fn read(a: &RaidArray, lba: LbaT, nlbas: LbaT) -> Result<Vec<u8>> {
    let dbs = DivBufShared::from(vec![0u8; nlbas as usize * BYTES_PER_LBA]);
    a.read_at(dbs.try_mut().unwrap(), lba).await?;
    Ok(Vec::from(&dbs.try_const().unwrap()[..]))
}

pub fn rand_lbas(rng: &mut XorShiftRng, nlbas: LbaT) -> Vec<u8> {
    let mut buf = vec![0u8; nlbas as usize * BYTES_PER_LBA];
    rng.fill(&mut buf[..]);
    buf
}

/// A shadow copy of the array's expected contents.
pub struct Model(pub Vec<u8>);

impl Model {
    pub fn new(a: &RaidArray) -> Self {
        Model(vec![0u8; a.capacity() as usize * BYTES_PER_LBA])
    }

    pub fn write(&mut self, lba: LbaT, data: &[u8]) {
        let off = lba as usize * BYTES_PER_LBA;
        self.0[off..off + data.len()].copy_from_slice(data);
    }

    /// Read the whole array back and compare it, one swath at a time.
    pub async fn verify(&self, a: &RaidArray) {
        const SWATH: LbaT = 64;
        let cap = a.capacity();
        let mut lba = 0;
        while lba < cap {
            let nlbas = SWATH.min(cap - lba);
            let data = read(a, lba, nlbas).await.unwrap();
            let off = lba as usize * BYTES_PER_LBA;
            assert_eq!(data, &self.0[off..off + data.len()],
                       "mismatch in lbas {}..{}", lba, lba + nlbas);
            lba += nlbas;
        }
    }
}

/// Issue `count` random writes, mirroring each into the model.
pub async fn random_writes(
    a: &RaidArray,
    model: &mut Model,
    rng: &mut XorShiftRng,
    count: usize)
{
    let cap = a.capacity();
    for _ in 0..count {
        let lba = rng.gen_range(0..cap);
        let nlbas = rng.gen_range(1..=16).min(cap - lba);
        let data = rand_lbas(rng, nlbas);
        write(a, lba, &data).await.unwrap();
        model.write(lba, &data);
    }
}

pub fn prng(seed: u64) -> XorShiftRng {
    XorShiftRng::seed_from_u64(seed)
}
