// vim: tw=80
//! GRAID: a software-RAID engine built on I/O graphs.
//!
//! Every user access is compiled into a directed acyclic graph of primitive
//! operations (disk reads and writes, XOR, parity journaling) and handed to
//! an executor that runs independent nodes concurrently, honors per-disk
//! locks, and rolls completed work back if a node fails.  Disk health lives
//! in a descriptor layer that the graph compiler consults to choose between
//! fast, degraded, and spare-redirected shapes; a reconstruction coordinator
//! rebuilds dead members onto hot spares with the same graph primitives,
//! throttled so foreground I/O keeps flowing.

// I don't find this lint very helpful
#![allow(clippy::type_complexity)]

pub mod access;
pub mod array;
pub mod asm;
pub mod blockdev;
pub mod config;
pub mod dag;
pub mod disk;
pub mod label;
pub mod recon;
pub mod types;
pub mod util;

pub use crate::types::*;
pub use crate::util::*;
