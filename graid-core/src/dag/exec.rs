// vim: tw=80
//! The DAG execution engine.
//!
//! Fires every node whose predecessors have all completed, honoring node
//! priorities when several become ready at once.  On the first node failure
//! it stops launching, drains the nodes already in flight, then rolls back
//! every completed undoable node in reverse completion order.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    pin::Pin,
    sync::{Arc, Mutex},
};

use futures::{Future, StreamExt, stream::FuturesUnordered};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::{
    blockdev::BlockDev,
    types::*,
};
use super::{
    Dag,
    NodeId,
    nodefn::{ExecCtx, FuncTable, ParityLog, UndoEntry},
};

/// A shareable per-disk lock, honored by nodes carrying the lock/unlock
/// params.  One per member disk, owned by the array.
pub type DiskLock = Arc<tokio::sync::Mutex<()>>;

type NodeDone = (NodeId, Result<Option<UndoEntry>>, Option<OwnedMutexGuard<()>>);

/// Execute `dag` to completion.
///
/// Returns the first error any node reported, after draining in-flight nodes
/// and rolling back completed ones.  On success every node has fired exactly
/// once.
pub async fn execute(
    dag: Dag,
    devs: Vec<Arc<dyn BlockDev>>,
    funcs: FuncTable,
    plog: Option<Arc<Mutex<ParityLog>>>,
    locks: &[DiskLock],
) -> Result<()>
{
    let Dag { nodes, bufs } = dag;
    let ctx = ExecCtx { devs, funcs, plog, bufs };

    let nnodes = nodes.len();
    let mut ops = Vec::with_capacity(nnodes);
    let mut params = Vec::with_capacity(nnodes);
    let mut succs = Vec::with_capacity(nnodes);
    let mut npreds = Vec::with_capacity(nnodes);
    let mut disks = Vec::with_capacity(nnodes);
    for node in nodes.into_iter() {
        disks.push(node.op.as_ref().and_then(|op| op.disk()));
        ops.push(node.op);
        params.push(node.params);
        succs.push(node.succs);
        npreds.push(node.npreds);
    }

    // Higher priority launches first; ties go to the lower node index.
    let mut ready = BinaryHeap::new();
    for (id, np) in npreds.iter().enumerate() {
        if *np == 0 {
            ready.push((params[id].priority, Reverse(id)));
        }
    }

    let mut inflight = FuturesUnordered::<
        Pin<Box<dyn Future<Output = NodeDone> + Send + '_>>
    >::new();
    let mut held = HashMap::<DiskIdx, OwnedMutexGuard<()>>::new();
    let mut undo_log = Vec::<UndoEntry>::new();
    let mut failed: Option<Error> = None;

    loop {
        if failed.is_none() {
            while let Some((_prio, Reverse(id))) = ready.pop() {
                let op = ops[id].take().unwrap();
                let to_lock = if params[id].lock {
                    op.disk().map(|d| locks[d as usize].clone())
                } else {
                    None
                };
                let ctxr = &ctx;
                inflight.push(Box::pin(async move {
                    let guard = match to_lock {
                        Some(mtx) => Some(mtx.lock_owned().await),
                        None => None,
                    };
                    let r = op.run(ctxr).await;
                    (id, r, guard)
                }));
            }
        } else {
            ready.clear();
        }

        let Some((id, r, guard)) = inflight.next().await else {
            break;
        };
        if let Some(g) = guard {
            // The disk must be known; only disk nodes may carry the lock
            // flag.
            held.insert(disks[id].unwrap(), g);
        }
        match r {
            Ok(entry) => {
                if let Some(e) = entry {
                    undo_log.push(e);
                }
                if params[id].unlock {
                    if let Some(d) = disks[id] {
                        held.remove(&d);
                    }
                }
                if failed.is_none() {
                    for s in succs[id].iter().copied() {
                        npreds[s] -= 1;
                        if npreds[s] == 0 {
                            ready.push((params[s].priority, Reverse(s)));
                        }
                    }
                }
            },
            Err(e) => {
                debug!(node = id, error = %e, "node failed");
                if params[id].unlock {
                    if let Some(d) = disks[id] {
                        held.remove(&d);
                    }
                }
                // The first error is the one the access reports
                failed.get_or_insert(e);
            },
        }
    }

    match failed {
        Some(e) => {
            ctx.rollback(undo_log).await;
            Err(e)
        },
        None => Ok(()),
    }
}

// LCOV_EXCL_STOP
