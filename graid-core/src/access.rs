// vim: tw=80
//! User access descriptors.
//!
//! An [`AccessDesc`] tracks one user I/O from submission to completion: the
//! state it is in, the graphs executing on its behalf, the first error any
//! of them hit, and how the caller wants to be told when it finishes.  It is
//! shared between the submitting thread and the executor task, so all of its
//! mutable state sits behind locks.

use std::{
    sync::{
        Condvar,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use crate::types::*;

/// Direction of a user access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoType {
    Read,
    Write,
}

/// Lifecycle of an access.
///
/// Every access walks the same fixed sequence; there are no back edges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessState {
    /// Decomposing the extent into stripes.
    Map,
    /// Compiling graphs.
    Build,
    /// Graphs in flight.
    Exec,
    /// Releasing resources, firing the callback.
    Cleanup,
    /// Finished; the result is final.
    Done,
}

const STATES: [AccessState; 4] = [
    AccessState::Map,
    AccessState::Build,
    AccessState::Exec,
    AccessState::Cleanup,
];

type Callback = Box<dyn FnOnce(Result<()>) + Send>;
type CleanupFn = Box<dyn FnOnce() + Send>;

/// One user access.
pub struct AccessDesc {
    io: IoType,
    lba: LbaT,
    nlbas: LbaT,
    /// Index into [`STATES`]; anything past the end means [`Done`].
    ///
    /// [`Done`]: AccessState::Done
    state: AtomicUsize,
    /// First error reported by any of this access's graphs.
    status: Mutex<Option<Error>>,
    /// Number of graphs dispatched but not yet complete.
    num_pending: Mutex<usize>,
    cv: Condvar,
    callback: Mutex<Option<Callback>>,
    cleanups: Mutex<Vec<CleanupFn>>,
    started: Instant,
}

impl AccessDesc {
    pub fn new(io: IoType, lba: LbaT, nlbas: LbaT) -> Self {
        AccessDesc {
            io,
            lba,
            nlbas,
            state: AtomicUsize::new(0),
            status: Mutex::new(None),
            num_pending: Mutex::new(0),
            cv: Condvar::new(),
            callback: Mutex::new(None),
            cleanups: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn io(&self) -> IoType {
        self.io
    }

    pub fn lba(&self) -> LbaT {
        self.lba
    }

    pub fn nlbas(&self) -> LbaT {
        self.nlbas
    }

    pub fn state(&self) -> AccessState {
        STATES.get(self.state.load(Ordering::Acquire))
            .copied()
            .unwrap_or(AccessState::Done)
    }

    /// Step to the next lifecycle state.
    pub(crate) fn advance(&self) -> AccessState {
        self.state.fetch_add(1, Ordering::AcqRel);
        self.state()
    }

    /// Register the completion callback.  It fires exactly once, when the
    /// last pending graph completes.
    pub fn on_complete(&self, cb: Callback) {
        let prev = self.callback.lock().unwrap().replace(cb);
        assert!(prev.is_none(), "completion callback already registered");
    }

    /// Register work to run when the access completes, regardless of
    /// outcome.
    pub(crate) fn defer_cleanup(&self, f: CleanupFn) {
        self.cleanups.lock().unwrap().push(f);
    }

    /// Note that `n` more graphs are in flight for this access.
    pub(crate) fn add_pending(&self, n: usize) {
        *self.num_pending.lock().unwrap() += n;
    }

    /// Record a graph's completion.  The `num_pending` lock serializes
    /// concurrent completions, so exactly one caller sees the count hit
    /// zero and runs the completion work.
    pub(crate) fn dag_done(&self, r: Result<()>) {
        let mut np = self.num_pending.lock().unwrap();
        if let Err(e) = r {
            // Only the first error is reported
            self.status.lock().unwrap().get_or_insert(e);
        }
        debug_assert!(*np > 0);
        *np -= 1;
        if *np == 0 {
            self.state.store(STATES.len(), Ordering::Release);
            let cleanups =
                std::mem::take(&mut *self.cleanups.lock().unwrap());
            for f in cleanups.into_iter() {
                f();
            }
            if let Some(cb) = self.callback.lock().unwrap().take() {
                cb(self.result());
            }
            self.cv.notify_all();
        }
    }

    /// Mark the whole access failed before any graph was dispatched.
    pub(crate) fn abort(&self, e: Error) {
        self.status.lock().unwrap().get_or_insert(e);
        self.state.store(STATES.len(), Ordering::Release);
        let cleanups = std::mem::take(&mut *self.cleanups.lock().unwrap());
        for f in cleanups.into_iter() {
            f();
        }
        if let Some(cb) = self.callback.lock().unwrap().take() {
            cb(self.result());
        }
        self.cv.notify_all();
    }

    pub fn error(&self) -> Option<Error> {
        *self.status.lock().unwrap()
    }

    /// The access's final result.  Meaningful once [`state`](Self::state)
    /// returns [`AccessState::Done`].
    pub fn result(&self) -> Result<()> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Block the calling thread until the access completes.
    ///
    /// Must not be called from an executor thread.
    pub fn wait(&self) -> Result<()> {
        let mut np = self.num_pending.lock().unwrap();
        while !(*np == 0 && self.state() == AccessState::Done) {
            np = self.cv.wait(np).unwrap();
        }
        self.result()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

// LCOV_EXCL_STOP
