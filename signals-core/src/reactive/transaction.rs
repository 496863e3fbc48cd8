//! Optimistic Transactions
//!
//! [`run_in_transaction`] runs a task with a staging frame installed on the
//! current thread. While the frame is active:
//!
//! - every tracked read records the version it saw,
//! - every write is staged instead of applied,
//! - reads see the transaction's own staged writes,
//! - a rejected operation dooms the whole transaction.
//!
//! # Commit
//!
//! When the task returns, the write locks of every signal the transaction
//! read or wrote are taken in ID order. If any read signal moved past the
//! version it was read at, the transaction fails with
//! [`Rejection::Conflict`] and nothing is applied. Otherwise all staged
//! values are installed while every value lock is held, so no reader sees
//! half of a transaction. Notifications go out after the locks are dropped.
//!
//! A transaction started inside another one merges into it on success.
//! [`run_without_transaction`] opens a write-through frame so a nested task
//! applies its writes immediately.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::MutexGuard;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::{Captured, Dependencies};
use super::runtime::Runtime;
use super::source::{Dependency, SignalId, Source};
use crate::error::Rejection;
use crate::operation::Operation;

/// A write waiting for its transaction to commit.
pub(crate) trait StagedWrite: Send {
    /// The written signal, used for locking and notification.
    fn dependency(&self) -> Arc<dyn Dependency>;

    fn as_any(&self) -> &dyn Any;

    /// Take the value lock. The returned install runs while every other
    /// staged write of the transaction is locked as well.
    fn lock(&mut self) -> Box<dyn PendingInstall + '_>;
}

/// A locked staged write.
pub(crate) trait PendingInstall {
    /// Install the value. Returns whether the version was bumped.
    fn install(&mut self) -> bool;
}

struct StagedFrame {
    reads: Dependencies,
    writes: IndexMap<SignalId, Box<dyn StagedWrite>>,
    rejection: Option<Rejection>,
}

impl StagedFrame {
    fn new() -> Self {
        Self {
            reads: IndexMap::new(),
            writes: IndexMap::new(),
            rejection: None,
        }
    }

    fn absorb(&mut self, nested: StagedFrame) {
        for (id, captured) in nested.reads {
            self.reads.entry(id).or_insert(captured);
        }
        self.writes.extend(nested.writes);
    }
}

enum Frame {
    Staged(StagedFrame),
    WriteThrough,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// Pops the frame it pushed, also when the task unwinds.
struct FrameGuard {
    active: bool,
}

impl FrameGuard {
    fn push(frame: Frame) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(frame));
        Self { active: true }
    }

    fn pop(mut self) -> Option<Frame> {
        self.active = false;
        FRAMES.with(|frames| frames.borrow_mut().pop())
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.active {
            // The popped frame may own user values; drop it outside the borrow.
            let frame = FRAMES.with(|frames| frames.borrow_mut().pop());
            drop(frame);
        }
    }
}

/// Whether writes on this thread are currently being staged.
pub fn in_transaction() -> bool {
    FRAMES.with(|frames| matches!(frames.borrow().last(), Some(Frame::Staged(_))))
}

/// Record a read in the active transaction. The first read of a signal wins.
pub(crate) fn record_read<F>(signal: SignalId, version: u64, dependency: F)
where
    F: FnOnce() -> Arc<dyn Dependency>,
{
    FRAMES.with(|frames| {
        if let Some(Frame::Staged(frame)) = frames.borrow_mut().last_mut() {
            frame.reads.entry(signal).or_insert_with(|| Captured {
                dependency: dependency(),
                version,
            });
        }
    });
}

/// Look at the innermost staged write for `signal`. Enclosing transactions
/// are searched too, up to the nearest write-through frame.
pub(crate) fn with_staged<R, F>(signal: SignalId, f: F) -> Option<R>
where
    F: FnOnce(&dyn StagedWrite) -> Option<R>,
{
    FRAMES.with(|frames| {
        for frame in frames.borrow().iter().rev() {
            match frame {
                Frame::Staged(frame) => {
                    if let Some(write) = frame.writes.get(&signal) {
                        return f(write.as_ref());
                    }
                }
                Frame::WriteThrough => break,
            }
        }
        None
    })
}

/// Whether the transaction in scope has a pending write to `signal`.
pub(crate) fn has_staged(signal: SignalId) -> bool {
    with_staged(signal, |_| Some(())).is_some()
}

/// Stage a write in the active transaction, replacing an earlier one.
pub(crate) fn stage(signal: SignalId, write: Box<dyn StagedWrite>) {
    let replaced = FRAMES.with(|frames| match frames.borrow_mut().last_mut() {
        Some(Frame::Staged(frame)) => frame.writes.insert(signal, write),
        _ => None,
    });
    drop(replaced);
}

/// Reject an operation. Inside a transaction this dooms the transaction.
pub(crate) fn reject<T>(rejection: Rejection) -> Operation<T> {
    FRAMES.with(|frames| {
        if let Some(Frame::Staged(frame)) = frames.borrow_mut().last_mut() {
            if frame.rejection.is_none() {
                trace!(%rejection, "transaction doomed");
                frame.rejection = Some(rejection.clone());
            }
        }
    });
    Operation::Rejected(rejection)
}

/// Run `task` as one atomic unit.
///
/// Returns the task's result if every staged write was applied. Returns the
/// first rejection if an operation inside the task was rejected, or
/// [`Rejection::Conflict`] if a signal read by the task changed before
/// commit. In both failure cases nothing the task wrote is visible.
pub fn run_in_transaction<R, F>(task: F) -> Operation<R>
where
    F: FnOnce() -> R,
{
    let guard = FrameGuard::push(Frame::Staged(StagedFrame::new()));
    let result = task();
    let Some(Frame::Staged(mut frame)) = guard.pop() else {
        return Operation::Applied(result);
    };

    if let Some(rejection) = frame.rejection.take() {
        debug!(%rejection, writes = frame.writes.len(), "transaction rolled back");
        return Operation::Rejected(rejection);
    }

    let frame = FRAMES.with(|frames| match frames.borrow_mut().last_mut() {
        Some(Frame::Staged(outer)) => {
            outer.absorb(frame);
            None
        }
        _ => Some(frame),
    });

    match frame {
        None => Operation::Applied(result),
        Some(frame) => match commit(frame) {
            Ok(()) => Operation::Applied(result),
            Err(rejection) => Operation::Rejected(rejection),
        },
    }
}

/// Run `task` with its writes applied immediately, even inside a transaction.
pub fn run_without_transaction<R, F>(task: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = FrameGuard::push(Frame::WriteThrough);
    task()
}

/// Run `task` in a transaction, retrying on conflict.
///
/// Makes up to [`RuntimeConfig::transaction_attempts`](super::RuntimeConfig)
/// attempts.
pub fn retry_transaction<R, F>(task: F) -> Operation<R>
where
    F: FnMut() -> R,
{
    retry_transaction_with(Runtime::config().transaction_attempts, task)
}

/// Run `task` in a transaction, making up to `attempts` attempts while it
/// fails with [`Rejection::Conflict`].
pub fn retry_transaction_with<R, F>(attempts: u32, mut task: F) -> Operation<R>
where
    F: FnMut() -> R,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match run_in_transaction(&mut task) {
            Operation::Rejected(Rejection::Conflict { signal }) if attempt < attempts => {
                debug!(%signal, attempt, "retrying conflicted transaction");
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

fn commit(mut frame: StagedFrame) -> Result<(), Rejection> {
    if frame.writes.is_empty() {
        // Nothing to apply; a read-only transaction only has to be consistent.
        if let Some((id, _)) = frame.reads.iter().find(|(_, captured)| captured.is_stale()) {
            debug!(signal = %id, "read-only transaction conflicted");
            return Err(Rejection::Conflict { signal: *id });
        }
        return Ok(());
    }

    let mut locked: Vec<Arc<dyn Dependency>> = frame
        .reads
        .values()
        .map(|captured| captured.dependency.clone())
        .chain(frame.writes.values().map(|write| write.dependency()))
        .collect();
    locked.sort_by_key(|dependency| dependency.source().id());
    locked.dedup_by_key(|dependency| dependency.source().id());

    let mut changed: SmallVec<[SignalId; 8]> = SmallVec::new();
    {
        let _write_locks: Vec<MutexGuard<'_, ()>> = locked
            .iter()
            .map(|dependency| dependency.source().lock_writes())
            .collect();

        for (id, captured) in &frame.reads {
            if captured.is_stale() {
                debug!(signal = %id, writes = frame.writes.len(), "transaction conflicted");
                return Err(Rejection::Conflict { signal: *id });
            }
        }

        let mut installs: Vec<(SignalId, Box<dyn PendingInstall + '_>)> = frame
            .writes
            .iter_mut()
            .map(|(id, write)| (*id, write.lock()))
            .collect();
        for (id, install) in installs.iter_mut() {
            if install.install() {
                changed.push(*id);
            }
        }
    }

    debug!(
        reads = frame.reads.len(),
        writes = frame.writes.len(),
        changed = changed.len(),
        "transaction committed"
    );

    let sources: Vec<Arc<dyn Dependency>> = frame
        .writes
        .iter()
        .filter(|(id, _)| changed.contains(id))
        .map(|(_, write)| write.dependency())
        .collect();
    drop(frame);

    for dependency in sources {
        notify(dependency.source());
    }
    Ok(())
}

fn notify(source: &Source) {
    run_without_transaction(|| source.notify());
}
