//! Thread affinity between native calls and core instances.
//!
//! The module's callback slots are process-global and carry no user data, so a callback
//! cannot be told which instance it answers for. Instead, every blocking call into a module
//! runs on a thread whose thread-local "current instance" cell names that instance, and
//! every global callback reads the cell.
//!
//! Policy for [`call`]:
//! - The calling thread already has affinity for the instance (a listener or callback calling
//!   back into its own core): the native call is made directly.
//! - Otherwise the instance's call lock is taken, a scoped worker thread named
//!   `retrohost-<id>` is spawned with its cell set, the native call runs there, and the caller
//!   blocks on the join. Two instances can therefore be driven concurrently while calls into one
//!   instance are strictly serialized.
//!
//! A worker that cannot be spawned fails the call with [`Error::WorkerSpawn`] before anything
//! reaches the module.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::state::{Shared, lock};

thread_local! {
    static CURRENT: RefCell<Option<Arc<Shared>>> = const { RefCell::new(None) };
}

/// The instance this thread currently answers for.
pub(crate) fn current() -> Option<Arc<Shared>> {
    CURRENT.with(|cell| cell.borrow().clone())
}

pub(crate) fn is_current(shared: &Arc<Shared>) -> bool {
    CURRENT.with(|cell| {
        cell.borrow()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, shared))
    })
}

/// Sets the cell for its lifetime and restores the previous value on drop.
struct Affinity {
    previous: Option<Arc<Shared>>,
}

impl Affinity {
    fn enter(shared: Arc<Shared>) -> Self {
        let previous = CURRENT.with(|cell| cell.replace(Some(shared)));
        Self { previous }
    }
}

impl Drop for Affinity {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// Run `f` with affinity for `shared` and wait for its result.
///
/// `f` must own everything it needs: raw pointers handed to the module are built inside it.
pub(crate) fn call<R, F>(shared: &Arc<Shared>, f: F) -> Result<R>
where
    F: FnOnce(&Shared) -> R + Send,
    R: Send,
{
    if is_current(shared) {
        return Ok(f(shared));
    }

    let _serialized = lock(&shared.call_lock);
    let worker_shared = Arc::clone(shared);

    let mut builder = thread::Builder::new().name(format!("retrohost-{}", shared.id));
    let stack_size = shared.worker_stack_size.load(Ordering::Relaxed);
    if stack_size > 0 {
        builder = builder.stack_size(stack_size);
    }

    thread::scope(|scope| {
        let worker = builder
            .spawn_scoped(scope, move || {
                let _affinity = Affinity::enter(Arc::clone(&worker_shared));
                f(&worker_shared)
            })
            .map_err(Error::WorkerSpawn)?;

        trace!(instance = shared.id, "waiting for core worker");
        worker.join().map_err(|_| Error::WorkerPanicked)
    })
}

/// Body of every global callback: resolve the instance this thread answers for and run `f`.
///
/// Returns `fallback` when the thread has no affinity (the module called back outside of
/// any blocking call) or when `f` panics; unwinding must not cross into the module.
pub(crate) fn callback<R>(name: &'static str, fallback: R, f: impl FnOnce(&Arc<Shared>) -> R) -> R {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| current().map(|shared| f(&shared))));
    match outcome {
        Ok(Some(result)) => result,
        Ok(None) => {
            error!(callback = name, "core invoked a callback outside of a core call");
            fallback
        }
        Err(_) => {
            error!(callback = name, "callback panicked");
            fallback
        }
    }
}
