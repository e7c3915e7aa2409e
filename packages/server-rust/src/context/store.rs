//! Request-scoped key/value store propagated through tokio task-locals.
//!
//! A boundary is opened with [`RequestContextStore::run`] (or `run_sync`) and
//! lasts for the dynamic extent of the wrapped future. The task-local travels
//! with the task, so code after an `.await` sees the same store even when the
//! runtime resumes it on another worker thread. Tasks spawned with
//! `tokio::spawn` do not inherit task-locals; use [`RequestContextStore::spawn`]
//! or [`RequestContextStore::propagate`] to hand the boundary over explicitly.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::error::ContextError;

type Slot = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static CURRENT: ContextHandle;
}

// ---------------------------------------------------------------------------
// ContextEntries
// ---------------------------------------------------------------------------

/// The entries of one boundary, as seen inside [`RequestContextStore::transaction`].
#[derive(Default)]
pub struct ContextEntries {
    slots: HashMap<String, Slot>,
}

impl ContextEntries {
    /// Typed read; `None` when absent or stored under a different type.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.slots
            .get(key)
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    /// Borrowing read; `None` when absent or stored under a different type.
    pub fn peek<T: 'static, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.slots
            .get(key)
            .and_then(|slot| slot.downcast_ref::<T>())
            .map(f)
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Arc::new(value));
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

impl fmt::Debug for ContextEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.slots.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// ContextHandle
// ---------------------------------------------------------------------------

/// Shared handle to one boundary's store.
///
/// Cloning the handle shares the store; every [`RequestContextStore::run`]
/// allocates a new one. Handles are only needed for explicit handoff to
/// threads the task-local cannot reach (see [`RequestContextStore::enter`]).
#[derive(Clone, Default)]
pub struct ContextHandle {
    entries: Arc<RwLock<ContextEntries>>,
}

impl ContextHandle {
    fn read<R>(&self, f: impl FnOnce(&ContextEntries) -> R) -> R {
        f(&self.entries.read())
    }

    fn write<R>(&self, f: impl FnOnce(&mut ContextEntries) -> R) -> R {
        f(&mut self.entries.write())
    }

    /// Whether two handles point at the same store.
    #[must_use]
    pub fn same_store(&self, other: &ContextHandle) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("entries", &*self.entries.read())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RequestContextStore
// ---------------------------------------------------------------------------

/// Entry point for the ambient per-request store.
///
/// All functions act on the boundary of the calling task. Reads outside a
/// boundary return `None`/`false`; writes fail with
/// [`ContextError::ContextUnavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContextStore;

impl RequestContextStore {
    /// Runs `fut` inside a fresh, empty boundary.
    ///
    /// A nested `run` shadows the enclosing boundary with a new empty one and
    /// does not read through to it. The enclosing binding is restored when the
    /// nested future completes.
    pub async fn run<F: Future>(fut: F) -> F::Output {
        CURRENT.scope(ContextHandle::default(), fut).await
    }

    /// Synchronous variant of [`RequestContextStore::run`].
    pub fn run_sync<R>(f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(ContextHandle::default(), f)
    }

    /// Runs `f` inside the boundary identified by `handle`.
    ///
    /// Used to carry a boundary onto a thread the task-local does not follow,
    /// such as a `spawn_blocking` worker.
    pub fn enter<R>(handle: ContextHandle, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(handle, f)
    }

    /// Handle to the current boundary, if any.
    #[must_use]
    pub fn current() -> Option<ContextHandle> {
        CURRENT.try_with(Clone::clone).ok()
    }

    #[must_use]
    pub fn is_active() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    /// Wraps `fut` so it runs in the caller's boundary wherever it is polled.
    ///
    /// Outside a boundary the future is returned unchanged in behaviour.
    pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        let handle = Self::current();
        async move {
            match handle {
                Some(handle) => CURRENT.scope(handle, fut).await,
                None => fut.await,
            }
        }
    }

    /// `tokio::spawn` that shares the caller's boundary with the child task.
    pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(Self::propagate(fut))
    }

    /// `tokio::task::spawn_blocking` that shares the caller's boundary.
    pub fn spawn_blocking<R>(f: impl FnOnce() -> R + Send + 'static) -> JoinHandle<R>
    where
        R: Send + 'static,
    {
        let handle = Self::current();
        tokio::task::spawn_blocking(move || match handle {
            Some(handle) => Self::enter(handle, f),
            None => f(),
        })
    }

    /// Typed read. Never fails: absent key, wrong type or no boundary give `None`.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(key: &str) -> Option<T> {
        CURRENT
            .try_with(|handle| handle.read(|entries| entries.get::<T>(key)))
            .ok()
            .flatten()
    }

    /// Stores `value` under `key` in the current boundary.
    ///
    /// # Errors
    ///
    /// [`ContextError::ContextUnavailable`] outside any boundary.
    pub fn set<T: Send + Sync + 'static>(
        key: impl Into<String>,
        value: T,
    ) -> Result<(), ContextError> {
        let key = key.into();
        Self::transaction(move |entries| entries.set(key, value))
    }

    #[must_use]
    pub fn has(key: &str) -> bool {
        CURRENT
            .try_with(|handle| handle.read(|entries| entries.has(key)))
            .unwrap_or(false)
    }

    /// Removes `key`; `false` when absent or outside a boundary.
    pub fn remove(key: &str) -> bool {
        CURRENT
            .try_with(|handle| handle.write(|entries| entries.remove(key)))
            .unwrap_or(false)
    }

    /// Wipes every key of the current boundary. No-op outside a boundary.
    pub fn clear() {
        let _ = CURRENT.try_with(|handle| handle.write(ContextEntries::clear));
    }

    /// Keys of the current boundary, unordered.
    #[must_use]
    pub fn keys() -> Vec<String> {
        CURRENT
            .try_with(|handle| handle.read(|entries| entries.keys().map(str::to_owned).collect()))
            .unwrap_or_default()
    }

    /// Applies `f` under the boundary's write lock.
    ///
    /// Readers on tasks sharing the boundary observe either none or all of the
    /// writes made inside `f`.
    ///
    /// The lock is not reentrant: `f` must work through the `ContextEntries`
    /// it is given and must not call back into `RequestContextStore` (or
    /// format the current `ContextHandle`), which would deadlock.
    ///
    /// # Errors
    ///
    /// [`ContextError::ContextUnavailable`] outside any boundary.
    pub fn transaction<R>(f: impl FnOnce(&mut ContextEntries) -> R) -> Result<R, ContextError> {
        CURRENT
            .try_with(|handle| handle.write(f))
            .map_err(|_| ContextError::ContextUnavailable)
    }

    /// Applies `f` under the boundary's read lock; `None` outside a boundary.
    ///
    /// As with [`RequestContextStore::transaction`], `f` must not call back
    /// into the store.
    pub fn inspect<R>(f: impl FnOnce(&ContextEntries) -> R) -> Option<R> {
        CURRENT.try_with(|handle| handle.read(f)).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
