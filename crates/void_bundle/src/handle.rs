//! Load handles - per-resource load state machine
//!
//! Every asset or scene request is tracked by a shared handle core:
//! - `NoLoad -> Loading` when the first request issues the load primitive
//! - `Loading -> Loaded` when the primitive completes, releasing waiters in FIFO order
//! - `Loading -> NoLoad` when the primitive fails; the handle leaves its registry
//!
//! The in-flight operation lives in the handle, not in the task that started
//! it. Any waiter that gets polled drives it, and a synchronous caller can
//! take it out and block on it.

use crate::asset::Asset;
use crate::error::{BundleError, BundleResult};
use crate::registry::HandleRegistry;
use crate::source::PackageHandle;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a load handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get raw ID value
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Load state for a handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    /// Nothing requested yet, or the last attempt failed
    #[default]
    NoLoad = 0,
    /// Load primitive issued, waiters may be queued
    Loading = 1,
    /// Payload available
    Loaded = 2,
}

/// Loaded resource held by a handle
pub(crate) enum Payload {
    Asset(Arc<dyn Any + Send + Sync>),
    /// The scene system owns the actual result
    Scene,
}

/// What a handle was created for
#[derive(Clone, Copy, Debug)]
pub(crate) enum HandleKind {
    Asset {
        type_id: TypeId,
        type_name: &'static str,
    },
    Scene,
}

impl HandleKind {
    pub(crate) fn asset<T: Asset>() -> Self {
        Self::Asset {
            type_id: TypeId::of::<T>(),
            type_name: T::type_name(),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Asset { type_name, .. } => type_name,
            Self::Scene => "scene",
        }
    }

    pub(crate) fn same_type(&self, other: &HandleKind) -> bool {
        match (self, other) {
            (Self::Asset { type_id: a, .. }, Self::Asset { type_id: b, .. }) => a == b,
            (Self::Scene, Self::Scene) => true,
            _ => false,
        }
    }
}

/// In-flight load operation
pub(crate) type LoadOp = BoxFuture<'static, BundleResult<Payload>>;

type Waiter = oneshot::Sender<BundleResult<()>>;

/// Place of an async waiter in the resumption order
struct Turn {
    ticket: u64,
    /// Set while the waiter has its result but an earlier one has not resumed
    waker: Option<Waker>,
}

struct HandleState {
    state: LoadState,
    payload: Option<Payload>,
    /// Only non-empty while `Loading`
    waiters: Vec<Waiter>,
    /// `None` while `Loading` means the operation is checked out by a poller
    op: Option<LoadOp>,
    /// Thread currently running the load, if any
    driver: Option<ThreadId>,
    /// Tasks that polled the operation while it was pending
    pollers: Vec<Waker>,
    /// Async waiters not yet resumed, in registration order
    turns: VecDeque<Turn>,
    next_ticket: u64,
    last_error: Option<BundleError>,
    invalidated: bool,
}

impl HandleState {
    fn add_poller(&mut self, waker: &Waker) {
        if !self.pollers.iter().any(|w| w.will_wake(waker)) {
            self.pollers.push(waker.clone());
        }
    }

    fn new() -> Self {
        Self {
            state: LoadState::NoLoad,
            payload: None,
            waiters: Vec::new(),
            op: None,
            driver: None,
            pollers: Vec::new(),
            turns: VecDeque::new(),
            next_ticket: 0,
            last_error: None,
            invalidated: false,
        }
    }
}

/// Shared handle data
pub(crate) struct HandleCore {
    id: HandleId,
    path: Arc<str>,
    package: Arc<str>,
    kind: HandleKind,
    backing: Option<PackageHandle>,
    registry: Weak<HandleRegistry>,
    inner: Mutex<HandleState>,
}

enum Step {
    Ready,
    Issue,
    Drain(LoadOp),
    Wait(Completion),
    Reentrant,
}

impl HandleCore {
    pub(crate) fn new(
        path: &str,
        package: Arc<str>,
        kind: HandleKind,
        backing: Option<PackageHandle>,
        registry: Weak<HandleRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: HandleId::allocate(),
            path: Arc::from(path),
            package,
            kind,
            backing,
            registry,
            inner: Mutex::new(HandleState::new()),
        })
    }

    /// Create an unregistered handle that already carries its payload
    pub(crate) fn detached(path: &str, package: &str, kind: HandleKind, payload: Payload) -> Arc<Self> {
        let core = Self::new(path, Arc::from(package), kind, None, Weak::new());
        {
            let mut inner = core.inner.lock();
            inner.state = LoadState::Loaded;
            inner.payload = Some(payload);
        }
        core
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn package(&self) -> &str {
        &self.package
    }

    pub(crate) fn kind(&self) -> HandleKind {
        self.kind
    }

    pub(crate) fn backing(&self) -> Option<&PackageHandle> {
        self.backing.as_ref()
    }

    pub(crate) fn state(&self) -> LoadState {
        self.inner.lock().state
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.inner.lock().invalidated
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    #[cfg(test)]
    pub(crate) fn poller_count(&self) -> usize {
        self.inner.lock().pollers.len()
    }

    #[cfg(test)]
    pub(crate) fn has_payload(&self) -> bool {
        self.inner.lock().payload.is_some()
    }

    pub(crate) fn asset<T: Asset>(&self) -> Option<Arc<T>> {
        match &self.inner.lock().payload {
            Some(Payload::Asset(asset)) => asset.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    fn invalidated_error(&self) -> BundleError {
        BundleError::HandleInvalidated(self.path.to_string())
    }

    /// Run the load to completion on the calling thread
    ///
    /// `NoLoad` issues the synchronous primitive; `Loading` drains the
    /// operation already in flight instead of issuing a second one.
    pub(crate) fn load_blocking<F>(self: &Arc<Self>, issue: F) -> BundleResult<()>
    where
        F: FnOnce() -> BundleResult<Payload>,
    {
        let step = {
            let mut inner = self.inner.lock();
            if inner.invalidated {
                return Err(self.invalidated_error());
            }
            match inner.state {
                LoadState::Loaded => Step::Ready,
                LoadState::NoLoad => {
                    inner.state = LoadState::Loading;
                    inner.driver = Some(thread::current().id());
                    Step::Issue
                }
                LoadState::Loading => self.checkout(&mut inner),
            }
        };

        match step {
            Step::Issue => {
                log::debug!("Loading '{}' from package '{}'", self.path, self.package);
                self.complete(issue())
            }
            step => self.run(step),
        }
    }

    /// Drain an in-flight load without ever issuing a new one
    pub(crate) fn finish(self: &Arc<Self>) -> BundleResult<()> {
        let step = {
            let mut inner = self.inner.lock();
            if inner.invalidated {
                return Err(self.invalidated_error());
            }
            match inner.state {
                LoadState::Loaded => return Ok(()),
                LoadState::NoLoad => {
                    return Err(inner
                        .last_error
                        .clone()
                        .unwrap_or_else(|| self.invalidated_error()))
                }
                LoadState::Loading => self.checkout(&mut inner),
            }
        };
        self.run(step)
    }

    /// Decide how a blocking caller gets at a `Loading` operation
    ///
    /// If another thread is polling it right now the caller queues as a
    /// waiter; if this thread is, draining would recurse into itself.
    fn checkout(self: &Arc<Self>, inner: &mut HandleState) -> Step {
        let current = thread::current().id();
        match inner.op.take() {
            Some(op) => {
                inner.driver = Some(current);
                Step::Drain(op)
            }
            None if inner.driver == Some(current) => Step::Reentrant,
            // Blocking callers stay out of the resumption order; the earlier
            // waiters may be tasks on this very thread
            None => Step::Wait(self.queue(inner, false)),
        }
    }

    fn queue(self: &Arc<Self>, inner: &mut HandleState, ordered: bool) -> Completion {
        let (tx, rx) = oneshot::channel();
        inner.waiters.push(tx);
        let ticket = ordered.then(|| {
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.turns.push_back(Turn { ticket, waker: None });
            ticket
        });
        Completion {
            core: self.clone(),
            rx,
            ticket,
            outcome: None,
        }
    }

    fn run(&self, step: Step) -> BundleResult<()> {
        match step {
            Step::Ready | Step::Issue => Ok(()),
            Step::Drain(op) => {
                log::debug!("Forcing in-flight load of '{}' to finish", self.path);
                self.complete(futures::executor::block_on(op))
            }
            Step::Wait(completion) => futures::executor::block_on(completion),
            Step::Reentrant => {
                let err = BundleError::ReentrantLoad(self.path.to_string());
                log::error!("{}", err);
                Err(err)
            }
        }
    }

    /// Move `NoLoad -> Loading` with `issue` as the in-flight operation
    ///
    /// Returns `false` if a load is already running or finished.
    pub(crate) fn start<F>(&self, issue: F) -> BundleResult<bool>
    where
        F: FnOnce() -> LoadOp,
    {
        let mut inner = self.inner.lock();
        if inner.invalidated {
            return Err(self.invalidated_error());
        }
        if inner.state != LoadState::NoLoad {
            return Ok(false);
        }
        log::debug!("Loading '{}' from package '{}' (async)", self.path, self.package);
        inner.state = LoadState::Loading;
        inner.op = Some(issue());
        Ok(true)
    }

    /// Start the load if needed and queue a waiter for it
    ///
    /// Returns `None` when the handle is already loaded.
    pub(crate) fn enqueue<F>(self: &Arc<Self>, issue: F) -> BundleResult<Option<Completion>>
    where
        F: FnOnce() -> LoadOp,
    {
        self.start(issue)?;
        self.join()
    }

    /// Queue a waiter on the current load without starting one
    pub(crate) fn join(self: &Arc<Self>) -> BundleResult<Option<Completion>> {
        let mut inner = self.inner.lock();
        if inner.invalidated {
            return Err(self.invalidated_error());
        }
        match inner.state {
            LoadState::Loaded => Ok(None),
            LoadState::NoLoad => Err(inner
                .last_error
                .clone()
                .unwrap_or_else(|| self.invalidated_error())),
            LoadState::Loading => Ok(Some(self.queue(&mut inner, true))),
        }
    }

    /// Poll the in-flight operation once
    ///
    /// If another thread has it checked out, the caller's waker is kept so a
    /// dropped driver can hand the operation over.
    fn drive(&self, cx: &mut Context<'_>) {
        let mut op = {
            let mut inner = self.inner.lock();
            let Some(op) = inner.op.take() else {
                if inner.state == LoadState::Loading {
                    inner.add_poller(cx.waker());
                }
                return;
            };
            inner.driver = Some(thread::current().id());
            op
        };

        match op.as_mut().poll(cx) {
            Poll::Ready(result) => {
                let _ = self.complete(result);
            }
            Poll::Pending => {
                let mut inner = self.inner.lock();
                if inner.state == LoadState::Loading && !inner.invalidated && inner.op.is_none() {
                    inner.op = Some(op);
                    inner.driver = None;
                    inner.add_poller(cx.waker());
                }
            }
        }
    }

    /// `true` once every waiter registered before `ticket` has resumed
    fn take_turn(&self, ticket: u64, waker: &Waker) -> bool {
        let next = {
            let mut inner = self.inner.lock();
            let Some(pos) = inner.turns.iter().position(|turn| turn.ticket == ticket) else {
                return true;
            };
            if pos > 0 {
                inner.turns[pos].waker = Some(waker.clone());
                return false;
            }
            inner.turns.pop_front();
            inner.turns.front_mut().and_then(|turn| turn.waker.take())
        };
        if let Some(next) = next {
            next.wake();
        }
        true
    }

    /// Give up a place in the resumption order
    fn leave_turns(&self, ticket: u64) {
        let next = {
            let mut inner = self.inner.lock();
            let Some(pos) = inner.turns.iter().position(|turn| turn.ticket == ticket) else {
                return;
            };
            inner.turns.remove(pos);
            if pos == 0 {
                inner.turns.front_mut().and_then(|turn| turn.waker.take())
            } else {
                None
            }
        };
        if let Some(next) = next {
            next.wake();
        }
    }

    /// Finish the `Loading` transition and release every waiter
    pub(crate) fn complete(&self, result: BundleResult<Payload>) -> BundleResult<()> {
        let (waiters, outcome) = {
            let mut inner = self.inner.lock();
            if inner.invalidated || inner.state != LoadState::Loading {
                return Err(self.invalidated_error());
            }
            inner.op = None;
            inner.driver = None;
            inner.pollers.clear();
            let outcome = match result {
                Ok(payload) => {
                    inner.payload = Some(payload);
                    inner.state = LoadState::Loaded;
                    inner.last_error = None;
                    Ok(())
                }
                Err(err) => {
                    inner.state = LoadState::NoLoad;
                    inner.last_error = Some(err.clone());
                    Err(err)
                }
            };
            (core::mem::take(&mut inner.waiters), outcome)
        };

        match &outcome {
            Ok(()) => log::debug!(
                "Loaded '{}' from package '{}' ({} waiters)",
                self.path,
                self.package,
                waiters.len()
            ),
            Err(err) => {
                log::error!("{}", err);
                if let Some(registry) = self.registry.upgrade() {
                    registry.detach(self.id);
                }
            }
        }

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    /// Drop the payload and release waiters; the handle is unusable afterwards
    pub(crate) fn invalidate(&self) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.invalidated = true;
            inner.state = LoadState::NoLoad;
            inner.payload = None;
            inner.op = None;
            inner.driver = None;
            inner.pollers.clear();
            core::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(self.invalidated_error()));
        }
    }
}

/// Resolves once the handle leaves `Loading`
///
/// Polling also drives the handle's in-flight operation, so every waiter
/// makes progress even if the task that started the load is gone. Async
/// waiters resume in registration order, whichever of them finished the load.
pub(crate) struct Completion {
    core: Arc<HandleCore>,
    rx: oneshot::Receiver<BundleResult<()>>,
    /// `None` for blocking callers and once resumed
    ticket: Option<u64>,
    outcome: Option<BundleResult<()>>,
}

impl Future for Completion {
    type Output = BundleResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.outcome.is_none() {
            this.core.drive(cx);
            let outcome = match Pin::new(&mut this.rx).poll(cx) {
                Poll::Ready(Ok(result)) => result,
                Poll::Ready(Err(_)) => Err(this.core.invalidated_error()),
                Poll::Pending => return Poll::Pending,
            };
            this.outcome = Some(outcome);
        }

        if let Some(ticket) = this.ticket {
            if !this.core.take_turn(ticket, cx.waker()) {
                return Poll::Pending;
            }
            this.ticket = None;
        }

        Poll::Ready(
            this.outcome
                .take()
                .unwrap_or_else(|| Err(this.core.invalidated_error())),
        )
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket {
            self.core.leave_turns(ticket);
        }

        // The operation may only know this task's waker; hand it to the others
        let pollers = {
            let mut inner = self.core.inner.lock();
            if inner.state != LoadState::Loading {
                return;
            }
            core::mem::take(&mut inner.pollers)
        };
        for waker in pollers {
            waker.wake();
        }
    }
}

/// Typed handle to an asset
pub struct LoadHandle<T> {
    core: Arc<HandleCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Asset> LoadHandle<T> {
    pub(crate) fn from_core(core: Arc<HandleCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<HandleCore> {
        &self.core
    }

    /// Get the handle ID
    pub fn id(&self) -> HandleId {
        self.core.id()
    }

    /// Resource path inside the package
    pub fn path(&self) -> &str {
        self.core.path()
    }

    /// Package the resource belongs to
    pub fn package(&self) -> &str {
        self.core.package()
    }

    /// Get the load state
    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    /// Check if the asset is loaded
    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// `false` once the handle was unloaded or its package torn down
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// The opened package this asset loads from
    ///
    /// `None` for handles created in develop mode.
    pub fn backing_package(&self) -> Option<&PackageHandle> {
        self.core.backing()
    }

    /// The loaded asset, if any
    pub fn asset(&self) -> Option<Arc<T>> {
        self.core.asset::<T>()
    }

    /// Whether both handles are the same instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Cast to an untyped handle
    pub fn untyped(&self) -> UntypedHandle {
        UntypedHandle {
            core: self.core.clone(),
        }
    }
}

impl<T> Clone for LoadHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for LoadHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl<T> Eq for LoadHandle<T> {}

impl<T> Hash for LoadHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl<T> fmt::Debug for LoadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("id", &self.core.id)
            .field("path", &self.core.path)
            .field("package", &self.core.package)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Handle to a scene load
///
/// Scenes carry no payload; the scene system owns what was loaded.
#[derive(Clone)]
pub struct SceneHandle {
    core: Arc<HandleCore>,
}

impl SceneHandle {
    pub(crate) fn from_core(core: Arc<HandleCore>) -> Self {
        Self { core }
    }

    /// Get the handle ID
    pub fn id(&self) -> HandleId {
        self.core.id()
    }

    /// Scene path inside the package
    pub fn path(&self) -> &str {
        self.core.path()
    }

    /// Package the scene belongs to
    pub fn package(&self) -> &str {
        self.core.package()
    }

    /// Get the load state
    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    /// Check if the scene bundle is loaded
    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// `false` once the handle was unloaded or its package torn down
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Wait for an in-flight scene load
    pub async fn wait(&self) -> BundleResult<()> {
        match self.core.join()? {
            Some(completion) => completion.await,
            None => Ok(()),
        }
    }

    /// Force an in-flight scene load to finish on this thread
    pub fn finish(&self) -> BundleResult<()> {
        self.core.finish()
    }

    /// Cast to an untyped handle
    pub fn untyped(&self) -> UntypedHandle {
        UntypedHandle {
            core: self.core.clone(),
        }
    }
}

impl fmt::Debug for SceneHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneHandle")
            .field("id", &self.core.id)
            .field("path", &self.core.path)
            .field("package", &self.core.package)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Untyped handle as stored by a package registry
#[derive(Clone)]
pub struct UntypedHandle {
    core: Arc<HandleCore>,
}

impl UntypedHandle {
    pub(crate) fn from_core(core: Arc<HandleCore>) -> Self {
        Self { core }
    }

    /// Get the handle ID
    pub fn id(&self) -> HandleId {
        self.core.id()
    }

    /// Resource path inside the package
    pub fn path(&self) -> &str {
        self.core.path()
    }

    /// Package the resource belongs to
    pub fn package(&self) -> &str {
        self.core.package()
    }

    /// Get the load state
    pub fn state(&self) -> LoadState {
        self.core.state()
    }

    /// Check if loaded
    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// `false` once the handle was unloaded or its package torn down
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Check if this handle tracks a scene
    pub fn is_scene(&self) -> bool {
        matches!(self.core.kind(), HandleKind::Scene)
    }

    /// Asset type name, or `"scene"`
    pub fn type_name(&self) -> &'static str {
        self.core.kind().type_name()
    }

    /// Cast to a typed handle; `None` if the asset type differs
    pub fn typed<T: Asset>(&self) -> Option<LoadHandle<T>> {
        if self.core.kind().same_type(&HandleKind::asset::<T>()) {
            Some(LoadHandle::from_core(self.core.clone()))
        } else {
            None
        }
    }

    /// Cast to a scene handle
    pub fn scene(&self) -> Option<SceneHandle> {
        self.is_scene().then(|| SceneHandle::from_core(self.core.clone()))
    }
}

impl fmt::Debug for UntypedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UntypedHandle")
            .field("id", &self.core.id)
            .field("path", &self.core.path)
            .field("type", &self.type_name())
            .field("state", &self.core.state())
            .finish()
    }
}
