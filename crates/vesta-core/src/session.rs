//! Kept-alive kernel sessions.
//!
//! Each session owns a request queue and a kernel slot. The slot is only
//! touched from operations running on that queue: the kernel is taken out,
//! used, and put back, so the guard is never held across an await.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::kernel::{Kernel, KernelLauncher, KernelRequest};
use crate::queue::{RequestQueue, Submission};

type KernelSlot = Arc<Mutex<Option<Box<dyn Kernel>>>>;

/// Identity of a session: the canonical absolute path of the executed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(PathBuf);

impl SessionKey {
    /// Canonicalize `path` into a key.
    pub async fn canonical(path: &Path) -> Result<Self> {
        Ok(Self(tokio::fs::canonicalize(path).await?))
    }

    /// Wrap a path that is already canonical.
    pub fn from_canonical(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

struct Activity {
    last_used: Instant,
    keepalive: Duration,
}

/// A kept-alive kernel and the queue that serializes access to it.
pub struct KernelSession {
    key: SessionKey,
    queue: RequestQueue<()>,
    kernel: KernelSlot,
    activity: Mutex<Activity>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter even if the caller stops waiting.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn take_kernel(slot: &KernelSlot) -> Option<Box<dyn Kernel>> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

fn store_kernel(slot: &KernelSlot, kernel: Box<dyn Kernel>) {
    match slot.lock() {
        Ok(mut guard) => *guard = Some(kernel),
        Err(_) => tracing::warn!("Kernel slot poisoned, dropping kernel"),
    }
}

async fn shutdown_kernel(kernel: Box<dyn Kernel>) {
    if let Err(e) = kernel.shutdown().await {
        tracing::warn!("Kernel shutdown failed: {}", e);
    }
}

impl KernelSession {
    fn new(key: SessionKey, keepalive: Duration) -> Self {
        Self {
            key,
            queue: RequestQueue::new(),
            kernel: Arc::new(Mutex::new(None)),
            activity: Mutex::new(Activity {
                last_used: Instant::now(),
                keepalive,
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether a kernel is currently parked in the slot.
    pub fn has_kernel(&self) -> bool {
        self.kernel
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn touch(&self, keepalive: Option<Duration>) {
        if let Ok(mut activity) = self.activity.lock() {
            activity.last_used = Instant::now();
            if let Some(keepalive) = keepalive {
                activity.keepalive = keepalive;
            }
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return false;
        }
        self.activity
            .lock()
            .map(|activity| now.duration_since(activity.last_used) > activity.keepalive)
            .unwrap_or(true)
    }

    /// Execute through this session's queue, launching a kernel if needed.
    ///
    /// On failure the kernel is shut down and the slot left empty.
    pub async fn execute(
        &self,
        launcher: Arc<dyn KernelLauncher>,
        request: KernelRequest,
    ) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight);
        self.touch(None);

        let slot = self.kernel.clone();
        let result = self
            .queue
            .submit(move || async move {
                let mut kernel = match take_kernel(&slot) {
                    Some(kernel) => kernel,
                    None => {
                        tracing::debug!("Launching kernel for {}", request.input.display());
                        launcher.launch(&request).await?
                    }
                };

                match kernel.execute(&request).await {
                    Ok(()) => {
                        store_kernel(&slot, kernel);
                        Ok(())
                    }
                    Err(e) => {
                        shutdown_kernel(kernel).await;
                        Err(e)
                    }
                }
            })
            .await;

        self.touch(None);
        result
    }

    /// Queue a shutdown of the parked kernel behind any pending work.
    pub fn shutdown(&self) -> Submission<()> {
        let slot = self.kernel.clone();
        self.queue.submit(move || async move {
            if let Some(kernel) = take_kernel(&slot) {
                shutdown_kernel(kernel).await;
            }
            Ok(())
        })
    }
}

/// Registry of kept-alive sessions, keyed by canonical artifact path.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<FxHashMap<SessionKey, Arc<KernelSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the session for `key`.
    ///
    /// Sessions idle past their keepalive are shut down first.
    pub async fn session(&self, key: &SessionKey, keepalive: Duration) -> Arc<KernelSession> {
        self.evict_idle().await;

        let session = {
            let mut sessions = self.lock();
            sessions
                .entry(key.clone())
                .or_insert_with(|| {
                    tracing::debug!("Creating kernel session for {}", key.path().display());
                    Arc::new(KernelSession::new(key.clone(), keepalive))
                })
                .clone()
        };
        session.touch(Some(keepalive));
        session
    }

    /// Shut down sessions whose keepalive has expired. Returns how many.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<KernelSession>> = {
            let mut sessions = self.lock();
            let keys: Vec<SessionKey> = sessions
                .iter()
                .filter(|(_, session)| session.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| sessions.remove(key)).collect()
        };

        for session in &expired {
            tracing::debug!("Kernel session for {} expired", session.key().path().display());
            let _ = session.shutdown().await;
        }
        expired.len()
    }

    /// Shut down the kernel of the session for `key` behind its pending work.
    ///
    /// The session and its queue stay registered, so requests for the same
    /// artifact stay ordered; the next one launches a fresh kernel. Returns
    /// whether a session existed.
    pub fn invalidate(&self, key: &SessionKey) -> bool {
        let session = self.get(key);
        match session {
            Some(session) => {
                tracing::debug!("Invalidating kernel session for {}", key.path().display());
                // Enqueued on submit; the shutdown runs even though nobody waits.
                let _ = session.shutdown();
                true
            }
            None => false,
        }
    }

    /// The registered session for `key`, if any.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<KernelSession>> {
        self.lock().get(key).cloned()
    }

    /// Shut down every session.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<KernelSession>> =
            self.lock().drain().map(|(_, session)| session).collect();

        let shutdowns: Vec<_> = sessions.iter().map(|session| session.shutdown()).collect();
        for result in futures::future::join_all(shutdowns).await {
            if let Err(e) = result {
                tracing::warn!("Session shutdown failed: {}", e);
            }
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<SessionKey, Arc<KernelSession>>> {
        // Bookkeeping only; a poisoned map is still structurally valid.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
