//! Periodically refreshed window snapshot
//!
//! The cache owns every `FocusableWindow`. Readers clone an `Arc` of the
//! latest snapshot under a brief read lock, so a query never waits on
//! enumeration and never observes a half-built snapshot.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors from window enumeration and focusing
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("window enumeration failed: {0}")]
    Enumeration(String),

    #[error("window {0} is no longer available")]
    Gone(u32),

    #[error("failed to focus window {window_id}: {reason}")]
    Focus { window_id: u32, reason: String },

    #[error("window focusing is not supported on this platform")]
    Unsupported,
}

/// Opaque OS window handle
///
/// The native part is only meaningful to the `WindowSource` that created it.
#[derive(Clone)]
pub struct WindowHandle {
    pub window_id: u32,
    pub pid: i32,
    native: Option<Arc<dyn Any + Send + Sync>>,
}

impl WindowHandle {
    pub fn new(window_id: u32, pid: i32) -> Self {
        Self {
            window_id,
            pid,
            native: None,
        }
    }

    pub fn with_native<T: Any + Send + Sync>(window_id: u32, pid: i32, native: T) -> Self {
        Self {
            window_id,
            pid,
            native: Some(Arc::new(native)),
        }
    }

    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.as_deref().and_then(|n| n.downcast_ref::<T>())
    }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowHandle")
            .field("window_id", &self.window_id)
            .field("pid", &self.pid)
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl PartialEq for WindowHandle {
    fn eq(&self, other: &Self) -> bool {
        self.window_id == other.window_id && self.pid == other.pid
    }
}

impl Eq for WindowHandle {}

/// The process owning a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub pid: i32,
    pub name: String,
    pub bundle_id: Option<String>,
}

/// A window that can be brought to front
#[derive(Debug, Clone)]
pub struct FocusableWindow {
    pub window_id: u32,
    pub pid: i32,
    pub app_name: String,
    pub title: String,
    pub handle: WindowHandle,
    pub process: ProcessDescriptor,
}

/// Enumerates and focuses windows on the host platform
pub trait WindowSource: Send + Sync {
    /// On-screen, layer-0, titled windows in front-to-back order
    fn enumerate(&self) -> Result<Vec<FocusableWindow>, WindowError>;

    /// Raise the window and make it key, even if its app is not frontmost
    fn focus(&self, handle: &WindowHandle) -> Result<(), WindowError>;
}

/// Best-effort handle discovery for apps whose windows are missing from
/// the standard accessibility window list
pub trait HandleDiscovery: Send + Sync {
    /// Try to produce handles for `window_ids` owned by `pid`
    fn discover(&self, pid: i32, window_ids: &[u32]) -> Vec<WindowHandle>;

    /// Forget anything remembered about processes not in `live_pids`
    fn retain_pids(&self, _live_pids: &HashSet<i32>) {}
}

/// Remembers window ids a discovery strategy failed to resolve.
///
/// An id is not offered to the inner strategy again while it stays
/// missing; the memory for a process goes away once it has no missing
/// windows left.
pub struct MemoizedDiscovery<D> {
    inner: D,
    misses: Mutex<HashMap<i32, HashSet<u32>>>,
}

impl<D: HandleDiscovery> MemoizedDiscovery<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            misses: Mutex::new(HashMap::new()),
        }
    }
}

impl<D: HandleDiscovery> HandleDiscovery for MemoizedDiscovery<D> {
    fn discover(&self, pid: i32, window_ids: &[u32]) -> Vec<WindowHandle> {
        let wanted: Vec<u32> = {
            let mut misses = self.misses.lock();
            let known = misses.entry(pid).or_default();
            known.retain(|id| window_ids.contains(id));
            window_ids
                .iter()
                .copied()
                .filter(|id| !known.contains(id))
                .collect()
        };
        if wanted.is_empty() {
            return Vec::new();
        }

        let found = self.inner.discover(pid, &wanted);
        let mut misses = self.misses.lock();
        let known = misses.entry(pid).or_default();
        known.extend(
            wanted
                .iter()
                .filter(|id| !found.iter().any(|h| h.window_id == **id)),
        );
        found
    }

    fn retain_pids(&self, live_pids: &HashSet<i32>) {
        self.misses.lock().retain(|pid, _| live_pids.contains(pid));
        self.inner.retain_pids(live_pids);
    }
}

/// Discovery strategy that never finds anything
#[derive(Debug, Default)]
pub struct NoDiscovery;

impl HandleDiscovery for NoDiscovery {
    fn discover(&self, _pid: i32, _window_ids: &[u32]) -> Vec<WindowHandle> {
        Vec::new()
    }
}

/// Window source for platforms without window-server access
#[derive(Debug, Default)]
pub struct NullWindowSource;

impl WindowSource for NullWindowSource {
    fn enumerate(&self) -> Result<Vec<FocusableWindow>, WindowError> {
        Ok(Vec::new())
    }

    fn focus(&self, _handle: &WindowHandle) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }
}

/// Lookup interface used by the dispatcher
pub trait WindowFocusResolver: Send + Sync {
    /// Best-known window of `pid`; never triggers a refresh
    fn find_window(&self, pid: i32) -> Option<WindowHandle>;

    fn focus(&self, handle: &WindowHandle) -> Result<(), WindowError>;

    /// Every known window of `pid`, front to back
    fn windows_for(&self, pid: i32) -> Vec<WindowHandle> {
        self.find_window(pid).into_iter().collect()
    }
}

/// One consistent enumeration result
#[derive(Debug, Default)]
pub struct WindowSnapshot {
    windows: Vec<FocusableWindow>,
    by_pid: HashMap<i32, Vec<usize>>,
    generation: u64,
}

impl WindowSnapshot {
    fn new(windows: Vec<FocusableWindow>, generation: u64) -> Self {
        let mut by_pid: HashMap<i32, Vec<usize>> = HashMap::new();
        for (i, window) in windows.iter().enumerate() {
            by_pid.entry(window.pid).or_default().push(i);
        }
        Self {
            windows,
            by_pid,
            generation,
        }
    }

    /// Frontmost window of `pid`
    pub fn find_window(&self, pid: i32) -> Option<&FocusableWindow> {
        self.by_pid
            .get(&pid)
            .and_then(|indices| indices.first())
            .map(|&i| &self.windows[i])
    }

    /// Windows of `pid`, front to back
    pub fn windows_for(&self, pid: i32) -> Vec<&FocusableWindow> {
        self.by_pid
            .get(&pid)
            .map(|indices| indices.iter().map(|&i| &self.windows[i]).collect())
            .unwrap_or_default()
    }

    /// Refresh counter; 0 until the first successful refresh
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Owner of the current window snapshot
pub struct WindowCache {
    source: Arc<dyn WindowSource>,
    snapshot: RwLock<Arc<WindowSnapshot>>,
    generation: AtomicU64,
}

impl WindowCache {
    pub fn new(source: Arc<dyn WindowSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(WindowSnapshot::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Point-in-time view of the cache
    pub fn snapshot(&self) -> Arc<WindowSnapshot> {
        self.snapshot.read().clone()
    }

    /// Enumerate once and swap in the new snapshot.
    ///
    /// Enumeration runs without holding the lock; on failure the previous
    /// snapshot stays in place.
    pub fn refresh(&self) -> Result<usize, WindowError> {
        let windows = self.source.enumerate()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(WindowSnapshot::new(windows, generation));
        let count = snapshot.len();
        *self.snapshot.write() = snapshot;
        debug!(count, generation, "window cache refreshed");
        Ok(count)
    }

    /// Refresh every `interval` on the blocking pool until shutdown
    pub fn spawn_refresh(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "window cache refresh started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cache = Arc::clone(&cache);
                        match tokio::task::spawn_blocking(move || cache.refresh()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!(?e, "window cache refresh failed, keeping previous snapshot"),
                            Err(e) => warn!(?e, "window cache refresh task panicked"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            info!("window cache refresh stopped");
        })
    }
}

impl WindowFocusResolver for WindowCache {
    fn find_window(&self, pid: i32) -> Option<WindowHandle> {
        self.snapshot().find_window(pid).map(|w| w.handle.clone())
    }

    fn focus(&self, handle: &WindowHandle) -> Result<(), WindowError> {
        self.source.focus(handle)
    }

    fn windows_for(&self, pid: i32) -> Vec<WindowHandle> {
        self.snapshot()
            .windows_for(pid)
            .into_iter()
            .map(|w| w.handle.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    fn window(window_id: u32, pid: i32, title: &str) -> FocusableWindow {
        FocusableWindow {
            window_id,
            pid,
            app_name: format!("app-{pid}"),
            title: title.to_string(),
            handle: WindowHandle::new(window_id, pid),
            process: ProcessDescriptor {
                pid,
                name: format!("app-{pid}"),
                bundle_id: None,
            },
        }
    }

    /// Source returning a scripted sequence of enumerations
    struct ScriptedSource {
        results: Mutex<Vec<Result<Vec<FocusableWindow>, WindowError>>>,
    }

    impl WindowSource for ScriptedSource {
        fn enumerate(&self) -> Result<Vec<FocusableWindow>, WindowError> {
            self.results.lock().remove(0)
        }

        fn focus(&self, _handle: &WindowHandle) -> Result<(), WindowError> {
            Ok(())
        }
    }

    /// Source that blocks inside `enumerate` until released
    struct GatedSource {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<Vec<FocusableWindow>>>,
    }

    impl WindowSource for GatedSource {
        fn enumerate(&self) -> Result<Vec<FocusableWindow>, WindowError> {
            let _ = self.entered.lock().send(());
            self.release
                .lock()
                .recv()
                .map_err(|e| WindowError::Enumeration(e.to_string()))
        }

        fn focus(&self, _handle: &WindowHandle) -> Result<(), WindowError> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_before_first_refresh() {
        let cache = WindowCache::new(Arc::new(NullWindowSource));
        assert!(cache.find_window(42).is_none());
        assert_eq!(cache.snapshot().generation(), 0);
    }

    #[test]
    fn test_find_window_returns_frontmost() {
        let source = ScriptedSource {
            results: Mutex::new(vec![Ok(vec![
                window(10, 1, "front"),
                window(11, 2, "other"),
                window(12, 1, "back"),
            ])]),
        };
        let cache = WindowCache::new(Arc::new(source));
        assert_eq!(cache.refresh().unwrap(), 3);

        assert_eq!(cache.find_window(1).unwrap().window_id, 10);
        let ids: Vec<u32> = cache.windows_for(1).iter().map(|h| h.window_id).collect();
        assert_eq!(ids, vec![10, 12]);
        assert!(cache.find_window(3).is_none());
    }

    #[test]
    fn test_failed_refresh_keeps_previous_snapshot() {
        let source = ScriptedSource {
            results: Mutex::new(vec![
                Ok(vec![window(10, 1, "front")]),
                Err(WindowError::Enumeration("window server busy".to_string())),
            ]),
        };
        let cache = WindowCache::new(Arc::new(source));
        cache.refresh().unwrap();
        assert!(cache.refresh().is_err());
        assert_eq!(cache.find_window(1).unwrap().window_id, 10);
        assert_eq!(cache.snapshot().generation(), 1);
    }

    #[test]
    fn test_query_during_refresh_sees_prior_snapshot() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let source = GatedSource {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let cache = Arc::new(WindowCache::new(Arc::new(source)));

        release_tx.send(vec![window(10, 1, "old")]).unwrap();
        cache.refresh().unwrap();
        entered_rx.recv().unwrap();

        let refreshing = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.refresh())
        };
        entered_rx.recv().unwrap();

        // Refresh is blocked mid-enumeration
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(cache.find_window(1).unwrap().window_id, 10);
        assert!(cache.find_window(2).is_none());

        release_tx
            .send(vec![window(20, 2, "new"), window(21, 1, "new")])
            .unwrap();
        refreshing.join().unwrap().unwrap();

        assert_eq!(cache.find_window(1).unwrap().window_id, 21);
        assert_eq!(cache.find_window(2).unwrap().window_id, 20);
        // The old snapshot held by a reader is untouched
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_refresh_stops_on_shutdown() {
        let source = ScriptedSource {
            results: Mutex::new(vec![Ok(vec![window(10, 1, "front")])]),
        };
        let cache = Arc::new(WindowCache::new(Arc::new(source)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = cache.spawn_refresh(Duration::from_secs(60), shutdown_rx);
        // First tick fires immediately
        for _ in 0..200 {
            if cache.find_window(1).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.find_window(1).unwrap().window_id, 10);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_native_handle_downcast() {
        let handle = WindowHandle::with_native(5, 1, 77usize);
        assert_eq!(handle.native::<usize>(), Some(&77));
        assert!(handle.native::<String>().is_none());
        assert_eq!(handle, WindowHandle::new(5, 1));
    }

    /// Resolves only ids listed in `resolvable`, recording every request
    struct CountingDiscovery {
        resolvable: Vec<u32>,
        requests: Mutex<Vec<(i32, Vec<u32>)>>,
    }

    impl HandleDiscovery for CountingDiscovery {
        fn discover(&self, pid: i32, window_ids: &[u32]) -> Vec<WindowHandle> {
            self.requests.lock().push((pid, window_ids.to_vec()));
            window_ids
                .iter()
                .filter(|id| self.resolvable.contains(id))
                .map(|&id| WindowHandle::new(id, pid))
                .collect()
        }
    }

    #[test]
    fn test_memoized_discovery_skips_known_misses() {
        let discovery = MemoizedDiscovery::new(CountingDiscovery {
            resolvable: vec![2],
            requests: Mutex::new(Vec::new()),
        });

        let found = discovery.discover(7, &[1, 2]);
        assert_eq!(found, vec![WindowHandle::new(2, 7)]);

        // Window 1 failed once and is not scanned for again
        assert!(discovery.discover(7, &[1]).is_empty());
        assert!(discovery.discover(7, &[1]).is_empty());

        // A new missing window is still scanned, alone
        discovery.discover(7, &[1, 3]);
        assert_eq!(
            *discovery.inner.requests.lock(),
            vec![(7, vec![1, 2]), (7, vec![3])]
        );
    }

    #[test]
    fn test_memoized_discovery_forgets_dead_processes() {
        let discovery = MemoizedDiscovery::new(CountingDiscovery {
            resolvable: vec![],
            requests: Mutex::new(Vec::new()),
        });
        discovery.discover(7, &[1]);
        discovery.discover(8, &[1]);

        discovery.retain_pids(&HashSet::from([8]));
        discovery.discover(7, &[1]);
        discovery.discover(8, &[1]);
        assert_eq!(
            *discovery.inner.requests.lock(),
            vec![(7, vec![1]), (8, vec![1]), (7, vec![1])]
        );
    }
}
