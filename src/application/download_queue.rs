//! Single-worker download queue shared by every page of the app.
//!
//! Jobs run strictly one at a time on a dedicated `download-worker` thread,
//! in submission order. Pages talk to the queue through a cloned
//! [`DownloadQueue`] handle and receive updates through a [`Listener`]
//! bound to the download key. A page that is rebuilt while a job is in
//! flight re-binds with [`DownloadQueue::attach_listener`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::DownloadRegistry;
use super::transfer::Transfer;
use crate::domain::{AppError, DownloadItem, DownloadState};
use crate::storage::part_path;

/// Zero-argument unit of work run by the worker.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), AppError>> + Send>;

pub type StateCallback = Arc<dyn Fn(DownloadState) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Notification forwarded by a channel-backed [`Listener`].
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    State { key: String, state: DownloadState },
    Progress { key: String, mbps: f64 },
}

/// State and progress callbacks a page registers for one key.
#[derive(Clone)]
pub struct Listener {
    on_state: StateCallback,
    on_progress: Option<ProgressCallback>,
}

impl Listener {
    pub fn new(on_state: impl Fn(DownloadState) + Send + Sync + 'static) -> Self {
        Self {
            on_state: Arc::new(on_state),
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Listener that hands every notification to `sender`, so the receiving
    /// side (usually the UI loop) handles it on its own thread.
    pub fn forward_to(key: impl Into<String>, sender: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        let key = key.into();
        let state_key = key.clone();
        let state_sender = sender.clone();

        Self::new(move |state| {
            let _ = state_sender.send(DownloadEvent::State {
                key: state_key.clone(),
                state,
            });
        })
        .with_progress(move |mbps| {
            let _ = sender.send(DownloadEvent::Progress {
                key: key.clone(),
                mbps,
            });
        })
    }

    pub fn channel(key: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::forward_to(key, sender), receiver)
    }

    fn state_changed(&self, state: DownloadState) {
        (self.on_state)(state);
    }

    fn progress(&self, mbps: f64) {
        if let Some(ref on_progress) = self.on_progress {
            on_progress(mbps);
        }
    }
}

/// Bindings of a job that has been accepted and not yet finished.
struct ActiveJob {
    listener: Listener,
    cancel: CancellationToken,
}

struct Inner {
    transfer: Arc<dyn Transfer>,
    registry: Arc<DownloadRegistry>,
    sender: mpsc::UnboundedSender<Job>,
    /// Taken by the worker on first enqueue.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    pending: Arc<AtomicUsize>,
    active: Mutex<HashMap<String, ActiveJob>>,
    downloads: Mutex<Vec<DownloadItem>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the process-wide download queue. Cloning shares the queue.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<Inner>,
}

impl DownloadQueue {
    pub fn new(transfer: Arc<dyn Transfer>, registry: Arc<DownloadRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transfer,
                registry,
                sender,
                receiver: Mutex::new(Some(receiver)),
                pending: Arc::new(AtomicUsize::new(0)),
                active: Mutex::new(HashMap::new()),
                downloads: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<DownloadRegistry> {
        &self.inner.registry
    }

    /// Jobs enqueued but not yet picked up by the worker.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Snapshot of every download started in this process, oldest first.
    pub fn downloads(&self) -> Vec<DownloadItem> {
        lock(&self.inner.downloads).clone()
    }

    /// Appends `work` to the queue and makes sure the worker is running.
    pub fn enqueue<F, Fut>(&self, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let job: Job = Box::new(move || work().boxed());
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self.inner.sender.send(job).is_err() {
            // Only possible once the worker is gone.
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            error!("Download worker is not running, job dropped");
            return;
        }
        self.ensure_worker_started();
    }

    fn ensure_worker_started(&self) {
        let mut receiver = lock(&self.inner.receiver);
        let Some(jobs) = receiver.take() else {
            return;
        };

        let pending = self.inner.pending.clone();
        let spawned = std::thread::Builder::new()
            .name("download-worker".to_string())
            .spawn(move || run_worker(jobs, pending));

        match spawned {
            Ok(_) => info!("Download worker started"),
            Err(e) => error!("Failed to start download worker: {}", e),
        }
    }

    /// Queues a download of `url` into `final_path`.
    ///
    /// Returns false without doing anything when `key` is already queued or
    /// downloading. Otherwise returns immediately; the listener is told
    /// about every state change from here on.
    pub fn start_download(
        &self,
        title: impl Into<String>,
        url: impl Into<String>,
        final_path: impl Into<PathBuf>,
        key: impl Into<String>,
        listener: Listener,
    ) -> bool {
        let key = key.into();
        if !self.inner.registry.try_begin(&key) {
            debug!("Download {} already active, ignoring start", key);
            return false;
        }

        let url = url.into();
        let final_path = final_path.into();
        let item = DownloadItem::new(key.clone(), title.into(), url.clone(), final_path.clone());
        let index = {
            let mut downloads = lock(&self.inner.downloads);
            downloads.push(item);
            downloads.len() - 1
        };

        let cancel = CancellationToken::new();
        lock(&self.inner.active).insert(
            key.clone(),
            ActiveJob {
                listener: listener.clone(),
                cancel: cancel.clone(),
            },
        );

        info!("Queued download {} ({})", key, url);
        listener.state_changed(DownloadState::Queued);

        let inner = self.inner.clone();
        self.enqueue(move || run_download(inner, key, index, url, final_path, cancel));
        true
    }

    /// Requests cancellation of `key`. Unknown or finished keys are ignored.
    pub fn cancel_download(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        match lock(&self.inner.active).get(key) {
            Some(job) => {
                info!("Cancelling download {}", key);
                job.cancel.cancel();
                true
            }
            None => {
                debug!("No active download {} to cancel", key);
                false
            }
        }
    }

    /// Replaces the listener of an active job. Returns false when `key` has
    /// no job to attach to.
    pub fn attach_listener(&self, key: impl AsRef<str>, listener: Listener) -> bool {
        let key = key.as_ref();
        match lock(&self.inner.active).get_mut(key) {
            Some(job) => {
                debug!("Re-attached listener for {}", key);
                job.listener = listener;
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn listener(&self, key: &str) -> Option<Listener> {
        lock(&self.active).get(key).map(|job| job.listener.clone())
    }

    fn notify_state(&self, key: &str, state: DownloadState) {
        if let Some(listener) = self.listener(key) {
            listener.state_changed(state);
        }
    }

    fn update_item(&self, index: usize, update: impl FnOnce(&mut DownloadItem)) {
        if let Some(item) = lock(&self.downloads).get_mut(index) {
            update(item);
        }
    }

    /// Drops the bindings of `key` and records its terminal state.
    ///
    /// Both happen under the bindings lock so an attach never lands on a job
    /// that is about to disappear. Returns the listener to notify.
    fn finish(&self, key: &str, state: DownloadState) -> Option<Listener> {
        let mut active = lock(&self.active);
        let job = active.remove(key);
        self.registry.set_state(key, state);
        job.map(|job| job.listener)
    }
}

fn run_worker(mut jobs: mpsc::UnboundedReceiver<Job>, pending: Arc<AtomicUsize>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build download worker runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        while let Some(job) = jobs.recv().await {
            pending.fetch_sub(1, Ordering::SeqCst);
            match AssertUnwindSafe(async move { job().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Download job failed: {}", e),
                Err(_) => error!("Download job panicked"),
            }
        }
        debug!("Download queue closed, worker exiting");
    });
}

async fn run_download(
    inner: Arc<Inner>,
    key: String,
    index: usize,
    url: String,
    final_path: PathBuf,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let temp_path = part_path(&final_path);

    if cancel.is_cancelled() {
        info!("Download {} cancelled before it started", key);
        inner.update_item(index, |item| item.status = "Cancelled".to_string());
        if let Some(listener) = inner.finish(&key, DownloadState::None) {
            listener.state_changed(DownloadState::None);
        }
        return Ok(());
    }

    inner.registry.set_state(&key, DownloadState::Downloading);
    inner.update_item(index, |item| item.status = "Downloading".to_string());
    inner.notify_state(&key, DownloadState::Downloading);

    let progress = {
        let inner = inner.clone();
        let key = key.clone();
        move |mbps: f64| {
            inner.update_item(index, |item| {
                item.set_speed(mbps);
            });
            if let Some(listener) = inner.listener(&key) {
                listener.progress(mbps);
            }
        }
    };

    let result = match inner
        .transfer
        .transfer(&url, &temp_path, &progress, &cancel)
        .await
    {
        Ok(bytes) => replace_final(&temp_path, &final_path)
            .await
            .map(|()| bytes)
            .map_err(AppError::from),
        Err(e) => Err(AppError::from(e)),
    };

    match result {
        Ok(bytes) => {
            info!("Download {} completed ({} bytes)", key, bytes);
            inner.update_item(index, |item| item.status = "Completed".to_string());
            if let Some(listener) = inner.finish(&key, DownloadState::Completed) {
                listener.state_changed(DownloadState::Completed);
            }
            Ok(())
        }
        Err(e) => {
            remove_partial(&temp_path).await;

            let cancelled = matches!(e, AppError::Transfer(ref t) if t.is_cancelled());
            if cancelled {
                info!("Download {} cancelled", key);
            } else {
                warn!("Download {} failed: {}", key, e);
            }
            inner.update_item(index, |item| {
                item.status = if cancelled { "Cancelled" } else { "Failed" }.to_string();
            });

            if let Some(listener) = inner.finish(&key, DownloadState::None) {
                listener.state_changed(DownloadState::None);
            }
            if cancelled {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

async fn replace_final(temp_path: &Path, final_path: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(final_path).await? {
        tokio::fs::remove_file(final_path).await?;
    }
    tokio::fs::rename(temp_path, final_path).await
}

async fn remove_partial(temp_path: &Path) {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => debug!("Removed {}", temp_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", temp_path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, CatalogConfig};
    use crate::application::transfer::{HttpTransfer, ProgressFn, TransferError};
    use crate::config::TransferConfig;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::{oneshot, Notify};

    const WAIT: Duration = Duration::from_secs(5);

    /// Writes `body` after `delay`, tracking how many transfers overlap.
    #[derive(Default)]
    struct FakeTransfer {
        body: Vec<u8>,
        delay: Duration,
        fail_after: Option<usize>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl FakeTransfer {
        fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Transfer for FakeTransfer {
        async fn transfer(
            &self,
            url: &str,
            dest: &Path,
            progress: &ProgressFn,
            cancel: &CancellationToken,
        ) -> Result<u64, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.urls).push(url.to_string());
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            let result: Result<u64, TransferError> = async {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let mut file = tokio::fs::File::create(dest).await?;

                if let Some(limit) = self.fail_after {
                    file.write_all(&self.body[..limit]).await?;
                    file.flush().await?;
                    return Err(TransferError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    )));
                }

                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
                file.write_all(&self.body).await?;
                file.flush().await?;
                progress(1.5);
                Ok(self.body.len() as u64)
            }
            .await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Writes one byte, then blocks until released or cancelled.
    #[derive(Default)]
    struct GateTransfer {
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transfer for GateTransfer {
        async fn transfer(
            &self,
            _url: &str,
            dest: &Path,
            progress: &ProgressFn,
            cancel: &CancellationToken,
        ) -> Result<u64, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, b"x").await?;
            progress(0.5);

            tokio::select! {
                _ = cancel.cancelled() => Err(TransferError::Cancelled),
                _ = self.release.notified() => Ok(1),
            }
        }
    }

    fn queue_with(transfer: Arc<dyn Transfer>) -> DownloadQueue {
        DownloadQueue::new(transfer, Arc::new(DownloadRegistry::new()))
    }

    async fn next_state(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> DownloadState {
        loop {
            let event = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("listener channel closed");
            if let DownloadEvent::State { state, .. } = event {
                return state;
            }
        }
    }

    async fn states_until_terminal(
        rx: &mut mpsc::UnboundedReceiver<DownloadEvent>,
    ) -> Vec<DownloadState> {
        let mut states = Vec::new();
        loop {
            let state = next_state(rx).await;
            states.push(state);
            if matches!(state, DownloadState::Completed | DownloadState::None) {
                return states;
            }
        }
    }

    #[tokio::test]
    async fn test_download_completes_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("series").join("1.mp4");
        let transfer = Arc::new(FakeTransfer::new(b"episode one"));
        let queue = queue_with(transfer.clone());

        let (listener, mut rx) = Listener::channel("series_1");
        assert!(queue.start_download("Ep1", "http://x/e1.mp4", &final_path, "series_1", listener));

        assert_eq!(
            states_until_terminal(&mut rx).await,
            vec![
                DownloadState::Queued,
                DownloadState::Downloading,
                DownloadState::Completed
            ]
        );
        assert_eq!(std::fs::read(&final_path).unwrap(), b"episode one");
        assert!(!part_path(&final_path).exists());
        assert_eq!(queue.registry().get_state("series_1"), DownloadState::Completed);

        let downloads = queue.downloads();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].title, "Ep1");
        assert_eq!(downloads[0].status, "Completed");
        assert_eq!(downloads[0].speed_mbps, 1.5);
    }

    #[tokio::test]
    async fn test_failure_after_one_byte_resets_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("series").join("1.mp4");
        let transfer = Arc::new(FakeTransfer {
            fail_after: Some(1),
            ..FakeTransfer::new(b"episode one")
        });
        let queue = queue_with(transfer);

        let (listener, mut rx) = Listener::channel("series_1");
        queue.start_download("Ep1", "http://x/e1.mp4", &final_path, "series_1", listener);

        assert_eq!(
            states_until_terminal(&mut rx).await,
            vec![
                DownloadState::Queued,
                DownloadState::Downloading,
                DownloadState::None
            ]
        );
        assert!(!final_path.exists());
        assert!(!part_path(&final_path).exists());
        assert_eq!(queue.registry().get_state("series_1"), DownloadState::None);
        assert_eq!(queue.downloads()[0].status, "Failed");
    }

    #[tokio::test]
    async fn test_failed_download_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("movie").join("4.mp4");
        let queue = queue_with(Arc::new(FakeTransfer {
            fail_after: Some(1),
            ..FakeTransfer::new(b"abc")
        }));

        let (listener, mut rx) = Listener::channel("movie_4");
        queue.start_download("Film", "http://x/4.mp4", &final_path, "movie_4", listener);
        states_until_terminal(&mut rx).await;

        let (listener, mut rx) = Listener::channel("movie_4");
        assert!(queue.start_download("Film", "http://x/4.mp4", &final_path, "movie_4", listener));
        states_until_terminal(&mut rx).await;
        assert_eq!(queue.downloads().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("series").join("2.mp4");
        let transfer = Arc::new(GateTransfer::default());
        let queue = queue_with(transfer.clone());

        let (listener, mut rx) = Listener::channel("series_2");
        assert!(queue.start_download("Ep2", "http://x/2.mp4", &final_path, "series_2", listener));
        assert!(!queue.start_download(
            "Ep2",
            "http://x/2.mp4",
            &final_path,
            "series_2",
            Listener::new(|_| {})
        ));

        assert_eq!(next_state(&mut rx).await, DownloadState::Queued);
        assert_eq!(next_state(&mut rx).await, DownloadState::Downloading);
        assert!(!queue.start_download(
            "Ep2",
            "http://x/2.mp4",
            &final_path,
            "series_2",
            Listener::new(|_| {})
        ));

        transfer.release.notify_one();
        assert_eq!(next_state(&mut rx).await, DownloadState::Completed);
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.downloads().len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_transfer_runs_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer {
            delay: Duration::from_millis(20),
            ..FakeTransfer::new(b"data")
        });
        let queue = queue_with(transfer.clone());
        let (sender, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..6)
            .map(|id| {
                let queue = queue.clone();
                let sender = sender.clone();
                let final_path = dir.path().join("movie").join(format!("{}.mp4", id));
                std::thread::spawn(move || {
                    let key = format!("movie_{}", id);
                    let listener = Listener::forward_to(key.clone(), sender);
                    queue.start_download("Film", format!("http://x/{}.mp4", id), final_path, key, listener)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        drop(sender);

        let mut completed = 0;
        while completed < 6 {
            if next_state(&mut rx).await == DownloadState::Completed {
                completed += 1;
            }
        }

        assert_eq!(transfer.calls.load(Ordering::SeqCst), 6);
        assert_eq!(transfer.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer {
            delay: Duration::from_millis(5),
            ..FakeTransfer::new(b"data")
        });
        let queue = queue_with(transfer.clone());
        let (sender, mut rx) = mpsc::unbounded_channel();

        for id in 0..4 {
            let key = format!("series_{}", id);
            queue.start_download(
                "Ep",
                format!("http://x/{}.mp4", id),
                dir.path().join(format!("{}.mp4", id)),
                key.clone(),
                Listener::forward_to(key, sender.clone()),
            );
        }

        let mut completed = 0;
        while completed < 4 {
            if next_state(&mut rx).await == DownloadState::Completed {
                completed += 1;
            }
        }

        let urls = lock(&transfer.urls).clone();
        assert_eq!(
            urls,
            vec![
                "http://x/0.mp4",
                "http://x/1.mp4",
                "http://x/2.mp4",
                "http://x/3.mp4"
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_downloading_job() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("series").join("3.mp4");
        let queue = queue_with(Arc::new(GateTransfer::default()));

        let (listener, mut rx) = Listener::channel("series_3");
        queue.start_download("Ep3", "http://x/3.mp4", &final_path, "series_3", listener);
        assert_eq!(next_state(&mut rx).await, DownloadState::Queued);
        assert_eq!(next_state(&mut rx).await, DownloadState::Downloading);

        // Wait for the first byte so the temp file is on disk.
        loop {
            let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            if matches!(event, DownloadEvent::Progress { .. }) {
                break;
            }
        }
        assert!(part_path(&final_path).exists());

        assert!(queue.cancel_download("series_3"));
        assert_eq!(next_state(&mut rx).await, DownloadState::None);
        assert!(!part_path(&final_path).exists());
        assert!(!final_path.exists());
        assert_eq!(queue.registry().get_state("series_3"), DownloadState::None);
        assert_eq!(queue.downloads()[0].status, "Cancelled");

        // Finished jobs are no longer cancellable.
        assert!(!queue.cancel_download("series_3"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_key_is_noop() {
        let queue = queue_with(Arc::new(GateTransfer::default()));
        assert!(!queue.cancel_download("movie_404"));
        assert_eq!(queue.registry().get_state("movie_404"), DownloadState::None);
        assert!(queue.downloads().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_queued_job_skips_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(GateTransfer::default());
        let queue = queue_with(transfer.clone());

        let (first, mut first_rx) = Listener::channel("movie_1");
        queue.start_download("A", "http://x/a.mp4", dir.path().join("a.mp4"), "movie_1", first);
        assert_eq!(next_state(&mut first_rx).await, DownloadState::Queued);
        assert_eq!(next_state(&mut first_rx).await, DownloadState::Downloading);

        let (second, mut second_rx) = Listener::channel("movie_2");
        queue.start_download("B", "http://x/b.mp4", dir.path().join("b.mp4"), "movie_2", second);
        assert_eq!(next_state(&mut second_rx).await, DownloadState::Queued);
        assert!(queue.cancel_download("movie_2"));

        transfer.release.notify_one();
        assert_eq!(next_state(&mut first_rx).await, DownloadState::Completed);
        assert_eq!(next_state(&mut second_rx).await, DownloadState::None);
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reattached_listener_receives_completion() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("series").join("5.mp4");
        let transfer = Arc::new(GateTransfer::default());
        let queue = queue_with(transfer.clone());

        let (first, mut first_rx) = Listener::channel("series_5");
        queue.start_download("Ep5", "http://x/5.mp4", &final_path, "series_5", first);
        assert_eq!(next_state(&mut first_rx).await, DownloadState::Queued);
        assert_eq!(next_state(&mut first_rx).await, DownloadState::Downloading);
        drop(first_rx);

        let (fresh, mut fresh_rx) = Listener::channel("series_5");
        assert!(queue.attach_listener("series_5", fresh));

        transfer.release.notify_one();
        assert_eq!(next_state(&mut fresh_rx).await, DownloadState::Completed);
        assert!(final_path.exists());
    }

    #[tokio::test]
    async fn test_attach_without_active_job() {
        let queue = queue_with(Arc::new(GateTransfer::default()));
        assert!(!queue.attach_listener("series_77", Listener::new(|_| {})));
    }

    #[tokio::test]
    async fn test_completed_download_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("6.mp4");
        std::fs::write(&final_path, b"old").unwrap();
        let queue = queue_with(Arc::new(FakeTransfer::new(b"new")));

        let (listener, mut rx) = Listener::channel("movie_6");
        queue.start_download("Film", "http://x/6.mp4", &final_path, "movie_6", listener);
        assert_eq!(
            states_until_terminal(&mut rx).await.last(),
            Some(&DownloadState::Completed)
        );
        assert_eq!(std::fs::read(&final_path).unwrap(), b"new");
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_worker_survives_failing_and_panicking_jobs() {
        let queue = queue_with(Arc::new(GateTransfer::default()));
        let (done_tx, done_rx) = oneshot::channel();

        queue.enqueue(|| async { Err::<(), AppError>(AppError::Config("broken job".to_string())) });
        queue.enqueue(|| async {
            let outcome: Result<(), AppError> = panic!("job blew up");
            outcome
        });
        queue.enqueue(move || async move {
            let _ = done_tx.send(());
            Ok::<(), AppError>(())
        });

        tokio::time::timeout(WAIT, done_rx)
            .await
            .expect("worker stopped after a bad job")
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_download_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/series/alice/secret/9.mp4")
            .with_status(200)
            .with_body(vec![1u8; 200 * 1024])
            .create_async()
            .await;

        let client = ApiClient::new(CatalogConfig {
            server_url: server.url(),
            username: "alice".to_string(),
            password: "secret".to_string(),
        });
        let url = client.stream_url(crate::domain::ContentType::Series, 9, "mp4");
        let transfer = HttpTransfer::new(client, &TransferConfig::default());
        let queue = queue_with(Arc::new(transfer));

        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("series").join("9.mp4");
        let (listener, mut rx) = Listener::channel("series_9");
        queue.start_download("Ep9", url, &final_path, "series_9", listener);

        assert_eq!(
            states_until_terminal(&mut rx).await.last(),
            Some(&DownloadState::Completed)
        );
        assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 200 * 1024);
        assert!(!part_path(&final_path).exists());
        mock.assert_async().await;
    }
}
