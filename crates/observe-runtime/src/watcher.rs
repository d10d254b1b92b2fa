//! Configuration file change detection.
//!
//! File system events feed a single consuming loop. A [`Debouncer`] folds
//! each burst into one trigger fired a fixed window after the last event.
//! The trigger is awaited inside the loop, so at most one reload started
//! by the watcher runs at a time; events arriving meanwhile open a new
//! window once it returns.

use crate::error::{Error, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Debounce window applied when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending { deadline: Instant },
}

/// What a [`Debouncer`] decided for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Zero window: trigger now and stay idle.
    Fire,
    /// First event of a burst: a trigger is now pending.
    Opened,
    /// Later event of a burst: the pending deadline moved out.
    Extended,
}

/// Two-state trailing-edge debouncer.
///
/// `Idle` moves to `Pending` on the first event. Every further event pushes
/// the deadline out to one window after itself. Reaching the deadline fires
/// once and returns to `Idle`. A zero window fires on every event.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: State,
}

impl Debouncer {
    /// A debouncer in the `Idle` state.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: State::Idle,
        }
    }

    /// Records an event observed at `now`.
    pub fn on_event(&mut self, now: Instant) -> EventOutcome {
        if self.window.is_zero() {
            return EventOutcome::Fire;
        }

        let outcome = match self.state {
            State::Idle => EventOutcome::Opened,
            State::Pending { .. } => EventOutcome::Extended,
        };
        self.state = State::Pending {
            deadline: now + self.window,
        };
        outcome
    }

    /// When the pending trigger is due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Idle => None,
            State::Pending { deadline } => Some(deadline),
        }
    }

    /// Whether a trigger is pending.
    pub fn is_pending(&self) -> bool {
        self.deadline().is_some()
    }

    /// Advances the clock. Returns true exactly once per window, when `now`
    /// has reached the deadline.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        match self.state {
            State::Pending { deadline } if now >= deadline => {
                self.state = State::Idle;
                true
            }
            _ => false,
        }
    }
}

/// Consumes change events until cancelled or the sender side closes,
/// awaiting `trigger` once per debounced burst.
pub async fn run_change_loop<F, Fut>(
    mut events: mpsc::Receiver<()>,
    window: Duration,
    cancel: CancellationToken,
    mut trigger: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut debouncer = Debouncer::new(window);

    loop {
        let deadline = debouncer.deadline();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = events.recv() => match event {
                Some(()) => match debouncer.on_event(Instant::now()) {
                    EventOutcome::Fire => trigger().await,
                    EventOutcome::Opened => {
                        tracing::debug!(target: "observe_watcher", "Configuration change detected");
                    }
                    EventOutcome::Extended => {}
                },
                None => break,
            },

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if debouncer.on_timer(Instant::now()) {
                    trigger().await;
                }
            }
        }
    }

    tracing::debug!(target: "observe_watcher", "Change loop stopped");
}

/// A running file watcher and its change loop.
pub struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

impl WatcherHandle {
    /// Stops watching and waits for an in-progress trigger to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(target: "observe_watcher", error = %e, "Change loop ended abnormally");
        }
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Watches one configuration file.
///
/// The parent directory is watched rather than the file itself so editors
/// that replace the file through a rename are still seen.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    window: Duration,
}

impl ConfigWatcher {
    /// A watcher for `path` with the given debounce window.
    pub fn new(path: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    /// Starts watching on the ambient tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a construction error when the path has no file name or the
    /// platform watcher cannot be created.
    pub fn spawn<F, Fut>(self, trigger: F) -> Result<WatcherHandle>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let file_name = self
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| {
                Error::construction(
                    "config watcher",
                    format!("{} is not a file path", self.path.display()),
                )
            })?;
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_relevant(&event, &file_name) => {
                    // A full buffer already guarantees a pending trigger.
                    let _ = tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "observe_watcher", error = %e, "File watch error");
                }
            }
        })
        .map_err(|e| Error::construction("config watcher", e))?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| Error::construction("config watcher", e))?;

        tracing::info!(
            target: "observe_watcher",
            path = %self.path.display(),
            debounce_ms = self.window.as_millis() as u64,
            "Watching configuration file"
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_change_loop(rx, self.window, cancel.clone(), trigger));

        Ok(WatcherHandle {
            cancel,
            task,
            _watcher: watcher,
        })
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    let kind_matches = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };

    kind_matches
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_millis(200);

    #[test]
    fn test_debouncer_resets_deadline_on_each_event() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        assert_eq!(debouncer.on_event(start), EventOutcome::Opened);
        assert_eq!(
            debouncer.on_event(start + Duration::from_millis(150)),
            EventOutcome::Extended
        );
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(350))
        );

        assert!(!debouncer.on_timer(start + Duration::from_millis(200)));
        assert!(debouncer.on_timer(start + Duration::from_millis(350)));
        assert!(!debouncer.is_pending());
        assert!(!debouncer.on_timer(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_window_fires_immediately() {
        let mut debouncer = Debouncer::new(Duration::ZERO);

        assert_eq!(debouncer.on_event(Instant::now()), EventOutcome::Fire);
        assert!(!debouncer.is_pending());
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once() {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let (count, trigger) = counter();
        let task = tokio::spawn(run_change_loop(rx, WINDOW, cancel.clone(), trigger));

        for _ in 0..10 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let (count, trigger) = counter();
        let task = tokio::spawn(run_change_loop(rx, WINDOW, cancel.clone(), trigger));

        tx.send(()).await.unwrap();
        tokio::time::sleep(WINDOW * 2).await;
        tx.send(()).await.unwrap();
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_trigger() {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let (count, trigger) = counter();
        let task = tokio::spawn(run_change_loop(rx, WINDOW, cancel.clone(), trigger));

        tx.send(()).await.unwrap();
        tokio::time::sleep(WINDOW / 2).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relevant_events() {
        let name = OsString::from("observe.yaml");
        let event = |kind| Event::new(kind).add_path(PathBuf::from("/etc/app/observe.yaml"));

        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            &name
        ));
        assert!(is_relevant(&event(EventKind::Create(CreateKind::File)), &name));
        assert!(!is_relevant(
            &event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))),
            &name
        ));

        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/app/other.yaml"));
        assert!(!is_relevant(&other, &name));
    }

    #[tokio::test]
    async fn test_file_edit_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observe.yaml");
        std::fs::write(&path, "service:\n  name: a\n").unwrap();

        let (count, trigger) = counter();
        let handle = ConfigWatcher::new(&path, Duration::from_millis(50))
            .spawn(trigger)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "service:\n  name: b\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(count.load(Ordering::SeqCst) >= 1);
        handle.stop().await;
    }
}
