//! Lifecycle manager owning the current runtime instance.
//!
//! A [`Client`] boots one [`RuntimeInstance`], then replaces it whenever the
//! configuration changes:
//!
//! 1. Load the configuration. On failure the current instance stays.
//! 2. Compare its digest with the current one. Equal means nothing to do.
//! 3. Build a new instance. On failure the current instance stays.
//! 4. Swap the new instance in under a short write lock.
//! 5. Shut the old instance down within [`DEFAULT_SHUTDOWN_TIMEOUT`],
//!    logging failures without undoing the swap.
//! 6. Bump the reload counter.
//!
//! Reloads are serialised. A caller that arrives while one is running
//! waits for it and then performs its own, which usually finds the
//! configuration unchanged.
//!
//! # Example
//!
//! ```no_run
//! use observe_config::ConfigLoader;
//! use observe_runtime::Client;
//!
//! # async fn run() -> observe_runtime::Result<()> {
//! let client = Client::builder()
//!     .source(ConfigLoader::new().with_default_file().build())
//!     .install_global_providers(true)
//!     .init()
//!     .await?;
//!
//! let runtime = client.current();
//! let _tracer = runtime.tracer("checkout");
//!
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::diagnostics::{Snapshot, SnapshotProvider};
use crate::error::{Error, Result, ShutdownError};
use crate::exporter::{ExporterFactory, OtlpExporterFactory};
use crate::logging::LogHandle;
use crate::runtime::{BuildContext, RuntimeInstance};
use crate::watcher::{ConfigWatcher, DEFAULT_DEBOUNCE, WatcherHandle};
use chrono::{DateTime, Utc};
use observe_config::{Config, ConfigDigest, ConfigSource, StaticConfigSource};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Upper bound on draining a superseded instance.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a [`Client::reload`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new instance is current.
    Applied {
        /// Reload count after the swap.
        generation: u64,
    },
    /// The loaded configuration matched the current one.
    Unchanged,
}

/// Builder for [`Client`].
#[must_use]
pub struct ClientBuilder {
    source: Option<Arc<dyn ConfigSource>>,
    factory: Arc<dyn ExporterFactory>,
    debounce: Duration,
    watch: bool,
    install_global_providers: bool,
    log_handle: Option<LogHandle>,
    drain_timeout: Duration,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            source: None,
            factory: Arc::new(OtlpExporterFactory),
            debounce: DEFAULT_DEBOUNCE,
            watch: true,
            install_global_providers: false,
            log_handle: None,
            drain_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ClientBuilder {
    /// Where configurations are loaded from.
    pub fn source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Uses a fixed configuration. Reloads will always report unchanged.
    pub fn config(self, config: Config) -> Self {
        self.source(StaticConfigSource::new(config))
    }

    /// Replaces the OTLP exporter factory.
    pub fn exporter_factory(mut self, factory: impl ExporterFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Debounce window for file change bursts.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Whether to watch the source's file for changes. On by default.
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Registers the current providers and the W3C propagator as the
    /// process-wide defaults at boot and after every swap.
    pub fn install_global_providers(mut self, install: bool) -> Self {
        self.install_global_providers = install;
        self
    }

    /// Log filter to update from each applied configuration.
    pub fn log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    #[cfg(test)]
    pub(crate) fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Loads the configuration and builds the first instance.
    ///
    /// # Errors
    ///
    /// Any load or construction failure is returned. There is no partially
    /// initialised client.
    pub async fn init(self) -> Result<Client> {
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(StaticConfigSource::new(Config::default())));

        let started_at = Utc::now();
        let snapshots = Arc::new(CurrentSnapshot::default());
        let context = BuildContext::new(Arc::clone(&self.factory))
            .with_started_at(started_at)
            .with_snapshot_provider(Arc::clone(&snapshots) as Arc<dyn SnapshotProvider>);

        let loader = Arc::clone(&source);
        let boot_context = context.clone();
        let instance = tokio::task::spawn_blocking(move || {
            let config = loader.load()?;
            RuntimeInstance::build(config, &boot_context)
        })
        .await
        .map_err(|e| Error::construction("runtime instance", e))??;
        let instance = Arc::new(instance);

        let inner = Arc::new(Inner {
            source,
            context,
            started_at,
            current: RwLock::new(Arc::clone(&instance)),
            reload_lock: tokio::sync::Mutex::new(()),
            reload_count: AtomicU64::new(0),
            reload_attempts: AtomicU64::new(0),
            reload_in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            install_global_providers: self.install_global_providers,
            log_handle: self.log_handle,
            drain_timeout: self.drain_timeout,
            watcher: Mutex::new(None),
        });
        // Only fails if already set, and this provider is fresh.
        let _ = snapshots.inner.set(Arc::downgrade(&inner));

        if inner.install_global_providers {
            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
            inner.install_globals(&instance);
        }

        if self.watch
            && let Some(path) = inner.source.watch_path()
        {
            let weak = Arc::downgrade(&inner);
            let spawned = ConfigWatcher::new(path, self.debounce).spawn(move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        // Failures are logged by the reload itself.
                        let _ = inner.reload().await;
                    }
                }
            });

            match spawned {
                Ok(handle) => *inner.watcher.lock() = Some(handle),
                Err(e) => {
                    retire(instance, inner.drain_timeout).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            target: "observe_lifecycle",
            service = %instance.config().service.name,
            digest = %instance.digest(),
            diagnostics = ?instance.diagnostics_addr(),
            "Observability runtime started"
        );

        Ok(Client { inner })
    }
}

/// Owns the current [`RuntimeInstance`] and replaces it on reload.
///
/// Cloning is cheap and every clone refers to the same runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Starts building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The current instance.
    ///
    /// Hold the returned reference only for the duration of one operation.
    /// It keeps working after a swap but no longer receives new settings.
    pub fn current(&self) -> Arc<RuntimeInstance> {
        self.inner.current()
    }

    /// Reloads the configuration and swaps in a new instance if it changed.
    ///
    /// # Errors
    ///
    /// Returns the load or construction failure. The current instance is
    /// untouched in that case.
    pub async fn reload(&self) -> Result<ReloadOutcome> {
        self.inner.reload().await
    }

    /// Diagnostics snapshot of the current instance.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.current().snapshot()
    }

    /// Successful reloads since boot.
    pub fn reload_count(&self) -> u64 {
        self.inner.reload_count.load(Ordering::Acquire)
    }

    /// Reloads started since boot, whether applied, skipped as unchanged or
    /// failed. Reloads refused after shutdown are not counted.
    pub fn reload_attempts(&self) -> u64 {
        self.inner.reload_attempts.load(Ordering::Acquire)
    }

    /// Whether a reload is running right now.
    pub fn reload_in_flight(&self) -> bool {
        self.inner.reload_in_flight.load(Ordering::Acquire)
    }

    /// When the client booted.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Stops watching, waits for any running reload, then shuts down the
    /// current instance within [`DEFAULT_SHUTDOWN_TIMEOUT`].
    ///
    /// Later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the shutdown failures of the current instance.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let watcher = self.inner.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop().await;
        }

        let _reload = self.inner.reload_lock.lock().await;
        let current = self.inner.current();
        shutdown_within(current, self.inner.drain_timeout).await?;

        tracing::info!(target: "observe_lifecycle", "Observability runtime stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("current", &self.inner.current())
            .field("reload_count", &self.reload_count())
            .finish_non_exhaustive()
    }
}

struct Inner {
    source: Arc<dyn ConfigSource>,
    context: BuildContext,
    started_at: DateTime<Utc>,
    current: RwLock<Arc<RuntimeInstance>>,
    reload_lock: tokio::sync::Mutex<()>,
    reload_count: AtomicU64,
    reload_attempts: AtomicU64,
    reload_in_flight: AtomicBool,
    closed: AtomicBool,
    install_global_providers: bool,
    log_handle: Option<LogHandle>,
    drain_timeout: Duration,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl Inner {
    fn current(&self) -> Arc<RuntimeInstance> {
        Arc::clone(&self.current.read())
    }

    fn install_globals(&self, instance: &RuntimeInstance) {
        opentelemetry::global::set_tracer_provider(instance.tracer_provider().clone());
        opentelemetry::global::set_meter_provider(instance.meter_provider().clone());
    }

    async fn reload(&self) -> Result<ReloadOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let _serial = self.reload_lock.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        self.reload_attempts.fetch_add(1, Ordering::AcqRel);
        self.reload_in_flight.store(true, Ordering::Release);
        let _in_flight = InFlight(&self.reload_in_flight);

        let outcome = self.reload_serialised().await;
        if let Err(e) = &outcome {
            tracing::warn!(
                target: "observe_lifecycle",
                error = %e,
                "Reload failed, keeping current runtime"
            );
        }
        outcome
    }

    async fn reload_serialised(&self) -> Result<ReloadOutcome> {
        let source = Arc::clone(&self.source);
        let config = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| Error::construction("configuration load", e))??;

        let previous = self.current();
        let digest = ConfigDigest::of(&config)?;
        if digest == previous.digest() {
            tracing::info!(target: "observe_lifecycle", digest = %digest, "Configuration unchanged, skipping reload");
            return Ok(ReloadOutcome::Unchanged);
        }

        let generation = self.reload_count.load(Ordering::Acquire) + 1;
        let diagnostics_addr = config
            .diagnostics
            .enabled
            .then(|| config.diagnostics.http_addr.clone());
        let inherit = diagnostics_addr
            .as_deref()
            .is_some_and(|addr| previous.serves_diagnostics_on(addr));

        let context = self
            .context
            .clone()
            .with_generation(generation)
            .inherit_diagnostics(inherit);
        let next = tokio::task::spawn_blocking(move || RuntimeInstance::build(config, &context))
            .await
            .map_err(|e| Error::construction("runtime instance", e))??;
        let next = Arc::new(next);

        if let Some(addr) = diagnostics_addr.as_deref()
            && inherit
            && let Some(server) = previous.take_diagnostics(addr)
        {
            next.adopt_diagnostics(server);
        }

        let old = std::mem::replace(&mut *self.current.write(), Arc::clone(&next));
        self.reload_count.store(generation, Ordering::Release);

        if self.install_global_providers {
            self.install_globals(&next);
        }
        if let Some(handle) = &self.log_handle
            && let Err(e) = handle.apply(&next.config().logging)
        {
            tracing::warn!(target: "observe_lifecycle", error = %e, "Failed to apply log level");
        }

        tracing::info!(
            target: "observe_lifecycle",
            generation,
            digest = %digest,
            "Configuration reloaded"
        );

        retire(old, self.drain_timeout).await;
        Ok(ReloadOutcome::Applied { generation })
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resolves snapshots through the client that owns the listener, so a
/// listener handed between instances always reports the current one.
#[derive(Default)]
struct CurrentSnapshot {
    inner: OnceLock<Weak<Inner>>,
}

impl CurrentSnapshot {
    fn current(&self) -> Option<Arc<RuntimeInstance>> {
        self.inner.get()?.upgrade().map(|inner| inner.current())
    }
}

impl SnapshotProvider for CurrentSnapshot {
    fn snapshot(&self) -> Option<Snapshot> {
        self.current().map(|instance| instance.snapshot())
    }

    fn auth_token(&self) -> Option<String> {
        self.current()
            .map(|instance| instance.config().diagnostics.auth_token.clone())
    }
}

async fn shutdown_within(
    instance: Arc<RuntimeInstance>,
    timeout: Duration,
) -> std::result::Result<(), ShutdownError> {
    let task = tokio::task::spawn_blocking(move || instance.shutdown());
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ShutdownError::component("runtime instance", e)),
        Err(_) => Err(ShutdownError::Timeout(timeout)),
    }
}

/// Shuts down a superseded instance, logging instead of returning failures.
async fn retire(instance: Arc<RuntimeInstance>, timeout: Duration) {
    let generation = instance.generation();
    match shutdown_within(instance, timeout).await {
        Ok(()) => {
            tracing::debug!(target: "observe_lifecycle", generation, "Superseded runtime retired");
        }
        Err(ShutdownError::Timeout(limit)) => {
            tracing::warn!(
                target: "observe_lifecycle",
                generation,
                timeout_ms = limit.as_millis() as u64,
                "Superseded runtime did not drain in time, abandoning it"
            );
        }
        Err(e) => {
            tracing::warn!(
                target: "observe_lifecycle",
                generation,
                error = %e,
                failures = e.failure_count(),
                "Superseded runtime shut down with errors"
            );
        }
    }
}
