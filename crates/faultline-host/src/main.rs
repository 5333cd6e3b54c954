//! Faultline Host - Crash and error telemetry daemon
//!
//! The privileged host process of the telemetry core. It owns the
//! persisted breadcrumb/context stores, sweeps the crash writer's
//! output directory for orphaned minidumps on startup, polls for new
//! dumps, watches content processes for hangs, and receives relayed
//! messages from content processes.
//!
//! # Architecture
//!
//! Content processes feed the relay; every relayed message lands on
//! one host command queue, so store mutation happens on a single
//! logical timeline. The uploader poll loop and the per-process
//! watchdog timers run as separate tasks, all torn down through one
//! `CancellationToken` on SIGTERM/SIGINT.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use faultline_core::domain::breadcrumb::{push_bounded, Breadcrumb};
use faultline_core::domain::event::Level;
use faultline_core::normalize::normalize_event_frames;
use faultline_core::{merge_events, Config, Event, ProcessId, ProcessStatus, ScopeData,
    WatchdogConfig};
use faultline_relay::{InterceptedRequest, RelayDispatcher, RelayHandler};
use faultline_store::BufferedStore;
use faultline_uploader::MinidumpUploader;
use faultline_watchdog::{CaptureProvider, CaptureStrategy, NoPowerMonitor, WatchdogRegistry};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Called for truly unrecoverable host errors. The only user-visible
/// escape valve; nothing else in the core surfaces UI.
type FatalHook = Box<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Work items drained by the host's single command loop.
enum HostCommand {
    Event { source: ProcessId, event: Event },
    Breadcrumb { breadcrumb: Breadcrumb },
    Scope { scope: ScopeData },
    AnrStatus {
        source: ProcessId,
        status: ProcessStatus,
        config: WatchdogConfig,
    },
    Opaque { payload: serde_json::Value },
    ProcessGone { source: ProcessId },
}

/// Forwards relayed messages onto the host command queue.
///
/// Keeps dispatch non-blocking and preserves arrival order per host:
/// all store mutation happens on the command loop, never here.
struct HostHandler {
    tx: mpsc::UnboundedSender<HostCommand>,
}

impl RelayHandler for HostHandler {
    fn on_event(&self, source: ProcessId, event: Event) {
        let _ = self.tx.send(HostCommand::Event { source, event });
    }

    fn on_breadcrumb(&self, _source: ProcessId, breadcrumb: Breadcrumb) {
        let _ = self.tx.send(HostCommand::Breadcrumb { breadcrumb });
    }

    fn on_scope(&self, _source: ProcessId, scope: ScopeData) {
        let _ = self.tx.send(HostCommand::Scope { scope });
    }

    fn on_anr_status(&self, source: ProcessId, status: ProcessStatus, config: WatchdogConfig) {
        let _ = self.tx.send(HostCommand::AnrStatus {
            source,
            status,
            config,
        });
    }

    fn on_opaque(&self, _source: ProcessId, payload: serde_json::Value) {
        let _ = self.tx.send(HostCommand::Opaque { payload });
    }
}

/// Capture plumbing for the daemon build.
///
/// Real debugger sessions and native snapshot providers are supplied
/// by the embedding application; standalone the watchdog still
/// detects stalls and emits frameless ANR events.
struct DefaultCaptureProvider;

impl CaptureProvider for DefaultCaptureProvider {
    fn strategy_for(
        &self,
        _pid: ProcessId,
        _config: &WatchdogConfig,
    ) -> CaptureStrategy {
        CaptureStrategy::None
    }
}

struct HostService {
    config: Config,
    breadcrumbs: Arc<BufferedStore<Vec<Breadcrumb>>>,
    context: Arc<BufferedStore<ScopeData>>,
    registry: Arc<WatchdogRegistry>,
    dispatcher: Arc<RelayDispatcher>,
    uploader: Option<Arc<Mutex<MinidumpUploader>>>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<HostCommand>>>,
    command_tx: mpsc::UnboundedSender<HostCommand>,
    shutdown: CancellationToken,
}

impl HostService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        let debounce = Duration::from_millis(config.storage.flush_debounce_ms);
        let breadcrumbs = Arc::new(BufferedStore::new(
            &config.storage.cache_dir,
            "breadcrumbs",
            Vec::new(),
            debounce,
        ));
        let context = Arc::new(BufferedStore::new(
            &config.storage.cache_dir,
            "context",
            ScopeData::default(),
            debounce,
        ));

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        // ANR events join the same merge path as relayed events.
        let anr_tx = command_tx.clone();
        let registry = Arc::new(WatchdogRegistry::new(
            Arc::new(DefaultCaptureProvider),
            Arc::new(NoPowerMonitor),
            Arc::new(move |event| {
                let _ = anr_tx.send(HostCommand::Event { source: 0, event });
            }),
        ));

        let dispatcher = Arc::new(RelayDispatcher::new(Arc::new(HostHandler {
            tx: command_tx.clone(),
        })));

        let uploader = config.uploader.collector.as_ref().map(|collector| {
            Arc::new(Mutex::new(MinidumpUploader::new(
                collector,
                config.uploader.crashes_dir.clone(),
                config.uploader.retention_days,
                config.uploader.max_per_session,
            )))
        });

        Self {
            config,
            breadcrumbs,
            context,
            registry,
            dispatcher,
            uploader,
            command_rx: Mutex::new(Some(command_rx)),
            command_tx,
            shutdown,
        }
    }

    /// Connects a content process's direct channel to the dispatcher.
    ///
    /// The returned sender is handed to the content process's bridge;
    /// when it closes, the process's watchdog is torn down. Driven by
    /// the embedding application's process spawning.
    #[allow(dead_code)]
    fn register_content_process(&self, pid: ProcessId) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::clone(&self.dispatcher);
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            dispatcher.run_channel(pid, rx).await;
            // Channel closed: the content process is gone.
            let _ = command_tx.send(HostCommand::ProcessGone { source: pid });
        });
        tx
    }

    /// Entry point for the reserved-scheme interceptor.
    #[allow(dead_code)]
    fn intercept(&self, pid: ProcessId, request: &InterceptedRequest) {
        self.dispatcher.dispatch_request(pid, request);
    }

    /// The event enriching uploaded dumps: last-persisted breadcrumbs
    /// and context, captured before the crash being reported.
    async fn enriching_event(&self) -> Event {
        let mut event = Event::new();
        event.level = Some(Level::Fatal);
        event.platform = Some("native".to_string());
        event
            .tags
            .insert("event.environment".to_string(), "native".to_string());
        event.breadcrumbs = self.breadcrumbs.get().await;
        self.context.get().await.apply_to_event(&mut event);
        event
    }

    async fn run(&self) -> Result<()> {
        let cache_dir = &self.config.storage.cache_dir;
        tokio::fs::create_dir_all(cache_dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", cache_dir.display()))?;

        // Startup sweep: dumps orphaned by a previous crash are
        // enriched with the state persisted before that crash.
        if let Some(uploader) = &self.uploader {
            let event = self.enriching_event().await;
            let uploaded = uploader.lock().await.poll(&event).await;
            info!(uploaded, "Startup orphan dump sweep complete");
        } else {
            info!("No collector configured, native crash upload disabled");
        }

        let mut poll_timer = tokio::time::interval(Duration::from_secs(
            self.config.uploader.poll_interval_secs,
        ));
        poll_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut command_rx = self
            .command_rx
            .lock()
            .await
            .take()
            .context("Host command loop started twice")?;

        info!("Faultline host running");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                command = command_rx.recv() => {
                    match command {
                        Some(command) => self.process_command(command).await,
                        None => break,
                    }
                }

                _ = poll_timer.tick() => {
                    if let Some(uploader) = &self.uploader {
                        let event = self.enriching_event().await;
                        uploader.lock().await.poll(&event).await;
                    }
                }
            }
        }

        // Pending store writes must hit disk before exit.
        self.breadcrumbs.flush().await;
        self.context.flush().await;
        info!("Faultline host stopped");
        Ok(())
    }

    async fn process_command(&self, command: HostCommand) {
        match command {
            HostCommand::Event { source, event } => {
                self.deliver_event(source, event).await;
            }

            HostCommand::Breadcrumb { breadcrumb } => {
                let max = self.config.storage.max_breadcrumbs;
                let mut crumbs = self.breadcrumbs.get().await;
                push_bounded(&mut crumbs, breadcrumb, max);
                self.breadcrumbs.set(crumbs);
            }

            HostCommand::Scope { scope } => {
                let max = self.config.storage.max_breadcrumbs;
                let mut current = self.context.get().await;
                current.apply_update(&scope, max);
                self.context.set(current);
            }

            HostCommand::AnrStatus {
                source,
                status,
                config,
            } => {
                self.registry.on_status(source, status, config);
            }

            HostCommand::Opaque { payload } => {
                // Forwarded verbatim by the reporting SDK's transport;
                // this core only confirms receipt.
                debug!(bytes = payload.to_string().len(), "Passing through opaque payload");
            }

            HostCommand::ProcessGone { source } => {
                self.registry.process_destroyed(source);
            }
        }
    }

    /// Merges persisted context into an event and hands it off.
    ///
    /// The encoded delivery to the collector is owned by the reporting
    /// SDK's own transport; this core stops at the finished event.
    async fn deliver_event(&self, source: ProcessId, event: Event) {
        let mut defaults = Event::new();
        defaults.platform = Some("javascript".to_string());
        self.context.get().await.apply_to_event(&mut defaults);

        let mut merged = merge_events(&defaults, event);
        merged
            .tags
            .entry("event.process".to_string())
            .or_insert_with(|| {
                if source == 0 {
                    "host".to_string()
                } else {
                    format!("content-{source}")
                }
            });

        if let Ok(exe) = std::env::current_exe() {
            if let Some(app_root) = exe.parent() {
                normalize_event_frames(&mut merged, app_root);
            }
        }

        info!(
            event_id = ?merged.event_id,
            level = ?merged.level,
            process = %merged.tags.get("event.process").cloned().unwrap_or_default(),
            "Event ready for delivery"
        );
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("faultline={level},faultlined={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl-C");
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    init_tracing(&config.logging.level);

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for e in &validation_errors {
            error!(field = %e.field, message = %e.message, "Invalid configuration");
        }
        std::process::exit(2);
    }

    info!(config_path = %config_path.display(), "Loaded configuration");

    let fatal_hook: FatalHook = Box::new(|e| {
        error!(error = %format!("{e:#}"), "Fatal host error");
        std::process::exit(1);
    });

    let shutdown = CancellationToken::new();
    let service = Arc::new(HostService::new(config, shutdown.clone()));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    if let Err(e) = service.run().await {
        fatal_hook(&e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::{ConfigBuilder, RelayMessage};
    use faultline_relay::encode_request;

    fn test_config(dir: &std::path::Path) -> Config {
        ConfigBuilder::new()
            .cache_dir(dir.join("cache"))
            .crashes_dir(dir.join("crashes"))
            .flush_debounce_ms(10)
            .build()
    }

    fn service(dir: &std::path::Path) -> HostService {
        HostService::new(test_config(dir), CancellationToken::new())
    }

    async fn drain_one(service: &HostService) {
        let mut rx = service.command_rx.lock().await;
        let command = rx
            .as_mut()
            .and_then(|rx| rx.try_recv().ok())
            .expect("expected a queued command");
        drop(rx);
        service.process_command(command).await;
    }

    #[tokio::test]
    async fn relayed_breadcrumbs_reach_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let tx = service.register_content_process(1);
        let message = RelayMessage::Breadcrumb {
            breadcrumb: Breadcrumb::new("ui.click", "save pressed"),
        };
        tx.send(serde_json::to_vec(&message).unwrap()).unwrap();

        // Let the channel task forward, then process.
        tokio::task::yield_now().await;
        drain_one(&service).await;

        let crumbs = service.breadcrumbs.get().await;
        assert_eq!(crumbs.len(), 1);
        assert_eq!(crumbs[0].message.as_deref(), Some("save pressed"));
    }

    #[tokio::test]
    async fn scope_updates_merge_into_context() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let mut scope = ScopeData::default();
        scope.tags.insert("session".to_string(), "abc".to_string());
        service
            .command_tx
            .send(HostCommand::Scope { scope })
            .unwrap();
        drain_one(&service).await;

        let mut scope = ScopeData::default();
        scope.tags.insert("session".to_string(), "def".to_string());
        scope.tags.insert("window".to_string(), "main".to_string());
        service
            .command_tx
            .send(HostCommand::Scope { scope })
            .unwrap();
        drain_one(&service).await;

        let context = service.context.get().await;
        assert_eq!(context.tags["session"], "def");
        assert_eq!(context.tags["window"], "main");
    }

    #[tokio::test]
    async fn anr_status_creates_and_tears_down_watchdog() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        service
            .command_tx
            .send(HostCommand::AnrStatus {
                source: 5,
                status: ProcessStatus::Alive,
                config: WatchdogConfig::default(),
            })
            .unwrap();
        drain_one(&service).await;
        assert_eq!(service.registry.watched_count(), 1);

        service
            .command_tx
            .send(HostCommand::ProcessGone { source: 5 })
            .unwrap();
        drain_one(&service).await;
        assert_eq!(service.registry.watched_count(), 0);
    }

    #[tokio::test]
    async fn enriching_event_carries_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        service
            .breadcrumbs
            .set(vec![Breadcrumb::new("app.lifecycle", "window opened")]);
        let mut scope = ScopeData::default();
        scope
            .tags
            .insert("release".to_string(), "1.2.3".to_string());
        service.context.set(scope);

        let event = service.enriching_event().await;
        assert_eq!(event.level, Some(Level::Fatal));
        assert_eq!(event.breadcrumbs.len(), 1);
        assert_eq!(event.tags["release"], "1.2.3");
    }

    #[tokio::test]
    async fn intercepted_requests_flow_through_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let request = encode_request(&RelayMessage::Breadcrumb {
            breadcrumb: Breadcrumb::new("net", "GET /status"),
        })
        .unwrap();
        service.intercept(3, &request);
        drain_one(&service).await;

        assert_eq!(service.breadcrumbs.get().await.len(), 1);

        // A malformed request is dropped without reaching the queue.
        service.intercept(
            3,
            &InterceptedRequest {
                url: "faultline-ipc://faultline.breadcrumb".to_string(),
                body: b"junk".to_vec(),
            },
        );
        let mut rx = service.command_rx.lock().await;
        assert!(rx.as_mut().unwrap().try_recv().is_err());
    }
}
