//! Bot bootstrap and the request loop.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sprocket_runtime::SprocketRuntime;
//!
//! // Loads and validates sprocket.toml from the current directory
//! let runtime = SprocketRuntime::new()?;
//! runtime.run(Arc::new(MyTransport::new())).await?;
//!
//! // Custom configuration path
//! let runtime = SprocketRuntime::builder()
//!     .config_file("config/sprocket.toml")
//!     .profile("production")
//!     .build()?;
//! ```
//!
//! # Startup order
//!
//! 1. Log in through the transport. A rejected token aborts here, before any
//!    unit is loaded.
//! 2. Build the lifecycle manager over the catalogue, with the management
//!    unit as host, and load units.
//! 3. Start the transport and dispatch every inbound request on its own task.
//!
//! # Shutdown
//!
//! Ctrl+C, SIGTERM, the `manage shutdown` command or the end of the
//! transport's stream stop intake. In-flight requests get
//! `bot.shutdown_grace_secs` to finish, then every unit is torn down.

use std::future::Future;
use std::sync::Arc;

use sprocket_core::{BoxedTransport, ChannelTiming, UserId};
use sprocket_framework::builtin::manage;
use sprocket_framework::{
    AuthorizationGate, Catalogue, Dispatcher, LifecycleManager, Services, ShutdownSignal,
    UnitDefinition,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, SprocketConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Inbound requests buffered between the transport and the dispatcher.
const REQUEST_BUFFER: usize = 256;

/// The Sprocket runtime: owns configuration, the unit catalogue and the
/// shared services handed to units.
///
/// ```rust,ignore
/// SprocketRuntime::builder()
///     .build()?
///     .unit(fun::definition())
///     .service(Arc::new(HttpClient::new()))
///     .run(transport)
///     .await?;
/// ```
pub struct SprocketRuntime {
    config: SprocketConfig,
    catalogue: Catalogue,
    services: Services,
    signal: ShutdownSignal,
    timing: ChannelTiming,
}

impl SprocketRuntime {
    /// Loads and validates configuration from the current directory and
    /// the user config directory.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().with_user_config_dir().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Initializes logging and seeds the catalogue with every unit linked
    /// into the binary. The configuration is used as is, without validation.
    pub fn from_config(config: SprocketConfig) -> Self {
        logging::init_from_config(&config.logging);

        let catalogue = Catalogue::linked();
        info!(
            log_level = %config.logging.level,
            linked_units = catalogue.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            catalogue,
            services: Services::new(),
            signal: ShutdownSignal::new(),
            timing: ChannelTiming::default(),
        }
    }

    pub fn config(&self) -> &SprocketConfig {
        &self.config
    }

    /// Adds a unit to the catalogue.
    pub fn unit(mut self, definition: impl Into<UnitDefinition>) -> Self {
        self.catalogue.add(definition);
        self
    }

    /// Makes `service` available to unit factories through
    /// [`UnitContext::services`](sprocket_framework::UnitContext::services).
    pub fn service<T: ?Sized + Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    /// Overrides the acknowledgment deadline and followup window.
    pub fn channel_timing(mut self, timing: ChannelTiming) -> Self {
        self.timing = timing;
        self
    }

    /// A handle that stops the runtime when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Runs until Ctrl+C, SIGTERM or a shutdown request.
    pub async fn run(self, transport: BoxedTransport) -> RuntimeResult<()> {
        self.run_until(transport, wait_for_shutdown()).await
    }

    /// Runs until `shutdown` resolves, the [`ShutdownSignal`] fires or the
    /// transport stops delivering requests.
    pub async fn run_until<F>(self, transport: BoxedTransport, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let name = transport.name().to_string();

        info!(transport = %name, "Logging in");
        if let Err(source) = transport.authenticate(&self.config.bot.token).await {
            error!(transport = %name, error = %source, "Login failed, aborting startup");
            return Err(RuntimeError::Authentication {
                transport: name,
                source,
            });
        }

        let manager = self.build_manager();
        self.load_units(&manager).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(manager.registry()),
            AuthorizationGate::new(UserId(self.config.bot.owner_id)),
            transport.reply_sink(),
        )
        .with_timing(self.timing);

        let (tx, mut rx) = mpsc::channel(REQUEST_BUFFER);
        let mut transport_task = {
            let transport = Arc::clone(&transport);
            let token = self.signal.token().child_token();
            tokio::spawn(async move { transport.run(tx, token).await })
        };

        info!(
            transport = %name,
            owner = self.config.bot.owner_id,
            units = ?manager.loaded(),
            commands = manager.registry().len(),
            "Sprocket is running"
        );

        let tracker = TaskTracker::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = self.signal.triggered() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                request = rx.recv() => match request {
                    Some(request) => {
                        let dispatcher = dispatcher.clone();
                        tracker.spawn(async move {
                            dispatcher.dispatch(request).await;
                        });
                    }
                    None => {
                        info!(transport = %name, "Transport stopped delivering requests");
                        break;
                    }
                },
            }
        }

        self.signal.trigger();
        rx.close();
        let mut queued = 0usize;
        while let Ok(request) = rx.try_recv() {
            let dispatcher = dispatcher.clone();
            tracker.spawn(async move {
                dispatcher.dispatch(request).await;
            });
            queued += 1;
        }
        if queued > 0 {
            info!(queued, "Dispatching requests received before shutdown");
        }
        tracker.close();

        let grace = self.config.bot.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                in_flight = tracker.len(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed with requests still running"
            );
        }

        let result = match tokio::time::timeout(grace, &mut transport_task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => {
                error!(transport = %name, error = %source, "Transport ended with an error");
                Err(RuntimeError::Transport {
                    transport: name,
                    source,
                })
            }
            Ok(Err(join_error)) => {
                error!(transport = %name, error = %join_error, "Transport task failed");
                Err(RuntimeError::TransportTask(name))
            }
            Err(_) => {
                warn!(transport = %name, "Transport ignored shutdown, aborting it");
                transport_task.abort();
                Ok(())
            }
        };

        let unloaded = manager.shutdown().await;
        info!(units = unloaded.len(), "Sprocket stopped");
        result
    }

    fn build_manager(&self) -> Arc<LifecycleManager> {
        let bot = &self.config.bot;
        let mut catalogue = self.catalogue.clone();
        if bot.management_unit == manage::MANAGE_UNIT && !catalogue.contains(manage::MANAGE_UNIT) {
            catalogue.add(manage::definition());
        }
        if !catalogue.contains(&bot.management_unit) {
            warn!(
                unit = %bot.management_unit,
                "Management unit is not in the catalogue; lifecycle commands are unavailable"
            );
        }

        let services = self
            .services
            .clone()
            .with(Arc::new(self.signal.clone()));

        LifecycleManager::builder(catalogue)
            .services(services)
            .unit_configs(self.config.units.clone())
            .host(bot.management_unit.clone())
            .disabled(bot.disabled_units.iter().cloned())
            .build()
    }

    async fn load_units(&self, manager: &LifecycleManager) {
        if self.config.bot.autoload {
            let report = manager.load_all().await;
            for (unit, err) in &report.failed {
                error!(unit = %unit, error = %err, "Unit failed to load at startup");
            }
            info!(
                loaded = report.reloaded.len(),
                failed = report.failed.len(),
                "Startup unit load finished"
            );
            return;
        }

        debug!("Autoload disabled, loading only the management unit");
        if let Some(host) = manager.host()
            && manager.catalogue().contains(host)
            && let Err(err) = manager.load(host).await
        {
            error!(unit = %host, error = %err, "Management unit failed to load");
        }
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C, running until stopped");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder that loads configuration before creating a [`SprocketRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Searches the current directory for configuration files.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        let profile: String = profile.into();
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_user_config_dir(mut self) -> Self {
        self.config_loader = self.config_loader.with_user_config_dir();
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: SprocketConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads and validates configuration, then builds the runtime.
    pub fn build(self) -> RuntimeResult<SprocketRuntime> {
        let config = self.config_loader.load_validated()?;
        Ok(SprocketRuntime::from_config(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sprocket_core::testing::RecordingSink;
    use sprocket_core::{
        Identity, ReplySink, Request, TransportError, TransportResult, Transport, Visibility,
    };
    use sprocket_framework::{BoxError, Command, Registrar, Unit};
    use tokio::sync::{Mutex, Notify};
    use tokio_util::sync::CancellationToken;

    use super::*;

    const OWNER: u64 = 1;

    struct ScriptedTransport {
        token: &'static str,
        script: Mutex<Vec<Request>>,
        hold_open: bool,
        sink: Arc<RecordingSink>,
        delivered: Notify,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Request>, hold_open: bool) -> Arc<Self> {
            Arc::new(Self {
                token: "good",
                script: Mutex::new(script),
                hold_open,
                sink: Arc::new(RecordingSink::new()),
                delivered: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn authenticate(&self, token: &str) -> TransportResult<()> {
            if token == self.token {
                Ok(())
            } else {
                Err(TransportError::InvalidCredentials {
                    reason: "401 Unauthorized".to_string(),
                })
            }
        }

        fn reply_sink(&self) -> Arc<dyn ReplySink> {
            self.sink.clone()
        }

        async fn run(
            &self,
            requests: mpsc::Sender<Request>,
            shutdown: CancellationToken,
        ) -> TransportResult<()> {
            let script = std::mem::take(&mut *self.script.lock().await);
            for request in script {
                if requests.send(request).await.is_err() {
                    return Ok(());
                }
            }
            self.delivered.notify_one();
            if self.hold_open {
                shutdown.cancelled().await;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        torn_down: AtomicUsize,
    }

    struct Pinger {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Unit for Pinger {
        async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError> {
            registrar.command(Command::from_fn("ping", |_, channel| async move {
                channel.reply("pong", Visibility::Public).await?;
                Ok(())
            }));
            Ok(())
        }

        async fn teardown(&self) -> Result<(), BoxError> {
            self.counters.torn_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pinger(counters: &Arc<Counters>) -> UnitDefinition {
        let counters = Arc::clone(counters);
        UnitDefinition::new("pinger", move |_| {
            counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Pinger {
                counters: Arc::clone(&counters),
            })
        })
    }

    fn config() -> SprocketConfig {
        let mut config = SprocketConfig::default();
        config.bot.token = "good".to_string();
        config.bot.owner_id = OWNER;
        config.bot.shutdown_grace_secs = 1;
        config
    }

    fn request(command: &str, user: u64) -> Request {
        Request::builder(command)
            .identity(Identity::new(user, "someone"))
            .build()
    }

    #[tokio::test]
    async fn rejected_token_aborts_before_loading_units() {
        let counters = Arc::new(Counters::default());
        let mut config = config();
        config.bot.token = "stale".to_string();
        let transport = ScriptedTransport::new(vec![request("ping", 5)], false);

        let result = SprocketRuntime::from_config(config)
            .unit(pinger(&counters))
            .run_until(transport.clone(), std::future::pending())
            .await;

        assert!(matches!(
            result,
            Err(RuntimeError::Authentication {
                source: TransportError::InvalidCredentials { .. },
                ..
            })
        ));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        assert!(transport.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatches_until_transport_ends() {
        let counters = Arc::new(Counters::default());
        let transport =
            ScriptedTransport::new(vec![request("ping", 5), request("PING", 6)], false);

        SprocketRuntime::from_config(config())
            .unit(pinger(&counters))
            .run_until(transport.clone(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(transport.sink.contents(), vec!["pong", "pong"]);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manage_shutdown_stops_the_runtime() {
        let counters = Arc::new(Counters::default());
        let transport = ScriptedTransport::new(vec![request("manage shutdown", OWNER)], true);

        SprocketRuntime::from_config(config())
            .unit(pinger(&counters))
            .run_until(transport.clone(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(transport.sink.contents(), vec!["Shutting down the bot..."]);
        assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn external_shutdown_future_stops_the_runtime() {
        let transport = ScriptedTransport::new(Vec::new(), true);
        let runtime = SprocketRuntime::from_config(config());
        let signal = runtime.shutdown_signal();

        runtime
            .run_until(transport, async {})
            .await
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn requests_queued_at_shutdown_still_get_replies() {
        let counters = Arc::new(Counters::default());
        let transport =
            ScriptedTransport::new(vec![request("ping", 5), request("ping", 6)], true);

        let delivered = Arc::clone(&transport);
        SprocketRuntime::from_config(config())
            .unit(pinger(&counters))
            .run_until(transport.clone(), async move {
                delivered.delivered.notified().await;
            })
            .await
            .unwrap();

        assert_eq!(transport.sink.contents(), vec!["pong", "pong"]);
        assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn without_autoload_only_the_management_unit_loads() {
        let counters = Arc::new(Counters::default());
        let mut config = config();
        config.bot.autoload = false;
        let transport = ScriptedTransport::new(vec![request("ping", 5)], false);

        SprocketRuntime::from_config(config)
            .unit(pinger(&counters))
            .run_until(transport.clone(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        assert_eq!(transport.sink.contents(), vec!["Unknown command `ping`."]);
    }

    #[tokio::test]
    async fn disabled_units_are_skipped() {
        let counters = Arc::new(Counters::default());
        let mut config = config();
        config.bot.disabled_units = vec!["pinger".to_string()];
        let transport = ScriptedTransport::new(vec![request("manage units", OWNER)], false);

        SprocketRuntime::from_config(config)
            .unit(pinger(&counters))
            .run_until(transport.clone(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        let contents = transport.sink.contents();
        assert!(contents[0].contains("- `pinger` (unloaded)"));
        assert!(contents[0].contains("- `manage` (loaded)"));
    }
}
