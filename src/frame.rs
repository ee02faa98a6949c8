use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, DisplayKind, ViewerKind};
use crate::config_store::ConfigStore;
use crate::error::{FrameError, Result};
use crate::events::{QuitReason, QuitSignal};
use crate::library::{PictureLibrary, PictureSource};
use crate::platform::system_power::{self, CommandRunner};
use crate::render::{LibraryRenderer, PqivRenderer, Renderer};
use crate::schedule::{AlarmCallback, AlarmId, RecurringScheduler};
use crate::screen::{BacklightScreen, HeadlessScreen, Screen};
use crate::tasks::signal::LoopSignal;
use crate::tasks::{refresh, rotation};
use crate::web::{ControlServer, FrameControl};

/// Inputs to [`PictureFrame::init`]. Collaborators left unset are built from
/// the loaded configuration.
pub struct FrameOptions {
    pub config_path: PathBuf,
    pub screen: Option<Arc<dyn Screen>>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub source: Option<Arc<dyn PictureSource>>,
    pub command_runner: Option<CommandRunner>,
}

impl FrameOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            screen: None,
            renderer: None,
            source: None,
            command_runner: None,
        }
    }

    pub fn with_screen(mut self, screen: Arc<dyn Screen>) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn PictureSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_command_runner(mut self, runner: CommandRunner) -> Self {
        self.command_runner = Some(runner);
        self
    }
}

/// State shared between the orchestrator, its loops and the control server.
struct FrameShared {
    config: Mutex<Configuration>,
    configure_lock: Mutex<()>,
    store: ConfigStore,
    screen: Arc<dyn Screen>,
    renderer: Arc<dyn Renderer>,
    source: Arc<dyn PictureSource>,
    scheduler: RecurringScheduler,
    alarms: Mutex<ScreenAlarms>,
    rotation: Arc<LoopSignal>,
    refresh: Arc<LoopSignal>,
    /// The headless renderer reloads the source itself.
    renderer_scans_source: bool,
}

#[derive(Debug, Default)]
struct ScreenAlarms {
    wake: Option<AlarmId>,
    sleep: Option<AlarmId>,
}

/// Owns the frame's collaborators and runs it from start-up to quit.
pub struct PictureFrame {
    shared: Arc<FrameShared>,
    server: ControlServer,
    quit: QuitSignal,
    commands: CommandRunner,
    shutdown: CancellationToken,
    running: AtomicBool,
    started: AtomicBool,
    disposing: AtomicBool,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl fmt::Debug for PictureFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureFrame")
            .field("config_path", &self.shared.store.path())
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("disposing", &self.disposing.load(Ordering::SeqCst))
            .field("quit", &self.quit.current())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PictureFrame {
    /// Loads (or creates) the configuration, prepares the collaborators and
    /// schedules the screen wake/sleep alarms.
    ///
    /// Tasks spawned by the frame log through the tracing dispatcher that is
    /// current here.
    pub async fn init(options: FrameOptions) -> Result<Self> {
        let store = ConfigStore::new(options.config_path);
        let config = store.load_or_create()?;
        info!(
            path = %store.path().display(),
            photos = %config.photo_directory.display(),
            port = config.http_port,
            "initializing picture frame"
        );

        let screen = options.screen.unwrap_or_else(|| build_screen(&config));
        let source: Arc<dyn PictureSource> = options
            .source
            .unwrap_or_else(|| Arc::new(PictureLibrary::new()));
        // The headless renderer scans the source itself during init.
        let renderer_scans_source =
            options.renderer.is_none() && matches!(config.viewer.kind, ViewerKind::Headless);
        let renderer = options
            .renderer
            .unwrap_or_else(|| build_renderer(&config, Arc::clone(&source)));

        {
            let renderer = Arc::clone(&renderer);
            let source = Arc::clone(&source);
            let directory = config.photo_directory.clone();
            tokio::task::spawn_blocking(move || {
                renderer.init(&directory).map_err(FrameError::Collaborator)?;
                if !renderer_scans_source {
                    if let Err(err) = source.reload(&directory) {
                        warn!(error = ?err, "initial picture scan failed");
                    }
                }
                Ok::<_, FrameError>(())
            })
            .await??;
        }
        if let Err(err) = screen.set_brightness(config.brightness) {
            warn!(error = ?err, "failed to apply configured brightness");
        }

        let shared = Arc::new(FrameShared {
            config: Mutex::new(config.clone()),
            configure_lock: Mutex::new(()),
            store,
            screen,
            renderer,
            source,
            scheduler: RecurringScheduler::new(),
            alarms: Mutex::new(ScreenAlarms::default()),
            rotation: Arc::new(LoopSignal::new()),
            refresh: Arc::new(LoopSignal::new()),
            renderer_scans_source,
        });
        shared.apply_screen_schedule(&config)?;

        let quit = QuitSignal::new();
        let server = ControlServer::new(
            Arc::clone(&shared) as Arc<dyn FrameControl>,
            quit.clone(),
            config.http_port,
        );

        Ok(Self {
            shared,
            server,
            quit,
            commands: options
                .command_runner
                .unwrap_or_else(system_power::default_runner),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            disposing: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the background loops and the control server, waits for a quit
    /// reason and carries out its consequence.
    ///
    /// Never returns after [`QuitReason::FatalError`].
    pub async fn run(&self) -> Result<QuitReason> {
        if self.disposing.load(Ordering::SeqCst) {
            return Err(FrameError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FrameError::AlreadyRunning);
        }

        self.running.store(true, Ordering::SeqCst);
        self.spawn_loops();
        self.server.start().await?;
        info!("picture frame running");

        let reason = self.server.wait_for_quit_event().await;
        info!(%reason, "quit event received");
        if self.disposing.load(Ordering::SeqCst) {
            info!(%reason, "disposal already under way; skipping quit consequence");
            return Ok(reason);
        }

        let grace = self.current_config().quit_grace_period;
        debug!(grace = %humantime::format_duration(grace), "waiting before acting on quit");
        tokio::time::sleep(grace).await;
        self.handle_quit(reason).await;
        Ok(reason)
    }

    /// [`run`](Self::run) on its own task.
    pub fn run_async(self: &Arc<Self>) -> JoinHandle<Result<QuitReason>> {
        let frame = Arc::clone(self);
        tokio::spawn(async move { frame.run().await }.with_current_subscriber())
    }

    fn spawn_loops(&self) {
        let shared = &self.shared;
        let rotation_task = tokio::spawn(
            rotation::run(
                Arc::clone(&shared.renderer),
                Arc::clone(&shared.rotation),
                self.shutdown.clone(),
                {
                    let shared = Arc::clone(shared);
                    move || shared.current_config().photo_change_interval
                },
            )
            .with_current_subscriber(),
        );
        let refresh_task = tokio::spawn(
            refresh::run(
                Arc::clone(&shared.source),
                Arc::clone(&shared.refresh),
                self.shutdown.clone(),
                {
                    let shared = Arc::clone(shared);
                    move || {
                        let config = shared.current_config();
                        (config.photo_directory, config.photo_refresh_interval)
                    }
                },
            )
            .with_current_subscriber(),
        );
        let mut tasks = lock(&self.tasks);
        tasks.push(("rotation", rotation_task));
        tasks.push(("refresh", refresh_task));
    }

    async fn handle_quit(&self, reason: QuitReason) {
        let config = self.current_config();
        let command = match reason {
            QuitReason::Disposed => {
                info!("frame disposed locally; nothing else to do");
                None
            }
            QuitReason::ExitToDesktop => {
                info!("exiting to desktop");
                config
                    .exit_to_desktop_command
                    .map(|cmd| ("exit-to-desktop", cmd))
            }
            QuitReason::Restarting => Some(("reboot", config.reboot_command)),
            QuitReason::ShuttingDown => Some(("shutdown", config.shutdown_command)),
            QuitReason::FatalError => {
                error!(
                    "control server failed; the frame keeps showing pictures \
                     and must be restarted by an operator"
                );
                std::future::pending::<()>().await;
                None
            }
            QuitReason::None => {
                error!("quit consequence requested without a quit reason; ignoring");
                None
            }
        };

        if let Some((label, command)) = command {
            let runner = Arc::clone(&self.commands);
            let outcome = tokio::task::spawn_blocking(move || {
                system_power::execute(&runner, label, &command)
            })
            .await;
            if let Err(err) = outcome {
                error!(label, error = %err, "system command task failed");
            }
        }
    }

    /// Stops everything the frame started, in order: loops, control server,
    /// scheduler, renderer. Every step runs even if an earlier one failed.
    /// Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposing.swap(true, Ordering::SeqCst) {
            debug!("picture frame already disposed");
            return Ok(());
        }
        info!("disposing picture frame");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let mut failures = Vec::new();
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for (name, handle) in tasks {
            if let Err(err) = handle.await {
                failures.push(format!("{name} loop: {err}"));
            }
        }
        if let Err(err) = self.server.dispose().await {
            failures.push(format!("control server: {err}"));
        }
        if let Err(err) = self.shared.scheduler.dispose().await {
            failures.push(format!("scheduler: {err:#}"));
        }
        let renderer = Arc::clone(&self.shared.renderer);
        match tokio::task::spawn_blocking(move || renderer.dispose()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => failures.push(format!("renderer: {err:#}")),
            Err(err) => failures.push(format!("renderer: {err}")),
        }

        if failures.is_empty() {
            info!("picture frame disposed");
            Ok(())
        } else {
            for failure in &failures {
                error!(failure, "dispose step failed");
            }
            Err(FrameError::Dispose(failures))
        }
    }

    /// Validates, persists and applies `config`. Runs on the blocking pool
    /// because it writes the settings file and may restart the renderer.
    pub async fn configure(&self, config: Configuration) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.configure(config)).await?
    }

    /// Deep copy of the live configuration.
    pub fn current_config(&self) -> Configuration {
        self.shared.current_config()
    }

    pub fn toggle_next_photo(&self) {
        self.shared.toggle_next_photo();
    }

    pub fn current_picture_location(&self) -> Option<PathBuf> {
        self.shared.current_picture()
    }

    pub fn screen(&self) -> &Arc<dyn Screen> {
        &self.shared.screen
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn quit_reason(&self) -> QuitReason {
        self.quit.current()
    }

    /// Address the control server is bound to, once running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr().await
    }
}

impl FrameShared {
    fn current_config(&self) -> Configuration {
        lock(&self.config).clone()
    }

    fn configure(&self, config: Configuration) -> Result<()> {
        config.validate()?;
        let _serialized = lock(&self.configure_lock);
        let previous = self.current_config();

        // Nothing live changes until the new settings are on disk.
        self.store.save(&config)?;
        *lock(&self.config) = config.clone();
        if let Err(err) = self.apply_screen_schedule(&config) {
            self.roll_back(&previous);
            return Err(err);
        }
        if let Err(err) = self.screen.set_brightness(config.brightness) {
            warn!(error = ?err, "failed to apply brightness");
        }
        if previous.photo_directory != config.photo_directory {
            self.switch_directory(&config.photo_directory);
        }

        if previous.photo_change_interval != config.photo_change_interval {
            debug!(
                interval = %humantime::format_duration(config.photo_change_interval),
                "rotation interval changed"
            );
            self.rotation.wake();
        }
        if previous.photo_refresh_interval != config.photo_refresh_interval
            || previous.photo_directory != config.photo_directory
        {
            self.refresh.wake();
        }
        info!("configuration updated");
        Ok(())
    }

    fn roll_back(&self, previous: &Configuration) {
        warn!("restoring previous configuration");
        *lock(&self.config) = previous.clone();
        if let Err(err) = self.apply_screen_schedule(previous) {
            warn!(error = %err, "failed to restore screen schedule");
        }
        if let Err(err) = self.store.save(previous) {
            warn!(error = %err, "failed to restore configuration file");
        }
    }

    fn switch_directory(&self, directory: &Path) {
        info!(directory = %directory.display(), "picture directory changed");
        if let Err(err) = self.renderer.change_directory(directory) {
            warn!(error = ?err, "renderer could not switch picture directory");
        }
        if !self.renderer_scans_source {
            if let Err(err) = self.source.reload(directory) {
                warn!(error = ?err, "picture scan of new directory failed");
            }
        }
    }

    /// Replaces the wake/sleep alarms with the ones `config` asks for.
    fn apply_screen_schedule(&self, config: &Configuration) -> Result<()> {
        let mut alarms = lock(&self.alarms);
        for id in [alarms.wake.take(), alarms.sleep.take()].into_iter().flatten() {
            self.scheduler.stop_event(id);
        }
        if let Some(at) = config.awake_time {
            alarms.wake = Some(self.scheduler.schedule_daily(at, self.power_callback(true))?);
        }
        if let Some(at) = config.sleep_time {
            alarms.sleep = Some(self.scheduler.schedule_daily(at, self.power_callback(false))?);
        }
        Ok(())
    }

    fn power_callback(&self, on: bool) -> AlarmCallback {
        let screen = Arc::clone(&self.screen);
        Arc::new(move || {
            info!(on, "scheduled screen power change");
            if let Err(err) = screen.set_on(on) {
                warn!(on, error = ?err, "scheduled screen power change failed");
            }
        })
    }
}

impl FrameControl for FrameShared {
    fn current_config(&self) -> Configuration {
        FrameShared::current_config(self)
    }

    fn configure(&self, config: Configuration) -> Result<()> {
        FrameShared::configure(self, config)
    }

    fn toggle_next_photo(&self) {
        self.rotation.request_advance();
    }

    fn screen_is_on(&self) -> bool {
        self.screen.is_on()
    }

    fn toggle_screen(&self) -> anyhow::Result<bool> {
        self.screen.toggle()
    }

    fn current_picture(&self) -> Option<PathBuf> {
        self.renderer
            .current_picture_path()
            .or_else(|| self.source.current_picture())
    }
}

fn build_screen(config: &Configuration) -> Arc<dyn Screen> {
    match config.display.kind {
        DisplayKind::Backlight => Arc::new(BacklightScreen::new(
            &config.display.backlight_directory,
            config.display.brightness_scale,
        )),
        DisplayKind::Headless => Arc::new(HeadlessScreen::new()),
    }
}

fn build_renderer(config: &Configuration, source: Arc<dyn PictureSource>) -> Arc<dyn Renderer> {
    match config.viewer.kind {
        ViewerKind::Pqiv => Arc::new(PqivRenderer::new(&config.viewer.executable)),
        ViewerKind::Headless => Arc::new(LibraryRenderer::new(source)),
    }
}
