pub mod pages;

use std::any::Any;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Form, Router, ServiceExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::util::MapRequest;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::compression::predicate::SizeAbove;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, TimeOfDay};
use crate::error::{FrameError, ValidationErrors};
use crate::events::{QuitReason, QuitSignal};
use pages::{Notice, Pages};

/// What the control pages need from the running frame.
pub trait FrameControl: Send + Sync {
    /// Snapshot of the live configuration.
    fn current_config(&self) -> Configuration;
    fn configure(&self, config: Configuration) -> Result<(), FrameError>;
    /// Asks the rotation loop to advance now.
    fn toggle_next_photo(&self);
    fn screen_is_on(&self) -> bool;
    /// Flips screen power and returns the new state.
    fn toggle_screen(&self) -> anyhow::Result<bool>;
    fn current_picture(&self) -> Option<PathBuf>;
}

/// The control site with request paths lower-cased before routing.
pub type ControlApp = MapRequest<Router, fn(Request) -> Request>;

#[derive(Clone)]
struct AppState {
    frame: Arc<dyn FrameControl>,
    quit: QuitSignal,
    pages: Arc<Pages>,
}

/// HTTP control plane. Posts quit reasons but never acts on them.
pub struct ControlServer {
    app: ControlApp,
    port: u16,
    quit: QuitSignal,
    state: Mutex<ServerState>,
}

enum ServerState {
    Idle,
    Listening(Listening),
    Stopped,
}

struct Listening {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ControlServer {
    pub fn new(frame: Arc<dyn FrameControl>, quit: QuitSignal, port: u16) -> Self {
        Self {
            app: control_app(frame, quit.clone()),
            port,
            quit,
            state: Mutex::new(ServerState::Idle),
        }
    }

    /// Binds the listener and starts serving. No-op while already listening
    /// or after [`dispose`](Self::dispose).
    pub async fn start(&self) -> Result<(), FrameError> {
        let mut state = self.state.lock().await;
        match &*state {
            ServerState::Listening(listening) => {
                debug!(addr = %listening.addr, "control server already listening");
                return Ok(());
            }
            ServerState::Stopped => {
                warn!("control server was disposed; not restarting");
                return Ok(());
            }
            ServerState::Idle => {}
        }

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let bind_err = |source: std::io::Error| FrameError::Bind {
            port: self.port,
            source,
        };
        let listener = TcpListener::bind(bind_addr).await.map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            serve(listener, self.app.clone(), cancel.clone(), self.quit.clone())
                .with_current_subscriber(),
        );
        info!(%addr, "control server listening");
        *state = ServerState::Listening(Listening { addr, cancel, task });
        Ok(())
    }

    /// Stops accepting connections and waits for the accept loop to end.
    ///
    /// Records [`QuitReason::Disposed`] unless a reason was already posted.
    /// Idempotent.
    pub async fn dispose(&self) -> Result<(), FrameError> {
        self.quit.post(QuitReason::Disposed);
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ServerState::Stopped) {
            ServerState::Listening(listening) => {
                info!(reason = %self.quit.current(), "terminating control server");
                listening.cancel.cancel();
                listening.task.await.map_err(|err| {
                    FrameError::Collaborator(anyhow::anyhow!("control server task failed: {err}"))
                })?;
                info!("control server terminated");
            }
            ServerState::Idle | ServerState::Stopped => {
                debug!("control server not listening; nothing to dispose");
            }
        }
        Ok(())
    }

    pub async fn wait_for_quit_event(&self) -> QuitReason {
        self.quit.wait().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ServerState::Listening(listening) => Some(listening.addr),
            ServerState::Idle | ServerState::Stopped => None,
        }
    }

    pub async fn is_listening(&self) -> bool {
        matches!(&*self.state.lock().await, ServerState::Listening(_))
    }
}

async fn serve(listener: TcpListener, app: ControlApp, cancel: CancellationToken, quit: QuitSignal) {
    let shutdown = cancel.clone();
    let result = axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    })
    .await;

    if cancel.is_cancelled() {
        debug!("control server accept loop stopped");
        return;
    }
    match result {
        Ok(()) => error!("control server accept loop ended unexpectedly; frame keeps running"),
        Err(err) => error!(error = %err, "control server failed; frame keeps running"),
    }
    quit.post(QuitReason::FatalError);
}

/// [`router`] behind a path lower-casing step, so `/Settings.HTML` finds
/// `/settings.html`.
pub fn control_app(frame: Arc<dyn FrameControl>, quit: QuitSignal) -> ControlApp {
    MapRequest::new(router(frame, quit), lowercase_path as fn(Request) -> Request)
}

fn lowercase_path(mut request: Request) -> Request {
    let uri = request.uri();
    if !uri.path().bytes().any(|b| b.is_ascii_uppercase()) {
        return request;
    }
    let mut lowered = uri.path().to_ascii_lowercase();
    if let Some(query) = uri.query() {
        lowered.push('?');
        lowered.push_str(query);
    }
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = lowered.parse::<PathAndQuery>().ok();
    match Uri::from_parts(parts) {
        Ok(uri) => *request.uri_mut() = uri,
        Err(err) => debug!(error = %err, "kept request path as sent"),
    }
    request
}

/// Builds the control site's routes around `frame`.
pub fn router(frame: Arc<dyn FrameControl>, quit: QuitSignal) -> Router {
    let state = AppState {
        frame,
        quit,
        pages: Arc::new(Pages::default()),
    };

    Router::new()
        .route("/", any(index))
        .route("/index.html", any(index))
        .route(
            "/settings.html",
            get(settings_page).post(update_settings).fallback(settings_page),
        )
        .route("/turnoff.html", any(power_page))
        .route("/about.html", any(about))
        .route("/full.html", any(full))
        .route("/sleep.html", any(sleep_toggle))
        .route("/changepicture.html", any(change_picture))
        .route("/linux.html", any(exit_to_desktop))
        .route("/restart.html", any(restart))
        .route("/shutdown.html", any(shutdown))
        .route(
            "/current.jpg",
            any(current_picture)
                .layer(CompressionLayer::new().gzip(true).compress_when(SizeAbove::new(0))),
        )
        .fallback(static_asset)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let response = next.run(request).await;
    info!(
        %method,
        client,
        path,
        status = response.status().as_u16(),
        "http request"
    );
    response
}

/// Handler failure rendered as the 500 page.
struct PageError(anyhow::Error);

impl<E> From<E> for PageError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        error!(error = ?self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(pages::error_page(&self.0)),
        )
            .into_response()
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(detail, "request handler panicked");
    let err = anyhow::anyhow!(detail).context("request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(pages::error_page(&err)),
    )
        .into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(pages::not_found())).into_response()
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.pages.index())
}

async fn about(State(state): State<AppState>) -> Html<String> {
    Html(state.pages.about())
}

async fn full(State(state): State<AppState>) -> Html<String> {
    Html(state.pages.full())
}

async fn settings_page(State(state): State<AppState>) -> Html<String> {
    Html(state.pages.settings(&state.frame.current_config(), None))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SettingsForm {
    #[serde(default)]
    photo_directory: String,
    #[serde(default)]
    change_minutes: String,
    #[serde(default)]
    refresh_hours: String,
    #[serde(default)]
    brightness: String,
    #[serde(default)]
    awake_hour: String,
    #[serde(default)]
    awake_minute: String,
    #[serde(default)]
    sleep_hour: String,
    #[serde(default)]
    sleep_minute: String,
}

impl SettingsForm {
    /// Applies the submitted fields on top of `current`.
    fn apply_to(&self, current: &Configuration) -> Result<Configuration, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let mut next = current.clone();

        next.photo_directory = PathBuf::from(self.photo_directory.trim());
        if let Some(minutes) = parse_field::<u64>(&mut errors, "photo-change-interval", &self.change_minutes) {
            match minutes.checked_mul(60) {
                Some(secs) => next.photo_change_interval = Duration::from_secs(secs),
                None => errors.push("photo-change-interval", format!("{minutes} minutes is too long")),
            }
        }
        if let Some(hours) = parse_field::<u64>(&mut errors, "photo-refresh-interval", &self.refresh_hours) {
            match hours.checked_mul(3600) {
                Some(secs) => next.photo_refresh_interval = Duration::from_secs(secs),
                None => errors.push("photo-refresh-interval", format!("{hours} hours is too long")),
            }
        }
        if let Some(value) = parse_field::<u16>(&mut errors, "brightness", &self.brightness) {
            match u8::try_from(value) {
                Ok(percent) => next.brightness = percent,
                Err(_) => errors.push("brightness", format!("must be between 0 and 100 (got {value})")),
            }
        }
        next.awake_time = parse_time(&mut errors, "awake-time", &self.awake_hour, &self.awake_minute);
        next.sleep_time = parse_time(&mut errors, "sleep-time", &self.sleep_hour, &self.sleep_minute);

        errors.into_result().map(|()| next)
    }
}

fn parse_field<T: std::str::FromStr>(
    errors: &mut ValidationErrors,
    field: &'static str,
    raw: &str,
) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(field, format!("'{}' is not a valid number", raw.trim()));
            None
        }
    }
}

fn parse_time(
    errors: &mut ValidationErrors,
    field: &'static str,
    hour: &str,
    minute: &str,
) -> Option<TimeOfDay> {
    match (hour.trim(), minute.trim()) {
        ("", "") => None,
        ("", _) | (_, "") => {
            errors.push(field, "needs both an hour and a minute");
            None
        }
        (h, m) => {
            let parsed = h
                .parse()
                .ok()
                .zip(m.parse().ok())
                .and_then(|(h, m)| TimeOfDay::new(h, m));
            if parsed.is_none() {
                errors.push(field, format!("'{h}:{m}' is not a valid time of day"));
            }
            parsed
        }
    }
}

async fn update_settings(
    State(state): State<AppState>,
    Form(form): Form<SettingsForm>,
) -> Result<Html<String>, PageError> {
    let current = state.frame.current_config();
    let outcome = match form.apply_to(&current) {
        // Saving writes the settings file and may restart the renderer.
        Ok(next) => {
            let frame = Arc::clone(&state.frame);
            tokio::task::spawn_blocking(move || frame.configure(next)).await?
        }
        Err(errors) => Err(FrameError::InvalidConfig(errors)),
    };
    let notice = match outcome {
        Ok(()) => Notice::Saved,
        Err(FrameError::InvalidConfig(errors)) => {
            info!(%errors, "rejected settings update");
            Notice::Rejected(errors.iter().map(|e| format!("{}: {}", e.field, e.message)).collect())
        }
        Err(err) => return Err(PageError(anyhow::Error::new(err))),
    };
    Ok(Html(state.pages.settings(&state.frame.current_config(), Some(&notice))))
}

async fn power_page(State(state): State<AppState>, method: Method) -> Result<Html<String>, PageError> {
    screen_power(&state, &method, "")
}

async fn sleep_toggle(State(state): State<AppState>, method: Method) -> Result<Html<String>, PageError> {
    screen_power(&state, &method, "Must POST request to toggle screen.")
}

fn screen_power(state: &AppState, method: &Method, idle_message: &str) -> Result<Html<String>, PageError> {
    let message = if *method == Method::POST {
        let on = state.frame.toggle_screen()?;
        info!(on, "screen toggled from control page");
        "Screen should have been toggled."
    } else {
        idle_message
    };
    Ok(Html(state.pages.turn_off(message, state.frame.screen_is_on())))
}

async fn change_picture(State(state): State<AppState>, method: Method) -> Html<String> {
    if method == Method::POST {
        state.frame.toggle_next_photo();
    }
    Html(state.pages.index())
}

async fn exit_to_desktop(State(state): State<AppState>, method: Method) -> Html<String> {
    let grace = grace_label(&state);
    quit_request(
        &state,
        &method,
        QuitReason::ExitToDesktop,
        &format!("The frame will exit to the desktop in ~{grace}. This webpage will no longer show up."),
        "Must POST request to exit to desktop.",
    )
}

async fn restart(State(state): State<AppState>, method: Method) -> Html<String> {
    let grace = grace_label(&state);
    quit_request(
        &state,
        &method,
        QuitReason::Restarting,
        &format!(
            "The frame will start the restart sequence in ~{grace}. This webpage will no longer show up until it is done rebooting."
        ),
        "Must POST request to restart system.",
    )
}

async fn shutdown(State(state): State<AppState>, method: Method) -> Html<String> {
    let grace = grace_label(&state);
    quit_request(
        &state,
        &method,
        QuitReason::ShuttingDown,
        &format!(
            "The frame will start the shutdown sequence in ~{grace}. This webpage will no longer show up."
        ),
        "Must POST request to shutdown system.",
    )
}

fn grace_label(state: &AppState) -> String {
    humantime::format_duration(state.frame.current_config().quit_grace_period).to_string()
}

fn quit_request(
    state: &AppState,
    method: &Method,
    reason: QuitReason,
    acknowledgement: &str,
    refusal: &str,
) -> Html<String> {
    if *method != Method::POST {
        return Html(state.pages.turn_off(refusal, state.frame.screen_is_on()));
    }
    if state.quit.post(reason) {
        info!(%reason, "quit requested from control page");
    } else {
        info!(requested = %reason, current = %state.quit.current(), "quit already requested; keeping first reason");
    }
    Html(state.pages.shutdown(acknowledgement))
}

async fn current_picture(State(state): State<AppState>) -> Result<Response, PageError> {
    let Some(path) = state.frame.current_picture() else {
        return Ok(not_found());
    };
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read picture {}", path.display()))?;
    let content_type = HeaderValue::from_str(&picture_content_type(&path))
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn picture_content_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("tif") => "image/tiff".to_string(),
        Some(other) => format!("image/{other}"),
        None => "application/octet-stream".to_string(),
    }
}

async fn static_asset(State(state): State<AppState>, uri: Uri) -> Response {
    let Some((relative, content_type)) = asset_path(uri.path()) else {
        return not_found();
    };
    let path = state.frame.current_config().asset_directory.join(relative);
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "static asset unavailable");
            not_found()
        }
    }
}

/// Maps `/css/[pure/]name.css` and `/js/[pure/]name.js` onto a relative asset path.
fn asset_path(uri_path: &str) -> Option<(PathBuf, &'static str)> {
    let segments: Vec<&str> = uri_path.trim_start_matches('/').split('/').collect();
    let (kind, rest) = segments.split_first()?;
    if !matches!(*kind, "css" | "js") {
        return None;
    }
    let file = match rest {
        [file] => *file,
        ["pure", file] => *file,
        _ => return None,
    };
    let (stem, ext) = file.rsplit_once('.')?;
    let valid_stem = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid_stem || stem.starts_with('.') {
        return None;
    }
    let content_type = match ext {
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        _ => return None,
    };
    Some((PathBuf::from(uri_path.trim_start_matches('/')), content_type))
}
