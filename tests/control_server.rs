mod common;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::FakeFrame;
use pi_picture_frame::config::TimeOfDay;
use pi_picture_frame::events::QuitSignal;
use pi_picture_frame::web::{FrameControl, control_app};
use pi_picture_frame::{Configuration, QuitReason};
use tower::ServiceExt;

struct Site {
    frame: Arc<FakeFrame>,
    quit: QuitSignal,
}

impl Site {
    fn new(config: Configuration) -> Self {
        Self {
            frame: FakeFrame::new(config),
            quit: QuitSignal::new(),
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        let frame: Arc<dyn FrameControl> = self.frame.clone();
        control_app(frame, self.quit.clone()).oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post(&self, uri: &str) -> Response {
        self.send(Request::post(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, form: &str) -> Response {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap(),
        )
        .await
    }
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn index_is_served_on_both_paths() {
    let site = Site::new(Configuration::default());
    for uri in ["/", "/index.html"] {
        let response = site.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("/current.jpg"));
    }
}

#[tokio::test]
async fn paths_match_regardless_of_case() {
    let site = Site::new(Configuration::default());
    for uri in ["/INDEX.HTML", "/Settings.html", "/About.Html"] {
        let response = site.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
    site.post("/ShutDown.html").await;
    assert_eq!(site.quit.current(), QuitReason::ShuttingDown);
}

#[tokio::test]
async fn about_and_full_screen_pages_are_served() {
    let site = Site::new(Configuration::default());
    let response = site.get("/about.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(env!("CARGO_PKG_VERSION")));

    let response = site.get("/full.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("src=\"/current.jpg\""));
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let site = Site::new(Configuration::default());
    let response = site.get("/nope.html").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_text(response).await.contains("404 Not Found"));
}

#[tokio::test]
async fn quit_pages_require_post() {
    let site = Site::new(Configuration::default());
    let response = site.get("/restart.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Must POST request to restart system."));
    assert_eq!(site.quit.current(), QuitReason::None);
}

#[tokio::test]
async fn shutdown_post_records_reason() {
    let site = Site::new(Configuration::default());
    let response = site.post("/shutdown.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("shutdown sequence in ~5s"));
    assert_eq!(site.quit.current(), QuitReason::ShuttingDown);
}

#[tokio::test]
async fn first_quit_request_wins() {
    let site = Site::new(Configuration::default());
    site.post("/linux.html").await;
    let response = site.post("/restart.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(site.quit.current(), QuitReason::ExitToDesktop);
}

#[tokio::test]
async fn sleep_post_toggles_the_screen() {
    let site = Site::new(Configuration::default());
    let response = site.get("/sleep.html").await;
    assert!(body_text(response).await.contains("Must POST request to toggle screen."));
    assert!(site.frame.screen_is_on());

    let response = site.post("/sleep.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Turn Screen On"));
    assert!(!site.frame.screen_is_on());

    site.post("/turnoff.html").await;
    assert!(site.frame.screen_is_on());
}

#[tokio::test]
async fn screen_failure_renders_error_page() {
    let site = Site::new(Configuration::default());
    site.frame.fail_toggle.store(true, Ordering::SeqCst);
    let response = site.post("/sleep.html").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.contains("500: Internal System Error"));
    assert!(body.contains("backlight is not writable"));
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let site = Site::new(Configuration::default());
    site.frame.panic_on_picture.store(true, Ordering::SeqCst);
    let response = site.get("/current.jpg").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("picture lookup exploded"));

    site.frame.panic_on_picture.store(false, Ordering::SeqCst);
    assert_eq!(site.get("/").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn change_picture_only_advances_on_post() {
    let site = Site::new(Configuration::default());
    site.get("/changepicture.html").await;
    assert_eq!(site.frame.advances.load(Ordering::SeqCst), 0);
    let response = site.post("/changepicture.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(site.frame.advances.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn current_picture_is_served_compressed() {
    let dir = tempfile::tempdir().unwrap();
    let picture = dir.path().join("shown.jpg");
    fs::write(&picture, vec![0xFF; 4096]).unwrap();
    let site = Site::new(Configuration::default());
    *site.frame.picture.lock().unwrap() = Some(picture);

    let response = site
        .send(
            Request::get("/current.jpg")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
}

#[tokio::test]
async fn current_picture_missing_is_not_found() {
    let site = Site::new(Configuration::default());
    assert_eq!(site.get("/current.jpg").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn valid_settings_are_applied() {
    let site = Site::new(Configuration::default());
    let response = site
        .post_form(
            "/settings.html",
            "photo-directory=%2Fsrv%2Fphotos&change-minutes=10&refresh-hours=2&brightness=30\
             &awake-hour=7&awake-minute=0&sleep-hour=&sleep-minute=",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Settings saved."));

    let config = site.frame.current_config();
    assert_eq!(config.photo_directory, std::path::PathBuf::from("/srv/photos"));
    assert_eq!(config.photo_change_interval.as_secs(), 600);
    assert_eq!(config.brightness, 30);
    assert_eq!(config.awake_time, TimeOfDay::new(7, 0));
}

#[tokio::test]
async fn invalid_settings_keep_the_configuration() {
    let site = Site::new(Configuration::default());
    let before = site.frame.current_config();
    let response = site
        .post_form(
            "/settings.html",
            "photo-directory=+&change-minutes=0&refresh-hours=1&brightness=101",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Settings were not saved"));
    assert!(body.contains("photo-change-interval"));
    assert_eq!(site.frame.current_config(), before);
}

#[tokio::test]
async fn oversized_intervals_are_rejected_not_fatal() {
    let site = Site::new(Configuration::default());
    let before = site.frame.current_config();
    let response = site
        .post_form(
            "/settings.html",
            "photo-directory=%2Fphotos&change-minutes=18446744073709551615\
             &refresh-hours=18446744073709551615&brightness=50",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Settings were not saved"));
    assert!(body.contains("photo-refresh-interval"));
    assert_eq!(site.frame.current_config(), before);
}

#[tokio::test]
async fn stylesheets_are_served_from_the_asset_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("css/pure")).unwrap();
    fs::write(dir.path().join("css/pure/pure-min.css"), "body{}").unwrap();
    let site = Site::new(Configuration {
        asset_directory: dir.path().to_path_buf(),
        ..Configuration::default()
    });

    let response = site.get("/css/pure/pure-min.css").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/css; charset=utf-8"
    );
    assert_eq!(body_text(response).await, "body{}");
    assert_eq!(site.get("/css/missing.css").await.status(), StatusCode::NOT_FOUND);
}
