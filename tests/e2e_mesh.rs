//! End-to-end: core router in front of a live file backend
//!
//! The file backend listens on an ephemeral port; a second configured
//! backend is unreachable, so every redirect must land on the live one.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use framesearch::proxy_router::{BackendDescriptor, BackendRole, HttpProber, ProxyRouter, RolePolicy};
use framesearch::state::{AppConfig, CoreState, FileState, Role};
use framesearch::web_api;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn spawn_file_backend(work_dir: &std::path::Path) -> String {
    let vars = HashMap::from([("WORK_DIR".to_string(), work_dir.display().to_string())]);
    let config = AppConfig::from_lookup(Role::File, |k| vars.get(k).cloned()).unwrap();
    let app = web_api::file_router(FileState::build(&config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn core_app(file_servers: &str) -> axum::Router {
    let backends = BackendDescriptor::parse_list(file_servers, BackendRole::File).unwrap();
    let policy = RolePolicy {
        timeout: Duration::from_secs(2),
        max_concurrency: 2,
    };
    let router = ProxyRouter::new(
        backends,
        policy,
        policy,
        Arc::new(HttpProber::new(client())),
        Duration::from_secs(60),
    );
    web_api::core_router(CoreState {
        router: Arc::new(router),
    })
}

#[tokio::test]
async fn test_video_range_through_router() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data/videos")).unwrap();
    std::fs::write(dir.path().join("data/videos/v1.mp4"), vec![7u8; 1000]).unwrap();

    let live = spawn_file_backend(dir.path()).await;
    let app = core_app(&format!("http://127.0.0.1:9,{}", live));

    let response = app
        .oneshot(Request::builder().uri("/file/v1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert_eq!(location, format!("{}/file/v1", live));

    let video = client()
        .get(&location)
        .header(header::RANGE.as_str(), "bytes=0-99")
        .send()
        .await
        .unwrap();
    assert_eq!(video.status().as_u16(), 206);
    assert_eq!(
        video.headers()["content-range"].to_str().unwrap(),
        "bytes 0-99/1000"
    );
    assert_eq!(video.bytes().await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_missing_frame_on_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    let live = spawn_file_backend(dir.path()).await;
    let app = core_app(&live);

    let response = app
        .oneshot(Request::builder().uri("/file/v1/3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"message":"get_frame errors"}"#);
}
