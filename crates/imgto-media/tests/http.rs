//! Client tests against a local warp server

use bytes::Bytes;
use imgto_core::error::{FetchError, UploadError};
use imgto_core::media::{Fetcher, MediaService, UploadRequest};
use imgto_media::{CloudinaryClient, MediaConfig};
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use warp::http::StatusCode;
use warp::Filter;

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

fn upload_reply(body: Bytes) -> warp::reply::WithStatus<warp::reply::Json> {
    let (status, json) = if contains(&body, "bad.png") {
        (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": { "message": "INAPPROPRIATE_CONTENT" } }),
        )
    } else if contains(&body, "tiny.png") {
        (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": { "message": "Image is below the minimum pixel resolution" } }),
        )
    } else if !contains(&body, "name=\"signature\"")
        || !contains(&body, "name=\"api_key\"")
        || !contains(&body, "q_auto:low")
    {
        (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": { "message": "Missing required parameter" } }),
        )
    } else {
        (
            StatusCode::OK,
            serde_json::json!({
                "public_id": "imgto/cat",
                "format": "png",
                "width": 640,
                "height": 480,
                "bytes": 1234,
                "original_filename": "cat",
                "secure_url": "https://res.example/cat.png"
            }),
        )
    };
    warp::reply::with_status(warp::reply::json(&json), status)
}

async fn spawn_service() -> SocketAddr {
    let upload = warp::post()
        .and(warp::path!("v1_1" / "demo" / "image" / "upload"))
        .and(warp::body::bytes())
        .map(upload_reply);

    let files = warp::get()
        .and(warp::path!("files" / String))
        .map(|name: String| match name.as_str() {
            "ok" => warp::reply::with_status(b"payload".to_vec(), StatusCode::OK),
            "private" => warp::reply::with_status(Vec::new(), StatusCode::UNAUTHORIZED),
            _ => warp::reply::with_status(Vec::new(), StatusCode::BAD_GATEWAY),
        });

    let sign = warp::post()
        .and(warp::path!("api" / "sign"))
        .and(warp::body::json())
        .map(|params: serde_json::Value| {
            assert!(params.get("timestamp").is_some());
            warp::reply::json(&serde_json::json!({ "signature": "remote-signature" }))
        });

    let (addr, server) = warp::serve(upload.or(files).or(sign)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn client(addr: SocketAddr, config: MediaConfig) -> CloudinaryClient {
    let base = format!("http://{addr}");
    CloudinaryClient::new(config.with_bases(format!("{base}/v1_1"), base)).unwrap()
}

fn request(filename: &str) -> UploadRequest {
    UploadRequest {
        filename: filename.to_string(),
        mime: "image/png".to_string(),
        bytes: Bytes::from_static(b"\x89PNG"),
        eager: "q_auto:low".to_string(),
    }
}

#[tokio::test]
async fn signed_upload_returns_remote_asset() {
    let addr = spawn_service().await;
    let client = client(addr, MediaConfig::new("demo", "123").with_secret("shh"));

    let asset = client.upload(request("cat.png")).await.unwrap();
    assert_eq!(asset.remote_id, "imgto/cat");
    assert_eq!(asset.format, "png");
    assert_eq!((asset.width, asset.height), (640, 480));
    assert_eq!(asset.original_filename, "cat");
}

#[tokio::test]
async fn remote_signer_is_used_without_secret() {
    let addr = spawn_service().await;
    let config = MediaConfig::new("demo", "123").with_signing_endpoint(format!("http://{addr}/api/sign"));
    let client = client(addr, config);

    assert!(client.upload(request("cat.png")).await.is_ok());
}

#[tokio::test]
async fn upload_errors_are_classified() {
    let addr = spawn_service().await;
    let client = client(addr, MediaConfig::new("demo", "123").with_secret("shh"));

    assert_eq!(client.upload(request("bad.png")).await.unwrap_err(), UploadError::Rejected);
    assert_eq!(
        client.upload(request("tiny.png")).await.unwrap_err(),
        UploadError::ResolutionTooSmall
    );
}

#[tokio::test]
async fn fetch_maps_statuses() {
    let addr = spawn_service().await;
    let client = client(addr, MediaConfig::new("demo", "123").with_secret("shh"));

    let body = client.fetch(&format!("http://{addr}/files/ok")).await.unwrap();
    assert_eq!(&body[..], b"payload");
    assert_eq!(
        client.fetch(&format!("http://{addr}/files/private")).await.unwrap_err(),
        FetchError::Unauthorized
    );
    assert_eq!(
        client.fetch(&format!("http://{addr}/files/gone")).await.unwrap_err(),
        FetchError::Status(502)
    );
    assert!(matches!(
        client.fetch("http://127.0.0.1:1/unreachable").await,
        Err(FetchError::Transport(_))
    ));
}
