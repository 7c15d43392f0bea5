use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use cover_downloader_lib::download::{CoverDownloader, DirectorySaver};
use cover_downloader_lib::error::CoverError;
use cover_downloader_lib::settings::SettingsClient;

/// Answers exactly one request with a canned response and returns the base URL.
async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = stream.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
        let _ = stream.shutdown().await;
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn client(base_url: &str) -> SettingsClient {
    SettingsClient::new(base_url, "CoverDownloader")
}

#[tokio::test]
async fn settings_are_read_from_the_data_object() {
    let base = serve_once(
        "200 OK",
        br#"{"data":{"sections":[{"items":[{"id":"autoDownload","bool":true}]}]}}"#,
    )
    .await;
    let snapshot = client(&base).get_settings().await.unwrap();
    assert!(snapshot.auto_download());
}

#[tokio::test]
async fn settings_error_status_yields_none() {
    let base = serve_once("404 Not Found", br#"{"error":"unknown addon"}"#).await;
    assert!(client(&base).get_settings().await.is_none());
}

#[tokio::test]
async fn settings_invalid_json_yields_none() {
    let base = serve_once("200 OK", b"<html>not json</html>").await;
    assert!(client(&base).get_settings().await.is_none());
}

#[tokio::test]
async fn settings_without_data_yields_none() {
    let base = serve_once("200 OK", br#"{"ok":true}"#).await;
    assert!(client(&base).get_settings().await.is_none());
}

#[tokio::test]
async fn settings_unreachable_service_yields_none() {
    let base = refused_url().await;
    assert!(client(&base).get_settings().await.is_none());
}

#[tokio::test]
async fn cover_fetch_returns_the_body() {
    let base = serve_once("200 OK", b"\xff\xd8\xff\xe0jpeg").await;
    let downloader = CoverDownloader::new(DirectorySaver::new("unused"));
    let bytes = downloader.fetch(&format!("{base}/cover/orig")).await.unwrap();
    assert_eq!(bytes, b"\xff\xd8\xff\xe0jpeg");
}

#[tokio::test]
async fn cover_fetch_fails_on_error_status() {
    let base = serve_once("404 Not Found", b"").await;
    let downloader = CoverDownloader::new(DirectorySaver::new("unused"));
    let err = downloader.fetch(&format!("{base}/cover/orig")).await.unwrap_err();
    assert!(matches!(err, CoverError::Http(ref inner) if inner.status().map(|s| s.as_u16()) == Some(404)));
}

#[tokio::test]
async fn cover_fetch_fails_when_unreachable() {
    let base = refused_url().await;
    let downloader = CoverDownloader::new(DirectorySaver::new("unused"));
    let err = downloader.fetch(&format!("{base}/cover/orig")).await.unwrap_err();
    assert!(matches!(err, CoverError::Http(_)), "got {err:?}");
}
