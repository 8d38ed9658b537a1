mod common;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tfrec_engine::config::PlaylistConfig;
use tfrec_engine::hls::{PlaylistEngine, PlaylistProvider};
use tfrec_engine::{PipelineError, StaticCredentials};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{AREA_ID, AUTH_TOKEN, request};

async fn mount(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_probe(server: &MockServer, seek: &str, sub: &str) {
    Mock::given(method("GET"))
        .and(path("/tf/playlist.m3u8"))
        .and(query_param("seek", seek))
        .and(query_param("type", "b"))
        .and(query_param("l", "300"))
        .and(query_param("ft", "20240101060000"))
        .and(query_param("to", "20240101061000"))
        .and(header("X-Radiko-AreaId", AREA_ID))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("#EXTM3U\n{sub}\n")))
        .expect(1..)
        .mount(server)
        .await;
}

fn engine(server: &MockServer) -> PlaylistEngine {
    PlaylistEngine::new(
        Client::new(),
        PlaylistConfig {
            playlist_url: format!("{}/tf/playlist.m3u8", server.uri()),
            seek_step: Duration::from_secs(300),
        },
        Arc::new(StaticCredentials::new(AUTH_TOKEN, AREA_ID)),
    )
}

#[tokio::test]
async fn probes_are_concatenated_in_discovery_order() {
    let server = MockServer::start().await;
    mount_probe(&server, "20240101060000", "/chunks/first.m3u8").await;
    mount_probe(&server, "20240101060500", "/chunks/second.m3u8").await;
    mount(&server, "/chunks/first.m3u8", "#EXTINF:5,\na0.aac\n#EXTINF:5,\na1.aac\n").await;
    mount(&server, "/chunks/second.m3u8", "#EXTINF:5,\nb0.aac\n").await;

    let segments = engine(&server)
        .discover_segments(&request("20240101060000", "20240101061000"))
        .await
        .unwrap();

    let urls: Vec<String> = segments.iter().map(|s| s.url.clone()).collect();
    assert_eq!(
        urls,
        [
            format!("{}/chunks/a0.aac", server.uri()),
            format!("{}/chunks/a1.aac", server.uri()),
            format!("{}/chunks/b0.aac", server.uri()),
        ]
    );
    let indices: Vec<usize> = segments.iter().map(|s| s.index).collect();
    assert_eq!(indices, [0, 1, 2]);
}

#[tokio::test]
async fn rediscovery_against_static_service_is_identical() {
    let server = MockServer::start().await;
    mount_probe(&server, "20240101060000", "/chunks/first.m3u8").await;
    mount_probe(&server, "20240101060500", "/chunks/second.m3u8").await;
    mount(&server, "/chunks/first.m3u8", "a0.aac\na1.aac\n").await;
    mount(&server, "/chunks/second.m3u8", "b0.aac\n").await;

    let engine = engine(&server);
    let req = request("20240101060000", "20240101061000");
    let first = engine.discover_segments(&req).await.unwrap();
    let second = engine.discover_segments(&req).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn probe_without_sub_playlists_contributes_nothing() {
    let server = MockServer::start().await;
    mount_probe(&server, "20240101060000", "").await;
    mount_probe(&server, "20240101060500", "/chunks/second.m3u8").await;
    mount(&server, "/chunks/second.m3u8", "b0.aac\n").await;

    let segments = engine(&server)
        .discover_segments(&request("20240101060000", "20240101061000"))
        .await
        .unwrap();

    assert_eq!(segments.len(), 1);
    assert!(segments[0].url.ends_with("/chunks/b0.aac"));
}

#[tokio::test]
async fn sub_playlist_outage_is_upstream_unavailable() {
    let server = MockServer::start().await;
    mount_probe(&server, "20240101060000", "/chunks/first.m3u8").await;
    Mock::given(method("GET"))
        .and(path("/chunks/first.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = engine(&server)
        .discover_segments(&request("20240101060000", "20240101061000"))
        .await
        .unwrap_err();

    match err {
        PipelineError::UpstreamUnavailable { url, status, .. } => {
            assert!(url.ends_with("/chunks/first.m3u8"));
            assert_eq!(status.map(|s| s.as_u16()), Some(503));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
