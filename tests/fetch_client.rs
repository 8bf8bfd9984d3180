mod common;

use std::time::Duration;

use common::{FakeRenderer, FakeSite, context, static_fetch_client, test_config};
use flyer_finder::config::RenderConfig;
use flyer_finder::detector::ContentModeDetector;
use flyer_finder::error::EngineError;
use flyer_finder::fetch::FetchClient;
use flyer_finder::models::ContentMode;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn static_fetch_sends_identity_and_session_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/willys"))
        .and(header_exists("accept-language"))
        .and(header("cookie", "ereklamblad_location=stockholm"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<div data-offer-id=\"1\"></div>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = static_fetch_client(&test_config(&server.uri()));
    let ctx = context(&server.uri());
    let document = client
        .fetch_static(&format!("{}/willys", server.uri()), Some(&ctx))
        .await
        .unwrap();
    assert_eq!(document.mode, ContentMode::Static);
    assert!(document.html.contains("data-offer-id"));
}

#[tokio::test]
async fn rate_limited_responses_are_retried_then_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coop"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let client = static_fetch_client(&test_config(&server.uri()));
    let result = client.fetch_static(&format!("{}/coop", server.uri()), None).await;
    assert!(matches!(result, Err(EngineError::FetchBlocked { .. })));
}

#[tokio::test]
async fn forbidden_is_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lidl"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = static_fetch_client(&test_config(&server.uri()));
    let result = client.fetch_static(&format!("{}/lidl", server.uri()), None).await;
    assert!(matches!(result, Err(EngineError::FetchBlocked { ref reason, .. }) if reason == "HTTP 403"));
}

#[tokio::test]
async fn challenge_interstitial_is_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ica"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><head><title>Just a moment...</title></head>\
             <body><script src=\"/cdn-cgi/challenge-platform/h/b/orchestrate\"></script></body></html>",
        ))
        .mount(&server)
        .await;

    let client = static_fetch_client(&test_config(&server.uri()));
    let result = client.fetch_static(&format!("{}/ica", server.uri()), None).await;
    assert!(matches!(result, Err(EngineError::FetchBlocked { .. })));
}

#[tokio::test]
async fn not_found_and_server_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = static_fetch_client(&test_config(&server.uri()));
    let gone = client.fetch_static(&format!("{}/gone", server.uri()), None).await;
    assert!(matches!(gone, Err(EngineError::NotFound { .. })));
    let broken = client.fetch_static(&format!("{}/broken", server.uri()), None).await;
    assert!(matches!(broken, Err(EngineError::UnexpectedStatus { status: 500, .. })));
}

#[tokio::test]
async fn rendered_fetch_without_engine_is_unavailable() {
    let server = MockServer::start().await;
    let client = static_fetch_client(&test_config(&server.uri()));
    let result = client.fetch_rendered(&format!("{}/spa", server.uri()), None).await;
    assert!(matches!(result, Err(EngineError::RendererUnavailable)));
}

#[tokio::test]
async fn detector_probes_once_per_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hemkop"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<article data-offer-id="9"><h3>Laxfilé</h3></article>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/spa"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<div id="__next"></div><script src="/_next/static/chunks/main.js"></script>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let detector = ContentModeDetector::new(static_fetch_client(&config), config.detector.clone());
    let hemkop = format!("{}/hemkop", server.uri());
    let spa = format!("{}/spa", server.uri());

    assert_eq!(detector.classify(&hemkop, None).await, ContentMode::Static);
    assert_eq!(detector.classify(&hemkop, None).await, ContentMode::Static);
    assert_eq!(detector.classify(&spa, None).await, ContentMode::Rendered);
    assert_eq!(detector.classify(&spa, None).await, ContentMode::Rendered);
}

#[tokio::test]
async fn failed_probe_degrades_to_rendered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let detector = ContentModeDetector::new(static_fetch_client(&config), config.detector.clone());
    let mode = detector.classify(&format!("{}/down", server.uri()), None).await;
    assert_eq!(mode, ContentMode::Rendered);
}

#[tokio::test]
async fn rendered_fetch_installs_session_cookies_before_loading() {
    let renderer = FakeRenderer::new(FakeSite::default());
    let events = renderer.events();
    let config = test_config("https://ereklamblad.test");
    let client = FetchClient::new(&config.politeness, &RenderConfig::default(), renderer.pool(1)).unwrap();
    let ctx = context("https://ereklamblad.test/?location=Stockholm");

    let document = client
        .fetch(
            "https://ereklamblad.test/Lidl",
            ContentMode::Rendered,
            Some(&ctx),
        )
        .await
        .unwrap();
    assert_eq!(document.mode, ContentMode::Rendered);

    let log: Vec<_> = events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect();
    assert_eq!(
        log,
        [
            "cookies ereklamblad_location=stockholm",
            "navigate https://ereklamblad.test/Lidl",
        ]
    );
}

#[tokio::test]
async fn concurrent_classification_fetches_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coop"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<article data-offer-id="1"><h3>Mjölk</h3></article>"#)
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let detector = ContentModeDetector::new(static_fetch_client(&config), config.detector.clone());
    let coop = format!("{}/coop", server.uri());

    let (first, second, third) = tokio::join!(
        detector.classify(&coop, None),
        detector.classify(&coop, None),
        detector.classify(&coop, None),
    );
    assert_eq!([first, second, third], [ContentMode::Static; 3]);
    assert_eq!(detector.cached(&coop), Some(ContentMode::Static));
}
