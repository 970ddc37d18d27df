//! Handler-level tests using tower::ServiceExt::oneshot.
//!
//! Drives the full Axum router (middleware + handlers) without binding a TCP
//! listener for the proxy. Upstreams are wiremock servers; `.expect(n)` on a
//! mock doubles as the upstream call counter.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use hls_relay::config::Config;
use hls_relay::hls::RewritePolicy;
use hls_relay::server::build_router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::form_urlencoded;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PLAYLIST: &str = "#EXTM3U\n#EXTINF:10,\nseg1.ts\nseg2.ts\n";

/// Build a test config with sensible defaults.
fn test_config() -> Config {
    Config {
        port: 0,
        public_base_url: "http://localhost:3000".to_string(),
        proxy_path: "/proxy".to_string(),
        is_dev: true,
        rewrite_policy: RewritePolicy::ProxyAll,
        accept_invalid_certs: false,
        connect_timeout_secs: 2,
        default_user_agent: "Mozilla/5.0".to_string(),
        upstream_referer: None,
        // wiremock listens on loopback
        allow_private_upstreams: true,
        max_line_bytes: 64 * 1024,
        rate_limit_rpm: 0,
    }
}

fn app(config: Config) -> Router {
    build_router(config).expect("router should build")
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn proxy_request(target: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/proxy?url={}", encode(target)))
        .body(Body::empty())
        .unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Health & metadata ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_200_with_json() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn all_responses_include_version_header() {
    let req = Request::builder().uri("/proxy").body(Body::empty()).unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();

    let version = resp
        .headers()
        .get("x-hls-relay-version")
        .expect("missing X-Hls-Relay-Version header");
    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Input validation ────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_url_returns_400_without_upstream_call() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let req = Request::builder().uri("/proxy").body(Body::empty()).unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["error"], "url is required");
}

#[tokio::test]
async fn blank_url_is_treated_as_missing() {
    let req = Request::builder().uri("/proxy?url=%20").body(Body::empty()).unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_scheme_returns_400() {
    let resp = app(test_config())
        .oneshot(proxy_request("file:///etc/passwd"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_upstream_is_refused_when_not_allowed() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.allow_private_upstreams = false;

    let target = format!("{}/path/index.m3u8", upstream.uri());
    let resp = app(config).oneshot(proxy_request(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Manifest rewriting ──────────────────────────────────────────────────────

#[tokio::test]
async fn manifest_is_rewritten_through_proxy() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/path/index.m3u8"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(PLAYLIST, "application/vnd.apple.mpegurl"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let target = format!("{}/path/index.m3u8", upstream.uri());
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers().get("content-length").is_none(),
        "content-length must be stripped from rewritten manifests"
    );
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/vnd.apple.mpegurl"
    );

    let body = body_string(resp).await;
    let seg = |name: &str| {
        format!(
            "http://localhost:3000/proxy?url={}",
            encode(&format!("{}/path/{}", upstream.uri(), name))
        )
    };
    assert_eq!(
        body,
        format!("#EXTM3U\n#EXTINF:10,\n{}\n{}\n", seg("seg1.ts"), seg("seg2.ts"))
    );
}

#[tokio::test]
async fn direct_policy_hands_out_upstream_urls() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "#EXTM3U\r\n#EXTINF:6,\r\nchunk-1.ts\r\n#EXTINF:6,\r\nhttps://other.example/chunk-2.ts\r\n",
        ))
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.rewrite_policy = RewritePolicy::Direct;

    let target = format!("{}/live/index.m3u8", upstream.uri());
    let resp = app(config).oneshot(proxy_request(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_string(resp).await;
    assert_eq!(
        body,
        format!(
            "#EXTM3U\r\n#EXTINF:6,\r\n{}/live/chunk-1.ts\r\n#EXTINF:6,\r\nhttps://other.example/chunk-2.ts\r\n",
            upstream.uri()
        )
    );
}

#[tokio::test]
async fn rewritten_playlist_is_valid_m3u8() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vod/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n\
             #EXTINF:10.0,\nseg1.ts\n#EXTINF:10.0,\nseg2.ts\n#EXT-X-ENDLIST\n",
        ))
        .mount(&upstream)
        .await;

    let target = format!("{}/vod/index.m3u8", upstream.uri());
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();
    let body = body_string(resp).await;

    let playlist =
        m3u8_rs::parse_playlist_res(body.as_bytes()).expect("Response should be valid M3U8");
    let m3u8_rs::Playlist::MediaPlaylist(pl) = playlist else {
        panic!("Expected a MediaPlaylist, got MasterPlaylist");
    };
    assert_eq!(pl.segments.len(), 2);
    assert!(
        pl.segments
            .iter()
            .all(|s| s.uri.starts_with("http://localhost:3000/proxy?url=")),
        "every segment should route through the proxy:\n{}",
        body
    );
}

// ── Static passthrough ──────────────────────────────────────────────────────

#[tokio::test]
async fn static_segment_is_passed_through_untouched() {
    // Text that would be rewritten if it were treated as a manifest
    let payload = b"\x47\x40\x00\x10seg1.ts\nmore.ts\n".to_vec();

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/path/seg1.ts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(payload.clone(), "video/mp2t"),
        )
        .mount(&upstream)
        .await;

    let target = format!("{}/path/seg1.ts", upstream.uri());
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "video/mp2t");
    assert_eq!(
        resp.headers().get("content-length").unwrap(),
        &payload.len().to_string()
    );

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.to_vec(), payload);
}

// ── Upstream request headers ────────────────────────────────────────────────

#[tokio::test]
async fn client_user_agent_is_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "TestPlayer/1.0"))
        .and(header("accept", "*/*"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
        .expect(1)
        .mount(&upstream)
        .await;

    let req = Request::builder()
        .uri(format!(
            "/proxy?url={}",
            encode(&format!("{}/index.m3u8", upstream.uri()))
        ))
        .header("user-agent", "TestPlayer/1.0")
        .body(Body::empty())
        .unwrap();
    let resp = app(test_config()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn default_user_agent_and_referer_are_sent() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "Mozilla/5.0"))
        .and(header("referer", format!("{}/", upstream.uri()).as_str()))
        .and(header("origin", upstream.uri().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
        .expect(1)
        .mount(&upstream)
        .await;

    let target = format!("{}/index.m3u8", upstream.uri());
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Upstream failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn upstream_404_is_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("#EXTM3U\nnot-a-real-body.ts\n"))
        .expect(1)
        .mount(&upstream)
        .await;

    let target = format!("{}/missing/index.m3u8", upstream.uri());
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = body_string(resp).await;
    assert!(body.contains("404"));
    assert!(!body.contains("not-a-real-body"), "upstream body must not be relayed");
}

#[tokio::test]
async fn upstream_5xx_is_forwarded_without_retry() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&upstream)
        .await;

    let target = format!("{}/live/index.m3u8", upstream.uri());
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn transport_failure_returns_500() {
    // Grab a free port, then close it so the connection is refused
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let target = format!("http://{}/index.m3u8", addr);
    let resp = app(test_config()).oneshot(proxy_request(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(resp).await, "Internal Server Error");
}

// ── Rate limiting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limiter_blocks_after_limit() {
    let mut config = test_config();
    config.rate_limit_rpm = 3;
    let app = app(config);

    for _ in 0..3 {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
}

// ── Root mounting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn proxy_can_be_mounted_at_root() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("seg1.ts\n"))
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.proxy_path = "/".to_string();

    let req = Request::builder()
        .uri(format!("/?url={}", encode(&format!("{}/a/index.m3u8", upstream.uri()))))
        .body(Body::empty())
        .unwrap();
    let resp = app(config).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_string(resp).await;
    assert!(body.starts_with("http://localhost:3000/?url="), "got {}", body);
}
