//! Integration tests for the robots and sitemap generators
//!
//! Remote documents are served by wiremock.

use html_snapshots::config::{Config, Source};
use html_snapshots::input::{GeneratorContext, RequestSink};
use html_snapshots::{CaptureRequest, InputKind, SnapshotError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_context(kind: InputKind, source: &str, output_dir: &Path, policy: bool) -> GeneratorContext {
    let mut config = Config::default();
    config.input.kind = kind;
    config.input.source = Source::One(source.to_string());
    config.input.hostname = "example.com".to_string();
    config.input.sitemap_policy = policy;
    config.output.dir = output_dir.to_str().unwrap().to_string();
    GeneratorContext::new(Arc::new(config)).unwrap()
}

async fn generate(ctx: &GeneratorContext) -> (html_snapshots::Result<()>, Vec<String>) {
    let (sink, rx) = RequestSink::channel();
    let result = ctx.config().input.kind.run(ctx, &sink).await;
    drop(sink);
    (result, drain(rx))
}

fn drain(mut rx: UnboundedReceiver<CaptureRequest>) -> Vec<String> {
    let mut urls = Vec::new();
    while let Ok(request) = rx.try_recv() {
        urls.push(request.url.to_string());
    }
    urls
}

fn urlset(locs: &[&str]) -> String {
    let entries: String = locs
        .iter()
        .map(|loc| format!("<url><loc>{}</loc></url>", loc))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</urlset>"#,
        entries
    )
}

fn sitemap_index(locs: &[String]) -> String {
    let entries: String = locs
        .iter()
        .map(|loc| format!("<sitemap><loc>{}</loc></sitemap>", loc))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</sitemapindex>"#,
        entries
    )
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/xml")
}

#[tokio::test]
async fn test_remote_sitemap_emits_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(xml(urlset(&[
            "https://example.com/",
            "https://example.com/about",
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/sitemap.xml", server.uri());
    let ctx = create_context(InputKind::Sitemap, &source, dir.path(), false);

    let (result, urls) = generate(&ctx).await;
    result.unwrap();
    assert_eq!(urls, vec!["https://example.com/", "https://example.com/about"]);
}

#[tokio::test]
async fn test_sitemap_aborts_on_first_malformed_node() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(xml(urlset(&[
            "https://example.com/first",
            "not a url",
            "https://example.com/never",
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/sitemap.xml", server.uri());
    let ctx = create_context(InputKind::Sitemap, &source, dir.path(), false);

    let (result, urls) = generate(&ctx).await;
    assert!(matches!(result, Err(SnapshotError::Document { .. })));
    assert_eq!(urls, vec!["https://example.com/first"]);
}

#[tokio::test]
async fn test_fetch_errors_name_the_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    for location in ["/feed.xml", "/missing.xml"] {
        let source = format!("{}{}", server.uri(), location);
        let ctx = create_context(InputKind::Sitemap, &source, dir.path(), false);
        match generate(&ctx).await.0 {
            Err(SnapshotError::Fetch { source_url, .. }) => assert_eq!(source_url, source),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_robots_with_sitemap_directives() {
    let server = MockServer::start().await;
    let robots = format!(
        "User-agent: *\nAllow: /ignored\nSitemap: {uri}/sitemap-a.xml\nSitemap: {uri}/sitemap-b.xml\n",
        uri = server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(robots, "text/plain"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-a.xml"))
        .respond_with(xml(urlset(&["https://example.com/a"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-b.xml"))
        .respond_with(xml(urlset(&["https://example.com/b"])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/robots.txt", server.uri());
    let ctx = create_context(InputKind::Robots, &source, dir.path(), false);

    let (result, urls) = generate(&ctx).await;
    result.unwrap();
    assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
}

#[tokio::test]
async fn test_robots_with_allow_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("User-agent: *\nAllow: /\nAllow: /contact\nDisallow: /admin\n", "text/plain"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/robots.txt", server.uri());
    let ctx = create_context(InputKind::Robots, &source, dir.path(), false);

    let (result, urls) = generate(&ctx).await;
    result.unwrap();
    assert_eq!(urls, vec!["http://example.com/", "http://example.com/contact"]);
}

#[tokio::test]
async fn test_robots_without_directives_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("User-agent: *\nDisallow: /\n", "text/plain"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/robots.txt", server.uri());
    let ctx = create_context(InputKind::Robots, &source, dir.path(), false);

    let (result, urls) = generate(&ctx).await;
    assert!(matches!(result, Err(SnapshotError::Document { .. })));
    assert!(urls.is_empty());
}

#[tokio::test]
async fn test_index_fails_fast_and_keeps_sibling_requests() {
    let server = MockServer::start().await;
    let children: Vec<String> = (1..=3)
        .map(|i| format!("{}/sitemap-{}.xml", server.uri(), i))
        .collect();

    Mock::given(method("GET"))
        .and(path("/sitemap-index.xml"))
        .respond_with(xml(sitemap_index(&children)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-1.xml"))
        .respond_with(xml(urlset(&["https://example.com/1a", "https://example.com/1b"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-2.xml"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-3.xml"))
        .respond_with(xml(urlset(&["https://example.com/3a"])).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/sitemap-index.xml", server.uri());
    let ctx = create_context(InputKind::SitemapIndex, &source, dir.path(), false);

    let started = Instant::now();
    let (result, urls) = generate(&ctx).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    match result {
        Err(SnapshotError::Fetch { source_url, .. }) => assert_eq!(source_url, children[1]),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(urls, vec!["https://example.com/1a", "https://example.com/1b"]);
}

#[tokio::test]
async fn test_index_persists_children_and_applies_policy() {
    let server = MockServer::start().await;
    let fresh = format!("{}/sitemap-fresh.xml", server.uri());
    let stale = format!("{}/sitemap-stale.xml", server.uri());
    let index = format!(
        r#"<sitemapindex>
<sitemap><loc>{}</loc><changefreq>monthly</changefreq></sitemap>
<sitemap><loc>{}</loc></sitemap>
</sitemapindex>"#,
        fresh, stale
    );

    Mock::given(method("GET"))
        .and(path("/index.xml"))
        .respond_with(xml(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-fresh.xml"))
        .respond_with(xml(urlset(&["https://example.com/fresh"])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-stale.xml"))
        .respond_with(xml(urlset(&["https://example.com/stale"])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/index.xml", server.uri());
    let ctx = create_context(InputKind::SitemapIndex, &source, dir.path(), true);

    // a copy of the fresh child was stored by an earlier run just now
    let fresh_copy = ctx.sitemap_store_path(&Url::parse(&fresh).unwrap()).unwrap();
    std::fs::create_dir_all(fresh_copy.parent().unwrap()).unwrap();
    std::fs::write(&fresh_copy, urlset(&["https://example.com/fresh"])).unwrap();

    let (result, urls) = generate(&ctx).await;
    result.unwrap();
    assert_eq!(urls, vec!["https://example.com/stale"]);

    let stale_copy = ctx.sitemap_store_path(&Url::parse(&stale).unwrap()).unwrap();
    let stored = std::fs::read_to_string(stale_copy).unwrap();
    assert!(stored.contains("https://example.com/stale"));
}

#[tokio::test]
async fn test_sitemap_input_that_is_an_index() {
    let server = MockServer::start().await;
    let child = format!("{}/child.xml", server.uri());
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(xml(sitemap_index(&[child])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/child.xml"))
        .respond_with(xml(urlset(&["https://example.com/child", "bad entry"])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = format!("{}/sitemap.xml", server.uri());
    let ctx = create_context(InputKind::Sitemap, &source, dir.path(), false);

    // malformed entries inside an index child are skipped
    let (result, urls) = generate(&ctx).await;
    result.unwrap();
    assert_eq!(urls, vec!["https://example.com/child"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_with_failing_index_reports_partition() {
    let server = MockServer::start().await;
    let children = vec![
        format!("{}/ok.xml", server.uri()),
        format!("{}/broken.xml", server.uri()),
    ];
    Mock::given(method("GET"))
        .and(path("/index.xml"))
        .respond_with(xml(sitemap_index(&children)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.xml"))
        .respond_with(xml(urlset(&["http://localhost/one"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(
            ResponseTemplate::new(404).set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let renderer = dir.path().join("render.sh");
    std::fs::write(&renderer, "echo ok > \"$1\"\n").unwrap();

    let mut config = Config::default();
    config.input.kind = InputKind::SitemapIndex;
    config.input.source = Source::One(format!("{}/index.xml", server.uri()));
    config.output.dir = dir.path().join("out").to_str().unwrap().to_string();
    config.capture.poll_interval = 25;
    config.renderer.program = "/bin/sh".to_string();
    config.renderer.snapshot_script = Some(renderer);

    let err = html_snapshots::run(config).await.unwrap_err();
    assert!(matches!(err.error, Some(SnapshotError::Fetch { .. })));
    assert_eq!(err.completed.len(), 1);
    assert!(err.not_completed.is_empty());
}
