use std::sync::Arc;
use std::time::Duration;

use news_harvester::fetcher::fetch_site;
use news_harvester::{
    FetchError, FetchSettings, HarvestSettings, Harvester, HttpFetcher, Jitter, PageFetcher,
    SiteDescriptor, SiteState, USER_AGENTS,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> FetchSettings {
    FetchSettings {
        timeout: Duration::from_secs(10),
        jitter: Jitter::none(),
    }
}

fn site(name: &str, url: String) -> SiteDescriptor {
    SiteDescriptor::new(name, url, ".post", "h2", "a", "img")
}

#[tokio::test]
async fn fetcher_returns_body_with_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(header("cache-control", "no-cache"))
        .and(header("pragma", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>ok</html>", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(settings()).unwrap();
    let url = format!("{}/news", server.uri());
    let site = site("Mock", url.clone());

    let result = fetch_site(&fetcher, &site).await;
    assert!(result.is_success());
    assert_eq!(result.site.name, "Mock");
    assert_eq!(result.body.unwrap(), "<html>ok</html>");

    let requests = server.received_requests().await.unwrap();
    let user_agent = requests[0].headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(USER_AGENTS.contains(&user_agent));
    assert_eq!(requests[0].headers.get("referer").unwrap().to_str().unwrap(), url);
}

#[tokio::test]
async fn non_success_status_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(settings()).unwrap();
    let err = fetcher.fetch(&site("Blocked", server.uri())).await.unwrap_err();
    assert_eq!(err, FetchError::Status(403));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(FetchSettings {
        timeout: Duration::from_millis(200),
        jitter: Jitter::none(),
    })
    .unwrap();

    let err = fetcher.fetch(&site("Slow", server.uri())).await.unwrap_err();
    assert_eq!(err, FetchError::Timeout);
}

#[tokio::test]
async fn unreachable_host_is_a_network_failure() {
    let fetcher = HttpFetcher::new(settings()).unwrap();
    let err = fetcher
        .fetch(&site("Gone", "http://127.0.0.1:1/".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)), "got {:?}", err);
}

#[tokio::test]
async fn harvest_over_http_merges_sites_and_skips_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<div class="post"><h2>First</h2><a href="/story-1"></a><img src="//cdn.example.net/1.jpg"></div>
               <div class="post"><h2>Shared</h2><a href="https://example.com/shared"></a></div>"#,
            "text/html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<div class="post"><h2>Shared again</h2><a href="https://example.com/shared"></a></div>"#,
            "text/html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sites = vec![
        site("A", format!("{}/a", server.uri())),
        site("Down", format!("{}/down", server.uri())),
        site("B", format!("{}/b", server.uri())),
        site("A again", format!("{}/a", server.uri())),
    ];
    let harvester = Harvester::new(
        Arc::new(HttpFetcher::new(settings()).unwrap()),
        HarvestSettings {
            wave_pause: Duration::from_millis(10),
            ..HarvestSettings::default()
        },
    );

    let outcome = harvester.harvest(&sites).await.unwrap();

    assert_eq!(outcome.waves, 2);
    assert_eq!(outcome.count, 2);
    let first = &outcome.records[0];
    assert_eq!(first.link, format!("{}/story-1", server.uri()));
    assert_eq!(first.image.as_deref(), Some("https://cdn.example.net/1.jpg"));
    assert_eq!(outcome.records[1].title, "Shared");
    assert_eq!(outcome.sites[1].outcome, SiteState::FetchFailed);

    for record in &outcome.records {
        assert!(url::Url::parse(&record.link).is_ok());
    }
}
