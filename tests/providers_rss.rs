// tests/providers_rss.rs
use std::time::Duration;

use market_news_pipeline::ingest::http_sources;
use market_news_pipeline::ingest::providers::rss::parse_feed_document;
use market_news_pipeline::ingest::run_once;
use market_news_pipeline::ingest::types::FeedEndpoint;
use market_news_pipeline::store::WorkQueue;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUSINESS: &str = include_str!("fixtures/business_rss.xml");
const RELAY: &str = include_str!("fixtures/relay_atom.xml");

#[test]
fn rss_fixture_parses_all_entries() {
    let doc = parse_feed_document(BUSINESS).unwrap();
    assert_eq!(doc.channel_title.as_deref(), Some("Business Wire RU"));
    assert_eq!(doc.entries.len(), 5);
    assert!(doc.entries[2].link.is_none());
    assert!(doc.entries[4].published_at.is_none());
    assert!(!doc.entries[0].excerpt.contains('<'));
}

#[test]
fn atom_fixture_falls_back_to_updated() {
    let doc = parse_feed_document(RELAY).unwrap();
    assert_eq!(doc.entries.len(), 2);
    assert_eq!(
        doc.entries[1].published_at.unwrap().to_rfc3339(),
        "2025-10-14T07:00:00+00:00"
    );
    assert_eq!(
        doc.entries[0].excerpt,
        "Совет директоров Лукойла рекомендовал дивиденды."
    );
}

#[tokio::test]
async fn http_feeds_are_polled_and_errors_isolated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/business.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BUSINESS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down.xml"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let feeds = vec![
        FeedEndpoint::rss(format!("{}/down.xml", server.uri())),
        FeedEndpoint::rss(format!("{}/business.xml", server.uri())),
    ];
    let sources = http_sources(&feeds, Duration::from_secs(5)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let queue = WorkQueue::new(dir.path().join("news_queue.json"));
    let report = run_once(&sources, &queue).await.unwrap();
    assert_eq!(report.failed_feeds, 1);
    assert_eq!(report.appended, 3);
    assert_eq!(queue.len().unwrap(), 3);
}
