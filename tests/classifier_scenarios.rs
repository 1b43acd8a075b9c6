// tests/classifier_scenarios.rs
use std::sync::Arc;

use chrono::Utc;
use market_news_pipeline::classify::backend::MockBackend;
use market_news_pipeline::classify::extract::extract_json;
use market_news_pipeline::classify::normalize::{Level, Tone};
use market_news_pipeline::classify::{Classifier, ClassifierProfile};
use market_news_pipeline::ingest::types::FeedKind;
use market_news_pipeline::pipeline::Pipeline;
use market_news_pipeline::store::{QueueItem, ResultStore, WorkQueue};

fn queued(link: &str, title: &str) -> QueueItem {
    QueueItem {
        id: format!("id-{link}"),
        source: "Test".into(),
        title: title.into(),
        link: link.into(),
        published_at: Some(Utc::now()),
        raw_text: String::new(),
        fetched_at: Utc::now(),
        kind: FeedKind::Rss,
    }
}

fn pipeline(dir: &std::path::Path, reply: &str) -> Pipeline {
    let classifier = Classifier::new(ClassifierProfile::fast(), Arc::new(MockBackend::fixed(reply)));
    Pipeline::new(
        Vec::new(),
        WorkQueue::new(dir.join("news_queue.json")),
        dir.join("news.json"),
        classifier,
    )
}

#[tokio::test]
async fn record_profit_lands_at_the_head_of_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let reply = "```json\n{\"tone\":\"positive\",\"impact_level\":\"high\",\"impact_score\":85,\"summary\":\"...\",\"skip\":false}\n```";
    let p = pipeline(dir.path(), reply);
    p.queue()
        .append(queued("https://x/1", "Company X reports record profit"))
        .unwrap();

    let report = p.process_batch(None).await.unwrap();
    assert_eq!((report.total, report.processed, report.skipped), (1, 1, 0));
    assert_eq!(report.queue_remaining, 0);

    let store = ResultStore::open(dir.path().join("news.json")).unwrap();
    assert_eq!(store.len(), 1);
    let item = &store.all()[0];
    assert_eq!(item.link, "https://x/1");
    assert_eq!(item.id, "id-https://x/1");
    assert_eq!(item.tone, Tone::Positive);
    assert_eq!(item.impact_level, Level::High);
    assert_eq!(item.impact_score, 85);
    assert!(p.queue().is_empty().unwrap());
}

#[tokio::test]
async fn non_numeric_score_defaults_to_fifty() {
    let dir = tempfile::tempdir().unwrap();
    let reply = r#"{"tone":"NEGATIVE","impact_level":"severe","impact_score":"very high","summary":""}"#;
    let p = pipeline(dir.path(), reply);
    p.queue()
        .append(queued("https://x/2", "Норникель снизил выпуск никеля"))
        .unwrap();
    p.process_batch(None).await.unwrap();

    let store = ResultStore::open(dir.path().join("news.json")).unwrap();
    let item = &store.all()[0];
    assert_eq!(item.impact_score, 50);
    assert_eq!(item.tone, Tone::Negative);
    assert_eq!(item.impact_level, Level::Medium);
    assert_eq!(item.summary, "Норникель снизил выпуск никеля");
    assert_eq!(
        item.company_tag,
        Some(market_news_pipeline::companies::CompanyId::Norn)
    );
}

#[test]
fn same_object_from_fence_bare_fence_and_prose() {
    let body = r#"{"tone":"neutral","impact_level":"low","impact_score":20,"summary":"ok","skip":false}"#;
    let labeled = format!("```json\n{body}\n```");
    let unlabeled = format!("```\n{body}\n```");
    let prose = format!("Sure! The answer is {body} hope that helps.");
    let a = extract_json(&labeled).unwrap();
    assert_eq!(extract_json(&unlabeled).unwrap(), a);
    assert_eq!(extract_json(&prose).unwrap(), a);
    assert_eq!(a["impact_score"], 20);
}

#[tokio::test]
async fn accepted_items_stay_inside_closed_enums() {
    let dir = tempfile::tempdir().unwrap();
    let replies = [
        r#"{"tone":"bullish","impact_level":"HIGH","impact_score":5}"#,
        r#"{"tone":null,"impact_level":3,"impact_score":101.5}"#,
        r#"{"impact_score":"42 points"}"#,
    ];
    for (n, reply) in replies.iter().enumerate() {
        let p = pipeline(dir.path(), reply);
        p.queue()
            .append(queued(&format!("https://x/e{n}"), "Yandex launches a product"))
            .unwrap();
        p.process_batch(None).await.unwrap();
    }
    let store = ResultStore::open(dir.path().join("news.json")).unwrap();
    assert_eq!(store.len(), 3);
    for it in store.all() {
        assert!((10..=100).contains(&it.impact_score));
        assert!(!it.summary.is_empty());
    }
    // Newest first.
    assert_eq!(store.all()[0].impact_score, 42);
    assert_eq!(store.all()[2].impact_level, Level::High);
}
