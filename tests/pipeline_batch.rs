// tests/pipeline_batch.rs
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use market_news_pipeline::classify::backend::{ChatBackend, ChatReply, ChatRequest, MockBackend};
use market_news_pipeline::classify::{Classifier, ClassifierProfile, DEFAULT_EXCLUDES};
use market_news_pipeline::ingest::types::FeedKind;
use market_news_pipeline::pipeline::{CycleMode, Pipeline};
use market_news_pipeline::retry::RetryPolicy;
use market_news_pipeline::store::{QueueItem, ResultStore, WorkQueue};

const OK_REPLY: &str =
    r#"{"tone":"positive","impact_level":"medium","impact_score":60,"summary":"ok","skip":false}"#;

fn queued(n: usize, title: &str) -> QueueItem {
    QueueItem {
        id: format!("id-{n}"),
        source: "Test".into(),
        title: title.into(),
        link: format!("https://x/{n}"),
        published_at: Some(Utc::now()),
        raw_text: String::new(),
        fetched_at: Utc::now(),
        kind: FeedKind::Rss,
    }
}

fn fill(queue: &WorkQueue, n: usize) {
    let items = (0..n).map(|i| queued(i, &format!("Sber news {i}"))).collect();
    queue.append_all(items).unwrap();
}

/// Records how many results are on disk each time the model is called.
struct DiskProbe {
    results: PathBuf,
    seen: Mutex<Vec<usize>>,
}

impl ChatBackend for DiskProbe {
    fn complete<'a>(
        &'a self,
        _req: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatReply>> + Send + 'a>> {
        let on_disk = ResultStore::open(&self.results).map(|s| s.len()).unwrap_or(0);
        self.seen.lock().unwrap().push(on_disk);
        Box::pin(async { Ok(ChatReply::from(OK_REPLY.to_string())) })
    }

    fn name(&self) -> &'static str {
        "probe"
    }
}

#[tokio::test]
async fn result_store_is_checkpointed_mid_batch() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("news.json");
    let probe = Arc::new(DiskProbe {
        results: results.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let p = Pipeline::new(
        Vec::new(),
        WorkQueue::new(dir.path().join("news_queue.json")),
        &results,
        Classifier::new(ClassifierProfile::fast(), probe.clone()),
    )
    .with_checkpoint_every(2);
    fill(p.queue(), 5);

    let report = p.process_batch(Some(5)).await.unwrap();
    assert_eq!(report.processed, 5);
    assert_eq!(*probe.seen.lock().unwrap(), vec![0, 0, 2, 2, 4]);
    assert_eq!(ResultStore::open(&results).unwrap().len(), 5);
}

/// Answers normally, then takes the whole process down on call `die_on`.
struct DiesOnCall {
    die_on: usize,
    calls: AtomicUsize,
}

impl ChatBackend for DiesOnCall {
    fn complete<'a>(
        &'a self,
        _req: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatReply>> + Send + 'a>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.die_on {
            panic!("simulated crash on call {n}");
        }
        Box::pin(async { Ok(ChatReply::from(OK_REPLY.to_string())) })
    }

    fn name(&self) -> &'static str {
        "dies"
    }
}

#[tokio::test]
async fn restart_after_crash_does_not_store_links_twice() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("news_queue.json");
    let results = dir.path().join("news.json");

    let crashing = Arc::new(
        Pipeline::new(
            Vec::new(),
            WorkQueue::new(&queue_path),
            &results,
            Classifier::new(
                ClassifierProfile::fast(),
                Arc::new(DiesOnCall {
                    die_on: 5,
                    calls: AtomicUsize::new(0),
                }),
            ),
        )
        .with_checkpoint_every(2),
    );
    fill(crashing.queue(), 5);

    let run = {
        let p = crashing.clone();
        tokio::spawn(async move { p.process_batch(Some(5)).await })
    };
    assert!(run.await.unwrap_err().is_panic());
    assert_eq!(ResultStore::open(&results).unwrap().len(), 4);
    assert_eq!(WorkQueue::new(&queue_path).len().unwrap(), 1);

    let restarted = Pipeline::new(
        Vec::new(),
        WorkQueue::new(&queue_path),
        &results,
        Classifier::new(ClassifierProfile::fast(), Arc::new(MockBackend::fixed(OK_REPLY))),
    )
    .with_checkpoint_every(2);
    let report = restarted.process_batch(Some(5)).await.unwrap();
    assert_eq!(report.total, 1);

    let stored = ResultStore::open(&results).unwrap();
    let links: HashSet<_> = stored.all().iter().map(|r| r.link.clone()).collect();
    assert_eq!(stored.len(), 5);
    assert_eq!(links.len(), 5);
    assert!(restarted.queue().is_empty().unwrap());
}

#[tokio::test]
async fn skips_before_a_checkpoint_leave_the_queue_with_it() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::scripted(
        vec![Ok(r#"{"skip": true, "reason": "not business"}"#.into())],
        OK_REPLY,
    );
    let p = Pipeline::new(
        Vec::new(),
        WorkQueue::new(dir.path().join("news_queue.json")),
        dir.path().join("news.json"),
        Classifier::new(ClassifierProfile::fast(), Arc::new(backend)),
    )
    .with_checkpoint_every(2);
    fill(p.queue(), 6);

    let report = p.process_batch(Some(4)).await.unwrap();
    assert_eq!((report.processed, report.skipped), (3, 1));
    let left: Vec<_> = p.queue().load().unwrap().into_iter().map(|q| q.link).collect();
    assert_eq!(left, vec!["https://x/4", "https://x/5"]);
}

#[tokio::test]
async fn prefiltered_items_never_reach_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::fixed(OK_REPLY));
    let p = Pipeline::new(
        Vec::new(),
        WorkQueue::new(dir.path().join("news_queue.json")),
        dir.path().join("news.json"),
        Classifier::new(ClassifierProfile::fast(), backend.clone()),
    )
    .with_excludes(DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect());
    p.queue()
        .append_all(vec![
            queued(1, "Гороскоп для инвесторов"),
            queued(2, "Sberbank beats estimates"),
        ])
        .unwrap();

    let report = p.process_batch(None).await.unwrap();
    assert_eq!((report.processed, report.skipped, report.prefiltered), (1, 1, 1));
    assert_eq!(backend.prompts().len(), 1);
    assert!(backend.prompts()[0].contains("Sberbank beats estimates"));
    assert!(p.queue().is_empty().unwrap());
}

#[tokio::test]
async fn batch_mode_consumes_one_batch_and_skips_count() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::scripted(
        vec![
            Ok(r#"{"skip": true, "reason": "not business"}"#.into()),
            Err("connection reset".into()),
        ],
        OK_REPLY,
    );
    let p = Pipeline::new(
        Vec::new(),
        WorkQueue::new(dir.path().join("news_queue.json")),
        dir.path().join("news.json"),
        Classifier::new(ClassifierProfile::fast(), Arc::new(backend)),
    );
    fill(p.queue(), 8);

    let report = p.cycle(CycleMode::Batch).await.unwrap();
    // fast profile: batch of 6
    assert_eq!(report.batch.total, 6);
    assert_eq!(report.batch.skipped, 2);
    assert_eq!(report.batch.processed, 4);
    assert_eq!(report.batch.tones.positive, 4);
    assert_eq!(report.batch.store_len, 4);
    assert_eq!(report.batch.queue_remaining, 2);
    let left: Vec<_> = p.queue().load().unwrap().into_iter().map(|q| q.link).collect();
    assert_eq!(left, vec!["https://x/6", "https://x/7"]);
}

#[tokio::test]
async fn drain_mode_empties_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let p = Pipeline::new(
        Vec::new(),
        WorkQueue::new(dir.path().join("news_queue.json")),
        dir.path().join("news.json"),
        Classifier::new(ClassifierProfile::fast(), Arc::new(MockBackend::fixed(OK_REPLY))),
    )
    .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
    fill(p.queue(), 13);

    let report = p.drain_with_retry().await.unwrap();
    assert_eq!(report.total, 13);
    assert_eq!(report.processed, 13);
    assert_eq!(report.queue_remaining, 0);
    assert!(p.queue().is_empty().unwrap());
    assert_eq!(ResultStore::open(dir.path().join("news.json")).unwrap().len(), 13);
}

#[tokio::test]
async fn drain_with_unreadable_queue_exhausts_retries() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("news_queue.json");
    std::fs::write(&queue_path, "{ not a queue").unwrap();
    let p = Pipeline::new(
        Vec::new(),
        WorkQueue::new(&queue_path),
        dir.path().join("news.json"),
        Classifier::new(ClassifierProfile::fast(), Arc::new(MockBackend::fixed(OK_REPLY))),
    )
    .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

    let err = p.drain_with_retry().await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("after 2 attempts"), "{msg}");
    assert!(msg.contains("news_queue.json"), "{msg}");
}
