//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and run jobs through
//! the full engine: queue, workers, coordinator, fetcher and SQLite storage.

use async_trait::async_trait;
use linkscope::config::{EngineConfig, HttpConfig};
use linkscope::crawler::{
    CrawlEngine, CrawlScope, FetchError, FetchedPage, Fetcher, HttpFetcher, ProgressReceiver,
    ProgressWatch,
};
use linkscope::storage::{JobStore, SqliteStorage};
use linkscope::{CrawlStatus, LinkscopeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Starts an engine over an in-memory store
///
/// The progress buffer is large enough that no value is ever dropped.
fn start_engine(workers: usize) -> (CrawlEngine, Arc<SqliteStorage>) {
    let fetcher = HttpFetcher::new(&HttpConfig::default()).expect("Failed to build fetcher");
    start_engine_with(workers, Arc::new(fetcher))
}

fn start_engine_with(
    workers: usize,
    fetcher: Arc<dyn Fetcher>,
) -> (CrawlEngine, Arc<SqliteStorage>) {
    let store = Arc::new(SqliteStorage::new_in_memory().expect("Failed to open storage"));
    let config = EngineConfig {
        workers,
        queue_capacity: 16,
        crawl_timeout_secs: 10,
        progress_buffer: 64,
    };
    let engine = CrawlEngine::start(&config, store.clone(), fetcher);
    (engine, store)
}

/// Serves an old page to the first GET, held until the gate opens, and a new
/// page to every later GET
#[derive(Default)]
struct GatedFetcher {
    gets: AtomicUsize,
    first_started: Notify,
    gate: Notify,
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn get(&self, _url: &str, _scope: &CrawlScope) -> Result<FetchedPage, FetchError> {
        let body = if self.gets.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first_started.notify_one();
            // ignores cancellation, like a response already in flight
            self.gate.notified().await;
            r#"<a href="http://a.com/old1">1</a><a href="http://a.com/old2">2</a>"#
        } else {
            r#"<a href="http://a.com/new">new</a>"#
        };

        Ok(FetchedPage {
            status_code: 200,
            content_type: "text/html".to_string(),
            body: body.to_string(),
        })
    }

    async fn probe(&self, _url: &str, _scope: &CrawlScope) -> Result<u16, FetchError> {
        Ok(200)
    }
}

/// Receives progress until 100 arrives
async fn collect_progress(receiver: &mut ProgressReceiver) -> Vec<u8> {
    let mut values = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(pct) = receiver.recv().await {
            values.push(pct);
            if pct == 100 {
                break;
            }
        }
    })
    .await
    .expect("Timed out waiting for progress");
    values
}

fn html_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_crawl_records_page_metrics() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let port = mock_server.address().port();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(format!(
            r##"<!DOCTYPE html><html><head><title>Home</title></head><body>
            <h1>Welcome</h1><h2>News</h2><h3>a</h3><h3>b</h3>
            <form action="/login"><input type="password" name="pw"></form>
            <a href="/ok">ok</a>
            <a href="/missing">missing</a>
            <a href="http://localhost:{}/ext">external</a>
            <a href="#top">top</a>
            </body></html>"##,
            port
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/ext"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    // "/missing" has no mock, so wiremock answers 404

    let (engine, store) = start_engine(2);
    let (job_id, _) = store.create_job(&format!("{}/", base_url)).unwrap();
    let (mut receiver, unsubscribe) = engine.subscribe(job_id);
    engine.enqueue(job_id).await.unwrap();

    let progress = collect_progress(&mut receiver).await;
    unsubscribe.unsubscribe();
    engine.shutdown().await;

    assert_eq!(progress, vec![0, 10, 15, 76, 80, 85, 100]);

    let job = store.load_job(job_id).unwrap();
    assert_eq!(job.status, CrawlStatus::Done);
    assert_eq!(job.title.as_deref(), Some("Home"));
    assert_eq!(job.html_version.as_deref(), Some("HTML 5"));
    assert_eq!((job.headings.h1, job.headings.h2, job.headings.h3), (1, 1, 2));
    assert!(job.has_login_form);
    assert_eq!(job.internal_links, 2);
    assert_eq!(job.external_links, 1);
    assert_eq!(job.broken_links, 1);

    let links = store.get_links(job_id).unwrap();
    let statuses: Vec<_> = links.iter().map(|l| (l.href.clone(), l.http_status)).collect();
    assert_eq!(
        statuses,
        vec![
            (format!("{}/ok", base_url), Some(200)),
            (format!("{}/missing", base_url), Some(404)),
            (format!("http://localhost:{}/ext", port), Some(200)),
        ]
    );
    assert!(links.iter().all(|l| l.checked_at.is_some()));
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_error_status_fails_job() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let (job_id, _) = store
        .create_job(&format!("{}/gone", mock_server.uri()))
        .unwrap();
    let (mut receiver, _unsubscribe) = engine.subscribe(job_id);
    engine.enqueue(job_id).await.unwrap();

    assert_eq!(collect_progress(&mut receiver).await, vec![0, 100]);
    engine.shutdown().await;

    let job = store.load_job(job_id).unwrap();
    assert_eq!(job.status, CrawlStatus::Error);
    assert!(job.html_version.is_none());
    assert!(store.get_links(job_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_non_html_content_fails_job() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"ok": true}"#)
                .insert_header("content-type", "application/json"),
        )
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let (job_id, _) = store
        .create_job(&format!("{}/data.json", mock_server.uri()))
        .unwrap();
    let (mut receiver, _unsubscribe) = engine.subscribe(job_id);
    engine.enqueue(job_id).await.unwrap();

    assert_eq!(collect_progress(&mut receiver).await, vec![0, 100]);
    engine.shutdown().await;

    assert_eq!(store.load_job(job_id).unwrap().status, CrawlStatus::Error);
}

#[tokio::test]
async fn test_unreachable_target_fails_job() {
    let (engine, store) = start_engine(1);
    let (job_id, _) = store.create_job("http://127.0.0.1:1/").unwrap();
    let (mut receiver, _unsubscribe) = engine.subscribe(job_id);
    engine.enqueue(job_id).await.unwrap();

    assert_eq!(collect_progress(&mut receiver).await, vec![0, 100]);
    engine.shutdown().await;

    assert_eq!(store.load_job(job_id).unwrap().status, CrawlStatus::Error);
}

#[tokio::test]
async fn test_restart_replaces_link_set() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // First crawl sees two links, every later crawl sees one
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/a">a</a><a href="/b">b</a></body></html>"#.to_string(),
        ))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/c">c</a></body></html>"#.to_string(),
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let (job_id, _) = store.create_job(&format!("{}/", base_url)).unwrap();

    let (mut first, _u1) = engine.subscribe(job_id);
    engine.enqueue(job_id).await.unwrap();
    assert_eq!(collect_progress(&mut first).await, vec![0, 10, 15, 80, 85, 100]);
    assert_eq!(store.get_links(job_id).unwrap().len(), 2);

    let (mut second, _u2) = engine.subscribe(job_id);
    let requeued = engine.restart(&[job_id, 999]).await.unwrap();
    assert_eq!(requeued, vec![job_id]);
    assert_eq!(collect_progress(&mut second).await, vec![0, 10, 15, 84, 100]);
    engine.shutdown().await;

    let links = store.get_links(job_id).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].href, format!("{}/c", base_url));

    let job = store.load_job(job_id).unwrap();
    assert_eq!(job.status, CrawlStatus::Done);
    assert_eq!(job.internal_links, 1);
}

#[tokio::test]
async fn test_restart_of_running_job_keeps_latest_attempt() {
    let fetcher = Arc::new(GatedFetcher::default());
    let (engine, store) = start_engine_with(2, fetcher.clone());
    let (job_id, _) = store.create_job("http://a.com/").unwrap();

    engine.enqueue(job_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), fetcher.first_started.notified())
        .await
        .expect("First attempt never fetched");

    // the second worker crawls the restarted job while the first attempt is stuck
    let (mut receiver, _unsubscribe) = engine.subscribe(job_id);
    assert_eq!(engine.restart(&[job_id]).await.unwrap(), vec![job_id]);
    assert_eq!(collect_progress(&mut receiver).await, vec![0, 10, 15, 84, 100]);

    fetcher.gate.notify_one();
    engine.shutdown().await;

    let job = store.load_job(job_id).unwrap();
    assert_eq!(job.status, CrawlStatus::Done);
    assert_eq!(job.internal_links, 1);

    let hrefs: Vec<_> = store
        .get_links(job_id)
        .unwrap()
        .into_iter()
        .map(|l| l.href)
        .collect();
    assert_eq!(hrefs, vec!["http://a.com/new".to_string()]);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_cancel_running_crawl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            html_response("<html></html>".to_string()).set_delay(Duration::from_secs(30)),
        )
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let (job_id, _) = store
        .create_job(&format!("{}/slow", mock_server.uri()))
        .unwrap();
    let (mut receiver, _unsubscribe) = engine.subscribe(job_id);
    engine.enqueue(job_id).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !engine.registry().is_registered(job_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Crawl never started");

    assert!(engine.cancel(job_id));
    assert_eq!(collect_progress(&mut receiver).await, vec![0, 100]);
    engine.shutdown().await;

    assert_eq!(store.load_job(job_id).unwrap().status, CrawlStatus::Error);
    assert!(!engine.registry().is_registered(job_id));

    // cancelling a finished job is a no-op
    assert!(!engine.cancel(job_id));
}

#[tokio::test]
async fn test_shutdown_drains_buffered_jobs() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html_response("<html><h1>x</h1></html>".to_string()))
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let mut job_ids = Vec::new();
    for i in 0..3 {
        let (job_id, _) = store
            .create_job(&format!("{}/page{}", mock_server.uri(), i))
            .unwrap();
        engine.enqueue(job_id).await.unwrap();
        job_ids.push(job_id);
    }

    engine.shutdown().await;

    for job_id in job_ids {
        assert_eq!(store.load_job(job_id).unwrap().status, CrawlStatus::Done);
    }

    assert!(matches!(
        engine.enqueue(1).await,
        Err(LinkscopeError::QueueClosed)
    ));
}

#[tokio::test]
async fn test_missing_job_is_ignored() {
    let (engine, store) = start_engine(1);

    engine.enqueue(999).await.unwrap();
    engine.shutdown().await;

    assert!(store.load_job(999).unwrap_err().is_not_found());
    assert_eq!(store.count_jobs_by_status().unwrap().values().sum::<u64>(), 0);
}

#[tokio::test]
async fn test_submit_creates_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html_response("<html></html>".to_string()))
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let url = format!("{}/", mock_server.uri());

    let first = engine.submit(&url).await.unwrap();
    assert!(first.enqueued);

    let second = engine.submit(&url).await.unwrap();
    assert_eq!(second.job_id, first.job_id);
    assert!(!second.enqueued);

    assert!(matches!(
        engine.submit("ftp://example.com/").await,
        Err(LinkscopeError::InvalidTarget { .. })
    ));

    engine.shutdown().await;
    assert_eq!(store.load_job(first.job_id).unwrap().status, CrawlStatus::Done);
}

#[tokio::test]
async fn test_watch_finished_job() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html_response("<html></html>".to_string()))
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let (job_id, _) = store.create_job(&mock_server.uri()).unwrap();

    match engine.watch(job_id).unwrap() {
        ProgressWatch::Live(..) => {}
        ProgressWatch::Finished(status) => panic!("Queued job reported as {}", status),
    }

    engine.enqueue(job_id).await.unwrap();
    engine.shutdown().await;

    match engine.watch(job_id).unwrap() {
        ProgressWatch::Finished(status) => assert_eq!(status, CrawlStatus::Done),
        ProgressWatch::Live(..) => panic!("Finished job reported as live"),
    }

    assert!(engine.watch(12345).is_err());
}

#[tokio::test]
async fn test_resume_job_left_queued() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html_response("<html><h1>back</h1></html>".to_string()))
        .mount(&mock_server)
        .await;

    let (engine, store) = start_engine(1);
    let url = format!("{}/", mock_server.uri());

    // queued by an earlier run that exited before crawling it
    let (job_id, _) = store.create_job(&url).unwrap();

    let submission = engine.submit(&url).await.unwrap();
    assert_eq!(submission.job_id, job_id);
    assert!(!submission.enqueued);

    assert!(engine.resume(job_id).await.unwrap());
    engine.shutdown().await;

    let job = store.load_job(job_id).unwrap();
    assert_eq!(job.status, CrawlStatus::Done);
    assert_eq!(job.headings.h1, 1);

    // only queued jobs are resumed
    assert!(!engine.resume(job_id).await.unwrap());
    assert!(engine.resume(999).await.is_err());
}
