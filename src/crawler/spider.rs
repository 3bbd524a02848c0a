use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use url::Url;

use crate::crawler::seeker::FetchContext;
use crate::crawler::update::{LinkOutcome, ProcessingUpdate};
use crate::utils::metrics::MetricsCollector;

/// Bounded pool of workers fetching links from a shared feed.
///
/// Each fetched link produces one `LinkCrawled` update. The pool is fed one
/// link at a time and drained once; in-flight fetches are never aborted.
pub struct SpiderPool {
    feed: mpsc::Sender<Url>,
    workers: JoinSet<()>,
}

impl SpiderPool {
    /// Spawn the workers. Updates are reported on `updates`.
    pub fn start(context: &FetchContext, updates: mpsc::Sender<ProcessingUpdate>) -> Self {
        let (feed, queue) = mpsc::channel::<Url>(1);
        let queue = Arc::new(Mutex::new(queue));
        let mut workers = JoinSet::new();

        for worker in 0..context.link_workers.max(1) {
            let spider = Spider {
                worker,
                client: context.client.clone(),
                timeout: context.link_timeout,
                metrics: context.metrics.clone(),
            };
            let queue = queue.clone();
            let updates = updates.clone();
            workers.spawn(async move { spider.run(queue, updates).await });
        }

        Self { feed, workers }
    }

    /// Hand one link to the next free worker. Returns `false` if every worker is gone.
    pub async fn feed(&self, link: Url) -> bool {
        self.feed.send(link).await.is_ok()
    }

    /// Close the feed and wait until every worker has finished its in-flight fetch and exited
    pub async fn drained(self) {
        let Self { feed, mut workers } = self;
        drop(feed);

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Spider worker failed: {}", e);
            }
        }
    }
}

struct Spider {
    worker: usize,
    client: Client,
    timeout: Duration,
    metrics: MetricsCollector,
}

impl Spider {
    async fn run(
        self,
        queue: Arc<Mutex<mpsc::Receiver<Url>>>,
        updates: mpsc::Sender<ProcessingUpdate>,
    ) {
        loop {
            let next = queue.lock().await.recv().await;
            let Some(link) = next else {
                break;
            };

            let outcome = self.crawl(&link).await;
            if updates.send(ProcessingUpdate::LinkCrawled { link, outcome }).await.is_err() {
                debug!("Spider {} stopping: update receiver dropped", self.worker);
                break;
            }
        }
    }

    async fn crawl(&self, link: &Url) -> LinkOutcome {
        let timer = self.metrics.start_timer();
        let result = self.client.get(link.clone()).timeout(self.timeout).send().await;
        let elapsed = timer.end();

        match result {
            Ok(response) => {
                let code = response.status().as_u16();
                debug!("Spider {} crawled {} -> {} in {}ms", self.worker, link, code, elapsed);
                self.metrics.record_link_fetch(Some(code), elapsed).await;
                LinkOutcome::Status(code)
            }
            Err(e) => {
                warn!("Error while crawling link {}: {}", link, e);
                self.metrics.record_link_fetch(None, elapsed).await;
                LinkOutcome::TransportError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(workers: usize) -> FetchContext {
        FetchContext {
            client: Client::new(),
            page_timeout: Duration::from_secs(10),
            link_timeout: Duration::from_secs(5),
            link_workers: workers,
            metrics: MetricsCollector::new(),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ProcessingUpdate>) -> HashMap<String, LinkOutcome> {
        let mut outcomes = HashMap::new();
        while let Some(update) = rx.recv().await {
            match update {
                ProcessingUpdate::LinkCrawled { link, outcome } => {
                    outcomes.insert(link.path().to_string(), outcome);
                }
                other => panic!("unexpected update {:?}", other),
            }
        }
        outcomes
    }

    #[tokio::test]
    async fn test_every_link_reported_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let context = context(2);
        let (tx, rx) = mpsc::channel(16);
        let pool = SpiderPool::start(&context, tx);
        let collector = tokio::spawn(collect(rx));

        let base = Url::parse(&server.uri()).unwrap();
        for link in ["/ok", "/broken", "/missing"] {
            assert!(pool.feed(base.join(link).unwrap()).await);
        }
        pool.drained().await;

        let outcomes = collector.await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["/ok"], LinkOutcome::Status(200));
        assert_eq!(outcomes["/broken"], LinkOutcome::Status(500));
        assert_eq!(outcomes["/missing"], LinkOutcome::Status(404));

        let metrics = context.metrics.get_metrics().await;
        assert_eq!(metrics.link_fetches, 3);
        assert_eq!(metrics.failed_link_fetches, 0);
    }

    #[tokio::test]
    async fn test_transport_error_reported() {
        // Bind then drop a listener to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let context = context(1);
        let (tx, rx) = mpsc::channel(4);
        let pool = SpiderPool::start(&context, tx);
        let collector = tokio::spawn(collect(rx));

        let link = Url::parse(&format!("http://127.0.0.1:{}/refused", port)).unwrap();
        assert!(pool.feed(link).await);
        pool.drained().await;

        let outcomes = collector.await.unwrap();
        assert_eq!(outcomes["/refused"], LinkOutcome::TransportError);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let context = context(3);
        let (tx, mut rx) = mpsc::channel(16);
        let pool = SpiderPool::start(&context, tx);

        let base = Url::parse(&server.uri()).unwrap();
        for link in ["/a", "/b", "/c"] {
            assert!(pool.feed(base.join(link).unwrap()).await);
        }
        pool.drained().await;

        let mut crawled = 0;
        while let Ok(update) = rx.try_recv() {
            assert!(matches!(update, ProcessingUpdate::LinkCrawled { .. }));
            crawled += 1;
        }
        assert_eq!(crawled, 3);
    }

    #[tokio::test]
    async fn test_drain_without_links() {
        let (tx, mut rx) = mpsc::channel(1);
        let pool = SpiderPool::start(&context(4), tx);
        pool.drained().await;
        assert!(rx.recv().await.is_none());
    }
}
