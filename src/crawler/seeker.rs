use std::time::Duration;

use reqwest::{Client, StatusCode};
use scraper::Html;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cli::config::ScraperSettings;
use crate::crawler::analyzer::analyze_page;
use crate::crawler::interrupt::{interrupt_channel, InterruptHandle, InterruptSignal};
use crate::crawler::spider::SpiderPool;
use crate::crawler::update::{ProcessingUpdate, SeekError};
use crate::utils::metrics::MetricsCollector;

/// Capacity of the update stream between a seeker and its worker
const UPDATE_BUFFER: usize = 32;

/// HTTP client and limits shared by every seeker of a service
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub client: Client,
    pub page_timeout: Duration,
    pub link_timeout: Duration,
    pub link_workers: usize,
    pub metrics: MetricsCollector,
}

impl FetchContext {
    /// Build the shared client from the scraper settings
    pub fn from_settings(
        settings: &ScraperSettings,
        metrics: MetricsCollector,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            page_timeout: Duration::from_secs(settings.page_timeout_secs),
            link_timeout: Duration::from_secs(settings.link_timeout_secs),
            link_workers: settings.link_workers,
            metrics,
        })
    }
}

/// Worker-side handle of a running seeker
pub struct SeekerHandle {
    updates: mpsc::Receiver<ProcessingUpdate>,
    interrupt: Option<InterruptHandle>,
}

impl SeekerHandle {
    /// Next update, or `None` once the seeker has ended its run
    pub async fn next_update(&mut self) -> Option<ProcessingUpdate> {
        self.updates.recv().await
    }

    /// Forward an interrupt to the seeker. Only the first call delivers anything.
    pub fn interrupt(&mut self) -> bool {
        self.interrupt.take().is_some_and(InterruptHandle::send)
    }
}

/// Per-task pipeline: fetch the root page, analyze it, then check every link on it
pub struct Seeker {
    link: Url,
    context: FetchContext,
    updates: mpsc::Sender<ProcessingUpdate>,
    interrupt: InterruptSignal,
}

impl Seeker {
    /// Spawn a seeker for `link`. Its update stream closes after the terminal update.
    pub fn start(link: Url, context: FetchContext) -> SeekerHandle {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let (interrupt_handle, interrupt_signal) = interrupt_channel();

        let seeker = Seeker {
            link,
            context,
            updates: updates_tx,
            interrupt: interrupt_signal,
        };
        tokio::spawn(seeker.seek());

        SeekerHandle {
            updates: updates_rx,
            interrupt: Some(interrupt_handle),
        }
    }

    async fn seek(mut self) {
        let terminal = self.run().await;
        debug!("Seeker for {} ending with {:?}", self.link, terminal);
        self.send(terminal).await;
    }

    async fn run(&mut self) -> ProcessingUpdate {
        if self.interrupt.try_take() {
            return ProcessingUpdate::Interrupted;
        }

        let body = match self.fetch_root().await {
            Ok(body) => body,
            Err(e) => return ProcessingUpdate::Error(e),
        };

        if self.interrupt.try_take() {
            return ProcessingUpdate::Interrupted;
        }

        let info = {
            let document = Html::parse_document(&body);
            analyze_page(&document, &self.link)
        };
        let links = info.links.clone();
        info!("Analyzed {}: {} links to check", self.link, links.len());

        if !self.send(ProcessingUpdate::PageBaseInfo(info)).await {
            return ProcessingUpdate::Interrupted;
        }

        let pool = SpiderPool::start(&self.context, self.updates.clone());
        let mut interrupted = false;

        for link in links {
            tokio::select! {
                biased;
                _ = self.interrupt.received() => {
                    interrupted = true;
                    break;
                }
                fed = pool.feed(link) => {
                    if !fed {
                        warn!("Spider pool for {} stopped accepting links", self.link);
                        break;
                    }
                }
            }
        }

        pool.drained().await;

        if interrupted {
            ProcessingUpdate::Interrupted
        } else {
            ProcessingUpdate::Finished
        }
    }

    async fn fetch_root(&self) -> Result<String, SeekError> {
        let response = self
            .context
            .client
            .get(self.link.clone())
            .timeout(self.context.page_timeout)
            .send()
            .await
            .map_err(SeekError::RootFetch)?;

        if response.status() != StatusCode::OK {
            return Err(SeekError::RootStatus(response.status()));
        }

        response.text().await.map_err(SeekError::RootBody)
    }

    async fn send(&self, update: ProcessingUpdate) -> bool {
        if self.updates.send(update).await.is_err() {
            debug!("Update receiver for {} dropped", self.link);
            return false;
        }
        true
    }
}
