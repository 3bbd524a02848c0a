use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cli::config::ServiceConfig;
use crate::crawler::{
    parse_task_link, ScrapeService, ServiceError, Task, TaskFeed, TaskId, TaskSummary,
};
use crate::events::Subscription;
use crate::storage::TaskStorage;
use crate::utils::Metrics;

/// How task revisions are reported while a crawl runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
    /// Only the final summary
    Quiet,
}

/// Run crawl tasks for `urls` and follow their progress until all are final
pub async fn crawl(
    urls: Vec<String>,
    profile: Option<String>,
    workers: Option<usize>,
    link_workers: Option<usize>,
    output: Output,
) -> Result<()> {
    let mut config = match &profile {
        Some(profile) => ServiceConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => ServiceConfig::load_default()?,
    };

    // Override configuration with command line parameters if provided
    if let Some(w) = workers {
        config.scraper.task_workers = w;
    }

    if let Some(l) = link_workers {
        config.scraper.link_workers = l;
    }

    let links = urls
        .iter()
        .map(|raw| parse_task_link(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let store = TaskStorage::create(&config.storage).await?;
    let service = ScrapeService::start(store, &config.scraper)?;

    let mut listeners = JoinSet::new();
    for link in links {
        let (id, feed) = match output {
            Output::Quiet => (service.add_task(link).await?, None),
            _ => {
                let (id, subscription) = service.add_task_and_listen(link).await?;
                (id, Some(subscription))
            }
        };
        listeners.spawn(follow_task(service.clone(), id, feed, output));
    }

    let mut interrupted = false;
    loop {
        tokio::select! {
            joined = listeners.join_next() => match joined {
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!("Task listener failed: {}", e),
                None => break,
            },
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                if interrupted {
                    warn!("Interrupted again, not waiting for tasks to stop");
                    listeners.abort_all();
                    break;
                }
                interrupted = true;
                info!("Interrupt requested, stopping active tasks (Ctrl-C again to quit)");
                interrupt_all(&service).await?;
            }
        }
    }

    let mut summaries = service.list_tasks().await?;
    summaries.reverse();
    print_summary(&summaries);
    print_metrics(&service.metrics().await);

    Ok(())
}

/// Follow a task until it is final. A feed that closes early (the listener fell
/// too far behind) is replaced by a new one. Returns the last state seen.
async fn follow_task(
    service: ScrapeService,
    id: TaskId,
    mut feed: Option<Subscription<Task>>,
    output: Output,
) -> Option<Task> {
    let mut last: Option<Task> = None;

    loop {
        let mut subscription = match feed.take() {
            Some(subscription) => subscription,
            None => match service.register_listener(id).await {
                Ok(TaskFeed::Live(subscription)) => subscription,
                Ok(TaskFeed::Final(task)) => {
                    if last.as_ref() != Some(&task) {
                        report(id, &task, output);
                    }
                    return Some(task);
                }
                Err(e) => {
                    warn!("Lost track of task {}: {}", id, e);
                    return service.get_task_by_id(id).await.ok().or(last);
                }
            },
        };

        while let Some(task) = subscription.recv().await {
            if last.as_ref() != Some(&task) {
                report(id, &task, output);
            }
            last = Some(task);
        }

        if last.as_ref().is_some_and(|task| task.status.is_terminal()) {
            debug!("Feed for task {} closed", id);
            return last;
        }
        debug!("Feed for task {} closed early, reattaching", id);
    }
}

fn report(id: TaskId, task: &Task, output: Output) {
    match output {
        Output::Text => print_revision(id, task),
        Output::Json => match serde_json::to_string(task) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize task {}: {}", id, e),
        },
        Output::Quiet => {}
    }
}

async fn interrupt_all(service: &ScrapeService) -> Result<()> {
    for summary in service.list_tasks().await? {
        let Some(id) = summary.id else {
            continue;
        };
        if summary.status.is_terminal() {
            continue;
        }

        match service.interrupt_task(id).await {
            Ok(()) => {}
            Err(ServiceError::AlreadyFinal(_)) | Err(ServiceError::InterruptAlreadySent(_)) => {
                debug!("Task {} needs no interrupt", id);
            }
            Err(e) => warn!("Could not interrupt task {}: {}", id, e),
        }
    }

    Ok(())
}

fn print_revision(id: TaskId, task: &Task) {
    let total = task.internal_links.unwrap_or(0) + task.external_links.unwrap_or(0);
    let mut line = format!("[task {}] {:<13} {}", id, task.status.to_string(), task.link);

    if task.internal_links.is_some() {
        line.push_str(&format!(
            "  links {}/{}  inaccessible {}",
            task.crawled_links,
            total,
            task.inaccessible_links.unwrap_or(0)
        ));
    }
    if let Some(error) = &task.error {
        line.push_str(&format!("  error: {}", error));
    }

    println!("{}", line);
}

fn print_summary(summaries: &[TaskSummary]) {
    println!();
    println!(
        "{:<6} {:<13} {:>8} {:>13}  {}",
        "ID", "STATUS", "CRAWLED", "INACCESSIBLE", "LINK / TITLE"
    );
    for summary in summaries {
        let inaccessible = summary
            .inaccessible_links
            .map_or_else(|| "-".to_string(), |count| count.to_string());
        println!(
            "{:<6} {:<13} {:>8} {:>13}  {}",
            summary.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            summary.status.to_string(),
            summary.crawled_links,
            inaccessible,
            summary.link
        );
        if let Some(title) = &summary.page_title {
            println!("{:<44}{}", "", title);
        }
        if let Some(error) = &summary.error {
            println!("{:<44}error: {}", "", error);
        }
    }
}

fn print_metrics(metrics: &Metrics) {
    println!();
    println!("Tasks started:       {}", metrics.tasks_started);
    println!("Links checked:       {}", metrics.link_fetches);
    println!("Failed link fetches: {}", metrics.failed_link_fetches);
    println!("Mean fetch time:     {:.1} ms", metrics.mean_fetch_ms());
    println!("Slowest fetch:       {} ms", metrics.slowest_fetch_ms);

    let mut codes: Vec<_> = metrics.status_codes.iter().collect();
    codes.sort();
    for (code, count) in codes {
        println!("  HTTP {}: {}", code, count);
    }
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = ServiceConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub fn manage_profile(profile_name: String) -> Result<()> {
    match ServiceConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Err(_) => {
            // Profile doesn't exist, create a new one
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = ServiceConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = ServiceConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::ScraperSettings;
    use crate::crawler::task::TaskStatus;
    use crate::storage::tasks::InMemoryTaskStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::assert_ok;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn site_with_links(count: usize) -> MockServer {
        let server = MockServer::start().await;
        let anchors: String = (0..count)
            .map(|i| format!("<a href=\"/page-{}\">page {}</a>", i, i))
            .collect();

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body>{}</body></html>", anchors)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    fn service_with_buffer(subscriber_buffer: usize) -> ScrapeService {
        let settings = ScraperSettings {
            subscriber_buffer,
            ..ScraperSettings::default()
        };
        ScrapeService::start(Arc::new(InMemoryTaskStore::new()), &settings).unwrap()
    }

    #[tokio::test]
    async fn test_follow_task_outlives_dropped_feed() {
        let server = site_with_links(40).await;
        let service = service_with_buffer(4);
        let link = Url::parse(&server.uri()).unwrap();
        let (id, feed) = assert_ok!(service.add_task_and_listen(link).await);

        // Fall behind so the broadcaster disconnects this listener
        tokio::time::sleep(Duration::from_millis(150)).await;

        let followed = follow_task(service.clone(), id, Some(feed), Output::Quiet);
        let last = timeout(Duration::from_secs(15), followed)
            .await
            .expect("task never became final")
            .expect("no state seen");

        assert_eq!(last.status, TaskStatus::Finished);
        assert_eq!(last.crawled_links, 40);
    }

    #[tokio::test]
    async fn test_follow_task_without_initial_feed() {
        let server = site_with_links(3).await;
        let service = service_with_buffer(256);
        let id = assert_ok!(service.add_task(Url::parse(&server.uri()).unwrap()).await);

        let followed = follow_task(service.clone(), id, None, Output::Quiet);
        let last = timeout(Duration::from_secs(15), followed)
            .await
            .expect("task never became final")
            .expect("no state seen");
        assert_eq!(last.status, TaskStatus::Finished);

        // Already final: answered from storage
        let again = follow_task(service, id, None, Output::Quiet).await;
        assert_eq!(again.map(|task| task.status), Some(TaskStatus::Finished));
    }
}
