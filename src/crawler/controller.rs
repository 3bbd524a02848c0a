use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cli::config::ScraperSettings;
use crate::crawler::interrupt::{interrupt_channel, InterruptHandle, InterruptSignal};
use crate::crawler::seeker::{FetchContext, Seeker};
use crate::crawler::task::{Task, TaskId, TaskStatus, TaskSummary};
use crate::events::{BroadcastError, BrokerError, StateBroadcaster, StateBroker, Subscription};
use crate::storage::{StorageError, TaskStore};
use crate::utils::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("no task found with id {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is already in final state")]
    AlreadyFinal(TaskId),

    #[error("interrupt signal already sent to task {0}")]
    InterruptAlreadySent(TaskId),

    #[error("task {0} is not finished, but there is no state broadcaster for it")]
    Inconsistent(TaskId),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl From<StorageError> for ServiceError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(id) => ServiceError::TaskNotFound(id),
            other => ServiceError::Storage(other),
        }
    }
}

/// What a listener gets for a task
pub enum TaskFeed {
    /// The task is active: current state first, then every change until it ends
    Live(Subscription<Task>),

    /// The task already reached a final state
    Final(Task),
}

/// Runs crawl tasks on a bounded pool of workers and streams their progress
#[derive(Clone)]
pub struct ScrapeService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    broker: StateBroker<TaskId, Task>,
    /// Interrupt handles of claimed tasks. Locking this also serializes
    /// the PENDING -> INITIATING transition against interrupts.
    interrupts: Mutex<HashMap<TaskId, InterruptHandle>>,
    queue: mpsc::UnboundedSender<TaskId>,
    fetch: FetchContext,
}

impl ScrapeService {
    /// Create the service and spawn its task workers
    pub fn start(
        store: Arc<dyn TaskStore>,
        settings: &ScraperSettings,
    ) -> Result<Self, ServiceError> {
        let fetch = FetchContext::from_settings(settings, Default::default())?;
        let (queue, queued) = mpsc::unbounded_channel();

        let service = Self {
            inner: Arc::new(Inner {
                store,
                broker: StateBroker::new(settings.subscriber_buffer),
                interrupts: Mutex::new(HashMap::new()),
                queue,
                fetch,
            }),
        };

        let queued = Arc::new(Mutex::new(queued));
        let workers = settings.task_workers.max(1);
        info!("Starting {} task workers", workers);

        for worker in 0..workers {
            let service = service.clone();
            let queued = queued.clone();
            tokio::spawn(async move { service.run_worker(worker, queued).await });
        }

        Ok(service)
    }

    /// Create a pending task for `link` and queue it. Returns the new task id.
    pub async fn add_task(&self, link: Url) -> Result<TaskId, ServiceError> {
        let (id, _) = self.create_task(link).await?;
        self.enqueue(id);
        Ok(id)
    }

    /// Like [`add_task`](Self::add_task), but subscribes before the task is
    /// queued, so the feed starts at PENDING and misses no state.
    pub async fn add_task_and_listen(
        &self,
        link: Url,
    ) -> Result<(TaskId, Subscription<Task>), ServiceError> {
        let (id, broadcaster) = self.create_task(link).await?;
        let subscription = broadcaster.subscribe().await;
        self.enqueue(id);
        Ok((id, subscription?))
    }

    /// Interrupt a pending or running task
    pub async fn interrupt_task(&self, id: TaskId) -> Result<(), ServiceError> {
        let mut interrupts = self.inner.interrupts.lock().await;
        let task = self.inner.store.retrieve_task(id).await?;

        if task.status == TaskStatus::Pending {
            // Never claimed: it is skipped when dequeued
            return self.interrupt_pending_task(id, task).await;
        }

        if task.status.is_terminal() {
            return Err(ServiceError::AlreadyFinal(id));
        }

        match interrupts.remove(&id) {
            Some(handle) => {
                if !handle.send() {
                    debug!("Task {} ended before the interrupt arrived", id);
                }
                info!("Interrupt sent to task {}", id);
                Ok(())
            }
            None => Err(ServiceError::InterruptAlreadySent(id)),
        }
    }

    /// Subscribe to a task's states, or get its final snapshot if it is over
    pub async fn register_listener(&self, id: TaskId) -> Result<TaskFeed, ServiceError> {
        if let Ok(broadcaster) = self.inner.broker.get(&id).await {
            match broadcaster.subscribe().await {
                Ok(subscription) => return Ok(TaskFeed::Live(subscription)),
                Err(e) => debug!("Task {} ended while subscribing: {}", id, e),
            }
        }

        let task = self.inner.store.retrieve_task(id).await?;
        if task.status.is_terminal() {
            Ok(TaskFeed::Final(task))
        } else {
            Err(ServiceError::Inconsistent(id))
        }
    }

    pub async fn get_task_by_id(&self, id: TaskId) -> Result<Task, ServiceError> {
        Ok(self.inner.store.retrieve_task(id).await?)
    }

    /// All tasks, most recently created first
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        Ok(self.inner.store.list_tasks().await?)
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>, ServiceError> {
        let tasks = self.get_all_tasks().await?;
        Ok(tasks.iter().map(Task::summary).collect())
    }

    pub async fn metrics(&self) -> Metrics {
        self.inner.fetch.metrics.get_metrics().await
    }

    async fn create_task(
        &self,
        link: Url,
    ) -> Result<(TaskId, StateBroadcaster<Task>), ServiceError> {
        let mut task = Task::new(link);
        let id = self.inner.store.store_task(&mut task).await?;
        let broadcaster = self.inner.broker.add(id, task.clone()).await?;

        info!("Added task {} for {}", id, task.link);
        Ok((id, broadcaster))
    }

    fn enqueue(&self, id: TaskId) {
        if self.inner.queue.send(id).is_err() {
            error!("Task queue closed, task {} will not be processed", id);
        }
    }

    async fn interrupt_pending_task(&self, id: TaskId, mut task: Task) -> Result<(), ServiceError> {
        task.status = TaskStatus::Interrupted;
        self.inner.store.store_task(&mut task).await?;
        self.inner.fetch.metrics.record_task_outcome(task.status).await;

        let broadcaster = self.inner.broker.get(&id).await.map_err(|e| {
            error!("Could not retrieve state broadcaster: {}", e);
            e
        })?;
        broadcaster.publish(&task);
        broadcaster.end();
        self.inner.broker.remove(&id).await?;

        info!("Task {} interrupted before it started", id);
        Ok(())
    }

    async fn run_worker(
        self,
        worker: usize,
        queued: Arc<Mutex<mpsc::UnboundedReceiver<TaskId>>>,
    ) {
        debug!("Task worker {} started", worker);

        loop {
            let next = queued.lock().await.recv().await;
            let Some(id) = next else {
                break;
            };

            debug!("Worker {} processing task {}", worker, id);
            self.process_task(id).await;
        }

        debug!("Task worker {} stopped", worker);
    }

    async fn process_task(&self, id: TaskId) {
        let (handle, signal) = interrupt_channel();

        match self.claim_task(id, handle).await {
            Ok(Some(task)) => {
                self.inner.fetch.metrics.record_task_started().await;
                if let Err(e) = self.drive_task(id, task, signal).await {
                    error!("Task {} aborted: {}", id, e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Could not claim task {}: {}", id, e);
                self.abandon_task(id, &e).await;
            }
        }

        self.inner.interrupts.lock().await.remove(&id);
    }

    /// Close out a task that could not be started: mark it ERROR where possible,
    /// then end and drop its broadcaster so listeners are released.
    async fn abandon_task(&self, id: TaskId, reason: &ServiceError) {
        let broadcaster = match self.inner.broker.get(&id).await {
            Ok(broadcaster) => broadcaster,
            Err(e) => {
                debug!("No broadcaster to release for task {}: {}", id, e);
                return;
            }
        };

        match self.inner.store.retrieve_task(id).await {
            Ok(mut task) if !task.status.is_terminal() => {
                task.status = TaskStatus::Error;
                task.error = Some(format!("failed to start task: {}", reason));
                broadcaster.publish(&task);

                if let Err(e) = self.inner.store.store_task(&mut task).await {
                    warn!("Could not store error state of task {}: {}", id, e);
                }
                self.inner.fetch.metrics.record_task_outcome(task.status).await;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not load task {} to mark it failed: {}", id, e),
        }

        broadcaster.end();
        if let Err(e) = self.inner.broker.remove(&id).await {
            error!("Could not remove state broadcaster of task {}: {}", id, e);
        }
    }

    /// Move a pending task to INITIATING and register its interrupt handle.
    /// Returns `None` if the task must not run.
    async fn claim_task(
        &self,
        id: TaskId,
        handle: InterruptHandle,
    ) -> Result<Option<Task>, ServiceError> {
        let mut interrupts = self.inner.interrupts.lock().await;
        let mut task = self.inner.store.retrieve_task(id).await?;

        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::Interrupted => {
                debug!("Skipping task {}: interrupted while pending", id);
                return Ok(None);
            }
            other => {
                warn!("Skipping task {}: unexpected state {}", id, other);
                return Ok(None);
            }
        }

        task.status = TaskStatus::Initiating;
        self.inner.store.store_task(&mut task).await?;
        interrupts.insert(id, handle);

        Ok(Some(task))
    }

    async fn drive_task(
        &self,
        id: TaskId,
        mut task: Task,
        mut interrupt: InterruptSignal,
    ) -> Result<(), ServiceError> {
        let broadcaster = match self.inner.broker.get(&id).await {
            Ok(broadcaster) => broadcaster,
            Err(e) => {
                task.status = TaskStatus::Error;
                task.error = Some(e.to_string());
                self.inner.store.store_task(&mut task).await?;
                return Err(e.into());
            }
        };

        broadcaster.publish(&task);
        info!("Task {} initiating: {}", id, task.link);

        let mut seeker = Seeker::start(task.link.clone(), self.inner.fetch.clone());

        loop {
            tokio::select! {
                _ = interrupt.received() => {
                    if task.status.is_terminal() {
                        debug!("Ignoring interrupt for task {} in final state", id);
                    } else {
                        info!("Interrupting task {}", id);
                        task.status = TaskStatus::Interrupting;
                        broadcaster.publish(&task);
                        seeker.interrupt();
                    }
                }
                update = seeker.next_update() => match update {
                    Some(update) => {
                        let terminal = update.is_terminal();
                        if task.apply(update) {
                            broadcaster.publish(&task);
                        }
                        if terminal {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        if !task.status.is_terminal() {
            task.status = TaskStatus::Error;
            task.error = Some("seeker stopped without a final update".to_string());
            broadcaster.publish(&task);
        }

        if let Err(e) = self.inner.store.store_task(&mut task).await {
            error!("Could not store final state of task {}: {}", id, e);
        }
        self.inner.fetch.metrics.record_task_outcome(task.status).await;
        info!("Task {} ended in state {}", id, task.status);

        broadcaster.end();
        self.inner.broker.remove(&id).await?;
        Ok(())
    }
}
