use std::sync::Arc;

use chrono::Utc;
use conveyor_core::config::ConveyorConfig;
use conveyor_queue::{BufferedQueue, QueueOptions, SqliteStore};
use conveyor_scheduler::{Job, JobOptions, JobScheduler, SchedulerOptions};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Items carried by the application queue.
pub type Event = Value;

/// Owns the queue and the scheduler for the lifetime of the process.
///
/// Producers and jobs get the queue through [`App::queue`]; nothing is
/// reachable through a global.
pub struct App {
    pub config: ConveyorConfig,
    queue: Arc<BufferedQueue<Event>>,
    scheduler: JobScheduler,
    consumer: Option<JoinHandle<()>>,
}

impl App {
    /// Build the queue (with the SQLite overflow store when configured) and
    /// start the scheduler. Must run inside a tokio runtime.
    pub fn build(config: ConveyorConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let mut options = QueueOptions::from_config(&config.queue);
        if let Some(ref overflow) = config.queue.overflow {
            overflow.ensure_parent_dir()?;
            info!(path = %overflow.path, queue = %config.queue.name, "opening overflow store");
            let store: Arc<SqliteStore<Event>> =
                Arc::new(SqliteStore::open(&overflow.path, config.queue.name.clone())?);
            options = options.store(store);
        }
        let queue = Arc::new(BufferedQueue::new(options)?);

        let scheduler = JobScheduler::new(SchedulerOptions::from_config(&config.scheduler))?;

        info!(
            queue = %config.queue.name,
            size = config.queue.size,
            overflow = config.queue.overflow.is_some(),
            tick_ms = config.scheduler.tick_ms,
            "conveyor components ready"
        );

        Ok(Self {
            config,
            queue,
            scheduler,
            consumer: None,
        })
    }

    pub fn queue(&self) -> Arc<BufferedQueue<Event>> {
        Arc::clone(&self.queue)
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn register_job(&self, job: Job) -> anyhow::Result<()> {
        self.scheduler.register(job)?;
        Ok(())
    }

    /// Sample producers: a boot event right away and a heartbeat every minute.
    pub fn register_demo_jobs(&self) -> anyhow::Result<()> {
        let queue = self.queue();
        self.register_job(Job::new(
            move || {
                let queue = Arc::clone(&queue);
                async move {
                    queue
                        .put(json!({ "kind": "boot", "at": Utc::now().to_rfc3339() }))
                        .await?;
                    anyhow::Ok(())
                }
            },
            JobOptions::new().name("boot").once(Utc::now()),
        )?)?;

        let queue = self.queue();
        self.register_job(Job::per_minute(
            move || {
                let queue = Arc::clone(&queue);
                async move {
                    queue
                        .put(json!({ "kind": "heartbeat", "at": Utc::now().to_rfc3339() }))
                        .await?;
                    anyhow::Ok(())
                }
            },
            JobOptions::new().name("heartbeat"),
        )?)?;
        Ok(())
    }

    /// Drain the queue in the background, logging every event.
    /// The task ends when the queue is closed.
    pub fn spawn_consumer(&mut self) {
        let queue = self.queue();
        self.consumer = Some(tokio::spawn(async move {
            loop {
                match queue.pull().await {
                    Ok(event) => info!(%event, "event consumed"),
                    Err(e) if e.is_closed() => break,
                    Err(e) => warn!(error = %e, "pull failed"),
                }
            }
        }));
    }

    /// Stop producers first, then the queue (flushing it to the overflow
    /// store), then wait for the consumer to observe the close.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        info!("shutting down");
        self.scheduler.close().await;
        let flushed = self.queue.close().await;

        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                warn!(error = %e, "consumer task ended abnormally");
            }
        }

        flushed?;
        info!("shutdown complete");
        Ok(())
    }
}
