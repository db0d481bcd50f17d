use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conveyor_core::config::QueueConfig;
use conveyor_core::log::{Field, Logger, TracingLogger};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    error::{QueueError, Result},
    store::OverflowStore,
};

pub const DEFAULT_SIZE: usize = 100;
pub const DEFAULT_LOAD_INTERVAL: Duration = Duration::from_millis(100);

/// Construction options for [`BufferedQueue`].
pub struct QueueOptions<T> {
    name: String,
    size: usize,
    load_interval: Duration,
    store: Option<Arc<dyn OverflowStore<T>>>,
    logger: Option<Arc<dyn Logger>>,
}

impl<T> Default for QueueOptions<T> {
    fn default() -> Self {
        Self {
            name: conveyor_core::config::DEFAULT_QUEUE_NAME.to_string(),
            size: DEFAULT_SIZE,
            load_interval: DEFAULT_LOAD_INTERVAL,
            store: None,
            logger: None,
        }
    }
}

impl<T> QueueOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizing and naming from config. The overflow store is wired separately
    /// because opening it is the caller's business.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::default()
            .name(config.name.clone())
            .size(config.size)
            .load_interval(Duration::from_millis(config.load_interval_ms))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Capacity of the in-memory buffer. Must be greater than zero.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Delay between two replenishment attempts. Must be greater than zero.
    pub fn load_interval(mut self, interval: Duration) -> Self {
        self.load_interval = interval;
        self
    }

    pub fn store(mut self, store: Arc<dyn OverflowStore<T>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

/// State shared between the queue handle and its replenishment task.
struct Shared<T> {
    name: String,
    size: usize,
    tx: mpsc::Sender<T>,
    store: Option<Arc<dyn OverflowStore<T>>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    logger: Arc<dyn Logger>,
}

impl<T: Send + 'static> Shared<T> {
    fn len(&self) -> usize {
        self.size.saturating_sub(self.tx.capacity())
    }

    /// Move up to `size - len` items from the store into the buffer.
    ///
    /// Items already taken from the store when shutdown arrives are saved
    /// back so that close never loses them.
    async fn replenish(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let need = self.size.saturating_sub(self.len());
        if need == 0 || !store.has_more().await {
            return Ok(());
        }

        let mut items = store
            .pull(need)
            .await
            .map_err(QueueError::Replenish)?
            .into_iter();

        let mut moved = 0usize;
        while let Some(item) = items.next() {
            let permit = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => None,
                permit = self.tx.reserve() => permit.ok(),
            };
            match permit {
                Some(permit) => {
                    permit.send(item);
                    moved += 1;
                }
                None => {
                    let leftover: Vec<T> = std::iter::once(item).chain(items).collect();
                    let count = leftover.len();
                    store.save(leftover).await.map_err(QueueError::Flush)?;
                    self.logger.debug(
                        "replenish interrupted by close; items returned to store",
                        &[Field::new("queue", &self.name), Field::new("count", count)],
                    );
                    return Ok(());
                }
            }
        }

        if moved > 0 {
            self.logger.trace(
                "replenished from overflow store",
                &[Field::new("queue", &self.name), Field::new("count", moved)],
            );
        }
        Ok(())
    }
}

/// Bounded in-memory FIFO that spills to an optional [`OverflowStore`].
///
/// Items go to the memory buffer first. Once the buffer is full, or the store
/// already holds a backlog, new items are written to the store instead so they
/// do not overtake older ones. A background task moves stored items back into
/// the buffer as space frees up.
///
/// Without a store the queue behaves like a plain bounded channel: [`put`]
/// waits for space.
///
/// [`put`]: BufferedQueue::put
pub struct BufferedQueue<T> {
    shared: Arc<Shared<T>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    loader: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BufferedQueue<T> {
    /// Build a queue. With a store configured, the replenishment task starts
    /// immediately on the current tokio runtime.
    pub fn new(options: QueueOptions<T>) -> Result<Self> {
        if options.size == 0 {
            return Err(QueueError::Config("size must be greater than 0".to_string()));
        }
        if options.load_interval.is_zero() {
            return Err(QueueError::Config(
                "load interval must be greater than 0".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(options.size);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            name: options.name,
            size: options.size,
            tx,
            store: options.store,
            running: AtomicBool::new(true),
            shutdown,
            logger: options
                .logger
                .unwrap_or_else(|| TracingLogger::shared("queue")),
        });

        let loader = if shared.store.is_some() {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                QueueError::Config("an overflow store requires a tokio runtime".to_string())
            })?;
            let task_shared = Arc::clone(&shared);
            let interval = options.load_interval;
            Some(runtime.spawn(async move {
                run_loader(task_shared, interval, shutdown_rx).await;
            }))
        } else {
            None
        };

        shared.logger.debug(
            "queue created",
            &[
                Field::new("queue", &shared.name),
                Field::new("size", shared.size),
                Field::new("overflow", shared.store.is_some()),
            ],
        );

        Ok(Self {
            shared,
            rx: tokio::sync::Mutex::new(rx),
            loader: Mutex::new(loader),
        })
    }

    /// Enqueue `item`.
    ///
    /// Goes to the overflow store when one is configured and it either holds
    /// a backlog or the buffer is full. Otherwise waits for buffer space.
    pub async fn put(&self, item: T) -> Result<()> {
        if !self.is_running() {
            return Err(QueueError::Closed);
        }

        if let Some(store) = &self.shared.store {
            if store.has_more().await {
                return store.save(vec![item]).await.map_err(QueueError::Store);
            }
            // Check and send in one step; a full buffer spills.
            return match self.shared.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(item)) => {
                    store.save(vec![item]).await.map_err(QueueError::Store)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
            };
        }

        let mut shutdown = self.shared.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(QueueError::Closed),
            res = self.shared.tx.send(item) => res.map_err(|_| QueueError::Closed),
        }
    }

    /// Wait for the next item. Returns [`QueueError::Closed`] once the queue
    /// is closed, including while waiting.
    pub async fn pull(&self) -> Result<T> {
        if !self.is_running() {
            return Err(QueueError::Closed);
        }

        let mut shutdown = self.shared.shutdown.subscribe();
        let mut rx = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => return Err(QueueError::Closed),
            guard = self.rx.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(QueueError::Closed),
            item = rx.recv() => item.ok_or(QueueError::Closed),
        }
    }

    /// Take an item if one is buffered right now.
    ///
    /// Returns `Ok(None)` when the buffer is empty or another consumer is
    /// currently waiting in [`pull`](Self::pull).
    pub fn try_pull(&self) -> Result<Option<T>> {
        if !self.is_running() {
            return Err(QueueError::Closed);
        }
        let Ok(mut rx) = self.rx.try_lock() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Stop the queue.
    ///
    /// Wakes blocked callers with [`QueueError::Closed`], joins the
    /// replenishment task, drains the buffer and, when a store is
    /// configured, saves the drained items to it. A failed final save is
    /// returned as [`QueueError::Flush`]. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.shutdown.send_replace(true);

        let loader = self.loader.lock().expect("loader handle poisoned").take();
        if let Some(handle) = loader {
            if let Err(e) = handle.await {
                self.shared.logger.error(
                    "replenish loop terminated abnormally",
                    &[Field::new("queue", &self.shared.name), Field::new("error", e)],
                );
            }
        }

        let drained = {
            let mut rx = self.rx.lock().await;
            rx.close();
            let mut drained = Vec::new();
            while let Some(item) = rx.recv().await {
                drained.push(item);
            }
            drained
        };

        let count = drained.len();
        match &self.shared.store {
            Some(store) if count > 0 => {
                store.save(drained).await.map_err(QueueError::Flush)?;
                self.shared.logger.info(
                    "buffered items saved to overflow store",
                    &[Field::new("queue", &self.shared.name), Field::new("count", count)],
                );
            }
            None if count > 0 => {
                self.shared.logger.warn(
                    "queue closed without overflow store; buffered items discarded",
                    &[Field::new("queue", &self.shared.name), Field::new("count", count)],
                );
            }
            _ => {}
        }

        self.shared.logger.debug("queue closed", &[Field::new("queue", &self.shared.name)]);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Items currently held in memory (not counting the overflow store).
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured buffer capacity.
    pub fn capacity(&self) -> usize {
        self.shared.size
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn has_overflow(&self) -> bool {
        self.shared.store.is_some()
    }
}

impl<T> Drop for BufferedQueue<T> {
    fn drop(&mut self) {
        // Dropped without close(): stop the loader so it does not outlive us.
        if self.shared.running.swap(false, Ordering::SeqCst) {
            self.shared.shutdown.send_replace(true);
        }
    }
}

/// Replenishment loop: one attempt per tick until shutdown.
///
/// A failed attempt is logged and retried on the next tick.
async fn run_loader<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = shared.replenish(&mut shutdown).await {
            shared.logger.warn(
                "replenish failed",
                &[Field::new("queue", &shared.name), Field::new("error", &e)],
            );
        }
    }

    shared.logger.trace("replenish loop stopped", &[Field::new("queue", &shared.name)]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Memory-backed store that counts calls and can be told to fail.
    #[derive(Default)]
    struct FakeStore {
        inner: MemoryStore<u32>,
        saves: AtomicUsize,
        saved_items: AtomicUsize,
        pulls: AtomicUsize,
        fail_save: AtomicBool,
        fail_pull: AtomicBool,
    }

    #[async_trait]
    impl OverflowStore<u32> for FakeStore {
        async fn has_more(&self) -> bool {
            self.inner.has_more().await
        }

        async fn save(&self, items: Vec<u32>) -> std::result::Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.saved_items.fetch_add(items.len(), Ordering::SeqCst);
            self.inner.save(items).await
        }

        async fn pull(&self, limit: usize) -> std::result::Result<Vec<u32>, StoreError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            if self.fail_pull.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.pull(limit).await
        }
    }

    fn with_store(size: usize, interval: Duration, store: &Arc<FakeStore>) -> BufferedQueue<u32> {
        let store: Arc<dyn OverflowStore<u32>> = store.clone();
        BufferedQueue::new(QueueOptions::new().size(size).load_interval(interval).store(store))
            .unwrap()
    }

    #[test]
    fn zero_size_is_a_config_error() {
        let err = BufferedQueue::<u32>::new(QueueOptions::new().size(0)).err().unwrap();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[test]
    fn zero_interval_is_a_config_error() {
        let err = BufferedQueue::<u32>::new(QueueOptions::new().load_interval(Duration::ZERO))
            .err()
            .unwrap();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[test]
    fn store_without_runtime_is_a_config_error() {
        let store: Arc<dyn OverflowStore<u32>> = Arc::new(MemoryStore::new());
        let err = BufferedQueue::new(QueueOptions::new().store(store)).err().unwrap();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[test]
    fn options_from_config() {
        let config = QueueConfig {
            size: 7,
            load_interval_ms: 250,
            name: "events".to_string(),
            overflow: None,
        };
        let q: BufferedQueue<u32> = BufferedQueue::new(QueueOptions::from_config(&config)).unwrap();
        assert_eq!(q.capacity(), 7);
        assert_eq!(q.name(), "events");
        assert!(!q.has_overflow());
    }

    #[tokio::test]
    async fn fifo_without_store() {
        let q = BufferedQueue::new(QueueOptions::new().size(10)).unwrap();
        for i in 0..10u32 {
            q.put(i).await.unwrap();
        }
        assert_eq!(q.len(), 10);
        for i in 0..10u32 {
            assert_eq!(q.pull().await.unwrap(), i);
        }
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn try_pull_does_not_wait() {
        let q = BufferedQueue::new(QueueOptions::new().size(2)).unwrap();
        assert_eq!(q.try_pull().unwrap(), None);
        q.put(5u32).await.unwrap();
        assert_eq!(q.try_pull().unwrap(), Some(5));
    }

    #[tokio::test]
    async fn operations_after_close_fail_with_closed() {
        let q = BufferedQueue::new(QueueOptions::new().size(2)).unwrap();
        q.close().await.unwrap();

        assert!(!q.is_running());
        assert!(q.put(1u32).await.unwrap_err().is_closed());
        assert!(q.pull().await.unwrap_err().is_closed());
        assert!(q.try_pull().unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = Arc::new(FakeStore::default());
        let q = with_store(2, Duration::from_millis(10), &store);
        q.put(1).await.unwrap();
        q.close().await.unwrap();
        q.close().await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_wakes_blocked_pull() {
        let q = Arc::new(BufferedQueue::<u32>::new(QueueOptions::new().size(1)).unwrap());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pull().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        q.close().await.unwrap();
        let res = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pull should return after close")
            .unwrap();
        assert!(res.unwrap_err().is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_wakes_blocked_put() {
        let q = Arc::new(BufferedQueue::new(QueueOptions::new().size(1)).unwrap());
        q.put(1u32).await.unwrap();
        let blocked = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.put(2).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        q.close().await.unwrap();
        let res = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("put should return after close")
            .unwrap();
        assert!(res.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn full_buffer_routes_put_to_store() {
        let store = Arc::new(FakeStore::default());
        // Long interval: the loader's first tick finds nothing, later ticks are far away.
        let q = with_store(2, Duration::from_secs(3600), &store);

        q.put(1).await.unwrap();
        q.put(2).await.unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);

        q.put(3).await.unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_never_block_with_a_store() {
        let store = Arc::new(FakeStore::default());
        let q = Arc::new(with_store(2, Duration::from_secs(3600), &store));

        let producers: Vec<_> = (0..8u32)
            .map(|p| {
                let q = Arc::clone(&q);
                tokio::spawn(async move {
                    for i in 0..25u32 {
                        q.put(p * 100 + i).await.unwrap();
                    }
                })
            })
            .collect();

        // Nobody pulls: a put that waited for buffer space would hang here.
        for producer in producers {
            tokio::time::timeout(Duration::from_secs(2), producer)
                .await
                .expect("put should spill instead of waiting")
                .unwrap();
        }
        assert_eq!(q.len(), 2);
        assert_eq!(store.inner.len(), 8 * 25 - 2);
    }

    #[tokio::test]
    async fn backlog_routes_put_to_store_even_with_space() {
        let store = Arc::new(FakeStore::default());
        let q = with_store(4, Duration::from_secs(3600), &store);
        // Let the immediate first tick pass on an empty store.
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.inner.save(vec![100]).await.unwrap();
        q.put(1).await.unwrap();

        assert_eq!(q.len(), 0);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test]
    async fn replenish_moves_min_of_need_and_available() {
        let store = Arc::new(FakeStore::default());
        store.inner.save((0..10).collect()).await.unwrap();

        let q = with_store(4, Duration::from_secs(3600), &store);
        // The first tick fires immediately after construction.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(q.len(), 4);
        assert_eq!(store.inner.len(), 6);
        for i in 0..4 {
            assert_eq!(q.pull().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn replenish_with_fewer_available_than_needed() {
        let store = Arc::new(FakeStore::default());
        store.inner.save(vec![7, 8]).await.unwrap();

        let q = with_store(5, Duration::from_secs(3600), &store);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(q.len(), 2);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn replenish_failures_do_not_stop_the_loop() {
        let store = Arc::new(FakeStore::default());
        store.inner.save(vec![1, 2]).await.unwrap();
        store.fail_pull.store(true, Ordering::SeqCst);

        let q = with_store(4, Duration::from_millis(10), &store);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.pulls.load(Ordering::SeqCst) >= 2);
        assert_eq!(q.len(), 0);

        store.fail_pull.store(false, Ordering::SeqCst);
        let first = tokio::time::timeout(Duration::from_secs(1), q.pull())
            .await
            .expect("loop should recover")
            .unwrap();
        assert_eq!(first, 1);
        q.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_flushes_buffer_to_store() {
        let store = Arc::new(FakeStore::default());
        let q = with_store(3, Duration::from_secs(3600), &store);
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.put(1).await.unwrap();
        q.put(2).await.unwrap();
        q.close().await.unwrap();

        assert_eq!(store.saved_items.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.pull(10).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn close_surfaces_flush_failure() {
        let store = Arc::new(FakeStore::default());
        let q = with_store(3, Duration::from_secs(3600), &store);
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.put(1).await.unwrap();
        store.fail_save.store(true, Ordering::SeqCst);

        let err = q.close().await.unwrap_err();
        assert!(matches!(err, QueueError::Flush(_)));
        assert!(!q.is_running());
    }

    #[tokio::test]
    async fn close_with_empty_buffer_does_not_save() {
        let store = Arc::new(FakeStore::default());
        let q = with_store(3, Duration::from_millis(10), &store);
        q.close().await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }
}
