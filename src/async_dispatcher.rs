//! Asynchronous event dispatcher.
//!
//! This module provides the `AsyncDispatcher` that ships closed entities to an
//! [`EventSink`] from a background task. Producers enqueue without blocking; the
//! background sender batches events, retries retryable failures with exponential
//! backoff, and counts terminal failures instead of raising them.
//!
//! [`AsyncDispatcher::flush`] is a barrier: it places a marker on the queue and waits
//! for the sender to reach it, so it returns once every event enqueued before the call
//! has been delivered or recorded as failed.

use crate::config::DispatcherConfig;
use crate::error::{Result, TracewireError};
use crate::event::LogEvent;
use crate::llm::tokenizer::{estimate_missing_usage, needs_usage_estimate};
use crate::sink::EventSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

enum Command {
    Event(Box<LogEvent>),
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Delivery counters, as observed at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub enqueued: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Enqueued but neither delivered nor failed yet
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicUsize,
    delivered: AtomicUsize,
    failed: AtomicUsize,
    pending: AtomicUsize,
}

/// Background sender for closed entities.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use tracewire::async_dispatcher::AsyncDispatcher;
/// use tracewire::config::DispatcherConfig;
/// use tracewire::sink::EventStore;
///
/// let store = Arc::new(EventStore::default());
/// let dispatcher = AsyncDispatcher::start(store.clone(), DispatcherConfig::default())?;
///
/// dispatcher.enqueue(event);
/// dispatcher.flush().await?;
/// dispatcher.stop().await?;
/// ```
pub struct AsyncDispatcher {
    sender: mpsc::UnboundedSender<Command>,
    counters: Arc<Counters>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    queue_warn_threshold: usize,
}

impl AsyncDispatcher {
    /// Spawn the background sender on the current tokio runtime.
    ///
    /// Fails with [`TracewireError::DispatcherError`] when called outside a runtime.
    pub fn start(sink: Arc<dyn EventSink>, config: DispatcherConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TracewireError::DispatcherError(format!("No tokio runtime available: {}", e))
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let queue_warn_threshold = config.queue_warn_threshold;

        debug!(batch_size = config.batch_size, "Starting async dispatcher");
        let worker = Worker {
            sink,
            config,
            counters: counters.clone(),
        };
        let handle = runtime.spawn(worker.run(receiver));
        info!("Async dispatcher started");

        Ok(Self {
            sender,
            counters,
            task_handle: Mutex::new(Some(handle)),
            queue_warn_threshold,
        })
    }

    /// Queue an event for delivery. Never blocks, and is callable from sync code.
    pub fn enqueue(&self, event: LogEvent) {
        let id = event.id.clone();
        // Counted before sending so the worker never decrements first.
        let pending = self.counters.pending.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if self.sender.send(Command::Event(Box::new(event))).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            warn!(id = %id, "Dispatcher stopped, dropping event");
            return;
        }

        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        if pending == self.queue_warn_threshold + 1 {
            warn!(pending, threshold = self.queue_warn_threshold, "Event queue is growing");
        }
    }

    /// Wait until every event enqueued before this call is delivered or failed.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(Command::Flush(ack))
            .map_err(|_| TracewireError::DispatcherError("Dispatcher is stopped".to_string()))?;
        done.await.map_err(|_| {
            TracewireError::DispatcherError("Dispatcher stopped before flush completed".to_string())
        })
    }

    /// Flush, giving up after `timeout`.
    ///
    /// # Returns
    ///
    /// `true` if the flush completed, `false` if the timeout was reached
    pub async fn flush_timeout(&self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.flush()).await {
            Ok(result) => result.map(|_| true),
            Err(_) => {
                warn!(?timeout, pending = self.stats().pending, "Flush timed out");
                Ok(false)
            }
        }
    }

    /// Deliver everything queued so far, then stop the background sender.
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Stop(ack)).is_ok() {
            debug!("Stopping async dispatcher");
            // The sender drains before acknowledging; a dropped ack means it already exited.
            let _ = done.await;
        }

        let handle = self.task_handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                TracewireError::DispatcherError(format!("Failed to stop dispatcher: {}", e))
            })?;
            info!("Async dispatcher stopped");
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            delivered: self.counters.delivered.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
        }
    }
}

struct Worker {
    sink: Arc<dyn EventSink>,
    config: DispatcherConfig,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        let batch_size = self.config.batch_size.max(1);
        let mut batch: Vec<LogEvent> = Vec::with_capacity(batch_size);
        let period = self.config.flush_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Event(event)) => {
                        batch.push(*event);
                        if batch.len() >= batch_size {
                            self.deliver(&mut batch).await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.deliver(&mut batch).await;
                        let _ = ack.send(());
                    }
                    Some(Command::Stop(ack)) => {
                        receiver.close();
                        self.drain(&mut receiver, &mut batch).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.deliver(&mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.deliver(&mut batch).await;
                    }
                }
            }
        }

        debug!("Dispatch loop exiting");
    }

    /// Deliver whatever was queued behind a stop request.
    async fn drain(&self, receiver: &mut mpsc::UnboundedReceiver<Command>, batch: &mut Vec<LogEvent>) {
        while let Ok(command) = receiver.try_recv() {
            match command {
                Command::Event(event) => batch.push(*event),
                Command::Flush(ack) | Command::Stop(ack) => {
                    self.deliver(batch).await;
                    let _ = ack.send(());
                }
            }
        }
        self.deliver(batch).await;
    }

    async fn deliver(&self, batch: &mut Vec<LogEvent>) {
        if batch.is_empty() {
            return;
        }
        let mut events = std::mem::take(batch);
        if events.iter().any(needs_usage_estimate) {
            let count = events.len();
            events = match tokio::task::spawn_blocking(move || {
                estimate_missing_usage(&mut events);
                events
            })
            .await
            {
                Ok(events) => events,
                Err(e) => {
                    self.counters.failed.fetch_add(count, Ordering::SeqCst);
                    self.counters.pending.fetch_sub(count, Ordering::SeqCst);
                    error!(count, error = %e, "Usage estimation failed, dropping batch");
                    return;
                }
            };
        }
        for chunk in events.chunks(self.config.batch_size.max(1)) {
            self.deliver_with_retry(chunk).await;
            self.counters.pending.fetch_sub(chunk.len(), Ordering::SeqCst);
        }
    }

    async fn deliver_with_retry(&self, events: &[LogEvent]) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=max_attempts {
            match self.sink.deliver(events).await {
                Ok(()) => {
                    self.counters.delivered.fetch_add(events.len(), Ordering::SeqCst);
                    debug!(count = events.len(), attempt, "Delivered batch");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, error = %e, ?backoff, "Batch delivery failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(events.len(), Ordering::SeqCst);
                    error!(count = events.len(), attempt, error = %e, "Batch delivery failed");
                    return;
                }
            }
        }
    }
}
