//! Pipeline worker.
//!
//! A [`Flow`] connects a source and any number of stages with bounded
//! channels, each running as its own task. Stopping the flow stops every
//! stage:
//!
//! - a graceful stop ends the source; items already inside the pipeline are
//!   carried through every stage before the flow finishes;
//! - an immediate stop ends every stage at once, dropping whatever is in
//!   flight.

use std::future::Future;
use std::sync::Arc;

use ares_core::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::{Control, Mode, Worker};

type Source<T> = Arc<dyn Fn() -> BoxFuture<'static, Option<T>> + Send + Sync>;
type Step<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Option<T>> + Send + Sync>;

/// A source feeding a chain of stages.
///
/// The source is polled until it returns `None`; a stage returning `None`
/// drops the item. Every item leaving the last stage counts as delivered.
///
/// # Example
///
/// ```rust,ignore
/// use ares::worker::Flow;
///
/// let ingest = Flow::new("ingest", 128, move || next_event(&queue))
///     .stage(|event| async move { decode(event) })
///     .stage(|event| async move { store(event).await.ok().map(|()| event) });
/// app.add_worker("ingest", Arc::new(ingest));
/// ```
pub struct Flow<T> {
    capacity: usize,
    source: Source<T>,
    stages: Vec<Step<T>>,
    control: Control,
}

impl<T: Send + 'static> Flow<T> {
    /// Creates a flow pulling items from `source`, with channels holding up
    /// to `capacity` items between stages.
    pub fn new<F, Fut>(name: impl Into<String>, capacity: usize, source: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        Self {
            capacity: capacity.max(1),
            source: Arc::new(move || Box::pin(source())),
            stages: Vec::new(),
            control: Control::new(name.into()),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<F, Fut>(mut self, step: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        self.stages.push(Arc::new(move |item| Box::pin(step(item))));
        self
    }

    /// Returns the flow name.
    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Returns the number of stages after the source.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the flow has no stage after the source.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the number of items that left the last stage.
    pub fn delivered(&self) -> u64 {
        self.control.runs()
    }
}

async fn produce<T>(source: Source<T>, tx: mpsc::Sender<T>, mut mode: watch::Receiver<Mode>) {
    loop {
        let item = tokio::select! {
            biased;
            _ = mode.wait_for(|m| *m != Mode::Running) => break,
            item = source() => item,
        };
        let Some(item) = item else {
            break;
        };
        tokio::select! {
            biased;
            _ = mode.wait_for(|m| *m == Mode::Immediate) => break,
            sent = tx.send(item) => if sent.is_err() {
                break;
            },
        }
    }
}

async fn transform<T>(
    step: Step<T>,
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<T>,
    mut mode: watch::Receiver<Mode>,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = mode.wait_for(|m| *m == Mode::Immediate) => break,
            item = rx.recv() => item,
        };
        let Some(item) = item else {
            break;
        };
        let out = tokio::select! {
            biased;
            _ = mode.wait_for(|m| *m == Mode::Immediate) => break,
            out = step(item) => out,
        };
        let Some(out) = out else {
            continue;
        };
        tokio::select! {
            biased;
            _ = mode.wait_for(|m| *m == Mode::Immediate) => break,
            sent = tx.send(out) => if sent.is_err() {
                break;
            },
        }
    }
}

impl<T: Send + 'static> Worker for Flow<T> {
    fn run(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Some(mode) = self.control.start() else {
                return;
            };
            tracing::info!(worker = %self.name(), stages = self.len(), "flow started");

            let mut tasks = JoinSet::new();
            let (tx, mut rx) = mpsc::channel(self.capacity);
            tasks.spawn(produce(Arc::clone(&self.source), tx, mode.clone()));
            for step in &self.stages {
                let (next_tx, next_rx) = mpsc::channel(self.capacity);
                tasks.spawn(transform(Arc::clone(step), rx, next_tx, mode.clone()));
                rx = next_rx;
            }

            let flow = Arc::clone(&self);
            tasks.spawn(async move {
                while rx.recv().await.is_some() {
                    flow.control.record_run();
                }
            });

            // A failed stage closes its channels, which winds down the rest
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    if err.is_panic() {
                        tracing::error!(worker = %self.name(), "flow stage panicked");
                    }
                }
            }
            self.control.finish();
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.control.stop() })
    }

    fn graceful_stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.control.graceful_stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn counter(
        limit: u64,
        produced: Arc<AtomicU64>,
        pace: Duration,
    ) -> impl Fn() -> BoxFuture<'static, Option<u64>> + Send + Sync + 'static {
        move || {
            let produced = Arc::clone(&produced);
            Box::pin(async move {
                tokio::time::sleep(pace).await;
                let n = produced.fetch_add(1, Ordering::SeqCst) + 1;
                (n <= limit).then_some(n)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_pass_every_stage_in_order() {
        let produced = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let flow = Arc::new(
            Flow::new("numbers", 2, counter(5, Arc::clone(&produced), Duration::from_millis(1)))
                .stage(|n| async move { Some(n * 10) })
                .stage(|n| async move { (n != 30).then_some(n) })
                .stage(move |n| {
                    sink.lock().push(n);
                    async move { Some(n) }
                }),
        );
        assert_eq!(flow.len(), 3);

        // An exhausted source ends the flow on its own
        tokio::time::timeout(Duration::from_secs(5), Arc::clone(&flow).run())
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![10, 20, 40, 50]);
        assert_eq!(flow.delivered(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop_delivers_everything_produced() {
        let produced = Arc::new(AtomicU64::new(0));
        let flow = Arc::new(
            Flow::new("drain", 8, counter(u64::MAX, Arc::clone(&produced), Duration::from_millis(10))).stage(
                |n| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Some(n)
                },
            ),
        );

        let task = tokio::spawn(Arc::clone(&flow).run());
        tokio::time::sleep(Duration::from_millis(500)).await;
        flow.graceful_stop().await;
        task.await.unwrap();

        let produced = produced.load(Ordering::SeqCst);
        assert!(produced > 5);
        assert_eq!(flow.delivered(), produced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_in_flight_items() {
        let produced = Arc::new(AtomicU64::new(0));
        let flow = Arc::new(
            Flow::new("abandon", 8, counter(u64::MAX, Arc::clone(&produced), Duration::from_millis(1))).stage(
                |n| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Some(n)
                },
            ),
        );

        let task = tokio::spawn(Arc::clone(&flow).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        flow.stop().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flow.delivered(), 0);
        assert!(produced.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_stage_winds_down_the_flow() {
        let produced = Arc::new(AtomicU64::new(0));
        let flow = Arc::new(
            Flow::new("fragile", 1, counter(u64::MAX, Arc::clone(&produced), Duration::from_millis(1))).stage(
                |n| async move {
                    assert!(n < 3, "bad item");
                    Some(n)
                },
            ),
        );

        tokio::time::timeout(Duration::from_secs(5), Arc::clone(&flow).run())
            .await
            .unwrap();
        assert_eq!(flow.delivered(), 2);

        // Stopping a finished flow returns at once
        flow.graceful_stop().await;
    }
}
