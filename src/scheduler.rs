//! # Refresh Scheduler
//!
//! Merges three trigger sources into one debounced refresh signal:
//!
//! - a fixed interval timer (the first tick fires immediately),
//! - new chain heads from a [`BlockStream`](crate::block_stream::BlockStream) subscription,
//! - a manual trigger fired when the request inputs change.
//!
//! The first trigger opens a debounce window. Every trigger that arrives before the window
//! closes is absorbed, then exactly one [`RefreshTick`] is emitted. The scheduler stops
//! once the tick receiver is dropped.

use crate::block_stream::BlockData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Interval,
    NewBlock(u64),
    Manual,
}

/// One coalesced refresh request. `reason` is the trigger that opened the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTick {
    pub epoch: u64,
    pub reason: RefreshReason,
}

/// Cloneable handle for the manual trigger.
#[derive(Clone, Default)]
pub struct RefreshTrigger(Arc<Notify>);

impl RefreshTrigger {
    /// A fire with no scheduler waiting is kept until the next wait.
    pub fn fire(&self) {
        self.0.notify_one();
    }
}

pub struct RefreshScheduler {
    interval: Duration,
    debounce: Duration,
    trigger: RefreshTrigger,
    blocks: Option<broadcast::Receiver<BlockData>>,
}

enum BlockEvent {
    Head(u64),
    Closed,
}

impl RefreshScheduler {
    pub fn new(interval: Duration, debounce: Duration) -> Self {
        Self {
            interval,
            debounce,
            trigger: RefreshTrigger::default(),
            blocks: None,
        }
    }

    pub fn with_blocks(mut self, blocks: broadcast::Receiver<BlockData>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Spawns the scheduler and hands back its tick stream.
    pub fn spawn(self, buffer: usize) -> (mpsc::Receiver<RefreshTick>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    pub async fn run(mut self, ticks: mpsc::Sender<RefreshTick>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let notify = self.trigger.0.clone();
        let mut epoch = 0u64;

        info!(
            interval_ms = self.interval.as_millis() as u64,
            debounce_ms = self.debounce.as_millis() as u64,
            has_blocks = self.blocks.is_some(),
            "refresh scheduler started"
        );

        'outer: loop {
            let reason = tokio::select! {
                _ = ticker.tick() => RefreshReason::Interval,
                event = next_block(&mut self.blocks) => match event {
                    BlockEvent::Head(number) => RefreshReason::NewBlock(number),
                    BlockEvent::Closed => {
                        self.blocks = None;
                        continue;
                    }
                },
                _ = notify.notified() => RefreshReason::Manual,
                _ = ticks.closed() => break,
            };

            let window = sleep(self.debounce);
            tokio::pin!(window);
            let mut absorbed = 0u32;
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    _ = ticker.tick() => absorbed += 1,
                    event = next_block(&mut self.blocks) => match event {
                        BlockEvent::Head(_) => absorbed += 1,
                        BlockEvent::Closed => self.blocks = None,
                    },
                    _ = notify.notified() => absorbed += 1,
                    _ = ticks.closed() => break 'outer,
                }
            }

            epoch += 1;
            debug!(epoch, ?reason, absorbed, "refresh tick");
            if ticks.send(RefreshTick { epoch, reason }).await.is_err() {
                break;
            }
        }
        info!(epochs = epoch, "refresh scheduler stopped");
    }
}

async fn next_block(blocks: &mut Option<broadcast::Receiver<BlockData>>) -> BlockEvent {
    let Some(rx) = blocks.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(data) => return BlockEvent::Head(data.block_number),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "block subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return BlockEvent::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_stream::BlockStream;
    use tokio::time::timeout;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let scheduler = RefreshScheduler::new(HOUR, DEFAULT_DEBOUNCE);
        let (mut ticks, _handle) = scheduler.spawn(4);
        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick, RefreshTick { epoch: 1, reason: RefreshReason::Interval });
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_burst_coalesces_into_one_tick() {
        let stream = BlockStream::new(16);
        let scheduler = RefreshScheduler::new(HOUR, DEFAULT_DEBOUNCE).with_blocks(stream.subscribe());
        let (mut ticks, _handle) = scheduler.spawn(4);
        ticks.recv().await.unwrap();

        for number in 10..15 {
            stream.publish_number(number);
        }
        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick, RefreshTick { epoch: 2, reason: RefreshReason::NewBlock(10) });
        assert!(timeout(Duration::from_secs(1), ticks.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_outside_window_tick_separately() {
        let stream = BlockStream::new(16);
        let scheduler = RefreshScheduler::new(HOUR, DEFAULT_DEBOUNCE).with_blocks(stream.subscribe());
        let trigger = scheduler.trigger();
        let (mut ticks, _handle) = scheduler.spawn(4);
        ticks.recv().await.unwrap();

        trigger.fire();
        assert_eq!(ticks.recv().await.unwrap().reason, RefreshReason::Manual);
        stream.publish_number(99);
        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick, RefreshTick { epoch: 3, reason: RefreshReason::NewBlock(99) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_keeps_ticking() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_INTERVAL, DEFAULT_DEBOUNCE);
        let (mut ticks, _handle) = scheduler.spawn(4);
        for expected in 1..=3 {
            let tick = ticks.recv().await.unwrap();
            assert_eq!(tick.epoch, expected);
            assert_eq!(tick.reason, RefreshReason::Interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_receiver_dropped() {
        let scheduler = RefreshScheduler::new(HOUR, DEFAULT_DEBOUNCE);
        let (ticks, handle) = scheduler.spawn(1);
        drop(ticks);
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
