//! The main loop.
//!
//! [`Gateway`] owns the scheduler, the register reader and the broker session. Each tick it
//! services the broker connection, runs the scheduler and then sleeps for what is left of the
//! loop interval. A tick that takes longer than the interval is followed immediately by the
//! next one; nothing is queued or caught up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::{
    broker::BrokerSession,
    scheduler::{Scheduler, TagReader},
};

/// What to do with published topics on the way out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitOptions {
    /// Publish each tag's noread value.
    pub publish_noread: bool,
    /// Clear each tag's retained message.
    pub clear_retained: bool,
}

/// Shortest and longest processing time of ticks that read something.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    min: Option<Duration>,
    max: Option<Duration>,
}

impl ProcessingStats {
    pub fn record(&mut self, processing: Duration) {
        self.min = Some(self.min.map_or(processing, |min| min.min(processing)));
        self.max = Some(self.max.map_or(processing, |max| max.max(processing)));
    }

    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }
}

pub struct Gateway<R, B> {
    scheduler: Scheduler,
    reader: R,
    broker: B,
    loop_interval: Duration,
    on_exit: ExitOptions,
    stats: ProcessingStats,
}

impl<R: TagReader, B: BrokerSession> Gateway<R, B> {
    pub fn new(
        scheduler: Scheduler,
        reader: R,
        broker: B,
        loop_interval: Duration,
        on_exit: ExitOptions,
    ) -> Self {
        Self {
            scheduler,
            reader,
            broker,
            loop_interval,
            on_exit,
            stats: ProcessingStats::default(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    /// Run until `exit` is set, then shut down. The tick in progress always completes.
    pub fn run(&mut self, exit: &AtomicBool) {
        info!(interval_ms = self.loop_interval.as_millis() as u64, "main loop started");
        self.broker.connect(Instant::now());

        while !exit.load(Ordering::Relaxed) {
            let start = Instant::now();
            let fired = self.process(start);
            let processing = start.elapsed();
            if fired {
                debug!(processing_us = processing.as_micros() as u64, "tick processed");
                self.stats.record(processing);
            }
            if let Some(idle) = self.idle_time(processing) {
                std::thread::sleep(idle);
            }
        }

        info!("exit requested");
        self.shutdown();
    }

    /// One tick. Returns `true` if any update cycle fired.
    pub fn process(&mut self, now: Instant) -> bool {
        self.broker.maintain(now);
        self.scheduler.tick(now, &mut self.reader, &mut self.broker)
    }

    /// How long to sleep after a tick that took `processing`. `None` when the tick overran.
    pub fn idle_time(&self, processing: Duration) -> Option<Duration> {
        self.loop_interval
            .checked_sub(processing)
            .filter(|idle| !idle.is_zero())
    }

    /// Exit publishes, then release the broker and the serial device.
    pub fn shutdown(&mut self) {
        let ExitOptions {
            publish_noread,
            clear_retained,
        } = self.on_exit;
        self.scheduler
            .publish_exit(&mut self.broker, publish_noread, clear_retained);
        self.broker.disconnect();
        self.reader.release();

        match (self.stats.min(), self.stats.max()) {
            (Some(min), Some(max)) => info!(
                min_us = min.as_micros() as u64,
                max_us = max.as_micros() as u64,
                "processing time"
            ),
            _ => info!("no update cycle was processed"),
        }
    }
}
