//! Frame consumption loop.
//!
//! `Disconnected -> Connected -> Consuming`, with `Stopped` reached only when
//! the shutdown signal is triggered. Connection attempts retry forever with a
//! fixed backoff. Exactly one frame is in flight at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

use crate::detect::DetectorBackend;
use crate::pipeline::{FrameError, FramePipeline};
use crate::record::ViolationStore;

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// When a delivery is acknowledged to the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Ack at receipt, before processing. Failures are silent drops.
    #[default]
    OnReceipt,
    /// Ack once the frame is done with. Undecodable frames are acked and
    /// dropped; a detection failure reconnects so the broker redelivers.
    AfterProcessing,
}

impl FromStr for AckPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "on_receipt" | "receipt" | "at_most_once" => Ok(Self::OnReceipt),
            "after_processing" | "processed" | "at_least_once" => Ok(Self::AfterProcessing),
            other => Err(anyhow!(
                "unknown ack policy '{}': expected 'on_receipt' or 'after_processing'",
                other
            )),
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnReceipt => write!(f, "on_receipt"),
            Self::AfterProcessing => write!(f, "after_processing"),
        }
    }
}

/// A received message the pipeline can read.
pub trait FrameDelivery {
    fn payload(&self) -> &[u8];
}

impl FrameDelivery for Vec<u8> {
    fn payload(&self) -> &[u8] {
        self
    }
}

/// Source of frame messages.
pub trait FrameQueue {
    type Delivery: FrameDelivery;

    /// Establish the connection and attach to the named queue.
    fn connect(&mut self) -> Result<()>;

    /// Block for the next delivery. `Ok(None)` is an idle wake-up that lets
    /// the loop observe shutdown; `Err` means the connection is lost.
    fn recv(&mut self) -> Result<Option<Self::Delivery>>;

    fn ack(&mut self, delivery: &Self::Delivery) -> Result<()>;

    fn disconnect(&mut self);
}

/// Cancellation signal shared between the loop and its owner.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout`; returns true if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Delay between connection attempts.
pub trait Backoff: Send {
    fn next_delay(&mut self, attempt: u64) -> Duration;
}

/// Same delay for every attempt, retried forever.
#[derive(Clone, Copy, Debug)]
pub struct FixedBackoff(pub Duration);

impl Default for FixedBackoff {
    fn default() -> Self {
        Self(DEFAULT_RECONNECT_BACKOFF)
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&mut self, _attempt: u64) -> Duration {
        self.0
    }
}

/// Time source and sleeping, injectable for tests.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;

    /// Sleep for `duration` unless shutdown fires first; true if cancelled.
    fn sleep(&mut self, duration: Duration, shutdown: &ShutdownSignal) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&mut self, duration: Duration, shutdown: &ShutdownSignal) -> bool {
        shutdown.wait_timeout(duration)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connected,
    Consuming,
    Stopped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections_lost: u64,
    pub frames_received: u64,
    pub frames_processed: u64,
    pub decode_failures: u64,
    pub detect_failures: u64,
    pub violations_recorded: u64,
    pub persistence_failures: u64,
    pub publish_failures: u64,
    pub ack_failures: u64,
}

pub struct FrameConsumer<Q, D, S> {
    queue: Q,
    pipeline: FramePipeline<D, S>,
    ack_policy: AckPolicy,
    backoff: Box<dyn Backoff>,
    clock: Box<dyn Clock>,
    shutdown: ShutdownSignal,
    state: ConsumerState,
    stats: ConsumerStats,
    last_health_log: Instant,
}

impl<Q, D, S> FrameConsumer<Q, D, S>
where
    Q: FrameQueue,
    D: DetectorBackend,
    S: ViolationStore,
{
    pub fn new(queue: Q, pipeline: FramePipeline<D, S>, shutdown: ShutdownSignal) -> Self {
        Self {
            queue,
            pipeline,
            ack_policy: AckPolicy::default(),
            backoff: Box::new(FixedBackoff::default()),
            clock: Box::new(SystemClock),
            shutdown,
            state: ConsumerState::Disconnected,
            stats: ConsumerStats::default(),
            last_health_log: Instant::now(),
        }
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn with_backoff<B: Backoff + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn pipeline(&self) -> &FramePipeline<D, S> {
        &self.pipeline
    }

    /// Run until the shutdown signal fires.
    pub fn run(&mut self) -> &ConsumerStats {
        log::info!("frame consumer starting (ack policy: {})", self.ack_policy);
        while self.step() != ConsumerState::Stopped {}
        log::info!("frame consumer stopped: {:?}", self.stats);
        &self.stats
    }

    /// Perform one state transition (or one receive while consuming).
    pub fn step(&mut self) -> ConsumerState {
        if self.shutdown.is_triggered() && self.state != ConsumerState::Stopped {
            if self.state != ConsumerState::Disconnected {
                self.queue.disconnect();
            }
            self.state = ConsumerState::Stopped;
            return self.state;
        }

        self.state = match self.state {
            ConsumerState::Disconnected => self.try_connect(),
            ConsumerState::Connected => {
                log::info!("waiting for frames");
                ConsumerState::Consuming
            }
            ConsumerState::Consuming => self.receive_one(),
            ConsumerState::Stopped => ConsumerState::Stopped,
        };
        self.maybe_log_health();
        self.state
    }

    fn try_connect(&mut self) -> ConsumerState {
        self.stats.connect_attempts += 1;
        match self.queue.connect() {
            Ok(()) => {
                log::info!(
                    "connected to frame queue (attempt {})",
                    self.stats.connect_attempts
                );
                ConsumerState::Connected
            }
            Err(e) => {
                self.stats.connect_failures += 1;
                let delay = self.backoff.next_delay(self.stats.connect_failures);
                log::warn!(
                    "frame queue unavailable ({:#}); retrying in {:?}",
                    e,
                    delay
                );
                if self.clock.sleep(delay, &self.shutdown) {
                    return ConsumerState::Stopped;
                }
                ConsumerState::Disconnected
            }
        }
    }

    fn receive_one(&mut self) -> ConsumerState {
        let delivery = match self.queue.recv() {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return ConsumerState::Consuming,
            Err(e) => {
                self.stats.connections_lost += 1;
                log::error!("frame queue connection lost: {:#}. Reconnecting...", e);
                self.queue.disconnect();
                return ConsumerState::Disconnected;
            }
        };
        let received_at = self.clock.now();
        self.stats.frames_received += 1;

        if self.ack_policy == AckPolicy::OnReceipt {
            self.ack(&delivery);
        }

        match self
            .pipeline
            .process_message(delivery.payload(), received_at)
        {
            Ok(outcome) => {
                self.stats.frames_processed += 1;
                self.stats.violations_recorded += outcome.recorded.len() as u64;
                self.stats.persistence_failures += outcome.persistence_failures as u64;
                self.stats.publish_failures += outcome.publish_failures as u64;
                log::debug!(
                    "frame processed: detections={} violations={}",
                    outcome.detections,
                    outcome.violation_count
                );
                if self.ack_policy == AckPolicy::AfterProcessing {
                    self.ack(&delivery);
                }
            }
            Err(e @ FrameError::Decode(_)) => {
                self.stats.decode_failures += 1;
                log::warn!("frame dropped: {}", e);
                // Redelivery would fail the same way.
                if self.ack_policy == AckPolicy::AfterProcessing {
                    self.ack(&delivery);
                }
            }
            Err(e @ FrameError::Detect(_)) => {
                self.stats.detect_failures += 1;
                if self.ack_policy == AckPolicy::AfterProcessing {
                    // Unacked frames only come back on a fresh session.
                    log::warn!("frame left unacked: {}. Reconnecting for redelivery...", e);
                    self.queue.disconnect();
                    return ConsumerState::Disconnected;
                }
                log::warn!("frame dropped: {}", e);
            }
        }
        ConsumerState::Consuming
    }

    fn ack(&mut self, delivery: &Q::Delivery) {
        if let Err(e) = self.queue.ack(delivery) {
            self.stats.ack_failures += 1;
            log::warn!("failed to acknowledge frame: {:#}", e);
        }
    }

    fn maybe_log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let s = &self.stats;
        log::info!(
            "consumer health: state={:?} received={} processed={} dropped={} violations={} \
             persist_failures={} publish_failures={}",
            self.state,
            s.frames_received,
            s.frames_processed,
            s.decode_failures + s.detect_failures,
            s.violations_recorded,
            s.persistence_failures,
            s.publish_failures
        );
        self.last_health_log = Instant::now();
    }
}
