//! Async driver for the detection state machine.
//!
//! One task owns the [`Orchestrator`] and every timer: the scheduler tick,
//! the one-second hold countdown, the resume grace delay and the extraction
//! call in flight. Timers are plain fields; dropping one cancels it, so
//! stopping the loop or shutting it down leaves nothing armed.

use std::future::{pending, Future};
use std::pin::Pin;

use checkpoint_core::orchestrator::Settled;
use checkpoint_core::{
    AttemptOutcome, EntrySummary, HoldProgress, LoopConfig, Orchestrator, RegistryBuilder,
    RegistrySpec, Snapshot, TickDecision,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, error::Elapsed, Instant, Interval, MissedTickBehavior, Sleep};

use crate::engine::{EngineError, EngineHandle, ProbeResult};

type AttemptResult = Result<Result<ProbeResult, EngineError>, Elapsed>;
type Attempt = Pin<Box<dyn Future<Output = AttemptResult> + Send>>;

enum LoopCommand {
    Start(oneshot::Sender<bool>),
    Stop(oneshot::Sender<bool>),
}

/// Clone-safe control surface for a running detection loop.
#[derive(Clone)]
pub struct LoopControl {
    commands: mpsc::Sender<LoopCommand>,
    snapshot: watch::Receiver<Snapshot>,
    registry: watch::Receiver<Vec<EntrySummary>>,
}

impl LoopControl {
    /// Enable detection. `false` if the loop is not ready or has exited.
    pub async fn start(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(LoopCommand::Start(reply)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Suspend detection. `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(LoopCommand::Stop(reply)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn registry(&self) -> Vec<EntrySummary> {
        self.registry.borrow().clone()
    }
}

/// Owner of the detection task.
pub struct DetectionLoop {
    control: LoopControl,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DetectionLoop {
    /// Spawn the loop: load models, enroll `specs`, then start probing.
    pub fn spawn(config: LoopConfig, engine: EngineHandle, specs: Vec<RegistrySpec>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (registry_tx, registry_rx) = watch::channel(Vec::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver {
            orch: Orchestrator::new(config),
            engine,
            specs,
            commands: command_rx,
            snapshot: snapshot_tx,
            registry: registry_tx,
            tick: None,
            countdown: None,
            grace: None,
            attempt: None,
        };
        let task = tokio::spawn(driver.run(shutdown_rx));

        Self {
            control: LoopControl {
                commands: command_tx,
                snapshot: snapshot_rx,
                registry: registry_rx,
            },
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Stop the loop, cancel all of its timers and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "detection task ended abnormally");
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Driver {
    orch: Orchestrator,
    engine: EngineHandle,
    specs: Vec<RegistrySpec>,
    commands: mpsc::Receiver<LoopCommand>,
    snapshot: watch::Sender<Snapshot>,
    registry: watch::Sender<Vec<EntrySummary>>,
    tick: Option<Interval>,
    countdown: Option<Interval>,
    grace: Option<Pin<Box<Sleep>>>,
    attempt: Option<Attempt>,
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn elapsed(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn settled(attempt: &mut Option<Attempt>) -> AttemptResult {
    match attempt {
        Some(attempt) => attempt.as_mut().await,
        None => pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        tokio::select! {
            _ = &mut shutdown => {
                self.dispose();
                return;
            }
            _ = self.bootstrap() => {}
        }
        if self.orch.is_ready() {
            self.arm();
        }
        self.publish();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = next_tick(&mut self.tick) => self.on_tick(),
                result = settled(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_settled(result);
                }
                _ = next_tick(&mut self.countdown) => self.on_countdown(),
                _ = elapsed(&mut self.grace) => {
                    self.grace = None;
                    self.on_resume();
                }
            }
            self.publish();
        }

        self.dispose();
    }

    async fn bootstrap(&mut self) {
        self.orch.loading_models();
        self.publish();
        if let Err(e) = self.engine.load_models().await {
            tracing::error!(error = %e, "model loading failed; detection stays idle");
            self.orch.load_failed(e.to_string());
            return;
        }

        self.orch.loading_registry();
        self.publish();
        let limit = self.orch.config().extraction_timeout;
        let mut builder = RegistryBuilder::default();
        for spec in std::mem::take(&mut self.specs) {
            let result = match time::timeout(limit, self.engine.enroll(spec.reference_image.clone())).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err("enrollment timed out".to_string()),
            };
            builder.record(spec, result);
        }

        self.orch.ready(builder.finish());
        self.registry.send_replace(self.orch.registry_summary());
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.orch.snapshot());
    }

    /// Arm the timers the current phase needs.
    fn arm(&mut self) {
        let period = self.orch.config().tick_period;
        let mut tick = time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.tick = Some(tick);

        if self.orch.hold_active() {
            self.arm_countdown();
        }
        if let Some(at) = self.orch.resume_due() {
            self.grace = Some(Box::pin(time::sleep_until(Instant::from_std(at))));
        }
    }

    fn arm_countdown(&mut self) {
        let period = self.orch.config().countdown_period;
        let mut countdown = time::interval_at(Instant::now() + period, period);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.countdown = Some(countdown);
    }

    /// Cancel every timer and drop any extraction in flight.
    fn disarm(&mut self) {
        self.tick = None;
        self.countdown = None;
        self.grace = None;
        if self.attempt.take().is_some() {
            self.orch.abandon_attempt();
        }
    }

    fn on_command(&mut self, command: LoopCommand) {
        match command {
            LoopCommand::Start(reply) => {
                let started = self.orch.start();
                if started && self.tick.is_none() {
                    self.arm();
                }
                let _ = reply.send(started);
            }
            LoopCommand::Stop(reply) => {
                let stopped = self.orch.stop();
                self.disarm();
                let _ = reply.send(stopped);
            }
        }
    }

    fn on_tick(&mut self) {
        // An abandoned extraction may still hold the engine thread.
        if self.engine.is_busy() {
            tracing::trace!("engine busy; tick skipped");
            return;
        }
        let now = Instant::now();
        match self.orch.on_tick(now.into_std()) {
            TickDecision::Attempt => {
                let engine = self.engine.clone();
                let limit = self.orch.config().extraction_timeout;
                self.attempt = Some(Box::pin(async move { time::timeout(limit, engine.probe()).await }));
                tracing::trace!("extraction attempt started");
            }
            TickDecision::Skip(reason) => {
                tracing::trace!(?reason, "tick skipped");
            }
        }
    }

    fn on_settled(&mut self, result: AttemptResult) {
        let now = Instant::now().into_std();
        let outcome = match result {
            Err(_) => {
                let limit_ms = self.orch.config().extraction_timeout.as_millis() as u64;
                tracing::warn!(limit_ms, "extraction timed out");
                AttemptOutcome::Failed("extraction timed out".into())
            }
            Ok(Err(EngineError::Device(message))) => {
                self.orch.on_device_error(message);
                self.disarm();
                return;
            }
            Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
            Ok(Ok(ProbeResult {
                descriptor: Some(descriptor),
                frame_sequence,
            })) => AttemptOutcome::Face {
                descriptor,
                frame_sequence: Some(frame_sequence),
            },
            Ok(Ok(ProbeResult { descriptor: None, .. })) => AttemptOutcome::NoFace,
        };

        if self.orch.on_attempt_settled(now, outcome) == Settled::Confirmed {
            self.arm_countdown();
        }
    }

    fn on_countdown(&mut self) {
        let now = Instant::now().into_std();
        match self.orch.on_countdown(now) {
            HoldProgress::Counting { remaining_secs } => {
                tracing::debug!(remaining_secs, "hold countdown");
            }
            HoldProgress::Expired { resume_at } => {
                self.countdown = None;
                self.grace = Some(Box::pin(time::sleep_until(Instant::from_std(resume_at))));
            }
            HoldProgress::Inactive => {
                self.countdown = None;
            }
        }
    }

    fn on_resume(&mut self) {
        if !self.orch.resume(Instant::now().into_std()) {
            tracing::debug!("resume fired outside a hold");
        }
    }

    fn dispose(&mut self) {
        self.disarm();
        self.orch.dispose();
        self.publish();
        tracing::info!("detection loop disposed");
    }
}
