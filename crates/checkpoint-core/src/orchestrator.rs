//! Detection loop state machine.
//!
//! The orchestrator is the single owner of the detection history, hold
//! window and debounce state. It never reads a clock or arms a timer: the
//! driver passes `now` into every transition and owns the timers, so the
//! whole cycle can be exercised on synthetic instants.
//!
//! ```text
//!   Idle ──ready()/start()──▶ Probing ──confirmed──▶ ConfirmedHold
//!    ▲                          │   ▲                     │
//!    └──────stop()/device───────┘   └──countdown expired──┘
//!                                        + grace delay
//! ```

use std::time::Instant;

use chrono::Utc;

use crate::config::LoopConfig;
use crate::debounce::{Debouncer, Refusal};
use crate::hold::HoldWindow;
use crate::registry::{EntrySummary, Registry};
use crate::status::{CycleState, MatchedIdentity, Snapshot, Status};
use crate::types::{confidence_percent, Descriptor, EuclideanMatcher, Matcher};
use crate::voter::ConsistencyVoter;

/// What the driver should do on a scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Invoke the extraction capability now; report back via
    /// [`Orchestrator::on_attempt_settled`] or [`Orchestrator::abandon_attempt`].
    Attempt,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Idle,
    Hold,
    InFlight,
    Debounce,
}

/// How an extraction attempt ended.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Face {
        descriptor: Descriptor,
        frame_sequence: Option<u32>,
    },
    NoFace,
    Failed(String),
}

/// Effect of a settled attempt on the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Voter confirmed; the hold window is open.
    Confirmed,
    /// Above-threshold match the voter did not confirm yet.
    Unconfirmed,
    /// Nearest entry was at or beyond the threshold, or nothing is enrolled.
    Rejected,
    NoFace,
    Failed,
    /// Arrived while stopped or holding; discarded.
    Ignored,
}

/// Result of a countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldProgress {
    Inactive,
    Counting { remaining_secs: u64 },
    /// Window torn down; probing resumes at `resume_at`.
    Expired { resume_at: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Probing,
    Hold {
        window: Option<HoldWindow>,
        resume_at: Option<Instant>,
    },
}

pub struct Orchestrator<M: Matcher = EuclideanMatcher> {
    config: LoopConfig,
    matcher: M,
    /// `None` until models are loaded and enrollment was attempted.
    registry: Option<Registry>,
    enabled: bool,
    phase: Phase,
    debouncer: Debouncer,
    voter: ConsistencyVoter,
    status: Status,
    confidence: u8,
    matched: Option<MatchedIdentity>,
}

impl Orchestrator<EuclideanMatcher> {
    pub fn new(config: LoopConfig) -> Self {
        Self::with_matcher(config, EuclideanMatcher)
    }
}

impl<M: Matcher> Orchestrator<M> {
    pub fn with_matcher(config: LoopConfig, matcher: M) -> Self {
        Self {
            debouncer: Debouncer::new(config.debounce_interval),
            voter: ConsistencyVoter::new(config.history_capacity, config.voting_window),
            config,
            matcher,
            registry: None,
            enabled: false,
            phase: Phase::Probing,
            status: Status::LoadingModels,
            confidence: 0,
            matched: None,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn loading_models(&mut self) {
        self.status = Status::LoadingModels;
    }

    pub fn loading_registry(&mut self) {
        self.status = Status::LoadingRegistry;
    }

    /// Model loading failed; the cycle stays idle.
    pub fn load_failed(&mut self, message: String) {
        self.status = Status::LoadFailed { message };
    }

    /// Models loaded and enrollment attempted: `Idle → Probing`.
    pub fn ready(&mut self, registry: Registry) {
        let loaded = registry.matchable_count();
        self.registry = Some(registry);
        self.enabled = true;
        self.phase = Phase::Probing;
        self.status = Status::Ready { loaded };
        tracing::info!(loaded, "detection ready");
    }

    pub fn is_ready(&self) -> bool {
        self.registry.is_some()
    }

    /// Re-enable sampling in whatever phase was left. Refused before `ready`.
    pub fn start(&mut self) -> bool {
        if self.registry.is_none() {
            return false;
        }
        if !self.enabled {
            self.enabled = true;
            self.status = match &self.matched {
                Some(m) if matches!(self.phase, Phase::Hold { .. }) => Status::Matched {
                    name: m.display_name.clone(),
                    confidence: m.confidence,
                },
                _ => Status::LookingForFaces,
            };
            tracing::info!(state = ?self.state(), "detection started");
        }
        true
    }

    /// Suspend sampling. History and hold window are left untouched; any
    /// attempt in flight is abandoned.
    pub fn stop(&mut self) -> bool {
        let was_enabled = self.enabled;
        self.enabled = false;
        self.debouncer.settle();
        if was_enabled {
            self.status = Status::Stopped;
            tracing::info!("detection stopped");
        }
        was_enabled
    }

    /// Camera or permission failure. Not retried; a later `start` is the retry.
    pub fn on_device_error(&mut self, message: String) {
        tracing::error!(error = %message, "video source failed; detection stopped");
        self.enabled = false;
        self.debouncer.settle();
        self.status = Status::DeviceError { message };
    }

    /// Tear down for good: cycle goes idle and cannot be restarted.
    pub fn dispose(&mut self) {
        self.enabled = false;
        self.registry = None;
        self.phase = Phase::Probing;
        self.debouncer.settle();
        self.voter.reset();
        self.matched = None;
        self.confidence = 0;
        self.status = Status::Stopped;
    }

    pub fn state(&self) -> CycleState {
        if !self.enabled || self.registry.is_none() {
            return CycleState::Idle;
        }
        match self.phase {
            Phase::Probing => CycleState::Probing,
            Phase::Hold { .. } => CycleState::ConfirmedHold,
        }
    }

    /// Scheduler tick. The hold check comes before debounce, so a frozen
    /// confirmation is never disturbed by background sampling.
    pub fn on_tick(&mut self, now: Instant) -> TickDecision {
        if self.state() == CycleState::Idle {
            return TickDecision::Skip(SkipReason::Idle);
        }
        if matches!(self.phase, Phase::Hold { .. }) {
            return TickDecision::Skip(SkipReason::Hold);
        }
        match self.debouncer.try_begin(now) {
            Ok(()) => TickDecision::Attempt,
            Err(Refusal::InFlight) => TickDecision::Skip(SkipReason::InFlight),
            Err(Refusal::TooSoon) => TickDecision::Skip(SkipReason::Debounce),
        }
    }

    /// Drop the in-flight attempt without interpreting a result.
    pub fn abandon_attempt(&mut self) {
        self.debouncer.settle();
    }

    /// Apply the outcome of an extraction attempt that began on an earlier tick.
    pub fn on_attempt_settled(&mut self, now: Instant, outcome: AttemptOutcome) -> Settled {
        self.debouncer.settle();

        if self.state() != CycleState::Probing {
            return Settled::Ignored;
        }

        match outcome {
            AttemptOutcome::Failed(message) => {
                tracing::warn!(error = %message, "detection attempt failed");
                self.status = Status::DetectionError;
                Settled::Failed
            }
            AttemptOutcome::NoFace => {
                self.clear_match();
                self.status = Status::LookingForFaces;
                Settled::NoFace
            }
            AttemptOutcome::Face {
                descriptor,
                frame_sequence,
            } => self.on_face(now, &descriptor, frame_sequence),
        }
    }

    fn on_face(&mut self, now: Instant, descriptor: &Descriptor, frame_sequence: Option<u32>) -> Settled {
        let Some(registry) = self.registry.as_ref() else {
            return Settled::Ignored;
        };
        let result = self.matcher.best_match(descriptor, registry.entries());
        let distance = result.distance;
        let accepted = result
            .accepted(self.config.match_threshold)
            .map(|entry| (entry.id, entry.display_name.clone()));

        let Some((id, display_name)) = accepted else {
            tracing::debug!(distance, "face not matched");
            self.clear_match();
            self.status = Status::NotMatched;
            return Settled::Rejected;
        };

        if !self.voter.record(id) {
            tracing::debug!(id, distance, "match not yet consistent");
            self.confidence = 0;
            self.status = Status::LookingForFaces;
            return Settled::Unconfirmed;
        }

        let confidence = confidence_percent(distance);
        tracing::info!(id, name = %display_name, distance, confidence, "access granted");

        let window = HoldWindow::start(now, self.config.hold_duration);
        self.phase = Phase::Hold {
            window: Some(window),
            resume_at: None,
        };
        self.confidence = confidence;
        self.status = Status::Matched {
            name: display_name.clone(),
            confidence,
        };
        self.matched = Some(MatchedIdentity {
            id,
            display_name,
            distance,
            confidence,
            confirmed_at: Utc::now(),
            frame_sequence,
        });
        Settled::Confirmed
    }

    fn clear_match(&mut self) {
        self.voter.reset();
        self.confidence = 0;
        self.matched = None;
    }

    /// One-second countdown tick while holding.
    pub fn on_countdown(&mut self, now: Instant) -> HoldProgress {
        let Phase::Hold {
            window: Some(mut window),
            ..
        } = self.phase
        else {
            return HoldProgress::Inactive;
        };

        let tick = window.tick(now);
        if !tick.expired {
            self.phase = Phase::Hold {
                window: Some(window),
                resume_at: None,
            };
            return HoldProgress::Counting {
                remaining_secs: tick.remaining_secs,
            };
        }

        let resume_at = now + self.config.resume_grace;
        self.phase = Phase::Hold {
            window: None,
            resume_at: Some(resume_at),
        };
        tracing::debug!("hold window expired; resuming after grace delay");
        HoldProgress::Expired { resume_at }
    }

    /// `ConfirmedHold → Probing` once the grace delay has passed.
    pub fn resume(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Hold {
                resume_at: Some(at),
                ..
            } if now >= at => {
                self.phase = Phase::Probing;
                self.clear_match();
                self.status = Status::LookingForFaces;
                tracing::info!("hold ended; probing resumed");
                true
            }
            _ => false,
        }
    }

    /// True while the hold window is still counting down.
    pub fn hold_active(&self) -> bool {
        matches!(self.phase, Phase::Hold { window: Some(_), .. })
    }

    /// When probing resumes, if the window has expired and the grace delay is pending.
    pub fn resume_due(&self) -> Option<Instant> {
        match self.phase {
            Phase::Hold { resume_at, .. } => resume_at,
            Phase::Probing => None,
        }
    }

    pub fn countdown(&self) -> Option<u64> {
        match self.phase {
            Phase::Hold {
                window: Some(window),
                ..
            } => Some(window.remaining_secs()),
            _ => None,
        }
    }

    pub fn registry_summary(&self) -> Vec<EntrySummary> {
        self.registry.as_ref().map(Registry::summary).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state(),
            status: self.status.clone(),
            countdown: self.countdown(),
            confidence: self.confidence,
            matched: self.matched.clone(),
            registry_loaded: self.registry.as_ref().map_or(0, Registry::matchable_count),
        }
    }
}
