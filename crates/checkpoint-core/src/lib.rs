//! checkpoint-core: temporal control loop for a camera access checkpoint.
//!
//! Matches face descriptors against an enrolled registry, smooths per-frame
//! matches into confirmed decisions, and drives the Idle / Probing /
//! Confirmed-Hold state machine. Descriptor extraction and frame capture are
//! external capabilities reached through the [`DescriptorExtractor`] trait and
//! the [`Frame`] type.

pub mod config;
pub mod debounce;
pub mod extract;
pub mod frame;
pub mod hold;
pub mod orchestrator;
pub mod registry;
pub mod status;
pub mod types;
pub mod voter;

pub use config::LoopConfig;
pub use extract::{DescriptorExtractor, ExtractError};
pub use frame::Frame;
pub use orchestrator::{AttemptOutcome, HoldProgress, Orchestrator, SkipReason, TickDecision};
pub use registry::{EntrySummary, Registry, RegistryBuilder, RegistryEntry, RegistryError, RegistrySpec};
pub use status::{CycleState, MatchedIdentity, Snapshot, Status};
pub use types::{Descriptor, EuclideanMatcher, MatchResult, Matcher};
