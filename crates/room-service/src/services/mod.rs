//! Session services.
//!
//! [`SessionCoordinator`] owns every room and participant transition.
//! [`WebhookReconciler`] feeds media server events into it. Admission rules,
//! the media server adapter and the time source sit behind it.

pub mod access_policy;
pub mod clock;
pub mod coordinator;
pub mod media;
pub mod webhook;

pub use access_policy::{AccessControlPolicy, AccessDecision};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CoordinatorSettings, PresenceUpdate, SessionCoordinator, Trigger};
pub use media::{LiveKitClient, MediaInfrastructure};
pub use webhook::{ReconcileOutcome, WebhookPayload, WebhookReconciler};
