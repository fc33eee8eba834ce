//! Session orchestration
//!
//! - [`config`]: configuration and environment overlay
//! - [`recovery`]: bounded reconnection policy
//! - [`builder`] / [`facade`]: the public entry points
//! - `manager`, `calls`, `messaging`: the single-task session loop
//! - `events`: emission helpers over the broadcast channel

pub mod builder;
pub mod config;
pub mod facade;
pub mod recovery;

pub(crate) mod calls;
pub(crate) mod events;
pub(crate) mod manager;
mod messaging;


pub use builder::SessionBuilder;
pub use config::{ClientConfig, ParticipantRole, RelayConfig, VideoDisablePolicy};
pub use facade::SessionFacade;
pub use recovery::{ReconnectDecision, ReconnectPolicy};
