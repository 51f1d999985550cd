//! # ember-core
//!
//! Foundation types shared by the Ember run coordinator crates.
//!
//! - **Run IDs**: [`ids::RunId`] newtype, the correlation key for every emitted event
//! - **Events**: [`events::AgentEvent`], the single outbound wire shape (`{runId, stream, data}`)
//! - **Logging**: [`logging::init_subscriber`] and the [`logging::capture_logs`] test helper
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `ember-runtime`.

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;
