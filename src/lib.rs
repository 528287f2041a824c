//! Tool-assisted speedrun (TAS) control layer for a tick-based game server.
//!
//! The host simulation exposes its world through the [`sim::Simulation`]
//! trait; everything else layers on top of that seam:
//! - [`snapshot`]: full-state capture and restore at one tick
//! - [`history`]: bounded snapshot store with idle compression and keyframes
//! - [`controller`]: pause/step/rewind/fast-forward, speed, input injection,
//!   recording and playback, TAS files, and the permission model
//! - [`commands`]: the line-based operator command surface
//!
//! [`sim::testbed`] ships a deterministic toy world used by the test suite
//! and the `tas_server` demo shell.

pub mod commands;
pub mod config;
pub mod controller;
pub mod history;
pub mod sim;
pub mod snapshot;
pub mod util;

pub use config::Config;
pub use controller::{PlaybackState, TasController, TasError, TasInput, TasMode};
pub use history::TasHistory;
pub use snapshot::TasSnapshot;
