//! Core library for motorized microscope stage control.
//!
//! The crate drives a three-axis stage through a [`hardware::HardwareAdapter`],
//! scores focus from camera frames, runs timed Z sweeps and keeps labeled
//! bookmarks. When the hardware is missing or fails, the controller keeps
//! working in simulation mode.
//!
//! # Layout
//!
//! - [`controller::Controller`]: owned aggregate of all stage state
//! - [`app_actor`]: runs a controller on one task with its refresh timers
//! - [`position`], [`metric`], [`bookmarks`], [`sequencer`]: the components
//! - [`events`]: change notifications for the presentation layer
//! - [`config`], [`logging`], [`error`]: ambient plumbing
//!
//! # Example
//!
//! ```rust,ignore
//! let settings = Settings::load()?;
//! logging::init(&settings.application);
//! let controller = Controller::from_settings(settings, None)?;
//! let (handle, _task) = app_actor::spawn(controller);
//! handle.move_stage(Axis::Z, 5.0).await?;
//! ```

pub mod app_actor;
pub mod bookmarks;
pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod error_recovery;
pub mod events;
pub mod hardware;
pub mod joystick;
pub mod logging;
pub mod messages;
pub mod metadata;
pub mod metric;
pub mod position;
pub mod sequencer;

pub use crate::app_actor::{ControllerActor, ControllerHandle};
pub use crate::config::Settings;
pub use crate::controller::{Controller, ControllerSnapshot};
pub use crate::core::{Axis, ConnectionState, Direction, PixelBuffer, Position};
pub use crate::error::{AppResult, StageError};
pub use crate::events::{EventBus, StageEvent};
pub use crate::sequencer::{AutoStepParams, SequencerState};
