//! Board wiring for the glitch rig.
//!
//! The rail and the edge inputs live on port A of the STM32G0B1. The
//! MOSFET driver that gates the target's supply is non-inverting, and both
//! target signals idle low and pulse high.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use glitch_core::config::EdgePolarity;
use glitch_core::power::PowerPolarity;

#[cfg(target_os = "none")]
pub mod rail;
pub mod timers;

/// Electrical sense of the power-enable output (PA0).
pub const POWER_POLARITY: PowerPolarity = PowerPolarity::ActiveHigh;

/// Active edge of the target's periodic trigger line (PA1).
pub const TRIGGER_POLARITY: EdgePolarity = EdgePolarity::Rising;

/// Active edge of the target's success line (PA6).
pub const SUCCESS_POLARITY: EdgePolarity = EdgePolarity::Rising;
