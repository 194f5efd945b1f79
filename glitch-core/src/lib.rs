#![no_std]

// Shared logic for the glitch controller.
//
// Everything here stays free of the standard library and of any executor so the
// STM32 firmware and the host-side emulator drive the same state machine.

pub mod config;
pub mod events;
pub mod glitch;
pub mod power;
pub mod timers;
pub mod tuning;
