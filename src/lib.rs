//! Wang 2200 minicomputer emulator core.
//!
//! Layered bottom-up: [`microstore`] and [`memory`] are the two address
//! spaces the CPU multiplexes between; [`cpu`] is the micromachine that
//! executes against them; [`bus`] is the backplane the CPU drives cards
//! through; [`disk`], [`vdisk`], and [`keyboard`] are the cards themselves;
//! [`system`] assembles all of it into a runnable machine. [`scheduler`] and
//! [`ticks`] provide the simulated-time substrate cards use for event-driven
//! timing; [`trace`] and [`observable`] are the ambient debug/inspection
//! facilities threaded through every layer; [`config`] validates what
//! [`system::System::new`] is handed before anything runs.

pub mod bus;
pub mod config;
pub mod cpu;
pub mod disk;
pub mod keyboard;
pub mod memory;
pub mod microstore;
pub mod observable;
pub mod scheduler;
pub mod system;
pub mod ticks;
pub mod trace;
pub mod vdisk;

#[cfg(feature = "mcp")]
pub mod mcp;

pub use config::{Config, ConfigError, MicrocodeVariant};
pub use cpu::CpuFault;
pub use system::System;
