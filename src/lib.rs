//! Launch an external media player and drive it from the physical keyboard.
//!
//! Key releases are read straight from the kernel input device (so they arrive even
//! while the player owns the screen), translated into the player's single-byte stdin
//! controls, and forwarded while the player runs.

pub mod command;
pub mod config;
pub mod constants;
pub mod device;
pub mod event;
pub mod logging;
pub mod runner;
pub mod supervisor;
pub mod surface;

pub use runner::{PlayerOptions, play, run_player};
