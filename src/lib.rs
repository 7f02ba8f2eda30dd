//! Polyfield Server Library
//!
//! Simulation core for a real-time multiplayer arena server: a
//! fixed-capacity entity registry with generation hashes, a bitset
//! broad-phase grid, a deterministic tick scheduler and a per-viewer
//! delta compiler producing client update packets.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
