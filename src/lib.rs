#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Parlor Server
//!
//! An authoritative realtime backend for short turn-based board games
//! (Tic-Tac-Toe, Yahtzee, Rock-Paper-Scissors, Guess the Spy) played
//! over JSON-over-WebSocket, with an HTTP surface for lobby management.

/// HTTP contract (lobby management, move submission, socket tokens)
pub mod api;

/// Server configuration and environment variables
pub mod config;

/// Per-room ordered event bus with replay
pub mod events;

/// Game rules modules behind the capability trait
pub mod games;

/// Identity resolution (realtime tokens, guest tokens, guest GC)
pub mod identity;

/// Structured logging configuration
pub mod logging;

/// WebSocket message protocol definitions
pub mod protocol;

/// Per-socket operation rate limiting
pub mod rate_limit;

/// Alert rules, rolling windows, debounce and resolve semantics
pub mod reliability;

/// Retry logic utilities
pub mod retry;

/// Main server orchestration
pub mod server;

/// Storage abstraction layer (in-memory implementation)
pub mod storage;

/// Observer sink for telemetry and logging
pub mod telemetry;

/// WebSocket connection handling
pub mod websocket;
