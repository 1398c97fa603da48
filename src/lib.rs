//! Tapedeck - HTTP record-replay intermediary
//!
//! Records upstream traffic into named sequences and replays it in order,
//! one stored interaction per request.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod network;
pub mod proxy;
pub mod recording;
pub mod replay;
pub mod session;
pub mod storage;

pub use error::{Result, TapedeckError};
