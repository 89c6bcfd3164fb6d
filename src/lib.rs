//! # LSM Engine Core Library
//!
//! This crate is the acquisition feature-execution engine for a
//! light-sheet microscope. It coordinates stage motion, camera triggering
//! and frame capture across multi-channel, multi-position, multi-timepoint,
//! z-stack and autofocus routines, all expressed as composable acquisition
//! features driven by a two-thread (signal/data) pipeline.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct
//! responsibility:
//!
//! - **`analysis`**: Image-sharpness scoring (normalized DCT Shannon
//!   entropy) used by the autofocus search.
//! - **`buffer`**: The pre-allocated frame ring buffer shared between the
//!   two worker threads, with publish/consume cursors.
//! - **`config`**: Configuration structures loaded from TOML files and the
//!   environment. See `config::Settings`.
//! - **`container`**: The executor that compiles feature lists into the
//!   two parallel thread programs and drives them.
//! - **`context`**: The contexts handed into node hooks, plus the
//!   outbound UI event channel.
//! - **`engine`**: The `AcquisitionEngine` running the signal and data
//!   worker threads for one acquisition.
//! - **`error`**: The custom `EngineError` enum for centralized error
//!   classification across the crate.
//! - **`features`**: The built-in features: z-stack, autofocus, resolution
//!   switching, constant-velocity scanning, frame logging and gating.
//! - **`hardware`**: The traits the engine drives devices through, and
//!   in-process mocks for tests and demos.
//! - **`node`**: The feature-node model: handler traits with lifecycle
//!   hooks and the runtime wrappers the executor drives.
//! - **`registry`**: Name-to-constructor mapping so acquisition sequences
//!   can be described as data.
//! - **`sync`**: The stop flag and the two-phase pause handshake.

pub mod analysis;
pub mod buffer;
pub mod config;
pub mod container;
pub mod context;
pub mod engine;
pub mod error;
pub mod features;
pub mod hardware;
pub mod node;
pub mod registry;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{AcquisitionEngine, AcquisitionReport, RunOptions};
pub use error::{EngineError, EngineResult};
