//! Atlas Search - visual similarity search over a labeled reference atlas.
//!
//! This crate provides the core functionality for the `atlas` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (reference items, matches, the query envelope)
//! - [`probe`] - Probe decoding (URL, local path, base64)
//! - [`embeddings`] - Image embedding providers and the shared extractor
//! - [`storage`] - SQLite vector store
//! - [`index`] - Atlas scanning and batched index builds
//! - [`query`] - The similarity query pipeline
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod model;
pub mod probe;
pub mod query;
pub mod storage;

pub use error::{Error, Result};
