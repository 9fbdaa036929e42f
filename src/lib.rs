//! d2vm library: the build-and-convert pipeline behind the `d2vm` binary.
//!
//! Exposed as a library so the pipeline can be driven from integration
//! tests with a recording process runner and a fake conversion engine.

pub mod commands;
pub mod config;
pub mod convert;
pub mod environment;
pub mod error;
pub mod executor;
pub mod image;
pub mod ownership;
pub mod paths;
pub mod preflight;
pub mod process;
pub mod request;
pub mod timing;

pub use error::Error;
