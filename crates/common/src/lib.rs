//! Common utilities, types, and configurations shared across Meridian crates.
//!
//! This crate contains the base building blocks for the Meridian gateway:
//! - **Configuration**: Strongly typed application configuration (`config`).
//! - **Telemetry**: Observability setup (`telemetry`).
//! - **Resilience**: Retry with exponential backoff (`retry`).
pub mod config;
pub mod retry;
pub mod telemetry;
