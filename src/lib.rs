//! # Render Pool
//!
//! Renders web pages to serialized HTML or full-document PNG captures using a
//! fixed-size pool of headless Chromium instances.
//!
//! Jobs enter a FIFO [`TaskQueue`] whose concurrency equals the pool size.
//! Each admitted job is handed to the [`Dispatcher`], which leases an idle
//! engine from the [`WorkerPool`], races the engine's settlement signal
//! against the job's timeout, classifies the result and runs the matching
//! render strategy. The engine goes back to the pool before the job's ticket
//! resolves, whatever the outcome.
//!
//! ## Features
//!
//! - **Engine Pool**: engines are launched once at start-up and reused; a job
//!   asking for different engine capabilities replaces exactly one of them
//! - **Bounded Concurrency**: at most one job per engine, strictly in
//!   submission order
//! - **Typed Failures**: network errors, renderer crashes and timeouts come
//!   back as [`RenderError`] values, never as dropped jobs
//! - **HTTP Layer**: `POST /html`, `POST /png`, `GET /health`, `GET /metrics`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_pool::{Config, Job, RenderService};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = RenderService::new(Config::default()).await?;
//!
//!     let output = service
//!         .render(Job::png("https://example.com").with_timeout(Duration::from_secs(10)))
//!         .await?;
//!     println!("Captured {} bytes", output.content.len());
//!
//!     service.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! render-pool serve --port 3000
//! render-pool render https://example.com --png --output example.png
//! render-pool batch --input urls.txt --output rendered/
//! ```

/// Configuration and settings
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Chromium network error codes
pub mod net_error;

/// Settlement signals and their classification
pub mod settlement;

/// Engine and engine factory traits
pub mod engine;

/// Jobs, requests and render outputs
pub mod job;

/// Headless Chromium engine
pub mod chromium;

/// Fixed-size pool of rendering engines
pub mod worker_pool;

/// HTML extraction and PNG capture
pub mod render;

/// Per-job dispatch against a pooled engine
pub mod dispatcher;

/// FIFO admission queue
pub mod task_queue;

/// Service facade over pool, dispatcher and queue
pub mod service;

/// HTTP request layer
pub mod server;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection and monitoring
pub mod metrics;

/// Health assessment of the pool and queue
pub mod health;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testing;


pub use chromium::*;
pub use cli::*;
pub use config::*;
pub use dispatcher::*;
pub use engine::*;
pub use error::*;
pub use health::*;
pub use job::*;
pub use metrics::*;
pub use net_error::*;
pub use render::*;
pub use server::*;
pub use service::*;
pub use settlement::*;
pub use task_queue::*;
pub use utils::*;
pub use worker_pool::*;
