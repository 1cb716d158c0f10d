//! # Replication and administrative job control plane
//!
//! This crate decides *what* asynchronous work should run and keeps track of
//! it. The work itself runs in an external job service, reached through
//! [jobservice_client].
//!
//! ## Features
//!
//! - Replication policies, executions and tasks, with bounded concurrent
//!   submission and idempotent stop
//! - Garbage collection and scan-all schedules with at most one periodic job
//!   per name
//! - Notification (webhook) policies scoped to projects
//! - Registry endpoints referenced by replication
//! - Role based authorization and an audit trail written off the request path
//!
//! ## Example
//!
//! ```no_run
//! use control_plane::ControlPlaneBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = ControlPlaneBuilder::new()
//!     .user("admin-token", "admin", true)
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod adminjob;
mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod deadline;
mod error;
pub mod hook;
pub mod notification;
pub mod pagination;
pub mod policy;
pub mod project;
pub mod rbac;
pub mod registry;
pub mod replication;

pub use api::ControlPlaneBuilder;
pub use error::{Error, Result};
