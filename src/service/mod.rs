//! Service layer for the relay
//!
//! This module contains the main application state, service coordination,
//! health checks and background task management.

pub mod app;
pub mod health;

pub use app::{AppState, RunOptions, ServiceError};
pub use health::{ComponentCheck, ComponentProbe, HealthCheck, HealthContext, HealthStatus};
