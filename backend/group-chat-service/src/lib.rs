//! Group chat service with a background moderation pipeline
//!
//! Messages are stored and broadcast immediately. Moderation runs afterwards
//! and may flag, highlight, warn or auto-mute.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod moderation;
pub mod realtime;
pub mod routes;
pub mod services;
pub mod state;

pub use error::{AppError, AppResult};
pub use state::AppState;
