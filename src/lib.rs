pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod routes;
pub mod service;

pub use config::Config;
pub use errors::{AppError, Result};
pub use service::{AuthRequest, HealthReport, SecondFactorVerifier, TrustService, TrustServiceBuilder};
