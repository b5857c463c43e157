pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod transcode;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};

use std::sync::Arc;

use crate::health::HealthMonitor;
use crate::middleware::rate_limit::IpRateLimiter;
use crate::transcode::TranscodeService;
use crate::utils::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub transcode: Arc<TranscodeService>,
    pub health: Arc<HealthMonitor>,
    pub metrics: Arc<Metrics>,
    pub limiter: Arc<IpRateLimiter>,
}
