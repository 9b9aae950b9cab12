pub mod config;
pub mod counter_store;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod quota;
pub mod response;
pub mod server;
pub mod users;
pub mod validation;

pub use config::Config;
pub use error::{QuotaError, Result};
pub use quota::{QuotaLimiter, MAX_REQUESTS, QUOTA_WINDOW};
pub use server::create_app;
