use envconfig::Envconfig;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Where counters and users live at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageMode {
    /// Redis for counters and user documents, SQL for the user table.
    External,
    /// Everything in-process; nothing survives a restart.
    Memory,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external" => Ok(StorageMode::External),
            "memory" => Ok(StorageMode::Memory),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::External => write!(f, "external"),
            StorageMode::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:8080")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL, used for quota counters and the document backend
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// SQL connection URL for the relational user table
    #[envconfig(from = "DATABASE_URL", default = "sqlite::memory:")]
    pub database_url: String,

    #[envconfig(from = "STORAGE_MODE", default = "external")]
    pub storage_mode: StorageMode,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Configuration for a fully in-process instance.
    pub fn in_memory() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            redis_url: String::new(),
            database_url: "sqlite::memory:".to_string(),
            storage_mode: StorageMode::Memory,
            log_level: "info".to_string(),
        }
    }
}
