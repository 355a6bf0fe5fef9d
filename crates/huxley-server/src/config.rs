use std::path::PathBuf;
use std::thread;

use huxley_shared::constants::DEFAULT_PORT;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Worker reactor count; one shard of connections per worker thread.
    pub workers: usize,
    pub database_path: PathBuf,
    pub master_key_path: PathBuf,
    pub session_key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            workers: default_workers(),
            database_path: PathBuf::from("huxley.db"),
            master_key_path: PathBuf::from("/etc/huxley/master.key"),
            session_key_path: PathBuf::from("/etc/huxley/session.key.enc"),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HUXLEY_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("HUXLEY_MASTER_KEY") {
            config.master_key_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("HUXLEY_SESSION_KEY") {
            config.session_key_path = PathBuf::from(path);
        }
        if let Ok(val) = std::env::var("HUXLEY_WORKERS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.workers = n,
                _ => tracing::warn!(value = %val, "invalid HUXLEY_WORKERS, using default"),
            }
        }

        config
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_layout() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.workers >= 1);
        assert_eq!(config.database_path, PathBuf::from("huxley.db"));
        assert_eq!(
            config.master_key_path,
            PathBuf::from("/etc/huxley/master.key")
        );
        assert_eq!(
            config.session_key_path,
            PathBuf::from("/etc/huxley/session.key.enc")
        );
    }
}
