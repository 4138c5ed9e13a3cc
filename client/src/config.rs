use std::{
    fs::File,
    path::Path,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use serde::{Deserialize, Serialize};

/// Settings read from the optional JSON config file. CLI flags take priority.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClientConfig {
    /// pool base url, e.g. `https://pool.example.com`
    pub url: Option<String>,
    pub keypair: Option<String>,
    pub cores: Option<usize>,
    /// append pool results to this file as JSON lines
    pub record: Option<String>,
}

pub fn load_config_file<P>(config_file: P) -> anyhow::Result<ClientConfig>
where
    P: AsRef<Path>, {
    let path = config_file.as_ref();
    let file = File::open(path)
        .map_err(|err| anyhow::anyhow!("{} config file not found: {err}", path.display()))?;
    let config = serde_json::from_reader(file)
        .map_err(|err| anyhow::anyhow!("fail to parse {}: {err}", path.display()))?;
    Ok(config)
}

/// Runtime switches shared between the orchestrator and the session.
///
/// The orchestrator writes, the session only reads.
#[derive(Debug)]
pub struct MiningConfig {
    keep_mining: AtomicBool,
    workers: AtomicUsize,
    max_workers: usize,
}

impl MiningConfig {
    pub fn new(workers: usize, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            keep_mining: AtomicBool::new(false),
            workers: AtomicUsize::new(workers.clamp(1, max_workers)),
            max_workers,
        }
    }

    pub fn keep_mining(&self) -> bool {
        self.keep_mining.load(Ordering::SeqCst)
    }

    pub fn set_keep_mining(&self, value: bool) {
        self.keep_mining.store(value, Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    /// Returns the value actually stored after clamping.
    pub fn set_workers(&self, workers: usize) -> usize {
        let workers = workers.clamp(1, self.max_workers);
        self.workers.store(workers, Ordering::Relaxed);
        workers
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_are_clamped() {
        let config = MiningConfig::new(64, 8);
        assert_eq!(config.workers(), 8);
        assert_eq!(config.max_workers(), 8);
        assert_eq!(config.set_workers(0), 1);
        assert_eq!(config.set_workers(3), 3);
        assert_eq!(config.workers(), 3);
        assert!(!config.keep_mining());
    }

    #[test]
    fn config_file_is_optional_fields() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"url":"https://pool.example.com","cores":4}"#).unwrap();
        assert_eq!(config.url.as_deref(), Some("https://pool.example.com"));
        assert_eq!(config.cores, Some(4));
        assert!(config.keypair.is_none());
    }
}
