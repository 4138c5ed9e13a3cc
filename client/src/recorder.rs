use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::Mutex,
};

use pool_shared::interaction::PoolResult;
use serde::{Deserialize, Serialize};
use tracing::*;

/// One pool result as kept for history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MiningRecord {
    /// unix millis when the result arrived
    pub time: i64,
    pub challenge: String,
    pub difficulty: u32,
    pub total_rewards: f64,
    pub share: f64,
    pub reporter_difficulty: u32,
    pub reporter_earned: f64,
}

impl From<&PoolResult> for MiningRecord {
    fn from(result: &PoolResult) -> Self {
        Self {
            time: pool_shared::timestamp(),
            challenge: bs58::encode(result.challenge).into_string(),
            difficulty: result.difficulty,
            total_rewards: result.total_rewards,
            share: result.miner_share,
            reporter_difficulty: result.miner_difficulty,
            reporter_earned: result.miner_earned,
        }
    }
}

/// Fire-and-forget sink for pool results. Implementations log their own failures.
pub trait ResultRecorder: Send + Sync {
    fn record(&self, record: MiningRecord);
}

pub struct LogRecorder;

impl ResultRecorder for LogRecorder {
    fn record(&self, record: MiningRecord) {
        info!(
            "pool difficulty: {}, my difficulty: {}, earned: {:.11}, share: {:.4}%",
            record.difficulty,
            record.reporter_difficulty,
            record.reporter_earned,
            record.share * 100.0
        );
    }
}

/// Appends one JSON object per line.
pub struct JsonLinesRecorder {
    file: Mutex<File>,
}

impl JsonLinesRecorder {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    fn append(&self, record: &MiningRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| anyhow::anyhow!("record file lock poisoned"))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl ResultRecorder for JsonLinesRecorder {
    fn record(&self, record: MiningRecord) {
        if let Err(err) = self.append(&record) {
            error!("fail to record mining result: {err:#}");
        }
        LogRecorder.record(record);
    }
}
