//! JSONL 文件 exporter - 把每条消息追加到本地文件

use crate::export::{DeliveryScope, Exporter};
use crate::model::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 导出的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub exported_at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: Message,
}

/// JSONL 文件 exporter
#[derive(Debug, Clone)]
pub struct JsonlFileExporter {
    path: PathBuf,
}

impl JsonlFileExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 在独占文件锁下追加一条记录
    pub fn append(path: &Path, record: &ExportRecord) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        file.lock_exclusive()?;
        let written = writeln!(file, "{}", line);
        file.unlock()?;
        written?;

        Ok(())
    }

    /// 读取最后 `n` 条记录，跳过无法解析的行
    pub fn read_recent(path: &Path, n: usize) -> Vec<ExportRecord> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let records: Vec<ExportRecord> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }
}

#[async_trait]
impl Exporter for JsonlFileExporter {
    fn name(&self) -> &str {
        "jsonl_file"
    }

    async fn handle_message(&self, _scope: &DeliveryScope, message: &Message) -> Result<()> {
        let record = ExportRecord {
            exported_at: Utc::now(),
            message: message.clone(),
        };
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || Self::append(&path, &record)).await??;

        debug!(exporter = "jsonl_file", path = %self.path.display(), name = %message.name, "Message appended");
        Ok(())
    }
}
