//! Append-only JSON Lines document store
//!
//! Chunks and audit events go to two files under the configured store
//! directory, one JSON object per line. Writes are buffered until
//! `flush`, which `Services::shutdown` calls on the way out.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use kbassist_core::{AuditEvent, DocumentStoreConfig, StoredChunk};

use crate::backend::DocumentStore;
use crate::Result;

#[derive(Debug)]
pub struct JsonlDocumentStore {
    chunks_path: PathBuf,
    audit_path: PathBuf,
    chunks: Mutex<BufWriter<File>>,
    audit: Mutex<BufWriter<File>>,
}

impl JsonlDocumentStore {
    /// Open (creating if needed) the store files described by `config`
    pub async fn open(config: &DocumentStoreConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await?;

        let chunks_path = config.chunks_path();
        let audit_path = config.audit_path();

        let store = Self {
            chunks: Mutex::new(BufWriter::new(open_append(&chunks_path).await?)),
            audit: Mutex::new(BufWriter::new(open_append(&audit_path).await?)),
            chunks_path,
            audit_path,
        };

        info!(directory = %config.directory.display(), "Opened JSONL document store");
        Ok(store)
    }

    pub fn chunks_path(&self) -> &Path {
        &self.chunks_path
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    /// Read back every stored chunk; flushes pending writes first
    pub async fn read_chunks(&self) -> Result<Vec<StoredChunk>> {
        self.flush().await?;
        read_lines(&self.chunks_path).await
    }

    /// Read back every audit event; flushes pending writes first
    pub async fn read_events(&self) -> Result<Vec<AuditEvent>> {
        self.flush().await?;
        read_lines(&self.audit_path).await
    }
}

async fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path).await?)
}

async fn write_line<T: Serialize>(writer: &mut BufWriter<File>, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

#[async_trait]
impl DocumentStore for JsonlDocumentStore {
    async fn insert_many(&self, chunks: Vec<StoredChunk>) -> Result<usize> {
        let mut writer = self.chunks.lock().await;
        for chunk in &chunks {
            write_line(&mut writer, chunk).await?;
        }

        debug!(count = chunks.len(), "Appended chunks to store");
        Ok(chunks.len())
    }

    async fn log_event(&self, event: AuditEvent) -> Result<()> {
        let mut writer = self.audit.lock().await;
        write_line(&mut writer, &event).await
    }

    async fn flush(&self) -> Result<()> {
        self.chunks.lock().await.flush().await?;
        self.audit.lock().await.flush().await?;
        Ok(())
    }
}
