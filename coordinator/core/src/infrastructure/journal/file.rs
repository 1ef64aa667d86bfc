// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # File Event Journal
//!
//! Durable journal stored as JSON lines, one [`RecordedEvent`] per line.
//!
//! - Appends are serialized through one writer; an append returns only after
//!   the line is flushed and, with `fsync` enabled, `sync_data`'d.
//! - On open the whole file is read back into the index. A final line without
//!   a trailing newline is a write torn by a crash: it is dropped with a
//!   warning and truncated away. Any other unparsable line is
//!   [`JournalError::Corrupt`].
//! - A failed write truncates the file back to its last good length so the
//!   next append starts on a clean line.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::JournalIndex;
use crate::domain::events::{RecordedEvent, TransactionEvent};
use crate::domain::journal::{EventJournal, JournalError, TransactionHistory};
use crate::domain::transaction::GlobalTxId;

struct Writer {
    file: File,
    /// Length of the file up to the last complete line.
    len: u64,
}

pub struct FileEventJournal {
    path: PathBuf,
    fsync: bool,
    writer: tokio::sync::Mutex<Writer>,
    index: Mutex<JournalIndex>,
}

impl FileEventJournal {
    /// Open (or create) a journal file and index its contents.
    pub async fn open(path: impl AsRef<Path>, fsync: bool) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (index, mut valid_len, missing_newline) = Self::load(&contents)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if valid_len < contents.len() as u64 {
            warn!(
                path = %path.display(),
                discarded_bytes = contents.len() as u64 - valid_len,
                "Discarding torn final journal entry"
            );
            file.set_len(valid_len).await?;
            file.sync_data().await?;
        }
        if missing_newline {
            file.write_all(b"\n").await?;
            file.flush().await?;
            file.sync_data().await?;
            valid_len += 1;
        }

        info!(
            path = %path.display(),
            events = index.len(),
            "Opened file event journal"
        );

        Ok(Self {
            path,
            fsync,
            writer: tokio::sync::Mutex::new(Writer {
                file,
                len: valid_len,
            }),
            index: Mutex::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index file contents. Returns the index, the length of the valid prefix,
    /// and whether that prefix ends without a newline.
    fn load(contents: &[u8]) -> Result<(JournalIndex, u64, bool), JournalError> {
        let mut index = JournalIndex::default();
        let mut offset = 0usize;
        let mut line_no = 0usize;

        while offset < contents.len() {
            line_no += 1;
            let rest = &contents[offset..];
            let (line, terminated, consumed) = match rest.iter().position(|b| *b == b'\n') {
                Some(pos) => (&rest[..pos], true, pos + 1),
                None => (rest, false, rest.len()),
            };

            if line.iter().all(u8::is_ascii_whitespace) {
                offset += consumed;
                continue;
            }

            match serde_json::from_slice::<RecordedEvent>(line) {
                Ok(recorded) => {
                    index = Self::index_record(index, recorded, line_no);
                    if !terminated {
                        // Complete record missing only its newline.
                        return Ok((index, contents.len() as u64, true));
                    }
                }
                Err(_) if !terminated => return Ok((index, offset as u64, false)),
                Err(e) => {
                    return Err(JournalError::Corrupt {
                        line: line_no,
                        reason: e.to_string(),
                    })
                }
            }
            offset += consumed;
        }

        Ok((index, offset as u64, false))
    }

    fn index_record(mut index: JournalIndex, recorded: RecordedEvent, line_no: usize) -> JournalIndex {
        let sequence = recorded.sequence;
        if !index.commit(recorded) {
            warn!(line = line_no, sequence, "Ignoring duplicate journal entry");
        }
        index
    }

    async fn write_line(&self, writer: &mut Writer, line: &[u8]) -> std::io::Result<()> {
        writer.file.write_all(line).await?;
        writer.file.flush().await?;
        if self.fsync {
            writer.file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventJournal for FileEventJournal {
    async fn append(&self, event: &TransactionEvent) -> Result<RecordedEvent, JournalError> {
        let mut writer = self.writer.lock().await;

        let recorded = self.index.lock().prepare(event)?;
        let mut line = serde_json::to_vec(&recorded)?;
        line.push(b'\n');

        if let Err(e) = self.write_line(&mut writer, &line).await {
            error!(
                path = %self.path.display(),
                sequence = recorded.sequence,
                error = %e,
                "Journal append failed"
            );
            let good_len = writer.len;
            if let Err(truncate_err) = writer.file.set_len(good_len).await {
                error!(error = %truncate_err, "Failed to roll back partial journal write");
            }
            return Err(JournalError::Write(e.to_string()));
        }

        writer.len += line.len() as u64;
        self.index.lock().commit(recorded.clone());
        debug!(
            global_tx_id = %recorded.event.global_tx_id,
            sequence = recorded.sequence,
            "Journaled event"
        );
        Ok(recorded)
    }

    async fn contains(&self, dedup_key: &str) -> Result<bool, JournalError> {
        Ok(self.index.lock().contains(dedup_key))
    }

    async fn replay(&self, global_tx_id: &GlobalTxId) -> Result<Vec<RecordedEvent>, JournalError> {
        Ok(self.index.lock().replay(global_tx_id))
    }

    fn replay_all(&self) -> BoxStream<'_, Result<TransactionHistory, JournalError>> {
        let histories = self.index.lock().histories();
        stream::iter(histories.into_iter().map(Ok)).boxed()
    }
}
