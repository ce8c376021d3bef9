//! Per-transfer state machine.
//!
//! A session reads (sender) or writes (receiver) one file block by block.
//! It never talks to the network itself: it posts [`SessionEvent`]s on a
//! channel and tells its owner when it wants to be pumped again.
//!
//! ```text
//! Pending ──start──▶ Transferring ◀──resume── Paused
//!                         │  └─────pause──────▶ ┘
//!                         ├──▶ Completed
//!                         ├──▶ Failed
//!                         └──▶ Cancelled   (cancel is allowed from any non-terminal state)
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    FileTransferRequest, NextStep, SessionEvent, SessionOptions, TransferDirection,
    TransferStatus,
};

/// One file transfer, seen from one side.
#[derive(Debug)]
pub struct FileTransferSession {
    session_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    direction: TransferDirection,
    /// Source file for the sender, save path for the receiver
    file_path: PathBuf,
    file_name: String,
    file_size: u64,
    block_count: u64,
    bytes_transferred: u64,
    current_block_index: u64,
    status: TransferStatus,
    /// Blocks that arrived early or while paused
    pending_blocks: BTreeMap<u64, Vec<u8>>,
    file: Option<File>,
    /// Set once the receiver has created `file_path` and may remove it
    owns_output: bool,
    options: SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl FileTransferSession {
    /// Sender side of an accepted request.
    #[must_use]
    pub fn sender(
        session_id: Uuid,
        request: &FileTransferRequest,
        options: SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self::new(
            session_id,
            request,
            TransferDirection::Send,
            request.file_path.clone(),
            options,
            events,
        )
    }

    /// Receiver side of an accepted request, writing to `save_path`.
    #[must_use]
    pub fn receiver(
        session_id: Uuid,
        request: &FileTransferRequest,
        save_path: PathBuf,
        options: SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self::new(
            session_id,
            request,
            TransferDirection::Receive,
            save_path,
            options,
            events,
        )
    }

    fn new(
        session_id: Uuid,
        request: &FileTransferRequest,
        direction: TransferDirection,
        file_path: PathBuf,
        options: SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let options = SessionOptions {
            block_size: request.block_size.max(1),
            ..options
        };

        Self {
            session_id,
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            direction,
            file_path,
            file_name: request.file_name.clone(),
            file_size: request.file_size,
            block_count: request.block_count(),
            bytes_transferred: 0,
            current_block_index: 0,
            status: TransferStatus::Pending,
            pending_blocks: BTreeMap::new(),
            file: None,
            owns_output: false,
            options,
            events,
        }
    }

    /// Open the file and begin transferring.
    ///
    /// Only acts on a pending session. The sender pushes its first block
    /// immediately; the receiver writes a block that arrived early.
    pub fn start(&mut self) -> NextStep {
        if self.status != TransferStatus::Pending {
            tracing::debug!(
                session_id = %self.session_id,
                status = %self.status,
                "Ignoring start of a session that is not pending"
            );
            return NextStep::Idle;
        }

        if let Err(e) = self.open_file() {
            self.fail(format!("failed to open {}: {e}", self.file_path.display()));
            return NextStep::Idle;
        }

        self.set_status(TransferStatus::Transferring);

        match self.direction {
            TransferDirection::Send => self.send_next_block(),
            TransferDirection::Receive => {
                if self.file_size == 0 {
                    self.finish();
                    return NextStep::Idle;
                }
                self.write_buffered_block()
            }
        }
    }

    /// Advance the session by one scheduled step.
    ///
    /// A no-op unless the session is transferring.
    pub fn pump(&mut self) -> NextStep {
        if self.status != TransferStatus::Transferring {
            return NextStep::Idle;
        }

        match self.direction {
            TransferDirection::Send => self.send_next_block(),
            TransferDirection::Receive => self.write_buffered_block(),
        }
    }

    /// Ingest one inbound block.
    ///
    /// Blocks are written strictly in index order; anything early, or anything
    /// arriving while paused, is buffered. Blocks past the end of the file or
    /// of the wrong length are dropped. Overflowing the buffer fails the session.
    pub fn process_data_block(&mut self, block_index: u64, data: Vec<u8>) -> NextStep {
        if self.status.is_terminal() {
            tracing::trace!(
                session_id = %self.session_id,
                block_index,
                "Dropping block for finished session"
            );
            return NextStep::Idle;
        }

        if block_index < self.current_block_index {
            tracing::debug!(
                session_id = %self.session_id,
                block_index,
                "Dropping already written block"
            );
            return NextStep::Idle;
        }

        if block_index >= self.block_count {
            tracing::warn!(
                session_id = %self.session_id,
                block_index,
                block_count = self.block_count,
                "Dropping block past the end of the file"
            );
            return NextStep::Idle;
        }

        let expected = self.block_len(block_index);
        if data.len() != expected {
            tracing::warn!(
                session_id = %self.session_id,
                block_index,
                len = data.len(),
                expected,
                "Dropping block of the wrong size"
            );
            return NextStep::Idle;
        }

        if self.status == TransferStatus::Paused || block_index != self.current_block_index {
            if !self.pending_blocks.contains_key(&block_index)
                && self.pending_blocks.len() >= self.options.max_buffered_blocks
            {
                self.fail(format!(
                    "more than {} blocks buffered while waiting for block {}",
                    self.options.max_buffered_blocks, self.current_block_index
                ));
                return NextStep::Idle;
            }
            self.pending_blocks.insert(block_index, data);
            return NextStep::Idle;
        }

        if self.status == TransferStatus::Pending {
            let step = self.start();
            if self.status != TransferStatus::Transferring {
                return step;
            }
        }

        self.write_block(data)
    }

    /// Pause a transferring session.
    pub fn pause(&mut self) {
        if self.status == TransferStatus::Transferring {
            self.set_status(TransferStatus::Paused);
        }
    }

    /// Resume a paused session; a pending session is started instead.
    pub fn resume(&mut self) -> NextStep {
        match self.status {
            TransferStatus::Pending => self.start(),
            TransferStatus::Paused => {
                self.set_status(TransferStatus::Transferring);
                match self.direction {
                    TransferDirection::Send => self.send_next_block(),
                    TransferDirection::Receive => self.write_buffered_block(),
                }
            }
            _ => NextStep::Idle,
        }
    }

    /// Cancel the session.
    ///
    /// The receiver deletes the partial output it created; the sender's source
    /// is untouched.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }

        self.set_status(TransferStatus::Cancelled);
        self.file = None;
        self.pending_blocks.clear();

        if self.owns_output {
            if let Err(e) = fs::remove_file(&self.file_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        session_id = %self.session_id,
                        "Failed to remove partial file {}: {}",
                        self.file_path.display(),
                        e
                    );
                }
            }
        }

        self.emit(SessionEvent::Completed {
            session_id: self.session_id,
            success: false,
        });
    }

    /// Fraction done, in `[0, 1]`; zero when the size is unknown.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.file_size as f64).min(1.0)
    }

    /// Session id.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Sending user.
    #[must_use]
    pub const fn sender_id(&self) -> Uuid {
        self.sender_id
    }

    /// Receiving user.
    #[must_use]
    pub const fn receiver_id(&self) -> Uuid {
        self.receiver_id
    }

    /// Which side of the transfer this is.
    #[must_use]
    pub const fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Whether this is the sending side.
    #[must_use]
    pub fn is_sender(&self) -> bool {
        self.direction == TransferDirection::Send
    }

    /// Source path (sender) or save path (receiver).
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Advertised file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total file size in bytes.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes read or written so far.
    #[must_use]
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Index of the next block to send or write.
    #[must_use]
    pub const fn current_block_index(&self) -> u64 {
        self.current_block_index
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> TransferStatus {
        self.status
    }

    /// Number of blocks waiting to be written.
    #[must_use]
    pub fn buffered_blocks(&self) -> usize {
        self.pending_blocks.len()
    }

    fn open_file(&mut self) -> std::io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let file = match self.direction {
            TransferDirection::Send => File::open(&self.file_path)?,
            TransferDirection::Receive => {
                if let Some(parent) = self.file_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&self.file_path)?;
                self.owns_output = true;
                file
            }
        };

        self.file = Some(file);
        Ok(())
    }

    fn send_next_block(&mut self) -> NextStep {
        if self.status != TransferStatus::Transferring {
            return NextStep::Idle;
        }

        if self.current_block_index >= self.block_count {
            self.finish();
            return NextStep::Idle;
        }

        let offset = self.current_block_index * self.options.block_size as u64;
        let len = self.block_len(self.current_block_index);

        let data = match self.read_block(offset, len) {
            Ok(data) => data,
            Err(e) => {
                self.fail(format!(
                    "failed to read block {}: {e}",
                    self.current_block_index
                ));
                return NextStep::Idle;
            }
        };

        self.emit(SessionEvent::DataBlock {
            session_id: self.session_id,
            block_index: self.current_block_index,
            data,
        });

        self.bytes_transferred += len as u64;
        self.current_block_index += 1;
        self.emit_progress();

        NextStep::PumpAfter(self.options.send_interval)
    }

    /// Length of block `index`; only the last block may be short.
    #[allow(clippy::cast_possible_truncation)]
    fn block_len(&self, index: u64) -> usize {
        let block_size = self.options.block_size as u64;
        let offset = index.saturating_mul(block_size);
        block_size.min(self.file_size.saturating_sub(offset)) as usize
    }

    fn read_block(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("file is not open"))?;

        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn write_buffered_block(&mut self) -> NextStep {
        match self.pending_blocks.remove(&self.current_block_index) {
            Some(data) => self.write_block(data),
            None => NextStep::Idle,
        }
    }

    fn write_block(&mut self, data: Vec<u8>) -> NextStep {
        if let Err(e) = self.open_file() {
            self.fail(format!("failed to open {}: {e}", self.file_path.display()));
            return NextStep::Idle;
        }

        let written = self
            .file
            .as_mut()
            .map_or(Ok(0), |file| file.write(&data));

        match written {
            Ok(n) if n == data.len() => {}
            Ok(n) => {
                self.fail(format!(
                    "short write on block {}: {n} of {} bytes",
                    self.current_block_index,
                    data.len()
                ));
                return NextStep::Idle;
            }
            Err(e) => {
                self.fail(format!(
                    "failed to write block {}: {e}",
                    self.current_block_index
                ));
                return NextStep::Idle;
            }
        }

        self.bytes_transferred += data.len() as u64;
        self.emit_progress();

        if self.bytes_transferred >= self.file_size {
            self.finish();
            return NextStep::Idle;
        }

        self.current_block_index += 1;
        if self.pending_blocks.contains_key(&self.current_block_index) {
            NextStep::PumpAfter(Duration::ZERO)
        } else {
            NextStep::Idle
        }
    }

    fn finish(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                self.fail(format!("failed to flush {}: {e}", self.file_path.display()));
                return;
            }
        }

        self.set_status(TransferStatus::Completed);
        tracing::info!(
            session_id = %self.session_id,
            bytes = self.bytes_transferred,
            "Transfer of '{}' completed",
            self.file_name
        );
        self.emit(SessionEvent::Completed {
            session_id: self.session_id,
            success: true,
        });
    }

    fn fail(&mut self, message: String) {
        tracing::error!(session_id = %self.session_id, "{}", message);
        self.file = None;
        self.pending_blocks.clear();
        self.set_status(TransferStatus::Failed);
        self.emit(SessionEvent::Error {
            session_id: self.session_id,
            message,
        });
        self.emit(SessionEvent::Completed {
            session_id: self.session_id,
            success: false,
        });
    }

    fn set_status(&mut self, status: TransferStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.emit(SessionEvent::StatusChanged {
            session_id: self.session_id,
            status,
        });
    }

    fn emit_progress(&self) {
        self.emit(SessionEvent::Progress {
            session_id: self.session_id,
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.file_size,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // The owning manager holds the receiver; a closed channel only means it is gone.
        let _ = self.events.send(event);
    }
}
