//! Transfer offers and their answers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An offer to send one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferRequest {
    /// Request id
    pub request_id: Uuid,
    /// Offering user
    pub sender_id: Uuid,
    /// Target user
    pub receiver_id: Uuid,
    /// Path of the file on the sender's machine
    pub file_path: PathBuf,
    /// File name shown to the receiver
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// Size of every block but the last
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// When the offer was made
    pub timestamp: DateTime<Utc>,
}

impl FileTransferRequest {
    /// Build a request for a local regular file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or is not a regular file.
    pub fn new(sender_id: Uuid, receiver_id: Uuid, path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(path.display().to_string())
            }
            _ => Error::Io(e),
        })?;

        if !metadata.is_file() {
            return Err(Error::InvalidPath(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

        Ok(Self {
            request_id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            file_path: path.to_path_buf(),
            file_name,
            file_size: metadata.len(),
            block_size: crate::DEFAULT_BLOCK_SIZE,
            timestamp: Utc::now(),
        })
    }

    /// Send the file in blocks of `block_size` bytes.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Number of blocks the file is split into.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.file_size.div_ceil(self.block_size.max(1) as u64)
    }

    /// File name reduced to its last component, safe to join onto a local directory.
    #[must_use]
    pub fn safe_file_name(&self) -> String {
        Path::new(&self.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("download-{}", self.request_id))
    }

    /// A path under `dir` for this file that does not exist yet.
    ///
    /// `report.pdf` becomes `report (1).pdf`, then `report (2).pdf`, while
    /// the name is taken.
    #[must_use]
    pub fn save_path_in(&self, dir: &Path) -> PathBuf {
        let file_name = self.safe_file_name();
        let candidate = dir.join(&file_name);
        if !candidate.exists() {
            return candidate;
        }

        let (stem, ext) = match file_name.rfind('.') {
            Some(dot_idx) if dot_idx > 0 => file_name.split_at(dot_idx),
            _ => (file_name.as_str(), ""),
        };
        (1u32..)
            .map(|n| dir.join(format!("{stem} ({n}){ext}")))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

const fn default_block_size() -> usize {
    crate::DEFAULT_BLOCK_SIZE
}

/// The receiver's answer to a [`FileTransferRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferResponse {
    /// Request being answered
    pub request_id: Uuid,
    /// Answering user
    pub receiver_id: Uuid,
    /// Whether the transfer was accepted
    pub accepted: bool,
    /// Where the receiver will write the file (empty if rejected)
    pub save_path: PathBuf,
    /// Session chosen by the receiver for the data blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl FileTransferResponse {
    /// Accept `request`, writing to `save_path` under `session_id`.
    #[must_use]
    pub fn accept(request: &FileTransferRequest, save_path: PathBuf, session_id: Uuid) -> Self {
        Self {
            request_id: request.request_id,
            receiver_id: request.receiver_id,
            accepted: true,
            save_path,
            session_id: Some(session_id),
        }
    }

    /// Reject `request`.
    #[must_use]
    pub fn reject(request: &FileTransferRequest) -> Self {
        Self {
            request_id: request.request_id,
            receiver_id: request.receiver_id,
            accepted: false,
            save_path: PathBuf::new(),
            session_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"twelve bytes").unwrap();

        let request = FileTransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), &path).unwrap();
        assert_eq!(request.file_name, "notes.txt");
        assert_eq!(request.file_size, 12);
        assert_eq!(request.file_path, path);
    }

    #[test]
    fn test_request_rejects_missing_and_directories() {
        let dir = TempDir::new().unwrap();

        let missing = FileTransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), &dir.path().join("x"));
        assert!(matches!(missing, Err(Error::FileNotFound(_))));

        let directory = FileTransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), dir.path());
        assert!(matches!(directory, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_safe_file_name_strips_directories() {
        let mut request = FileTransferRequest {
            request_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            file_path: PathBuf::from("/x/y"),
            file_name: "../../etc/passwd".to_string(),
            file_size: 1,
            block_size: crate::DEFAULT_BLOCK_SIZE,
            timestamp: Utc::now(),
        };
        assert_eq!(request.safe_file_name(), "passwd");

        request.file_name = "..".to_string();
        assert!(request.safe_file_name().starts_with("download-"));
    }

    #[test]
    fn test_response_wire_shape() {
        let request = FileTransferRequest {
            request_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            file_path: PathBuf::from("/x/y"),
            file_name: "y".to_string(),
            file_size: 1,
            block_size: crate::DEFAULT_BLOCK_SIZE,
            timestamp: Utc::now(),
        };

        let rejected = serde_json::to_value(FileTransferResponse::reject(&request)).unwrap();
        assert_eq!(rejected["accepted"], false);
        assert_eq!(rejected["savePath"], "");
        assert!(rejected.get("sessionId").is_none());

        let session = Uuid::new_v4();
        let accepted =
            FileTransferResponse::accept(&request, PathBuf::from("/tmp/y"), session);
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["sessionId"], session.to_string());
    }

    #[test]
    fn test_block_count_and_default_block_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![0u8; 40]).unwrap();

        let request = FileTransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), &path).unwrap();
        assert_eq!(request.block_size, crate::DEFAULT_BLOCK_SIZE);
        assert_eq!(request.block_count(), 1);

        let request = request.with_block_size(16);
        assert_eq!(request.block_count(), 3);
        assert_eq!(request.with_block_size(0).block_size, 1);

        let mut value = serde_json::to_value(
            FileTransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), &path).unwrap(),
        )
        .unwrap();
        assert_eq!(value["blockSize"], crate::DEFAULT_BLOCK_SIZE);
        value.as_object_mut().unwrap().remove("blockSize");
        let decoded: FileTransferRequest = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.block_size, crate::DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_save_path_in_skips_taken_names() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.txt");
        std::fs::write(&source, b"x").unwrap();
        let mut request =
            FileTransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), &source).unwrap();
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();

        request.file_name = "notes.txt".to_string();
        assert_eq!(request.save_path_in(&downloads), downloads.join("notes.txt"));

        std::fs::write(downloads.join("notes.txt"), b"old").unwrap();
        std::fs::write(downloads.join("notes (1).txt"), b"older").unwrap();
        assert_eq!(request.save_path_in(&downloads), downloads.join("notes (2).txt"));

        request.file_name = ".profile".to_string();
        std::fs::write(downloads.join(".profile"), b"").unwrap();
        assert_eq!(request.save_path_in(&downloads), downloads.join(".profile (1)"));
    }
}
