//! Owner of every transfer on one node.
//!
//! The manager never touches the network. Frames that must go out are
//! reported as [`TransferEvent`]s; the owning task turns them into
//! [`NetworkMessage`]s with [`TransferEvent::to_network_message`] and feeds
//! inbound frames back through [`FileTransferManager::handle_message`].
//!
//! Sessions ask to be pumped again after a delay. The manager keeps one
//! deadline per session; the owner waits on [`FileTransferManager::wait_due`]
//! and then calls [`FileTransferManager::pump_due`].

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    FileTransferRequest, FileTransferResponse, FileTransferSession, NextStep, SessionEvent,
    SessionOptions, TransferStatus,
};
use crate::config::TransferConfig;
use crate::contacts::ContactPolicy;
use crate::error::{Error, Result};
use crate::history::{HistorySink, TransferRecord};
use crate::message::{Message, MessageSink};
use crate::protocol::{Content, NetworkMessage};

/// Notice delivered when an outbound transfer hits the blacklist.
const BLOCKED_NOTICE: &str = "You are on the recipient's blacklist; the file cannot be sent";

/// Events reported by the [`FileTransferManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// An offer to transmit to its receiver
    RequestSent(FileTransferRequest),
    /// An offer waiting for a manual accept/reject
    RequestReceived(FileTransferRequest),
    /// An answer to transmit to the requester
    ResponseSent {
        /// User who made the request
        sender_id: Uuid,
        /// The answer
        response: FileTransferResponse,
    },
    /// The peer answered one of our offers
    ResponseReceived(FileTransferResponse),
    /// A block to transmit to the receiver
    DataBlock {
        /// Session id
        session_id: Uuid,
        /// Destination user
        receiver_id: Uuid,
        /// Block index
        block_index: u64,
        /// Block bytes
        data: Vec<u8>,
    },
    /// Bytes moved so far
    Progress {
        /// Session id
        session_id: Uuid,
        /// Bytes read or written
        bytes_transferred: u64,
        /// Total file size
        total_bytes: u64,
    },
    /// A session changed status
    StatusChanged {
        /// Session id
        session_id: Uuid,
        /// New status
        status: TransferStatus,
    },
    /// A session failed
    Error {
        /// Session id
        session_id: Uuid,
        /// Error description
        message: String,
    },
    /// A session ended
    Completed {
        /// Session id
        session_id: Uuid,
        /// Whether every byte was moved
        success: bool,
    },
}

impl TransferEvent {
    /// The frame to transmit for this event, if any.
    #[must_use]
    pub fn to_network_message(&self, local_id: Uuid) -> Option<NetworkMessage> {
        match self {
            Self::RequestSent(request) => Some(NetworkMessage::file_transfer_request(
                local_id,
                request.clone(),
            )),
            Self::ResponseSent { response, .. } => Some(NetworkMessage::file_transfer_response(
                local_id,
                response.clone(),
            )),
            Self::DataBlock {
                session_id,
                block_index,
                data,
                ..
            } => Some(NetworkMessage::file_data(
                local_id,
                *session_id,
                *block_index,
                data.clone(),
            )),
            _ => None,
        }
    }

    /// The user a transmittable event is addressed to.
    #[must_use]
    pub const fn destination(&self) -> Option<Uuid> {
        match self {
            Self::RequestSent(request) => Some(request.receiver_id),
            Self::ResponseSent { sender_id, .. } => Some(*sender_id),
            Self::DataBlock { receiver_id, .. } => Some(*receiver_id),
            _ => None,
        }
    }
}

/// Orchestrates transfer requests, responses and sessions.
pub struct FileTransferManager {
    options: SessionOptions,
    download_dir: PathBuf,
    contacts: Arc<dyn ContactPolicy>,
    messages: Box<dyn MessageSink>,
    history: Box<dyn HistorySink>,
    incognito: bool,
    sessions: HashMap<Uuid, FileTransferSession>,
    /// Outbound offers awaiting an answer, by request id
    pending_requests: HashMap<Uuid, FileTransferRequest>,
    /// When each session next wants to be pumped
    schedule: HashMap<Uuid, Instant>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl std::fmt::Debug for FileTransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransferManager")
            .field("download_dir", &self.download_dir)
            .field("incognito", &self.incognito)
            .field("sessions", &self.sessions.len())
            .field("pending_requests", &self.pending_requests.len())
            .finish_non_exhaustive()
    }
}

impl FileTransferManager {
    /// Create a manager and the receiving end of its event stream.
    #[must_use]
    pub fn new(
        config: &TransferConfig,
        download_dir: PathBuf,
        contacts: Arc<dyn ContactPolicy>,
        messages: Box<dyn MessageSink>,
        history: Box<dyn HistorySink>,
    ) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();

        let manager = Self {
            options: SessionOptions::from(config),
            download_dir,
            contacts,
            messages,
            history,
            incognito: false,
            sessions: HashMap::new(),
            pending_requests: HashMap::new(),
            schedule: HashMap::new(),
            session_tx,
            session_rx,
            events,
        };

        (manager, events_rx)
    }

    /// Offer `file_path` to `receiver_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a readable regular file, or
    /// `Error::PeerBlocked` if the receiver is blacklisted. In the blacklist
    /// case a system notice is delivered to the message path first.
    pub fn initiate_file_transfer(
        &mut self,
        sender_id: Uuid,
        receiver_id: Uuid,
        file_path: &Path,
    ) -> Result<FileTransferRequest> {
        let request = FileTransferRequest::new(sender_id, receiver_id, file_path)?
            .with_block_size(self.options.block_size);

        if self.contacts.is_in_blacklist(&receiver_id) {
            tracing::info!(%receiver_id, "Not offering file to blacklisted user");
            self.messages
                .receive_message(Message::system(sender_id, receiver_id, BLOCKED_NOTICE));
            return Err(Error::PeerBlocked(receiver_id));
        }

        tracing::debug!(
            request_id = %request.request_id,
            "Offering '{}' ({} bytes) to {}",
            request.file_name,
            request.file_size,
            receiver_id
        );

        self.pending_requests
            .insert(request.request_id, request.clone());
        self.emit(TransferEvent::RequestSent(request.clone()));
        Ok(request)
    }

    /// Apply the contact policy to an inbound offer.
    pub fn handle_file_transfer_request(&mut self, request: FileTransferRequest) {
        if self.contacts.is_in_blacklist(&request.sender_id) {
            tracing::info!(sender_id = %request.sender_id, "Rejecting offer from blacklisted user");
            self.reject_file_transfer(&request);
            return;
        }

        if self.contacts.is_in_whitelist(&request.sender_id) {
            let save_path = request.save_path_in(&self.download_dir);
            tracing::info!(
                sender_id = %request.sender_id,
                "Auto-accepting '{}' from whitelisted user",
                request.file_name
            );
            self.accept_file_transfer(&request, save_path);
            return;
        }

        self.emit(TransferEvent::RequestReceived(request));
    }

    /// Handle the answer to one of our offers.
    pub fn handle_file_transfer_response(&mut self, response: FileTransferResponse) {
        let Some(request) = self.pending_requests.remove(&response.request_id) else {
            tracing::debug!(request_id = %response.request_id, "Response for unknown request");
            return;
        };

        let session_id = response.session_id.unwrap_or_else(Uuid::new_v4);
        let accepted = response.accepted;
        self.emit(TransferEvent::ResponseReceived(response));

        if !accepted {
            tracing::info!(request_id = %request.request_id, "Offer of '{}' was rejected", request.file_name);
            return;
        }

        let session = FileTransferSession::sender(
            session_id,
            &request,
            self.options,
            self.session_tx.clone(),
        );
        self.launch(session);
    }

    /// Accept an offer, writing the file to `save_path`.
    ///
    /// Returns the id of the new receiving session.
    pub fn accept_file_transfer(&mut self, request: &FileTransferRequest, save_path: PathBuf) -> Uuid {
        let session_id = Uuid::new_v4();

        self.emit(TransferEvent::ResponseSent {
            sender_id: request.sender_id,
            response: FileTransferResponse::accept(request, save_path.clone(), session_id),
        });

        let session = FileTransferSession::receiver(
            session_id,
            request,
            save_path,
            self.options,
            self.session_tx.clone(),
        );
        self.launch(session);
        session_id
    }

    /// Reject an offer.
    pub fn reject_file_transfer(&mut self, request: &FileTransferRequest) {
        self.emit(TransferEvent::ResponseSent {
            sender_id: request.sender_id,
            response: FileTransferResponse::reject(request),
        });
    }

    /// Route an inbound block to its session.
    pub fn handle_file_data(&mut self, session_id: Uuid, block_index: u64, data: Vec<u8>) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            tracing::debug!(%session_id, block_index, "Block for unknown session");
            return;
        };

        let step = session.process_data_block(block_index, data);
        self.reschedule(session_id, step);
        self.forward_session_events(None);
    }

    /// Dispatch a transfer-related frame.
    ///
    /// Returns `false` if the frame carries no transfer content.
    pub fn handle_message(&mut self, message: &NetworkMessage) -> bool {
        match message.content() {
            Content::FileTransferRequest(request) => {
                self.handle_file_transfer_request(request.clone());
            }
            Content::FileTransferResponse(response) => {
                self.handle_file_transfer_response(response.clone());
            }
            Content::FileData(payload) => {
                self.handle_file_data(payload.session_id, payload.block_index, payload.data.clone());
            }
            _ => return false,
        }
        true
    }

    /// Cancel a session and drop it.
    pub fn cancel_transfer(&mut self, session_id: Uuid) {
        self.schedule.remove(&session_id);
        let Some(mut session) = self.sessions.remove(&session_id) else {
            tracing::debug!(%session_id, "Cancel of unknown session");
            return;
        };

        session.cancel();
        self.forward_session_events(Some(&session));
    }

    /// Pause a session.
    pub fn pause_transfer(&mut self, session_id: Uuid) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            tracing::debug!(%session_id, "Pause of unknown session");
            return;
        };

        session.pause();
        self.schedule.remove(&session_id);
        self.forward_session_events(None);
    }

    /// Resume a paused session.
    pub fn resume_transfer(&mut self, session_id: Uuid) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            tracing::debug!(%session_id, "Resume of unknown session");
            return;
        };

        let step = session.resume();
        self.reschedule(session_id, step);
        self.forward_session_events(None);
    }

    /// Turn incognito mode on or off.
    ///
    /// Turning it on clears the stored history.
    pub fn set_incognito_mode(&mut self, enabled: bool) {
        if enabled && !self.incognito {
            if let Err(e) = self.history.clear_all() {
                tracing::warn!("Failed to clear transfer history: {}", e);
            }
        }
        self.incognito = enabled;
    }

    /// Whether finished transfers go unrecorded.
    #[must_use]
    pub const fn is_incognito_mode(&self) -> bool {
        self.incognito
    }

    /// Directory auto-accepted files are written to.
    #[must_use]
    pub fn default_download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Sessions that have not finished.
    #[must_use]
    pub fn active_transfers(&self) -> Vec<&FileTransferSession> {
        self.sessions.values().collect()
    }

    /// Look up a session.
    #[must_use]
    pub fn transfer_session(&self, session_id: &Uuid) -> Option<&FileTransferSession> {
        self.sessions.get(session_id)
    }

    /// Offers still waiting for an answer.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<&FileTransferRequest> {
        self.pending_requests.values().collect()
    }

    /// Earliest time any session wants to be pumped.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.schedule.values().min().copied()
    }

    /// A future that resolves at the next deadline, or never if none is set.
    ///
    /// The future does not borrow the manager, so it can sit in a
    /// `tokio::select!` next to branches that use it mutably.
    pub fn wait_due(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.next_deadline();
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }

    /// Pump every session whose deadline is at or before `now`.
    pub fn pump_due(&mut self, now: Instant) {
        let due: Vec<Uuid> = self
            .schedule
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for session_id in due {
            self.schedule.remove(&session_id);
            if let Some(session) = self.sessions.get_mut(&session_id) {
                let step = session.pump();
                self.reschedule(session_id, step);
            }
        }

        self.forward_session_events(None);
    }

    fn launch(&mut self, mut session: FileTransferSession) {
        let session_id = session.session_id();
        let step = session.start();
        self.sessions.insert(session_id, session);
        self.reschedule(session_id, step);
        self.forward_session_events(None);
    }

    fn reschedule(&mut self, session_id: Uuid, step: NextStep) {
        match step {
            NextStep::Idle => {
                self.schedule.remove(&session_id);
            }
            NextStep::PumpAfter(delay) => {
                self.schedule.insert(session_id, Instant::now() + delay);
            }
        }
    }

    /// Translate queued session events, retiring sessions that completed.
    ///
    /// `detached` is a session already removed from the table whose final
    /// events are still queued.
    fn forward_session_events(&mut self, detached: Option<&FileTransferSession>) {
        while let Ok(event) = self.session_rx.try_recv() {
            match event {
                SessionEvent::DataBlock {
                    session_id,
                    block_index,
                    data,
                } => {
                    let Some(receiver_id) = find_session(&self.sessions, detached, session_id)
                        .map(FileTransferSession::receiver_id)
                    else {
                        continue;
                    };
                    self.emit(TransferEvent::DataBlock {
                        session_id,
                        receiver_id,
                        block_index,
                        data,
                    });
                }
                SessionEvent::Progress {
                    session_id,
                    bytes_transferred,
                    total_bytes,
                } => self.emit(TransferEvent::Progress {
                    session_id,
                    bytes_transferred,
                    total_bytes,
                }),
                SessionEvent::StatusChanged { session_id, status } => {
                    self.emit(TransferEvent::StatusChanged { session_id, status });
                }
                SessionEvent::Error {
                    session_id,
                    message,
                } => self.emit(TransferEvent::Error {
                    session_id,
                    message,
                }),
                SessionEvent::Completed {
                    session_id,
                    success,
                } => {
                    self.schedule.remove(&session_id);
                    let retired = self.sessions.remove(&session_id);
                    let finished = retired
                        .as_ref()
                        .or_else(|| detached.filter(|s| s.session_id() == session_id));
                    if let Some(session) = finished {
                        self.record(TransferRecord::from_session(session, success));
                    }
                    self.emit(TransferEvent::Completed {
                        session_id,
                        success,
                    });
                }
            }
        }
    }

    fn record(&mut self, record: TransferRecord) {
        if self.incognito {
            return;
        }
        if let Err(e) = self.history.append(record) {
            tracing::warn!("Failed to record transfer history: {}", e);
        }
    }

    fn emit(&self, event: TransferEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Transfer event receiver dropped");
        }
    }
}

fn find_session<'a>(
    sessions: &'a HashMap<Uuid, FileTransferSession>,
    detached: Option<&'a FileTransferSession>,
    session_id: Uuid,
) -> Option<&'a FileTransferSession> {
    sessions
        .get(&session_id)
        .or_else(|| detached.filter(|s| s.session_id() == session_id))
}
