//! Backup session state machine
//!
//! One session registers with the server, exchanges keys, uploads one file
//! and confirms its CRC:
//!
//! ```text
//! Idle -> Registering -> KeyExchanging -> Transferring -> AwaitingConfirmation -> Completed
//!                                              ^                   |
//!                                              +---- CRC retry ----+
//! ```
//!
//! Any phase may end in `Failed`. Every round trip completes before the next
//! request is sent. Terminal states wipe the AES key and close the transport.

mod error;
mod keys;
mod observer;
mod state;

pub use error::{ErrorKind, SessionError};
pub use observer::{SessionObserver, TracingObserver};
pub use state::SessionState;

use keys::SessionKeys;

use crate::transport::{CancelFlag, Transport};
use protocol::crc;
use protocol::crypto::{symmetric, PrivateKey};
use protocol::CryptoError;
use protocol::packets::{
    CrcPayload, FileCrcPayload, FilePacket, PublicKeyPayload, RegisterPayload,
};
use protocol::{
    ClientId, Request, RequestCodes, ResponseCode, ResponseHeader, WireRevision, CLIENT_ID_SIZE,
    CLIENT_VERSION, ENCRYPTED_AES_KEY_SIZE, MAX_FILENAME_LEN, MAX_RESPONSE_PAYLOAD,
    NAME_FIELD_SIZE,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Tunables for one session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub version: u8,
    pub wire_revision: WireRevision,
    /// Re-uploads allowed after a CRC mismatch
    pub crc_retries: u32,
    /// Ciphertext bytes per SEND_FILE packet
    pub max_packet_content: usize,
    /// Wait for FILE_RECEIVED after CRC_OK and CRC_FAIL
    pub await_confirmation_ack: bool,
    /// Bound on reading a response payload and on sending small requests
    pub receive_timeout: Duration,
    /// Bound on waiting for a response header
    pub header_timeout: Duration,
    /// Bound on sending file packets and waiting for the server's CRC
    pub upload_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            version: CLIENT_VERSION,
            wire_revision: WireRevision::default(),
            crc_retries: 1,
            max_packet_content: 1024 * 1024,
            await_confirmation_ack: true,
            receive_timeout: Duration::from_secs(30),
            header_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub client_id: ClientId,
    pub filename: String,
    pub original_size: u32,
    pub encrypted_size: u32,
    pub packets: u16,
    pub crc: u32,
    pub attempts: u32,
}

/// File checked against local limits before any request is sent
#[derive(Debug)]
struct UploadPlan {
    path: PathBuf,
    filename: String,
    original_size: u32,
    encrypted_size: u32,
    total_packets: u16,
}

struct EncryptedFile {
    crc: u32,
    ciphertext: Vec<u8>,
}

/// Which phase a response belongs to, for mapping unexpected codes
#[derive(Debug, Clone, Copy)]
enum Phase {
    Registration,
    KeyExchange,
    Transfer,
    Confirmation,
}

pub struct Session<T: Transport, O: SessionObserver = TracingObserver> {
    transport: Option<T>,
    observer: O,
    settings: SessionSettings,
    codes: RequestCodes,
    state: SessionState,
    client_id: ClientId,
    keys: SessionKeys,
    cancel: CancelFlag,
}

impl<T: Transport, O: SessionObserver> Session<T, O> {
    pub fn new(transport: T, private_key: PrivateKey, settings: SessionSettings, observer: O) -> Self {
        let codes = settings.wire_revision.request_codes();
        Self {
            transport: Some(transport),
            observer,
            settings,
            codes,
            state: SessionState::Idle,
            client_id: ClientId::random(),
            keys: SessionKeys::new(private_key),
            cancel: CancelFlag::new(),
        }
    }

    /// Use `flag` to learn about aborts requested through an `AbortHandle`
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Replace the random placeholder ID sent with the registration request
    #[cfg(test)]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn has_session_key(&self) -> bool {
        self.keys.aes_key().is_some()
    }

    /// Run the whole session for `username`, backing up `file_path`.
    ///
    /// Only valid from `Idle`. On return the session is `Completed` or
    /// `Failed`, the AES key is wiped and the transport closed.
    pub fn start(&mut self, username: &str, file_path: &Path) -> Result<SessionReport, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Validation(format!(
                "session already started (state: {})",
                self.state
            )));
        }

        let result = self.run(username, file_path);
        match &result {
            Ok(report) => {
                self.transition(SessionState::Completed);
                info!(
                    "Backup of {} complete ({} bytes, crc {}, {} attempt(s))",
                    report.filename, report.original_size, report.crc, report.attempts
                );
            }
            Err(e) => {
                self.transition(SessionState::Failed(e.kind()));
                warn!("Backup failed: {}", e);
            }
        }
        self.teardown();
        result
    }

    fn run(&mut self, username: &str, file_path: &Path) -> Result<SessionReport, SessionError> {
        let plan = plan_upload(username, file_path, self.keys.private_key(), &self.settings)?;

        self.transition(SessionState::Registering);
        self.register(username)?;

        self.transition(SessionState::KeyExchanging);
        self.exchange_keys(username)?;

        self.transition(SessionState::Transferring);
        let file = self.read_and_encrypt(&plan)?;

        let mut attempt = 1;
        loop {
            let server_crc = self.upload(&plan, &file)?;

            self.transition(SessionState::AwaitingConfirmation);
            if server_crc == file.crc {
                debug!("CRC {} confirmed by server", server_crc);
                self.confirm(self.codes.crc_ok, &plan.filename, true)?;
                return Ok(SessionReport {
                    client_id: self.client_id,
                    filename: plan.filename,
                    original_size: plan.original_size,
                    encrypted_size: plan.encrypted_size,
                    packets: plan.total_packets,
                    crc: file.crc,
                    attempts: attempt,
                });
            }

            if attempt > self.settings.crc_retries {
                warn!(
                    "CRC mismatch on attempt {} (client {}, server {}), giving up",
                    attempt, file.crc, server_crc
                );
                if let Err(e) = self.confirm(self.codes.crc_fail, &plan.filename, true) {
                    warn!("Failed to report CRC failure to server: {}", e);
                }
                return Err(SessionError::Integrity {
                    attempts: attempt,
                    client_crc: file.crc,
                    server_crc,
                });
            }

            warn!(
                "CRC mismatch on attempt {} (client {}, server {}), retrying",
                attempt, file.crc, server_crc
            );
            match self.codes.crc_retry {
                Some(code) => self.confirm(code, &plan.filename, false)?,
                None => self.confirm(self.codes.crc_fail, &plan.filename, true)?,
            }

            attempt += 1;
            self.transition(SessionState::Transferring);
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        let previous = self.state;
        self.state = next;
        self.observer.on_transition(previous, next);
    }

    fn teardown(&mut self) {
        debug_assert!(self.state.is_terminal());
        self.keys.wipe();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("Error closing transport: {}", e);
            }
        }
        debug_assert!(!self.has_session_key());
    }

    fn register(&mut self, username: &str) -> Result<(), SessionError> {
        let payload = RegisterPayload {
            username: username.to_string(),
        }
        .to_bytes()?;
        self.send(self.codes.register, payload, self.settings.receive_timeout)?;

        let header = self.receive_header(self.settings.header_timeout)?;
        let payload = match self.receive_payload(&header) {
            Err(SessionError::Network { .. } | SessionError::Timeout { .. }) => {
                return Err(SessionError::Registration(format!(
                    "response announced {} payload bytes but fewer arrived",
                    header.payload_size
                )))
            }
            result => result?,
        };
        Self::expect_code(&header, ResponseCode::RegisterSuccess, Phase::Registration)?;

        match payload.len() {
            0 => debug!("Server kept client ID {}", self.client_id),
            n if n >= CLIENT_ID_SIZE => {
                self.client_id = ClientId::from_slice(&payload)?;
                debug!("Server assigned client ID {}", self.client_id);
            }
            n => {
                return Err(SessionError::Registration(format!(
                    "{}-byte payload is too short for a client ID",
                    n
                )))
            }
        }

        info!("Registered as {} ({})", username, self.client_id);
        Ok(())
    }

    fn exchange_keys(&mut self, username: &str) -> Result<(), SessionError> {
        let public_key = self.keys.private_key().public_key_der()?;
        let payload = PublicKeyPayload {
            username: username.to_string(),
            public_key,
        }
        .to_bytes()?;
        self.send(self.codes.send_public_key, payload, self.settings.receive_timeout)?;

        let (header, payload) = self.receive(self.settings.header_timeout)?;
        Self::expect_code(&header, ResponseCode::PublicKeyAck, Phase::KeyExchange)?;

        if payload.len() != ENCRYPTED_AES_KEY_SIZE {
            return Err(SessionError::key_exchange(format!(
                "expected a {}-byte encrypted key, got {} bytes",
                ENCRYPTED_AES_KEY_SIZE,
                payload.len()
            )));
        }

        let aes_key = self
            .keys
            .private_key()
            .decrypt_session_key(&payload)
            .map_err(|e| match e {
                // Server and client disagree on the key size
                CryptoError::UnexpectedKeyLength { .. } => SessionError::Crypto(e),
                e => SessionError::KeyExchange {
                    reason: "could not recover the session key".into(),
                    source: Some(e),
                },
            })?;
        self.keys
            .install(aes_key)
            .map_err(|_| SessionError::key_exchange("session key already established"))?;

        debug!("Session key established");
        Ok(())
    }

    fn read_and_encrypt(&self, plan: &UploadPlan) -> Result<EncryptedFile, SessionError> {
        let plaintext = Zeroizing::new(std::fs::read(&plan.path).map_err(|e| {
            SessionError::Validation(format!("cannot read {:?}: {}", plan.path, e))
        })?);
        if plaintext.len() as u64 != plan.original_size as u64 {
            return Err(SessionError::Validation(format!(
                "{:?} changed size during backup",
                plan.path
            )));
        }

        let key = self
            .keys
            .aes_key()
            .ok_or_else(|| SessionError::Protocol("no session key established".into()))?;

        let crc = crc::checksum(&plaintext);
        let ciphertext = symmetric::encrypt(&plaintext, key)?;
        debug!(
            "Encrypted {} bytes into {} bytes (crc {})",
            plaintext.len(),
            ciphertext.len(),
            crc
        );

        Ok(EncryptedFile { crc, ciphertext })
    }

    /// Send every packet of the file, return the CRC the server computed
    fn upload(&mut self, plan: &UploadPlan, file: &EncryptedFile) -> Result<u32, SessionError> {
        for (index, chunk) in file.ciphertext.chunks(self.settings.max_packet_content).enumerate() {
            self.check_cancelled()?;
            let packet_number = index as u16 + 1;
            let payload = FilePacket {
                encrypted_size: plan.encrypted_size,
                original_size: plan.original_size,
                packet_number,
                total_packets: plan.total_packets,
                filename: plan.filename.clone(),
                content: chunk.to_vec(),
            }
            .to_bytes()?;
            self.send(self.codes.send_file, payload, self.settings.upload_timeout)?;
            self.observer.on_packet_sent(packet_number, plan.total_packets);
        }

        let (header, payload) = self.receive(self.settings.upload_timeout)?;
        Self::expect_code(&header, ResponseCode::FileCrc, Phase::Transfer)?;

        let response = FileCrcPayload::from_bytes(&payload)?;
        if let Some(client_id) = response.client_id {
            if client_id != self.client_id {
                return Err(SessionError::Protocol(format!(
                    "CRC response addressed to client {}",
                    client_id
                )));
            }
        }
        if let Some(content_size) = response.content_size {
            if content_size != plan.encrypted_size {
                return Err(SessionError::Protocol(format!(
                    "server received {} bytes, {} were sent",
                    content_size, plan.encrypted_size
                )));
            }
        }

        Ok(response.crc)
    }

    fn confirm(&mut self, code: u16, filename: &str, expect_ack: bool) -> Result<(), SessionError> {
        let payload = CrcPayload {
            filename: filename.to_string(),
        }
        .to_bytes()?;
        self.send(code, payload, self.settings.receive_timeout)?;

        if expect_ack && self.settings.await_confirmation_ack {
            let (header, _) = self.receive(self.settings.header_timeout)?;
            Self::expect_code(&header, ResponseCode::FileReceived, Phase::Confirmation)?;
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    fn transport(&mut self) -> Result<&mut T, SessionError> {
        self.transport
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("transport already closed".into()))
    }

    fn send(&mut self, code: u16, payload: Vec<u8>, timeout: Duration) -> Result<(), SessionError> {
        self.check_cancelled()?;
        let request = Request::new(self.client_id, self.settings.version, code, payload)?;
        let bytes = request.to_bytes();
        let cancel = self.cancel.clone();

        let transport = self.transport()?;
        let result = (|| {
            transport.set_write_timeout(Some(timeout))?;
            transport.write_all(&bytes)?;
            transport.flush()
        })();
        result.map_err(|e| Self::io_error(&cancel, "sending request", timeout, e))?;

        debug!("Sent request {} ({} payload bytes)", code, request.payload.len());
        Ok(())
    }

    fn receive(&mut self, header_timeout: Duration) -> Result<(ResponseHeader, Vec<u8>), SessionError> {
        let header = self.receive_header(header_timeout)?;
        let payload = self.receive_payload(&header)?;
        Ok((header, payload))
    }

    fn receive_header(&mut self, timeout: Duration) -> Result<ResponseHeader, SessionError> {
        self.check_cancelled()?;
        let cancel = self.cancel.clone();
        let transport = self.transport()?;

        let mut header_bytes = [0u8; ResponseHeader::SIZE];
        transport
            .set_read_timeout(Some(timeout))
            .and_then(|_| transport.read_exact(&mut header_bytes))
            .map_err(|e| Self::io_error(&cancel, "receiving response header", timeout, e))?;
        let header = ResponseHeader::from_bytes(&header_bytes)?;

        if header.payload_size > MAX_RESPONSE_PAYLOAD {
            return Err(SessionError::Protocol(format!(
                "response {} announces a {}-byte payload, limit is {}",
                header.code, header.payload_size, MAX_RESPONSE_PAYLOAD
            )));
        }

        debug!(
            "Received response {} (version {}, {} payload bytes)",
            header.code, header.version, header.payload_size
        );
        Ok(header)
    }

    fn receive_payload(&mut self, header: &ResponseHeader) -> Result<Vec<u8>, SessionError> {
        let timeout = self.settings.receive_timeout;
        let cancel = self.cancel.clone();
        let transport = self.transport()?;

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() {
            transport
                .set_read_timeout(Some(timeout))
                .and_then(|_| transport.read_exact(&mut payload))
                .map_err(|e| Self::io_error(&cancel, "receiving response payload", timeout, e))?;
        }
        Ok(payload)
    }

    fn io_error(cancel: &CancelFlag, action: &'static str, timeout: Duration, e: std::io::Error) -> SessionError {
        if cancel.is_cancelled() {
            SessionError::Cancelled
        } else {
            SessionError::io(action, timeout, e)
        }
    }

    /// Unrecognised codes are protocol errors everywhere; recognised but
    /// unexpected ones fail the current phase.
    fn expect_code(header: &ResponseHeader, expected: ResponseCode, phase: Phase) -> Result<(), SessionError> {
        let code = match ResponseCode::from_u16(header.code) {
            Some(code) if code == expected => return Ok(()),
            Some(code) => code,
            None => {
                return Err(SessionError::Protocol(format!(
                    "unrecognized response code {}",
                    header.code
                )))
            }
        };

        if code == ResponseCode::GenericServerError {
            return Err(SessionError::Protocol(format!(
                "server reported a general error (code {}) while expecting {:?}",
                header.code, expected
            )));
        }

        let reason = format!("expected {:?}, server answered {:?} ({})", expected, code, header.code);
        Err(match phase {
            Phase::Registration => SessionError::Registration(reason),
            Phase::KeyExchange => SessionError::key_exchange(reason),
            Phase::Transfer | Phase::Confirmation => SessionError::Protocol(reason),
        })
    }
}

/// Check `username`, `file_path` and `private_key` against the protocol
/// limits without touching the network
pub fn preflight(
    username: &str,
    file_path: &Path,
    private_key: &PrivateKey,
    settings: &SessionSettings,
) -> Result<(), SessionError> {
    plan_upload(username, file_path, private_key, settings).map(|_| ())
}

/// Local checks, done before anything is sent
fn plan_upload(
    username: &str,
    file_path: &Path,
    private_key: &PrivateKey,
    settings: &SessionSettings,
) -> Result<UploadPlan, SessionError> {
    if username.is_empty() {
        return Err(SessionError::Validation("username is empty".into()));
    }
    if username.len() >= NAME_FIELD_SIZE {
        return Err(SessionError::Validation(format!(
            "username of {} bytes does not fit the {}-byte field",
            username.len(),
            NAME_FIELD_SIZE
        )));
    }

    if settings.max_packet_content == 0 {
        return Err(SessionError::Validation("packet content size must be nonzero".into()));
    }

    let modulus = private_key.modulus_size();
    if modulus != ENCRYPTED_AES_KEY_SIZE {
        return Err(SessionError::Validation(format!(
            "private key modulus is {} bytes, server expects {}",
            modulus, ENCRYPTED_AES_KEY_SIZE
        )));
    }

    let filename = file_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            SessionError::Validation(format!("{:?} has no valid UTF-8 file name", file_path))
        })?
        .to_string();
    if filename.chars().count() > MAX_FILENAME_LEN || filename.len() >= NAME_FIELD_SIZE {
        return Err(SessionError::Validation(format!(
            "file name longer than {} characters",
            MAX_FILENAME_LEN
        )));
    }

    let metadata = std::fs::metadata(file_path).map_err(|e| {
        SessionError::Validation(format!("cannot access {:?}: {}", file_path, e))
    })?;
    if !metadata.is_file() {
        return Err(SessionError::Validation(format!("{:?} is not a regular file", file_path)));
    }
    if metadata.len() == 0 {
        return Err(SessionError::Validation(format!("{:?} is empty", file_path)));
    }

    let encrypted_len = symmetric::encrypted_len(metadata.len() as usize) as u64;
    if encrypted_len > u32::MAX as u64 {
        return Err(SessionError::Validation(format!(
            "{:?} is too large ({} bytes)",
            file_path,
            metadata.len()
        )));
    }

    let packets = (encrypted_len as usize).div_ceil(settings.max_packet_content);
    let total_packets = u16::try_from(packets).map_err(|_| {
        SessionError::Validation(format!(
            "{:?} needs {} packets, more than the protocol allows",
            file_path, packets
        ))
    })?;

    Ok(UploadPlan {
        path: file_path.to_path_buf(),
        filename,
        original_size: metadata.len() as u32,
        encrypted_size: encrypted_len as u32,
        total_packets,
    })
}
