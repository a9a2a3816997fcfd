//! Fixtures shared by the client's unit tests

use crate::session::{SessionObserver, SessionState};
use protocol::crc;
use protocol::crypto::{asymmetric, symmetric, AesKey, PrivateKey};
use protocol::packets::{FileCrcPayload, FilePacket, PublicKeyPayload};
use protocol::{
    ClientId, RequestCodes, RequestHeader, ResponseCode, ResponseHeader, WireRevision,
    CLIENT_VERSION, RSA_KEY_BITS,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

pub use tempfile::TempDir;

pub fn temp_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Fixture file helpers for a scratch directory
pub trait TempDirExt {
    fn write(&self, name: &str, contents: &[u8]) -> PathBuf;
}

impl TempDirExt for TempDir {
    fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

/// RSA keys are slow to generate in debug builds, so tests share one
pub fn shared_private_key() -> &'static PrivateKey {
    static KEY: OnceLock<PrivateKey> = OnceLock::new();
    KEY.get_or_init(|| PrivateKey::generate(RSA_KEY_BITS).unwrap())
}

/// Observer that records everything it sees
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    transitions: Arc<Mutex<Vec<(SessionState, SessionState)>>>,
    packets: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl RecordingObserver {
    pub fn transitions(&self) -> Vec<(SessionState, SessionState)> {
        self.transitions.lock().unwrap().clone()
    }

    /// Every state entered, in order
    pub fn states(&self) -> Vec<SessionState> {
        self.transitions().into_iter().map(|(_, to)| to).collect()
    }

    pub fn packets(&self) -> Vec<(u16, u16)> {
        self.packets.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_transition(&self, from: SessionState, to: SessionState) {
        self.transitions.lock().unwrap().push((from, to));
    }

    fn on_packet_sent(&self, packet_number: u16, total_packets: u16) {
        self.packets.lock().unwrap().push((packet_number, total_packets));
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub header: RequestHeader,
    pub payload: Vec<u8>,
}

/// What the mock server does after reading a request
#[derive(Debug, Clone)]
pub enum Reply {
    Respond { code: u16, payload: Vec<u8> },
    Raw(Vec<u8>),
    Silent,
    Close,
}

impl Reply {
    pub fn code(code: ResponseCode) -> Self {
        Self::Respond {
            code: code.to_u16(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(code: ResponseCode, payload: Vec<u8>) -> Self {
        Self::Respond {
            code: code.to_u16(),
            payload,
        }
    }
}

pub fn response_bytes(code: u16, payload: &[u8]) -> Vec<u8> {
    let header = ResponseHeader {
        version: CLIENT_VERSION,
        code,
        payload_size: payload.len() as u32,
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Single-connection TCP server driven by a reply function
pub struct MockServer {
    address: String,
    handle: thread::JoinHandle<Vec<ReceivedRequest>>,
}

impl MockServer {
    pub fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(&ReceivedRequest) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let handle = thread::spawn(move || {
            let mut received = Vec::new();
            let Ok((mut stream, _)) = listener.accept() else {
                return received;
            };
            stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

            loop {
                let mut header = [0u8; RequestHeader::SIZE];
                if stream.read_exact(&mut header).is_err() {
                    break;
                }
                let header = RequestHeader::from_bytes(&header).unwrap();
                let mut payload = vec![0u8; header.payload_size as usize];
                if stream.read_exact(&mut payload).is_err() {
                    break;
                }

                let request = ReceivedRequest { header, payload };
                let reply = handler(&request);
                received.push(request);

                let written = match reply {
                    Reply::Respond { code, payload } => stream.write_all(&response_bytes(code, &payload)),
                    Reply::Raw(bytes) => stream.write_all(&bytes),
                    Reply::Silent => Ok(()),
                    Reply::Close => break,
                };
                if written.is_err() {
                    break;
                }
            }
            received
        });

        Self { address, handle }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connect(&self) -> TcpStream {
        crate::transport::connect(&self.address, Duration::from_secs(5)).unwrap()
    }

    /// Wait for the client to hang up and return what it sent
    pub fn join(self) -> Vec<ReceivedRequest> {
        self.handle.join().unwrap()
    }
}

/// In-process server that speaks the real protocol
pub struct BackupServer {
    codes: RequestCodes,
    /// Client ID returned on registration; `None` sends an empty payload
    pub assigned_id: Option<ClientId>,
    /// Number of CRC responses to corrupt before answering honestly
    pub corrupt_crcs: u32,
    /// Answer with the long FILE_CRC form carrying this client ID
    pub long_form_id: Option<ClientId>,
    /// Decrypted uploads, one entry per complete attempt
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
    aes_key: Option<AesKey>,
    ciphertext: Vec<u8>,
}

impl BackupServer {
    pub fn new(revision: WireRevision) -> Self {
        Self {
            codes: revision.request_codes(),
            assigned_id: None,
            corrupt_crcs: 0,
            long_form_id: None,
            received: Arc::default(),
            aes_key: None,
            ciphertext: Vec::new(),
        }
    }

    pub fn handle(&mut self, request: &ReceivedRequest) -> Reply {
        let code = request.header.code;
        if code == self.codes.register {
            let payload = self
                .assigned_id
                .map(|id| id.as_bytes().to_vec())
                .unwrap_or_default();
            Reply::with_payload(ResponseCode::RegisterSuccess, payload)
        } else if code == self.codes.send_public_key {
            let public_key = PublicKeyPayload::from_bytes(&request.payload).unwrap().public_key;
            let key = AesKey::generate();
            let encrypted = asymmetric::encrypt_session_key(&public_key, &key).unwrap();
            self.aes_key = Some(key);
            Reply::with_payload(ResponseCode::PublicKeyAck, encrypted)
        } else if code == self.codes.send_file {
            self.receive_packet(request)
        } else if Some(code) == self.codes.crc_retry {
            Reply::Silent
        } else if code == self.codes.crc_ok || code == self.codes.crc_fail {
            Reply::code(ResponseCode::FileReceived)
        } else {
            Reply::code(ResponseCode::GenericServerError)
        }
    }

    fn receive_packet(&mut self, request: &ReceivedRequest) -> Reply {
        let packet = FilePacket::from_bytes(&request.payload).unwrap();
        if packet.packet_number == 1 {
            self.ciphertext.clear();
        }
        self.ciphertext.extend_from_slice(&packet.content);
        if packet.packet_number < packet.total_packets {
            return Reply::Silent;
        }

        let key = self.aes_key.as_ref().unwrap();
        let plaintext = symmetric::decrypt(&self.ciphertext, key).unwrap();
        let mut crc = crc::checksum(&plaintext);
        self.received.lock().unwrap().push(plaintext);
        if self.corrupt_crcs > 0 {
            self.corrupt_crcs -= 1;
            crc ^= 0xdead_beef;
        }

        let response = match self.long_form_id {
            Some(client_id) => FileCrcPayload {
                client_id: Some(client_id),
                content_size: Some(self.ciphertext.len() as u32),
                filename: Some(packet.filename),
                crc,
            },
            None => FileCrcPayload::short(crc),
        };
        Reply::with_payload(ResponseCode::FileCrc, response.to_bytes().unwrap())
    }

    pub fn spawn(mut self) -> MockServer {
        MockServer::spawn(move |request| self.handle(request))
    }
}
