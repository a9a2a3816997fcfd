//! Backup jobs: one `transfer.info` each, run as an independent session

use crate::config::Config;
use crate::persist::TransferInfo;
use crate::session::{self, Session, SessionError, SessionReport, SessionSettings, TracingObserver};
use crate::transport::{self, AbortHandle, CancelFlag};
use anyhow::Result;
use protocol::crypto::PrivateKey;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BackupJob {
    /// Name used in logs and the summary
    pub label: String,
    pub info: TransferInfo,
}

impl BackupJob {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let info = TransferInfo::load(&path)?;
        Ok(Self {
            label: path.as_ref().display().to_string(),
            info,
        })
    }
}

pub fn session_settings(config: &Config) -> Result<SessionSettings> {
    Ok(SessionSettings {
        version: config.protocol.version,
        wire_revision: config.protocol.wire_revision()?,
        crc_retries: config.protocol.crc_retries,
        max_packet_content: config.protocol.max_packet_content,
        await_confirmation_ack: config.protocol.await_confirmation_ack,
        receive_timeout: config.network.receive_timeout(),
        header_timeout: config.network.header_timeout(),
        upload_timeout: config.network.upload_timeout(),
    })
}

#[derive(Debug, Default)]
struct Registry {
    aborted: bool,
    next_id: u64,
    jobs: HashMap<u64, Vec<AbortHandle>>,
}

/// Abort handles of every running job, so Ctrl-C can stop them all
#[derive(Debug, Clone, Default)]
pub struct AbortRegistry(Arc<Mutex<Registry>>);

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking a job. Its handles are released when the guard drops.
    pub fn enroll(&self) -> Enrollment {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.jobs.insert(id, Vec::new());
        Enrollment {
            registry: self.clone(),
            id,
        }
    }

    /// Abort every running job and any enrolled later. Returns the number of running jobs.
    pub fn abort_all(&self) -> usize {
        let mut registry = self.lock();
        registry.aborted = true;
        for handle in registry.jobs.values().flatten() {
            handle.abort();
        }
        registry.jobs.len()
    }
}

/// One job's place in an [`AbortRegistry`]
#[derive(Debug)]
pub struct Enrollment {
    registry: AbortRegistry,
    id: u64,
}

impl Enrollment {
    /// Track `handle`. Aborted immediately if `abort_all` already ran.
    pub fn register(&self, handle: AbortHandle) {
        let mut registry = self.registry.lock();
        if registry.aborted {
            handle.abort();
        }
        registry.jobs.entry(self.id).or_default().push(handle);
    }
}

impl Drop for Enrollment {
    fn drop(&mut self) {
        self.registry.lock().jobs.remove(&self.id);
    }
}

/// Run one backup job to completion on the calling thread
pub fn run_job(
    job: &BackupJob,
    private_key: PrivateKey,
    settings: SessionSettings,
    connect_timeout: Duration,
    registry: &AbortRegistry,
) -> Result<SessionReport, SessionError> {
    let flag = CancelFlag::new();
    let enrollment = registry.enroll();
    enrollment.register(AbortHandle::flag_only(flag.clone()));

    session::preflight(&job.info.username, &job.info.file_path, &private_key, &settings)?;
    if flag.is_cancelled() {
        return Err(SessionError::Cancelled);
    }

    let address = job.info.server_address();
    info!("Connecting to {}", address);
    let stream = transport::connect(&address, connect_timeout).map_err(|e| {
        if flag.is_cancelled() {
            SessionError::Cancelled
        } else {
            SessionError::io("connecting", connect_timeout, e)
        }
    })?;

    match AbortHandle::new(flag.clone(), &stream) {
        Ok(handle) => enrollment.register(handle),
        Err(e) => warn!("Socket cannot be aborted, relying on timeouts: {}", e),
    }

    let mut session = Session::new(stream, private_key, settings, TracingObserver::new(&job.label))
        .with_cancel_flag(flag);
    debug!("Session client ID {}", session.client_id());
    let result = session.start(&job.info.username, &job.info.file_path);
    debug!("Session ended {}", session.state());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ErrorKind;
    use crate::test_support::{shared_private_key, temp_dir, BackupServer, TempDir, TempDirExt};
    use protocol::WireRevision;
    use std::net::TcpListener;

    fn job(dir: &TempDir, address: &str) -> BackupJob {
        let file = dir.write("report.pdf", b"quarterly numbers");
        let (host, port) = address.rsplit_once(':').unwrap();
        BackupJob {
            label: "test".into(),
            info: TransferInfo {
                host: host.into(),
                port: port.parse().unwrap(),
                username: "alice".into(),
                file_path: file,
            },
        }
    }

    fn settings() -> SessionSettings {
        session_settings(&Config::default()).unwrap()
    }

    #[test]
    fn test_session_settings_from_config() {
        let config = Config::from_toml(
            r#"
            [network]
            header_timeout_sec = 4

            [protocol]
            wire_revision = "extended"
            crc_retries = 3
            "#,
        )
        .unwrap();

        let settings = session_settings(&config).unwrap();
        assert_eq!(settings.wire_revision, WireRevision::Extended);
        assert_eq!(settings.crc_retries, 3);
        assert_eq!(settings.header_timeout, Duration::from_secs(4));
        assert_eq!(settings.receive_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_job_load() {
        let dir = temp_dir();
        let path = dir.write("transfer.info", b"127.0.0.1:1234\nalice\n/tmp/file.bin\n");

        let job = BackupJob::load(&path).unwrap();
        assert_eq!(job.info.username, "alice");
        assert_eq!(job.label, path.display().to_string());
    }

    #[test]
    fn test_run_job_against_server() {
        let dir = temp_dir();
        let server = BackupServer::new(WireRevision::Shared).spawn();
        let job = job(&dir, server.address());

        let report = run_job(
            &job,
            shared_private_key().clone(),
            settings(),
            Duration::from_secs(5),
            &AbortRegistry::new(),
        )
        .unwrap();

        assert_eq!(report.filename, "report.pdf");
        assert_eq!(report.original_size, 17);
        assert_eq!(server.join().len(), 4);
    }

    #[test]
    fn test_finished_jobs_release_their_handles() {
        let dir = temp_dir();
        let server = BackupServer::new(WireRevision::Shared).spawn();
        let job = job(&dir, server.address());
        let registry = AbortRegistry::new();

        run_job(
            &job,
            shared_private_key().clone(),
            settings(),
            Duration::from_secs(5),
            &registry,
        )
        .unwrap();
        server.join();

        assert_eq!(registry.abort_all(), 0);
    }

    #[test]
    fn test_enrollment_tracks_running_job() {
        let registry = AbortRegistry::new();
        let flag = CancelFlag::new();

        let enrollment = registry.enroll();
        enrollment.register(AbortHandle::flag_only(flag.clone()));
        assert_eq!(registry.abort_all(), 1);
        assert!(flag.is_cancelled());

        drop(enrollment);
        assert_eq!(registry.abort_all(), 0);

        let late = CancelFlag::new();
        registry.enroll().register(AbortHandle::flag_only(late.clone()));
        assert!(late.is_cancelled());
    }

    #[test]
    fn test_connection_refused() {
        let dir = temp_dir();
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let job = job(&dir, &address);

        let err = run_job(
            &job,
            shared_private_key().clone(),
            settings(),
            Duration::from_secs(2),
            &AbortRegistry::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_aborted_registry_cancels_new_jobs() {
        let dir = temp_dir();
        let job = job(&dir, "127.0.0.1:9");
        let registry = AbortRegistry::new();
        assert_eq!(registry.abort_all(), 0);

        let err = run_job(
            &job,
            shared_private_key().clone(),
            settings(),
            Duration::from_secs(2),
            &registry,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_invalid_job_fails_before_connecting() {
        let dir = temp_dir();
        let mut job = job(&dir, "127.0.0.1:9");
        job.info.file_path = dir.write("empty.bin", b"");

        let err = run_job(
            &job,
            shared_private_key().clone(),
            settings(),
            Duration::from_secs(2),
            &AbortRegistry::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
