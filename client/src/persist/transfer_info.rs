//! `transfer.info` parsing
//!
//! Three lines: `host:port`, username, path of the file to back up.

use anyhow::{Context, Result};
use protocol::MAX_USERNAME_LEN;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub file_path: PathBuf,
}

impl TransferInfo {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read transfer info: {:?}", path.as_ref()))?;
        Self::parse(&contents).with_context(|| format!("Invalid transfer info: {:?}", path.as_ref()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents.lines().map(str::trim);

        let address = lines.next().filter(|l| !l.is_empty()).context("missing server address line")?;
        let username = lines.next().filter(|l| !l.is_empty()).context("missing username line")?;
        let file_path = lines.next().filter(|l| !l.is_empty()).context("missing file path line")?;

        if lines.any(|l| !l.is_empty()) {
            anyhow::bail!("unexpected content after the third line");
        }

        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("server address '{}' is not host:port", address))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            anyhow::bail!("server address '{}' has an empty host", address);
        }
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in server address '{}'", address))?;

        if username.chars().count() > MAX_USERNAME_LEN {
            anyhow::bail!("username longer than {} characters", MAX_USERNAME_LEN);
        }

        Ok(Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            file_path: PathBuf::from(file_path),
        })
    }

    /// Address in a form accepted by `ToSocketAddrs`
    pub fn server_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let info = TransferInfo::parse("127.0.0.1:1234\nalice\n/home/alice/notes.txt\n").unwrap();
        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.port, 1234);
        assert_eq!(info.username, "alice");
        assert_eq!(info.file_path, PathBuf::from("/home/alice/notes.txt"));
        assert_eq!(info.server_address(), "127.0.0.1:1234");
    }

    #[test]
    fn test_parse_crlf_and_trailing_blank_lines() {
        let info = TransferInfo::parse("backup.example.com:8080\r\nbob\r\ndata.bin\r\n\r\n").unwrap();
        assert_eq!(info.host, "backup.example.com");
        assert_eq!(info.port, 8080);
        assert_eq!(info.username, "bob");
        assert_eq!(info.file_path, PathBuf::from("data.bin"));
    }

    #[test]
    fn test_parse_ipv6() {
        let info = TransferInfo::parse("[::1]:9000\ncarol\nfile.txt").unwrap();
        assert_eq!(info.host, "::1");
        assert_eq!(info.server_address(), "[::1]:9000");
    }

    #[test]
    fn test_parse_errors() {
        assert!(TransferInfo::parse("").is_err());
        assert!(TransferInfo::parse("127.0.0.1:1234\nalice").is_err());
        assert!(TransferInfo::parse("127.0.0.1\nalice\nfile").is_err());
        assert!(TransferInfo::parse("127.0.0.1:99999\nalice\nfile").is_err());
        assert!(TransferInfo::parse(":1234\nalice\nfile").is_err());
        assert!(TransferInfo::parse("127.0.0.1:1234\nalice\nfile\nextra").is_err());

        let long_name = format!("127.0.0.1:1234\n{}\nfile", "a".repeat(101));
        assert!(TransferInfo::parse(&long_name).is_err());
    }
}
