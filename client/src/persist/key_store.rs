//! RSA private key file (DER)

use anyhow::{Context, Result};
use protocol::crypto::PrivateKey;
use protocol::RSA_KEY_BITS;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

pub fn load_private_key<P: AsRef<Path>>(path: P) -> Result<PrivateKey> {
    let der = std::fs::read(&path)
        .with_context(|| format!("Failed to read private key: {:?}", path.as_ref()))?;
    PrivateKey::from_der(&der)
        .with_context(|| format!("Invalid private key file: {:?}", path.as_ref()))
}

/// Load the key at `path`, or create it when missing and `generate` is set
pub fn load_or_generate_key<P: AsRef<Path>>(path: P, generate: bool) -> Result<PrivateKey> {
    let path = path.as_ref();
    if path.exists() || !generate {
        return load_private_key(path);
    }

    info!("Generating {}-bit RSA key at {:?}", RSA_KEY_BITS, path);
    let key = PrivateKey::generate(RSA_KEY_BITS).context("Failed to generate RSA key")?;
    let der = key.to_der().context("Failed to encode RSA key")?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create private key file: {:?}", path))?;
    file.write_all(&der)
        .with_context(|| format!("Failed to write private key file: {:?}", path))?;

    Ok(key)
}
