//! Cluster-membership key: load, generate, fingerprint, install.

use super::PREAMBLE;
use crate::core::types::Settings;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Key location on provisioned hosts.
pub const REMOTE_KEY_PATH: &str = "/etc/stretch/cluster.key";

/// Size of generated keys in bytes.
pub const KEY_LEN: usize = 32;

/// Raw key material. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterKey {
    bytes: Vec<u8>,
}

impl fmt::Debug for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterKey({})", self.fingerprint())
    }
}

impl ClusterKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Decode the base64 text stored in key files.
    pub fn from_encoded(text: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| format!("cluster key is not valid base64: {}", e))?;
        if bytes.is_empty() {
            return Err("cluster key is empty".to_string());
        }
        Ok(Self { bytes })
    }

    pub fn encoded(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `blake3:{hex}` of the raw bytes; safe to log and store.
    pub fn fingerprint(&self) -> String {
        format!("blake3:{}", blake3::hash(&self.bytes).to_hex())
    }
}

/// Generated key location when `cluster_key_file` is unset.
pub fn default_key_path(state_dir: &Path) -> PathBuf {
    state_dir.join("cluster.key")
}

/// Load the configured key, or the one under the state dir, generating and
/// saving it on first use. A configured file that is missing is an error.
pub fn load_or_generate(settings: &Settings) -> Result<ClusterKey, String> {
    if let Some(path) = &settings.cluster_key_file {
        return read_key(path);
    }

    let path = default_key_path(&settings.state_dir);
    if path.exists() {
        return read_key(&path);
    }

    let key = ClusterKey::generate();
    write_key(&path, &key)?;
    tracing::info!("Generated cluster key {} at {}", key.fingerprint(), path.display());
    Ok(key)
}

fn read_key(path: &Path) -> Result<ClusterKey, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read cluster key {}: {}", path.display(), e))?;
    ClusterKey::from_encoded(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

fn write_key(path: &Path, key: &ClusterKey) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|e| format!("cannot create cluster key {}: {}", path.display(), e))?;
    writeln!(file, "{}", key.encoded())
        .map_err(|e| format!("cannot write cluster key {}: {}", path.display(), e))
}

/// Shell that writes the key to [`REMOTE_KEY_PATH`] readable by root only.
pub fn install_key_script(key: &ClusterKey) -> String {
    let dir = Path::new(REMOTE_KEY_PATH)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/etc/stretch".to_string());
    format!(
        "{preamble}\n\
         $SUDO mkdir -p '{dir}'\n\
         echo '{encoded}' | base64 -d | $SUDO tee '{path}' >/dev/null\n\
         $SUDO chmod 0600 '{path}'",
        preamble = PREAMBLE,
        dir = dir,
        encoded = key.encoded(),
        path = REMOTE_KEY_PATH,
    )
}
