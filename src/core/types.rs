//! Configuration schema, host records, state lock and provisioning events.
//!
//! All types derive Serialize/Deserialize so they roundtrip through YAML
//! (config, lock file) and JSON (event log).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Service-discovery endpoint used when nothing else is configured.
pub const DEFAULT_ETCD_HOST: &str = "172.17.42.1:4001";

/// Placeholder printed in place of secrets.
pub const REDACTED: &str = "********";

// ============================================================================
// Settings (merged configuration)
// ============================================================================

/// Effective configuration after the args > env > file > defaults merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Log at trace level
    pub debug: bool,

    /// Log at debug level
    pub verbose: bool,

    /// Optional log file (appended)
    #[serde(deserialize_with = "optional_text")]
    pub log: Option<PathBuf>,

    /// Directory holding the hosts lock, event log and generated cluster key
    #[serde(deserialize_with = "text")]
    pub state_dir: PathBuf,

    /// etcd endpoint written into fleet's configuration (`host:port`)
    #[serde(deserialize_with = "text")]
    pub etcd_host: String,

    /// Cluster-membership key; generated under `state_dir` when unset
    #[serde(deserialize_with = "optional_text")]
    pub cluster_key_file: Option<PathBuf>,

    /// Cloud backend options
    pub backend: BackendSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            verbose: false,
            log: None,
            state_dir: PathBuf::from("state"),
            etcd_host: DEFAULT_ETCD_HOST.to_string(),
            cluster_key_file: None,
            backend: BackendSettings::default(),
        }
    }
}

impl Settings {
    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.backend.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            copy.backend.api_key = Some(REDACTED.to_string());
        }
        copy
    }
}

/// Which backend provisions hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Rackspace,
    Local,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rackspace => write!(f, "rackspace"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Backend options, passed through to the provider client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    pub provider: Provider,

    /// Cloud account user name
    #[serde(deserialize_with = "optional_text")]
    pub username: Option<String>,

    /// Cloud account API key
    #[serde(deserialize_with = "optional_text")]
    pub api_key: Option<String>,

    /// Region; upper-cased before use
    #[serde(deserialize_with = "text")]
    pub region: String,

    /// Identity service base URL
    #[serde(deserialize_with = "text")]
    pub identity_url: String,

    /// Flavor to boot, matched by exact name
    #[serde(deserialize_with = "text")]
    pub flavor_name: String,

    /// Base image containing fleet
    #[serde(deserialize_with = "text")]
    pub coreos_image_id: String,

    /// Name of the built host image; derived from the prefix when unset
    #[serde(deserialize_with = "optional_text")]
    pub image_name: Option<String>,

    /// Prefix shared by every image this tool builds
    #[serde(deserialize_with = "text")]
    pub image_prefix: String,

    /// Snapshot the first provisioned host and boot later hosts from it
    pub save_built_images: bool,

    /// Delete older prefixed images when a new one is built
    pub delete_unused_images: bool,

    /// Length of the random suffix in host names
    pub host_hash_length: usize,

    /// Reach the host over its public address instead of the private network
    pub use_public_network: bool,

    /// Keypair injected into new servers
    #[serde(deserialize_with = "optional_text")]
    pub key_name: Option<String>,

    /// SSH user for bootstrap
    #[serde(deserialize_with = "text")]
    pub ssh_user: String,

    /// SSH private key for bootstrap
    #[serde(deserialize_with = "optional_text")]
    pub ssh_key: Option<String>,

    /// Give up waiting for a server or image after this many seconds
    pub build_timeout_secs: u64,

    /// Seconds between status polls
    pub poll_interval_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            username: None,
            api_key: None,
            region: "DFW".to_string(),
            identity_url: "https://identity.api.rackspacecloud.com/v2.0".to_string(),
            flavor_name: "512MB Standard Instance".to_string(),
            coreos_image_id: "430d35e0-1468-4007-b063-52ee1921b356".to_string(),
            image_name: None,
            image_prefix: "stretch".to_string(),
            save_built_images: true,
            delete_unused_images: true,
            host_hash_length: 16,
            use_public_network: false,
            key_name: None,
            ssh_user: "core".to_string(),
            ssh_key: None,
            build_timeout_secs: 900,
            poll_interval_secs: 10,
        }
    }
}

impl BackendSettings {
    /// Image name to build or reuse.
    pub fn effective_image_name(&self) -> String {
        match &self.image_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!(
                "{}-{}-host-image",
                self.image_prefix,
                env!("CARGO_PKG_VERSION")
            ),
        }
    }

    /// Region as the provider expects it.
    pub fn effective_region(&self) -> String {
        self.region.to_uppercase()
    }
}

/// A scalar where text is expected. Environment and `--set` values that look
/// like integers or booleans arrive typed; text fields take them back as
/// their literal form.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Text(s) => s,
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::UInt(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
        }
    }
}

fn text<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: From<String>,
{
    Ok(T::from(String::from(Scalar::deserialize(deserializer)?)))
}

fn optional_text<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: From<String>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| T::from(String::from(s))))
}

// ============================================================================
// Hosts
// ============================================================================

/// Request to provision one host for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRequest {
    pub service: String,
}

/// A provisioned host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Server name (`<service>-<hash>`)
    pub name: String,

    /// Service the host was created for
    pub service: String,

    /// Provider-side server id
    pub server_id: String,

    /// Address used for bootstrap
    pub address: String,

    /// Image the server booted from
    pub image_id: String,

    /// Flavor name
    pub flavor: String,

    /// `blake3:` fingerprint of the installed cluster key
    #[serde(default)]
    pub key_fingerprint: Option<String>,

    /// RFC 3339 creation time
    pub created_at: String,
}

/// Hosts lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsLock {
    /// Schema version
    pub schema: String,

    /// Generator version
    pub generator: String,

    /// Known hosts by name (order-preserving)
    pub hosts: IndexMap<String, HostRecord>,
}

// ============================================================================
// Events
// ============================================================================

/// Provisioning event for the JSONL event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvisionEvent {
    HostCreateStarted {
        service: String,
        provider: String,
    },
    HostCreated {
        host: String,
        server_id: String,
        address: String,
        duration_seconds: f64,
    },
    HostCreateFailed {
        service: String,
        error: String,
    },
    HostDestroyed {
        host: String,
        servers_deleted: usize,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvisionEvent,
}
