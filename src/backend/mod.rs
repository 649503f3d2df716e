//! Host provisioning backends.
//!
//! A [`Backend`] creates and destroys hosts for services. The cloud backend
//! drives any [`compute::ComputeApi`] (Rackspace in production); the local
//! backend stands in for development.

pub mod cloud;
pub mod compute;
pub mod local;
pub mod rackspace;

use crate::bootstrap::key;
use crate::core::types::{HostRecord, HostRequest, Provider, Settings};
use crate::transport::ShellExecutor;
use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Everything that can go wrong while provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("option \"{0}\" does not exist in backend settings")]
    MissingOption(String),

    #[error("invalid backend setting: {0}")]
    InvalidOption(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("flavor \"{0}\" not found")]
    FlavorNotFound(String),

    #[error("image \"{0}\" not found")]
    ImageNotFound(String),

    #[error("server {name} failed to build (status {status})")]
    ServerFailed { name: String, status: String },

    #[error("image {name} failed to build (status {status})")]
    ImageFailed { name: String, status: String },

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("bootstrap step {step} failed: {message}")]
    Bootstrap { step: String, message: String },

    #[error("state error: {0}")]
    State(String),

    #[error("cluster key error: {0}")]
    Key(String),
}

/// A provider of hosts.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Provision, bootstrap and return one host for `request.service`.
    async fn create_host(&self, request: &HostRequest) -> Result<HostRecord, ProvisionError>;

    /// Delete every server named `name`. Returns how many were deleted.
    async fn destroy_host(&self, name: &str) -> Result<usize, ProvisionError>;
}

/// Build the backend selected by `backend.provider`.
pub fn backend_from_settings(settings: &Settings) -> Result<Box<dyn Backend>, ProvisionError> {
    match settings.backend.provider {
        Provider::Local => Ok(Box::new(local::LocalBackend::new(
            settings.backend.host_hash_length,
        ))),
        Provider::Rackspace => {
            let backend = &settings.backend;
            let client = rackspace::RackspaceClient::new(
                &backend.identity_url,
                require_option(&backend.username, "username")?,
                require_option(&backend.api_key, "api_key")?,
                &backend.effective_region(),
            )?;
            let options = cloud::CloudOptions::from_settings(settings)?;
            let key = key::load_or_generate(settings).map_err(ProvisionError::Key)?;
            Ok(Box::new(cloud::CloudBackend::new(
                client,
                ShellExecutor,
                options,
                key,
            )))
        }
    }
}

/// A required backend option, rejecting absent and empty values.
pub fn require_option<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ProvisionError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProvisionError::MissingOption(name.to_string())),
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// `len` random lowercase hex characters.
pub fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())] as char)
        .collect()
}

/// Server name for a new host: `<service>-<hash>`.
pub fn host_name(service: &str, hash_length: usize) -> String {
    format!("{}-{}", service, random_hex(hash_length))
}
