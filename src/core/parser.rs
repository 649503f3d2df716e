//! Config file parsing and settings validation.
//!
//! The file layer must be a YAML mapping (an empty document counts as an
//! empty mapping). Validation checks what serde cannot:
//! - rackspace credentials are present
//! - names and ids are non-empty
//! - `etcd_host` is `host:port`
//! - timing and hash-length bounds

use super::types::{Provider, Settings};
use regex::Regex;
use serde_yaml_ng::{Mapping, Value};
use std::path::Path;

/// Longest random suffix accepted for host names.
pub const MAX_HOST_HASH_LENGTH: usize = 64;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Read a config file from disk into a mapping.
pub fn parse_config_file(path: &Path) -> Result<Mapping, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Parse config YAML from a string into a mapping.
pub fn parse_config(yaml: &str) -> Result<Mapping, String> {
    let value: Value =
        serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map),
        _ => Err("config root must be a mapping".to_string()),
    }
}

/// Split `host:port`. The port must fit a u16.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((host, port))
}

/// DNS labels are at most 63 characters.
pub const MAX_HOST_NAME_LENGTH: usize = 63;

/// Service names become host-name prefixes and fleet metadata, so they are
/// restricted to DNS-label characters.
const SERVICE_NAME_PATTERN: &str = r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$";

/// Longest service name whose `<service>-<hash>` host name is still a DNS
/// label.
pub fn max_service_name_length(host_hash_length: usize) -> usize {
    MAX_HOST_NAME_LENGTH.saturating_sub(host_hash_length + 1)
}

/// Check a service name before provisioning for it.
pub fn validate_service_name(service: &str, host_hash_length: usize) -> Result<(), String> {
    let pattern = Regex::new(SERVICE_NAME_PATTERN).map_err(|e| format!("regex error: {}", e))?;
    let max = max_service_name_length(host_hash_length);
    if !pattern.is_match(service) {
        return Err(format!(
            "invalid service name \"{}\": use lowercase letters, digits and '-', starting and ending with a letter or digit",
            service
        ));
    }
    if service.len() > max {
        return Err(format!(
            "invalid service name \"{}\": at most {} characters with host_hash_length {}, so host names stay within {}",
            service, max, host_hash_length, MAX_HOST_NAME_LENGTH
        ));
    }
    Ok(())
}

/// Validate merged settings. Returns a list of errors (empty = valid).
pub fn validate_settings(settings: &Settings) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let backend = &settings.backend;

    if backend.provider == Provider::Rackspace {
        for (name, value) in [
            ("username", &backend.username),
            ("api_key", &backend.api_key),
        ] {
            if value.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError {
                    message: format!("option \"{}\" does not exist in backend settings", name),
                });
            }
        }
    }

    for (name, value) in [
        ("region", &backend.region),
        ("flavor_name", &backend.flavor_name),
        ("coreos_image_id", &backend.coreos_image_id),
        ("image_prefix", &backend.image_prefix),
        ("ssh_user", &backend.ssh_user),
    ] {
        if value.trim().is_empty() {
            errors.push(ValidationError {
                message: format!("backend.{} must not be empty", name),
            });
        }
    }

    if backend.host_hash_length == 0 || backend.host_hash_length > MAX_HOST_HASH_LENGTH {
        errors.push(ValidationError {
            message: format!(
                "backend.host_hash_length must be between 1 and {}, got {}",
                MAX_HOST_HASH_LENGTH, backend.host_hash_length
            ),
        });
    }

    if split_host_port(&settings.etcd_host).is_none() {
        errors.push(ValidationError {
            message: format!(
                "etcd_host must be host:port, got \"{}\"",
                settings.etcd_host
            ),
        });
    }

    if backend.build_timeout_secs == 0 {
        errors.push(ValidationError {
            message: "backend.build_timeout_secs must be greater than 0".to_string(),
        });
    }
    if backend.poll_interval_secs == 0 {
        errors.push(ValidationError {
            message: "backend.poll_interval_secs must be greater than 0".to_string(),
        });
    } else if backend.poll_interval_secs > backend.build_timeout_secs {
        errors.push(ValidationError {
            message: "backend.poll_interval_secs must not exceed build_timeout_secs".to_string(),
        });
    }

    errors
}
