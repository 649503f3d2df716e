//! Development backend: names hosts like the cloud backend but provisions
//! nothing. Every host is this machine.

use super::{host_name, Backend, ProvisionError};
use crate::core::eventlog::now_rfc3339;
use crate::core::types::{HostRecord, HostRequest};
use async_trait::async_trait;

pub const LOCAL_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct LocalBackend {
    host_hash_length: usize,
}

impl LocalBackend {
    pub fn new(host_hash_length: usize) -> Self {
        Self { host_hash_length }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_host(&self, request: &HostRequest) -> Result<HostRecord, ProvisionError> {
        let name = host_name(&request.service, self.host_hash_length);
        tracing::info!("Creating local host {}", name);
        Ok(HostRecord {
            server_id: format!("local-{}", name),
            name,
            service: request.service.clone(),
            address: LOCAL_ADDRESS.to_string(),
            image_id: String::new(),
            flavor: String::new(),
            key_fingerprint: None,
            created_at: now_rfc3339(),
        })
    }

    async fn destroy_host(&self, name: &str) -> Result<usize, ProvisionError> {
        tracing::info!("Nothing to delete for local host {}", name);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_create_host() {
        let backend = LocalBackend::new(6);
        let record = backend
            .create_host(&HostRequest {
                service: "web".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(record.address, "127.0.0.1");
        assert_eq!(record.service, "web");
        assert_eq!(record.name.len(), "web-".len() + 6);
        assert_eq!(record.server_id, format!("local-{}", record.name));
        assert!(record.key_fingerprint.is_none());
    }

    #[tokio::test]
    async fn test_local_names_are_unique() {
        let backend = LocalBackend::new(16);
        let request = HostRequest {
            service: "db".to_string(),
        };
        let a = backend.create_host(&request).await.unwrap();
        let b = backend.create_host(&request).await.unwrap();
        assert_ne!(a.name, b.name);
    }

    #[tokio::test]
    async fn test_local_destroy_deletes_nothing() {
        let backend = LocalBackend::new(16);
        assert_eq!(backend.destroy_host("web-123").await.unwrap(), 0);
    }
}
