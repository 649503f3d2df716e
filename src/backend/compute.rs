//! Compute API seam and the OpenStack compute v2 models it speaks.

use super::ProvisionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Server or image finished building.
pub const STATUS_ACTIVE: &str = "ACTIVE";
/// Server or image failed.
pub const STATUS_ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ram: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerAddress {
    pub addr: String,
    #[serde(default = "ipv4")]
    pub version: u8,
}

fn ipv4() -> u8 {
    4
}

/// A server as returned by `GET /servers/{id}`. The create response carries
/// only the id, so every other field defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "accessIPv4", default)]
    pub access_ipv4: String,
    #[serde(default)]
    pub addresses: HashMap<String, Vec<ServerAddress>>,
}

impl Server {
    /// Address to bootstrap through: `accessIPv4` on the public network,
    /// otherwise the first IPv4 address on `private`.
    pub fn address(&self, use_public_network: bool) -> Option<String> {
        if use_public_network {
            return Some(self.access_ipv4.clone()).filter(|a| !a.is_empty());
        }
        self.addresses
            .get("private")?
            .iter()
            .find(|a| a.version == 4)
            .map(|a| a.addr.clone())
    }
}

/// Body of `POST /servers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateServer {
    pub name: String,
    #[serde(rename = "imageRef")]
    pub image_ref: String,
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// The compute operations provisioning needs.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Provider name used in logs and events.
    fn provider(&self) -> &str;

    async fn list_flavors(&self) -> Result<Vec<Flavor>, ProvisionError>;

    /// `None` when the image does not exist.
    async fn get_image(&self, id: &str) -> Result<Option<Image>, ProvisionError>;

    async fn list_images(&self) -> Result<Vec<Image>, ProvisionError>;

    async fn delete_image(&self, id: &str) -> Result<(), ProvisionError>;

    async fn create_server(&self, request: &CreateServer) -> Result<Server, ProvisionError>;

    async fn get_server(&self, id: &str) -> Result<Server, ProvisionError>;

    /// Servers whose name is exactly `name`.
    async fn find_servers(&self, name: &str) -> Result<Vec<Server>, ProvisionError>;

    async fn delete_server(&self, id: &str) -> Result<(), ProvisionError>;

    /// Snapshot a server. Returns the new image id.
    async fn create_image(&self, server_id: &str, name: &str) -> Result<String, ProvisionError>;
}
