//! Rackspace cloud servers over the OpenStack compute v2 REST API.
//!
//! Authentication uses identity v2.0 API-key credentials. The token and the
//! `cloudServersOpenStack` endpoint for the region are cached on first use.

use super::compute::{ComputeApi, CreateServer, Flavor, Image, Server};
use super::ProvisionError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;

/// Service catalog entry for next-generation cloud servers.
pub const COMPUTE_SERVICE: &str = "cloudServersOpenStack";

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Token plus compute endpoint, valid until the token expires.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub endpoint: String,
}

pub struct RackspaceClient {
    http: reqwest::Client,
    identity_url: String,
    username: String,
    api_key: String,
    region: String,
    session: Mutex<Option<Session>>,
}

impl RackspaceClient {
    pub fn new(
        identity_url: &str,
        username: &str,
        api_key: &str,
        region: &str,
    ) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProvisionError::Http(e.to_string()))?;
        Ok(Self {
            http,
            identity_url: identity_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            api_key: api_key.to_string(),
            region: region.to_uppercase(),
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session, ProvisionError> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn authenticate(&self) -> Result<Session, ProvisionError> {
        tracing::debug!("Authenticating {} against {}", self.username, self.identity_url);
        let response = self
            .http
            .post(format!("{}/tokens", self.identity_url))
            .json(&auth_body(&self.username, &self.api_key))
            .send()
            .await
            .map_err(|e| ProvisionError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProvisionError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(ProvisionError::Auth(format!(
                "HTTP {}: {}",
                status.as_u16(),
                api_error_message(&text)
            )));
        }

        let access: AccessResponse =
            serde_json::from_str(&text).map_err(|e| ProvisionError::Auth(e.to_string()))?;
        select_session(access, &self.region)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProvisionError> {
        let session = self.session().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", session.endpoint, path))
            .header("X-Auth-Token", session.token)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ProvisionError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProvisionError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            *self.session.lock().await = None;
        }
        let text = response.text().await.unwrap_or_default();
        Err(ProvisionError::Api {
            status: status.as_u16(),
            message: api_error_message(&text),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProvisionError> {
        let response = self.execute(self.request(Method::GET, path).await?).await?;
        response
            .json()
            .await
            .map_err(|e| ProvisionError::Http(format!("invalid response from {}: {}", path, e)))
    }
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    #[serde(default)]
    region: String,
    #[serde(rename = "publicURL")]
    public_url: String,
}

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct ImageEnvelope {
    image: Image,
}

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

/// Identity v2.0 API-key credentials.
pub fn auth_body(username: &str, api_key: &str) -> Value {
    json!({
        "auth": {
            "RAX-KSKEY:apiKeyCredentials": {
                "username": username,
                "apiKey": api_key,
            }
        }
    })
}

fn select_session(access: AccessResponse, region: &str) -> Result<Session, ProvisionError> {
    let endpoint = access
        .access
        .service_catalog
        .iter()
        .filter(|entry| entry.name == COMPUTE_SERVICE)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| endpoint.region.eq_ignore_ascii_case(region))
        .map(|endpoint| endpoint.public_url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            ProvisionError::Auth(format!(
                "no {} endpoint for region {}",
                COMPUTE_SERVICE, region
            ))
        })?;
    Ok(Session {
        token: access.access.token.id,
        endpoint,
    })
}

/// Pull the human-readable message out of an OpenStack fault body such as
/// `{"itemNotFound": {"message": "...", "code": 404}}`.
pub fn api_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .as_object()?
            .values()
            .find_map(|fault| fault.get("message")?.as_str().map(str::to_string))
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "no response body".to_string()
        } else {
            trimmed.chars().take(200).collect()
        }
    })
}

/// Image id from the `Location` header of a createImage response
/// (`.../images/<id>`).
pub fn image_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && !id.contains(':'))
        .map(str::to_string)
}

#[async_trait]
impl ComputeApi for RackspaceClient {
    fn provider(&self) -> &str {
        "rackspace"
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, ProvisionError> {
        let list: FlavorList = self.get_json("/flavors/detail").await?;
        Ok(list.flavors)
    }

    async fn get_image(&self, id: &str) -> Result<Option<Image>, ProvisionError> {
        match self.get_json::<ImageEnvelope>(&format!("/images/{}", id)).await {
            Ok(envelope) => Ok(Some(envelope.image)),
            Err(ProvisionError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_images(&self) -> Result<Vec<Image>, ProvisionError> {
        let list: ImageList = self.get_json("/images/detail").await?;
        Ok(list.images)
    }

    async fn delete_image(&self, id: &str) -> Result<(), ProvisionError> {
        let builder = self.request(Method::DELETE, &format!("/images/{}", id)).await?;
        self.execute(builder).await?;
        Ok(())
    }

    async fn create_server(&self, request: &CreateServer) -> Result<Server, ProvisionError> {
        let builder = self
            .request(Method::POST, "/servers")
            .await?
            .json(&json!({ "server": request }));
        let envelope: ServerEnvelope = self
            .execute(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionError::Http(format!("invalid create response: {}", e)))?;
        Ok(envelope.server)
    }

    async fn get_server(&self, id: &str) -> Result<Server, ProvisionError> {
        let envelope: ServerEnvelope = self.get_json(&format!("/servers/{}", id)).await?;
        Ok(envelope.server)
    }

    async fn find_servers(&self, name: &str) -> Result<Vec<Server>, ProvisionError> {
        let builder = self
            .request(Method::GET, "/servers/detail")
            .await?
            .query(&[("name", name)]);
        let list: ServerList = self
            .execute(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionError::Http(format!("invalid server list: {}", e)))?;
        // The API filters by regex; keep exact matches only.
        Ok(list.servers.into_iter().filter(|s| s.name == name).collect())
    }

    async fn delete_server(&self, id: &str) -> Result<(), ProvisionError> {
        let builder = self.request(Method::DELETE, &format!("/servers/{}", id)).await?;
        self.execute(builder).await?;
        Ok(())
    }

    async fn create_image(&self, server_id: &str, name: &str) -> Result<String, ProvisionError> {
        let builder = self
            .request(Method::POST, &format!("/servers/{}/action", server_id))
            .await?
            .json(&json!({ "createImage": { "name": name, "metadata": {} } }));
        let response = self.execute(builder).await?;
        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(image_id_from_location)
            .ok_or_else(|| ProvisionError::ImageFailed {
                name: name.to_string(),
                status: "no image location in response".to_string(),
            })
    }
}
