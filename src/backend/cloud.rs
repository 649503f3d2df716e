//! Cloud provisioning flow over any [`ComputeApi`].
//!
//! `create_host`:
//! 1. resolve flavor and base image (concurrently)
//! 2. reuse the built host image, or plan to build one
//! 3. create the server and wait for ACTIVE
//! 4. bootstrap over the executor (key, fleet.conf, restart)
//! 5. snapshot the server when a new image was planned
//!
//! A server whose later steps fail is deleted again.

use super::compute::{ComputeApi, CreateServer, Flavor, Image, Server, STATUS_ACTIVE, STATUS_ERROR};
use super::{host_name, Backend, ProvisionError};
use crate::bootstrap::fleet::FleetOptions;
use crate::bootstrap::key::ClusterKey;
use crate::bootstrap::{bootstrap_scripts, split_etcd_host, BootstrapStep};
use crate::core::eventlog::now_rfc3339;
use crate::core::types::{HostRecord, HostRequest, Settings};
use crate::transport::{ExecOutput, Executor, HostTarget};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// ssh exits 255 when it cannot connect; a fresh server may not accept
/// connections yet.
const SSH_CONNECT_FAILED: i32 = 255;

/// Provisioning knobs, resolved from [`Settings`].
#[derive(Debug, Clone)]
pub struct CloudOptions {
    pub flavor_name: String,
    pub coreos_image_id: String,
    pub image_name: String,
    pub image_prefix: String,
    pub save_built_images: bool,
    pub delete_unused_images: bool,
    pub host_hash_length: usize,
    pub use_public_network: bool,
    pub key_name: Option<String>,
    pub ssh_user: String,
    pub ssh_key: Option<String>,
    pub etcd_host: String,
    pub etcd_port: u16,
    pub build_timeout: Duration,
    pub poll_interval: Duration,
}

impl CloudOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, ProvisionError> {
        let backend = &settings.backend;
        let (etcd_host, etcd_port) =
            split_etcd_host(&settings.etcd_host).map_err(ProvisionError::InvalidOption)?;
        Ok(Self {
            flavor_name: backend.flavor_name.clone(),
            coreos_image_id: backend.coreos_image_id.clone(),
            image_name: backend.effective_image_name(),
            image_prefix: backend.image_prefix.clone(),
            save_built_images: backend.save_built_images,
            delete_unused_images: backend.delete_unused_images,
            host_hash_length: backend.host_hash_length,
            use_public_network: backend.use_public_network,
            key_name: backend.key_name.clone().filter(|k| !k.is_empty()),
            ssh_user: backend.ssh_user.clone(),
            ssh_key: backend.ssh_key.clone(),
            etcd_host,
            etcd_port,
            build_timeout: Duration::from_secs(backend.build_timeout_secs),
            poll_interval: Duration::from_secs(backend.poll_interval_secs),
        })
    }
}

/// Which image the new server boots from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImagePlan {
    /// Boot the base image; no snapshot.
    Base,
    /// Boot a previously built host image.
    Reuse(String),
    /// Boot the base image, then snapshot it as the host image.
    Build,
}

pub struct CloudBackend<C, E> {
    api: C,
    executor: Arc<E>,
    options: CloudOptions,
    key: ClusterKey,
}

impl<C, E> CloudBackend<C, E>
where
    C: ComputeApi,
    E: Executor + 'static,
{
    pub fn new(api: C, executor: E, options: CloudOptions, key: ClusterKey) -> Self {
        Self {
            api,
            executor: Arc::new(executor),
            options,
            key,
        }
    }

    async fn find_flavor(&self) -> Result<Flavor, ProvisionError> {
        debug!("Finding flavors matching: {}", self.options.flavor_name);
        let flavor = self
            .api
            .list_flavors()
            .await?
            .into_iter()
            .find(|f| f.name == self.options.flavor_name)
            .ok_or_else(|| ProvisionError::FlavorNotFound(self.options.flavor_name.clone()))?;
        info!("Found flavor: {} ({})", flavor.name, flavor.id);
        Ok(flavor)
    }

    async fn find_image(&self) -> Result<Image, ProvisionError> {
        debug!("Finding image with id: {}", self.options.coreos_image_id);
        let image = self
            .api
            .get_image(&self.options.coreos_image_id)
            .await?
            .ok_or_else(|| ProvisionError::ImageNotFound(self.options.coreos_image_id.clone()))?;
        info!("Found image: {} ({})", image.name, image.id);
        Ok(image)
    }

    async fn plan_image(&self) -> Result<ImagePlan, ProvisionError> {
        if !self.options.save_built_images {
            return Ok(ImagePlan::Base);
        }

        let name = &self.options.image_name;
        let images = self.api.list_images().await?;
        if let Some(image) = images.iter().find(|i| &i.name == name) {
            info!("Using image: {}", image.name);
            self.wait_for_image(&image.id, name).await?;
            return Ok(ImagePlan::Reuse(image.id.clone()));
        }

        info!("A new image ({}) will be created from this build", name);
        if self.options.delete_unused_images {
            for image in images
                .iter()
                .filter(|i| &i.name != name && i.name.starts_with(&self.options.image_prefix))
            {
                info!("Deleting unused image {}", image.name);
                self.api.delete_image(&image.id).await?;
            }
        }
        Ok(ImagePlan::Build)
    }

    /// Poll `check` every `poll_interval` until it yields a value, fails, or
    /// `build_timeout` elapses.
    async fn poll<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, ProvisionError>>,
    {
        let started = Instant::now();
        loop {
            if let Some(done) = check().await? {
                return Ok(done);
            }
            if started.elapsed() >= self.options.build_timeout {
                return Err(ProvisionError::Timeout {
                    what: what.to_string(),
                    secs: self.options.build_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn wait_for_server(&self, id: &str, name: &str) -> Result<Server, ProvisionError> {
        self.poll(&format!("server {}", name), || async move {
            let server = self.api.get_server(id).await?;
            debug!("Server {} status: {}", name, server.status);
            match server.status.as_str() {
                STATUS_ACTIVE => Ok(Some(server)),
                STATUS_ERROR => Err(ProvisionError::ServerFailed {
                    name: name.to_string(),
                    status: server.status,
                }),
                _ => Ok(None),
            }
        })
        .await
    }

    async fn wait_for_image(&self, id: &str, name: &str) -> Result<Image, ProvisionError> {
        self.poll(&format!("image {}", name), || async move {
            let image = self
                .api
                .get_image(id)
                .await?
                .ok_or_else(|| ProvisionError::ImageFailed {
                    name: name.to_string(),
                    status: "DELETED".to_string(),
                })?;
            debug!("Image {} status: {}", name, image.status);
            match image.status.as_str() {
                STATUS_ACTIVE => Ok(Some(image)),
                STATUS_ERROR => Err(ProvisionError::ImageFailed {
                    name: name.to_string(),
                    status: image.status,
                }),
                _ => Ok(None),
            }
        })
        .await
    }

    async fn exec_blocking(
        &self,
        target: &HostTarget,
        script: String,
    ) -> Result<ExecOutput, String> {
        let executor = Arc::clone(&self.executor);
        let target = target.clone();
        tokio::task::spawn_blocking(move || executor.exec(&target, &script))
            .await
            .map_err(|e| format!("executor task failed: {}", e))?
    }

    /// Run one step, retrying while ssh cannot connect and `started` is
    /// within `build_timeout`.
    async fn run_step(
        &self,
        target: &HostTarget,
        step: BootstrapStep,
        script: String,
        started: Instant,
    ) -> Result<(), ProvisionError> {
        let failed = |message: String| ProvisionError::Bootstrap {
            step: step.to_string(),
            message,
        };
        loop {
            debug!("Running {} on {}", step, target.addr);
            let output = self.exec_blocking(target, script.clone()).await.map_err(failed)?;
            if output.success() {
                return Ok(());
            }
            if output.exit_code == SSH_CONNECT_FAILED && started.elapsed() < self.options.build_timeout {
                warn!("{} not reachable yet, retrying", target.addr);
                tokio::time::sleep(self.options.poll_interval).await;
                continue;
            }
            return Err(failed(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
    }

    async fn bootstrap(&self, service: &str, address: &str) -> Result<(), ProvisionError> {
        let target = HostTarget {
            addr: address.to_string(),
            user: self.options.ssh_user.clone(),
            ssh_key: self.options.ssh_key.clone(),
        };
        let fleet = FleetOptions {
            service,
            public_ip: address,
            etcd_host: &self.options.etcd_host,
            etcd_port: self.options.etcd_port,
        };
        info!("Installing cluster key {} on {}", self.key.fingerprint(), address);
        let started = Instant::now();
        for (step, script) in bootstrap_scripts(&self.key, &fleet) {
            self.run_step(&target, step, script, started).await?;
        }
        info!("Finished configuring host at {}", address);
        Ok(())
    }

    async fn build_image(&self, server_id: &str) -> Result<(), ProvisionError> {
        let name = &self.options.image_name;
        info!("Creating image ({}) from host...", name);
        let image_id = self.api.create_image(server_id, name).await?;
        self.wait_for_image(&image_id, name).await?;
        info!("Image {} is ready", name);
        Ok(())
    }

    /// Everything after `create_server`: wait, address, bootstrap, snapshot.
    async fn finish_host(
        &self,
        service: &str,
        server_id: &str,
        name: &str,
        plan: &ImagePlan,
    ) -> Result<(Server, String), ProvisionError> {
        let server = self.wait_for_server(server_id, name).await?;
        info!("Finished creating host {}", name);

        let address = server
            .address(self.options.use_public_network)
            .ok_or_else(|| ProvisionError::ServerFailed {
                name: name.to_string(),
                status: "no usable address".to_string(),
            })?;

        self.bootstrap(service, &address).await?;

        if *plan == ImagePlan::Build {
            self.build_image(&server.id).await?;
        }
        Ok((server, address))
    }

    /// Delete a server that never became a usable host. The original error
    /// is what the caller sees; a failed delete is only logged.
    async fn discard_server(&self, server_id: &str, name: &str) {
        warn!("Deleting unfinished host {} ({})", name, server_id);
        match self.api.delete_server(server_id).await {
            Ok(()) => info!("Deleted unfinished host {}", name),
            Err(e) => warn!(
                "Could not delete unfinished host {} ({}): {}; run destroy-host {}",
                name, server_id, e, name
            ),
        }
    }
}

#[async_trait]
impl<C, E> Backend for CloudBackend<C, E>
where
    C: ComputeApi,
    E: Executor + 'static,
{
    fn name(&self) -> &str {
        self.api.provider()
    }

    async fn create_host(&self, request: &HostRequest) -> Result<HostRecord, ProvisionError> {
        let (flavor, base_image) = tokio::try_join!(self.find_flavor(), self.find_image())?;
        let plan = self.plan_image().await?;
        let boot_image = match &plan {
            ImagePlan::Reuse(id) => id.clone(),
            ImagePlan::Base | ImagePlan::Build => base_image.id.clone(),
        };

        let name = host_name(&request.service, self.options.host_hash_length);
        info!("Creating host {}...", name);
        let mut metadata = BTreeMap::new();
        metadata.insert("service".to_string(), request.service.clone());
        let created = self
            .api
            .create_server(&CreateServer {
                name: name.clone(),
                image_ref: boot_image.clone(),
                flavor_ref: flavor.id.clone(),
                key_name: self.options.key_name.clone(),
                metadata,
            })
            .await?;
        let (server, address) = match self
            .finish_host(&request.service, &created.id, &name, &plan)
            .await
        {
            Ok(done) => done,
            Err(e) => {
                self.discard_server(&created.id, &name).await;
                return Err(e);
            }
        };

        Ok(HostRecord {
            name,
            service: request.service.clone(),
            server_id: server.id,
            address,
            image_id: boot_image,
            flavor: flavor.name,
            key_fingerprint: Some(self.key.fingerprint()),
            created_at: now_rfc3339(),
        })
    }

    async fn destroy_host(&self, name: &str) -> Result<usize, ProvisionError> {
        let servers = self.api.find_servers(name).await?;
        let mut deleted = 0;
        for server in servers.iter().filter(|s| s.name == name) {
            info!("Deleting server {} ({})", server.name, server.id);
            self.api.delete_server(&server.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
