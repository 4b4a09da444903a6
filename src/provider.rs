//! Provider client: the only thing in this process that
//! talks to the upstream sandbox control API. Everything else reaches the
//! provider through the `ProviderClient` trait so the relay and session
//! manager never need to know the wire shape of that API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::{ProviderConfig, TemplateConfig};
use crate::error::SsapError;
use crate::model::SandboxDescriptor;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn list_template_names(&self) -> Result<Vec<String>, SsapError>;

    /// Idempotent: a conflict ("already exists") response is treated as
    /// success.
    async fn ensure_template(&self, template: &TemplateConfig) -> Result<(), SsapError>;

    async fn create_sandbox(
        &self,
        template_name: &str,
        name_hint: Option<&str>,
    ) -> Result<SandboxDescriptor, SsapError>;

    /// A "not found" signal from the provider maps to `SessionNotFound`.
    async fn get_sandbox(&self, name: &str) -> Result<SandboxDescriptor, SsapError>;
}

#[derive(Debug, Deserialize)]
struct TemplateListResponse {
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxResponse {
    name: String,
    dataplane_url: String,
}

impl From<SandboxResponse> for SandboxDescriptor {
    fn from(r: SandboxResponse) -> Self {
        Self {
            name: r.name,
            dataplane_url: r.dataplane_url.trim_end_matches('/').to_string(),
        }
    }
}

pub struct HttpProviderClient {
    http: reqwest::Client,
    control_base: String,
    api_key: String,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .expect("provider HTTP client must build");
        Self {
            http,
            control_base: config.control_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn map_transport_error(context: &str, err: reqwest::Error) -> SsapError {
        warn!(context, err = %err, "provider call failed");
        SsapError::BackendUnavailable(format!("{context}: {err}"))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn list_template_names(&self) -> Result<Vec<String>, SsapError> {
        let resp = self
            .http
            .get(format!("{}/templates", self.control_base))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::map_transport_error("list_template_names", e))?;

        if !resp.status().is_success() {
            return Err(SsapError::BackendUnavailable(format!(
                "list_template_names: upstream returned {}",
                resp.status()
            )));
        }

        let parsed: TemplateListResponse = resp
            .json()
            .await
            .map_err(|e| Self::map_transport_error("list_template_names: decode", e))?;
        Ok(parsed.names)
    }

    async fn ensure_template(&self, template: &TemplateConfig) -> Result<(), SsapError> {
        let resp = self
            .http
            .post(format!("{}/templates", self.control_base))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "name": template.name,
                "image": template.image,
                "cpu": template.cpu,
                "memory": template.memory,
                "storage": template.storage,
            }))
            .send()
            .await
            .map_err(|e| Self::map_transport_error("ensure_template", e))?;

        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        Err(SsapError::BackendUnavailable(format!(
            "ensure_template: upstream returned {status}"
        )))
    }

    async fn create_sandbox(
        &self,
        template_name: &str,
        name_hint: Option<&str>,
    ) -> Result<SandboxDescriptor, SsapError> {
        let resp = self
            .http
            .post(format!("{}/sandboxes", self.control_base))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "template_name": template_name,
                "name": name_hint,
            }))
            .send()
            .await
            .map_err(|e| Self::map_transport_error("create_sandbox", e))?;

        if !resp.status().is_success() {
            return Err(SsapError::BackendUnavailable(format!(
                "create_sandbox: upstream returned {}",
                resp.status()
            )));
        }

        let parsed: SandboxResponse = resp
            .json()
            .await
            .map_err(|e| Self::map_transport_error("create_sandbox: decode", e))?;
        Ok(parsed.into())
    }

    async fn get_sandbox(&self, name: &str) -> Result<SandboxDescriptor, SsapError> {
        let resp = self
            .http
            .get(format!("{}/sandboxes/{name}", self.control_base))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::map_transport_error("get_sandbox", e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SsapError::SessionNotFound(format!(
                "sandbox '{name}' not found"
            )));
        }
        if !resp.status().is_success() {
            return Err(SsapError::BackendUnavailable(format!(
                "get_sandbox: upstream returned {}",
                resp.status()
            )));
        }

        let parsed: SandboxResponse = resp
            .json()
            .await
            .map_err(|e| Self::map_transport_error("get_sandbox: decode", e))?;
        Ok(parsed.into())
    }
}

/// Run the auto-create-template startup hook. Fatal to service start on
/// failure, by contract — the caller should propagate the error.
pub async fn run_startup_hook(
    provider: &dyn ProviderClient,
    template: &TemplateConfig,
) -> Result<(), SsapError> {
    let names = provider.list_template_names().await?;
    if names.iter().any(|n| n == &template.name) {
        return Ok(());
    }
    provider.ensure_template(template).await
}

#[cfg(any(test, feature = "test-utils"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory stand-in for the provider, used by the test harness.
    pub struct FakeProviderClient {
        templates: Mutex<Vec<String>>,
        sandboxes: Mutex<std::collections::HashMap<String, SandboxDescriptor>>,
        next_id: Mutex<u64>,
    }

    impl FakeProviderClient {
        pub fn new(templates: Vec<String>) -> Self {
            Self {
                templates: Mutex::new(templates),
                sandboxes: Mutex::new(std::collections::HashMap::new()),
                next_id: Mutex::new(0),
            }
        }

        pub fn seed_sandbox(&self, name: &str, dataplane_url: &str) {
            self.sandboxes.lock().unwrap().insert(
                name.to_string(),
                SandboxDescriptor {
                    name: name.to_string(),
                    dataplane_url: dataplane_url.to_string(),
                },
            );
        }
    }

    #[async_trait]
    impl ProviderClient for FakeProviderClient {
        async fn list_template_names(&self) -> Result<Vec<String>, SsapError> {
            Ok(self.templates.lock().unwrap().clone())
        }

        async fn ensure_template(&self, template: &TemplateConfig) -> Result<(), SsapError> {
            let mut templates = self.templates.lock().unwrap();
            if !templates.iter().any(|n| n == &template.name) {
                templates.push(template.name.clone());
            }
            Ok(())
        }

        async fn create_sandbox(
            &self,
            _template_name: &str,
            name_hint: Option<&str>,
        ) -> Result<SandboxDescriptor, SsapError> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let name = name_hint
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("sbx-{next_id}"));
            let descriptor = SandboxDescriptor {
                name: name.clone(),
                dataplane_url: format!("http://127.0.0.1:0/{name}"),
            };
            self.sandboxes
                .lock()
                .unwrap()
                .insert(name, descriptor.clone());
            Ok(descriptor)
        }

        async fn get_sandbox(&self, name: &str) -> Result<SandboxDescriptor, SsapError> {
            self.sandboxes
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| SsapError::SessionNotFound(format!("sandbox '{name}' not found")))
        }
    }
}
