//! Layered configuration: CLI/env override > `config.toml` > built-in default.
//!
//! Mirrors the resolution order of a typical always-on host daemon: nothing
//! here is reloadable after startup, so once `SsapConfig::load` returns, every
//! field is a plain value the rest of the process can read without locking.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{error, warn};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4302";
const DEFAULT_TOKEN_TTL_MINUTES: u32 = 60;
const DEFAULT_SESSION_MAX_HOURS: u32 = 8;
const DEFAULT_JWT_ISSUER: &str = "ssap";
const DEFAULT_PROVIDER_TAG: &str = "sandbox-provider";
const DEFAULT_TEMPLATE_NAME: &str = "ssap-default";
const DEFAULT_CACHE_PREFIX: &str = "ssap";
const DEFAULT_CAPABILITIES: &[&str] = &["execute", "upload", "download"];

/// `[sandbox]` table in `config.toml`. Every field optional — only used to
/// fill gaps left by CLI flags / env vars.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    sandbox: SandboxTable,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxTable {
    enabled: Option<bool>,
    bind_addr: Option<String>,
    log: Option<String>,
    jwt_secret: Option<String>,
    jwt_issuer: Option<String>,
    token_ttl_minutes: Option<String>,
    session_max_hours: Option<String>,
    provider_tag: Option<String>,
    capabilities: Option<String>,
    provider_api_key: Option<String>,
    provider_endpoint: Option<String>,
    provider_control_base: Option<String>,
    template_name: Option<String>,
    template_image: Option<String>,
    template_cpu: Option<String>,
    template_memory: Option<String>,
    template_storage: Option<String>,
    auto_create_template: Option<bool>,
    cache_prefix: Option<String>,
}

fn load_toml(path: &Path) -> SandboxTable {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return SandboxTable::default();
    };
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => cfg.sandbox,
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            SandboxTable::default()
        }
    }
}

/// Resolve `SSAP_{NAME}` from the environment, falling back to the TOML
/// value, falling back to `None`.
fn layered(env_name: &str, toml_value: Option<String>) -> Option<String> {
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.is_empty())
        .or(toml_value)
}

/// Parse an integer knob; a missing or malformed value silently falls back
/// to `default` rather than failing startup.
fn parse_u32_or_default(value: Option<String>, default: u32, min: u32) -> u32 {
    value
        .and_then(|v| v.parse::<u32>().ok())
        .map(|v| v.max(min))
        .unwrap_or(default)
}

fn parse_bool_or_default(value: Option<String>, default: bool) -> bool {
    value
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_capabilities(value: Option<String>) -> Vec<String> {
    let raw = value.unwrap_or_else(|| DEFAULT_CAPABILITIES.join(","));
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        DEFAULT_CAPABILITIES.iter().map(|s| s.to_string()).collect()
    } else {
        items
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Server-held credential for the upstream provider. Never logged, never
    /// echoed back to a client.
    pub api_key: String,
    pub endpoint: String,
    pub control_base: String,
}

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub name: String,
    pub image: String,
    pub cpu: Option<u32>,
    pub memory: Option<u32>,
    pub storage: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SsapConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
    pub log: String,
    /// HMAC-SHA256 signing secret for capability tokens. Never logged, never
    /// returned in any response.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_ttl_minutes: u32,
    pub session_max_hours: u32,
    pub provider_tag: String,
    pub capabilities: BTreeSet<String>,
    /// Insertion-ordered capability list, as issued in token claims.
    pub capabilities_ordered: Vec<String>,
    pub provider: ProviderConfig,
    pub template: TemplateConfig,
    pub auto_create_template: bool,
    pub cache_prefix: String,
}

impl SsapConfig {
    /// Build config from CLI overrides + environment + an optional
    /// `config.toml` at `config_path` + built-in defaults, in that priority
    /// order (highest first).
    pub fn load(config_path: &Path, bind_addr: Option<String>, log: Option<String>) -> Result<Self> {
        let toml = load_toml(config_path);

        let enabled = parse_bool_or_default(
            layered("SSAP_ENABLED", toml.enabled.map(|b| b.to_string())),
            true,
        );

        let bind_addr_raw = bind_addr
            .or_else(|| layered("SSAP_BIND_ADDR", toml.bind_addr.clone()))
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid bind address: {bind_addr_raw}"))?;

        let log = log
            .or_else(|| layered("SSAP_LOG", toml.log.clone()))
            .unwrap_or_else(|| "info".to_string());

        let jwt_secret = layered("SSAP_JWT_SECRET", toml.jwt_secret.clone())
            .filter(|s| !s.is_empty());
        let Some(jwt_secret) = jwt_secret else {
            bail!("SSAP_JWT_SECRET is required — refusing to start a relay that cannot sign or verify capability tokens");
        };

        let jwt_issuer = layered("SSAP_JWT_ISSUER", toml.jwt_issuer.clone())
            .unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string());

        let token_ttl_minutes = parse_u32_or_default(
            layered("SSAP_TOKEN_TTL_MINUTES", toml.token_ttl_minutes.clone()),
            DEFAULT_TOKEN_TTL_MINUTES,
            1,
        );
        let session_max_hours = parse_u32_or_default(
            layered("SSAP_SESSION_MAX_HOURS", toml.session_max_hours.clone()),
            DEFAULT_SESSION_MAX_HOURS,
            1,
        );

        let provider_tag = layered("SSAP_PROVIDER_TAG", toml.provider_tag.clone())
            .unwrap_or_else(|| DEFAULT_PROVIDER_TAG.to_string());

        let capabilities_ordered =
            parse_capabilities(layered("SSAP_CAPABILITIES", toml.capabilities.clone()));
        let capabilities: BTreeSet<String> = capabilities_ordered.iter().cloned().collect();

        let provider = ProviderConfig {
            api_key: layered("SSAP_PROVIDER_API_KEY", toml.provider_api_key.clone())
                .unwrap_or_default(),
            endpoint: layered("SSAP_PROVIDER_ENDPOINT", toml.provider_endpoint.clone())
                .unwrap_or_default(),
            control_base: layered("SSAP_PROVIDER_CONTROL_BASE", toml.provider_control_base.clone())
                .unwrap_or_default(),
        };
        if provider.api_key.is_empty() {
            warn!("SSAP_PROVIDER_API_KEY not set — relay calls to the provider data plane will be rejected upstream");
        }

        let template = TemplateConfig {
            name: layered("SSAP_TEMPLATE_NAME", toml.template_name.clone())
                .unwrap_or_else(|| DEFAULT_TEMPLATE_NAME.to_string()),
            image: layered("SSAP_TEMPLATE_IMAGE", toml.template_image.clone())
                .unwrap_or_default(),
            cpu: layered("SSAP_TEMPLATE_CPU", toml.template_cpu.clone())
                .and_then(|v| v.parse().ok()),
            memory: layered("SSAP_TEMPLATE_MEMORY", toml.template_memory.clone())
                .and_then(|v| v.parse().ok()),
            storage: layered("SSAP_TEMPLATE_STORAGE", toml.template_storage.clone())
                .and_then(|v| v.parse().ok()),
        };

        let auto_create_template = parse_bool_or_default(
            layered(
                "SSAP_AUTO_CREATE_TEMPLATE",
                toml.auto_create_template.map(|b| b.to_string()),
            ),
            true,
        );

        let cache_prefix = layered("SSAP_CACHE_PREFIX", toml.cache_prefix.clone())
            .unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string());

        Ok(Self {
            enabled,
            bind_addr,
            log,
            jwt_secret,
            jwt_issuer,
            token_ttl_minutes,
            session_max_hours,
            provider_tag,
            capabilities,
            capabilities_ordered,
            provider,
            template,
            auto_create_template,
            cache_prefix,
        })
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.contains(cap)
    }

    /// Every handler but `/healthz` is gated behind this — a disabled
    /// instance keeps the process and the liveness probe up, it just 404s
    /// everything else.
    pub fn require_enabled(&self) -> Result<(), crate::error::SsapError> {
        if self.enabled {
            Ok(())
        } else {
            Err(crate::error::SsapError::NotFound)
        }
    }
}
