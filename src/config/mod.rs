//! Typed settings assembled once at startup.
//!
//! Layering: built-in defaults, then an optional `config.{toml,yaml,json}`
//! file, then `GOLINK__`-prefixed environment variables (`__` separator).
//! The set of keys the file/environment actually supplied is tracked so
//! callers can ask whether a value was overridden rather than probing a
//! dynamic settings bag at runtime.

use std::collections::BTreeSet;

use anyhow::Context;
use serde::{Deserialize, Serialize};

const ALLOWED_HTTP_STATUSES: [u16; 4] = [301, 302, 307, 308];
const MIN_SALT_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub api: ApiSettings,
    pub redirect: RedirectSettings,
    pub analytics: AnalyticsSettings,
    pub geoip: GeoIpSettings,
    pub cache: CacheSettings,
    /// CIDR ranges whose forwarding headers are honored for client IPs.
    pub trusted_proxies: Vec<String>,

    /// Dotted keys supplied by the config file or environment.
    #[serde(skip)]
    overridden: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Bearer token for the admin API. Requests are refused until it is set.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectSettings {
    pub slug_prefix: String,
    pub code_length: usize,
    pub reserved_slugs: Vec<String>,
    pub default_http_status: u16,
    pub not_found_redirect_url: String,
    pub expired_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub enabled: bool,
    pub retention_days: u32,
    pub anonymize_ips: bool,
    pub ip_hash_salt: Option<String>,
    pub geo_enabled: bool,
    pub ua_cache_ttl_secs: u64,
    pub flush_interval_secs: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpSettings {
    /// Path to a MaxMind City MMDB. When set and readable it takes
    /// precedence over the HTTP lookup API.
    pub mmdb_path: Option<String>,
    /// External lookup endpoint; `{ip}` is replaced with the address.
    pub api_url: String,
    pub default_country: String,
    pub default_city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub link_ttl_secs: u64,
    pub capacity: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:golink.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self { token: None }
    }
}

impl Default for RedirectSettings {
    fn default() -> Self {
        Self {
            slug_prefix: "s".to_string(),
            code_length: 8,
            reserved_slugs: [
                "admin", "api", "login", "logout", "cp", "dashboard", "settings",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_http_status: 301,
            not_found_redirect_url: "/".to_string(),
            expired_message: "This link has expired".to_string(),
        }
    }
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 90,
            anonymize_ips: false,
            ip_hash_salt: None,
            geo_enabled: false,
            ua_cache_ttl_secs: 3600,
            flush_interval_secs: 10,
            queue_capacity: 4096,
        }
    }
}

impl Default for GeoIpSettings {
    fn default() -> Self {
        Self {
            mmdb_path: None,
            api_url:
                "http://ip-api.com/json/{ip}?fields=status,countryCode,city,regionName,lat,lon,timezone"
                    .to_string(),
            default_country: "AE".to_string(),
            default_city: "Dubai".to_string(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            link_ttl_secs: 300,
            capacity: 10_000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            api: ApiSettings::default(),
            redirect: RedirectSettings::default(),
            analytics: AnalyticsSettings::default(),
            geoip: GeoIpSettings::default(),
            cache: CacheSettings::default(),
            trusted_proxies: Vec::new(),
            overridden: BTreeSet::new(),
        }
    }
}

impl Settings {
    /// Load settings from the default layers (`config.*` file + `GOLINK__` env).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(Some("config"))
    }

    /// Load settings with an explicit (optional) config file base name.
    pub fn load_from(file: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(name) = file {
            builder = builder.add_source(config::File::with_name(name).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("GOLINK")
                .separator("__")
                .try_parsing(true),
        );

        let layered = builder.build().context("failed to assemble configuration")?;

        // The layered sources contain only what the file/env supplied; the
        // defaults come from serde. Record the supplied keys before
        // deserializing so provenance survives into the typed struct.
        let mut overridden = BTreeSet::new();
        if let Ok(tree) = layered.clone().try_deserialize::<serde_json::Value>() {
            collect_keys(&tree, String::new(), &mut overridden);
        }

        let mut settings: Settings = layered
            .try_deserialize()
            .context("invalid configuration values")?;
        settings.overridden = overridden;
        settings.validate();
        Ok(settings)
    }

    /// Whether a dotted key (e.g. `analytics.retention_days`) came from the
    /// config file or environment rather than the built-in default.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overridden.contains(key)
    }

    /// Clamp and sanity-check values, logging where a default was restored.
    fn validate(&mut self) {
        if self.server.port == 0 {
            tracing::warn!("server.port must be nonzero, using default 8080");
            self.server.port = 8080;
        }

        if !(4..=32).contains(&self.redirect.code_length) {
            tracing::warn!(
                configured = self.redirect.code_length,
                "redirect.code_length out of range 4..=32, using default 8"
            );
            self.redirect.code_length = 8;
        }

        if !ALLOWED_HTTP_STATUSES.contains(&self.redirect.default_http_status) {
            tracing::warn!(
                configured = self.redirect.default_http_status,
                "redirect.default_http_status must be one of 301/302/307/308, using 301"
            );
            self.redirect.default_http_status = 301;
        }

        if self.analytics.retention_days > 3650 {
            tracing::warn!(
                configured = self.analytics.retention_days,
                "analytics.retention_days capped at 3650"
            );
            self.analytics.retention_days = 3650;
        }

        if let Some(salt) = &self.analytics.ip_hash_salt {
            if !salt.trim().is_empty() && !salt.starts_with('$') && salt.len() < MIN_SALT_LEN {
                tracing::warn!(
                    length = salt.len(),
                    "analytics.ip_hash_salt is shorter than {MIN_SALT_LEN} characters"
                );
            }
        }

        for cidr in &self.trusted_proxies {
            if cidr.parse::<ipnet::IpNet>().is_err() && cidr.parse::<std::net::IpAddr>().is_err() {
                tracing::warn!(cidr = %cidr, "ignoring unparseable trusted proxy entry");
            }
        }
    }

    /// Trusted proxy CIDRs, skipping unparseable entries. Bare addresses are
    /// treated as host-length prefixes.
    pub fn trusted_proxy_nets(&self) -> Vec<ipnet::IpNet> {
        self.trusted_proxies
            .iter()
            .filter_map(|s| {
                s.parse::<ipnet::IpNet>()
                    .ok()
                    .or_else(|| s.parse::<std::net::IpAddr>().ok().map(ipnet::IpNet::from))
            })
            .collect()
    }
}

fn collect_keys(value: &serde_json::Value, prefix: String, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                collect_keys(v, key, out);
            }
        }
        _ => {
            if !prefix.is_empty() {
                out.insert(prefix);
            }
        }
    }
}
