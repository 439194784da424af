use serde::Deserialize;
use std::path::Path;

/// Top-level configuration parsed from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub pipes: PipesConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
}

/// Server-level configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin (`https://relay.example.com`). When empty, the origin
    /// is derived per request from `Host` and `X-Forwarded-Proto`.
    #[serde(default)]
    pub public_url: String,
    /// Secret used to sign the session cookie. A random one is generated
    /// at startup when empty, which logs everyone out on restart.
    #[serde(default)]
    pub session_secret: String,
    /// Secret for AES-256-GCM sync keys.
    #[serde(default)]
    pub sync_secret: String,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
            session_secret: String::new(),
            sync_secret: String::new(),
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7464
}

fn default_upstream_timeout() -> u64 {
    30
}

/// The identity/data aggregation API users authorize against.
#[derive(Debug, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Service whose delegated token is handed to new pipes.
    #[serde(default = "default_delegated_service")]
    pub delegated_service: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            delegated_service: default_delegated_service(),
        }
    }
}

impl AggregatorConfig {
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

fn default_api_base_url() -> String {
    "https://api.singly.com".to_string()
}

fn default_delegated_service() -> String {
    "facebook".to_string()
}

/// The pipe provisioning API.
#[derive(Debug, Deserialize)]
pub struct PipesConfig {
    #[serde(default = "default_pipes_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
}

impl Default for PipesConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_pipes_base_url(),
            app_key: String::new(),
            app_secret: String::new(),
        }
    }
}

fn default_pipes_base_url() -> String {
    "https://v2beta.singly.com".to_string()
}

/// Counter store connection.
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// `redis://[:password@]host:port[/db]`. Counts are kept in process
    /// memory when empty.
    #[serde(default)]
    pub url: String,
}

/// A service offered on the landing page.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub display_name: String,
}

impl ServiceConfig {
    fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// Services listed when the config file names none.
pub fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig::new("facebook", "Facebook"),
        ServiceConfig::new("twitter", "Twitter"),
        ServiceConfig::new("instagram", "Instagram"),
        ServiceConfig::new("github", "GitHub"),
        ServiceConfig::new("foursquare", "Foursquare"),
    ]
}

/// Load and validate config from a TOML file, applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate(&config)?;

    Ok(config)
}

fn parse_config(content: &str) -> Result<Config, String> {
    let mut config: Config =
        toml::from_str(content).map_err(|e| format!("Failed to parse TOML config: {e}"))?;
    if config.services.is_empty() {
        config.services = default_services();
    }
    Ok(config)
}

/// Apply environment variable overrides.
fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    let overrides: [(&str, &mut String); 8] = [
        ("RELAY_CLIENT_ID", &mut config.aggregator.client_id),
        ("RELAY_CLIENT_SECRET", &mut config.aggregator.client_secret),
        ("RELAY_API_BASE_URL", &mut config.aggregator.api_base_url),
        ("RELAY_PIPE_KEY", &mut config.pipes.app_key),
        ("RELAY_PIPE_SECRET", &mut config.pipes.app_secret),
        ("RELAY_SYNC_SECRET", &mut config.server.sync_secret),
        ("RELAY_SESSION_SECRET", &mut config.server.session_secret),
        ("RELAY_STORE_URL", &mut config.store.url),
    ];
    for (name, slot) in overrides {
        if let Some(val) = env(name) {
            *slot = val;
        }
    }

    if let Some(port) = env("PORT").and_then(|p| p.parse().ok()) {
        config.server.port = port;
    }
}

/// Validate the entire configuration. Returns an error string on failure.
fn validate(config: &Config) -> Result<(), String> {
    validate_server(&config.server)?;
    validate_url("aggregator.api_base_url", &config.aggregator.api_base_url)?;
    validate_url("pipes.api_base_url", &config.pipes.api_base_url)?;
    validate_services(&config.services)?;

    if !config.store.url.is_empty()
        && !config.store.url.starts_with("redis://")
        && !config.store.url.starts_with("rediss://")
    {
        return Err("store.url must be a redis:// or rediss:// URL".to_string());
    }
    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<(), String> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(format!("{field} must be a valid HTTP(S) URL"));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), String> {
    if !server.public_url.is_empty() {
        validate_url("server.public_url", &server.public_url)?;
    }

    if server.sync_secret.is_empty() {
        return Err("server.sync_secret is required".to_string());
    }
    match base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        &server.sync_secret,
    ) {
        Ok(bytes) => {
            if bytes.len() < 32 {
                return Err(format!(
                    "server.sync_secret must be at least 32 bytes when base64-decoded (got {} bytes). Generate with: openssl rand -base64 32",
                    bytes.len()
                ));
            }
        }
        Err(e) => {
            return Err(format!("server.sync_secret is not valid base64: {e}"));
        }
    }

    if server.upstream_timeout_secs == 0 {
        return Err("server.upstream_timeout_secs must be positive".to_string());
    }

    Ok(())
}

fn validate_services(services: &[ServiceConfig]) -> Result<(), String> {
    let name_regex = regex_lite::Regex::new(r"^[a-z0-9-]+$")
        .map_err(|e| format!("internal regex error: {e}"))?;
    let mut seen_names = std::collections::HashSet::new();

    for svc in services {
        if !name_regex.is_match(&svc.name) {
            return Err(format!(
                "service '{}': name must match ^[a-z0-9-]+$ (lowercase alphanumeric and hyphens only)",
                svc.name
            ));
        }

        if !seen_names.insert(&svc.name) {
            return Err(format!("service '{}': duplicate name", svc.name));
        }

        if svc.display_name.is_empty() {
            return Err(format!("service '{}': display_name is required", svc.name));
        }
    }

    Ok(())
}
