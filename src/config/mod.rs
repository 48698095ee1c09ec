// config/mod.rs — daemon configuration.
//
// Priority (highest to lowest): CLI / env var > {data_dir}/config.toml >
// built-in default. Env names for the security knobs are inherited from the
// deployment this daemon serves: SETTINGS_ADMIN_TOKEN, CI_SETTINGS_ADMIN_TOKEN,
// OPS_STREAM_SECRET, DEV_LOCAL_LLM.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4320;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST listen port (default: 4320).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,sqlx=warn" (default: "info").
    log: Option<String>,
    /// Static admin token for privileged ops endpoints.
    admin_token: Option<String>,
    /// Secondary admin token (CI use).
    ci_admin_token: Option<String>,
    /// HMAC secret for stream tokens.
    stream_secret: Option<String>,
    /// Log SQLite queries slower than this many milliseconds (0 = off).
    slow_query_threshold_ms: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpsConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub log: String,
    /// Emit JSON log lines instead of the compact human format.
    pub log_json: bool,
    /// Static admin credentials; any match grants privileged access.
    /// Empty → admin endpoints degrade to loopback-only.
    pub admin_tokens: Vec<String>,
    /// HMAC secret for stream tokens. None falls back to the first admin
    /// token; with neither, tokens go out unsigned (dev only).
    pub stream_secret: Option<String>,
    /// Deterministic execution and streaming for tests/demos (DEV_LOCAL_LLM).
    pub fake_mode: bool,
    /// Skip SQLite entirely and run on the in-memory store.
    pub in_memory: bool,
    /// Log SQLite queries slower than this many milliseconds (0 = off).
    pub slow_query_threshold_ms: u64,
}

impl OpsConfig {
    /// Build config from CLI args + env + optional TOML file.
    pub fn new(
        port: Option<u16>,
        bind_address: Option<String>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        log_json: bool,
        fake: bool,
        in_memory: bool,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // TOML is the lowest-priority override layer.
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let bind_address = bind_address
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let mut admin_tokens = Vec::new();
        for token in [
            std::env::var("SETTINGS_ADMIN_TOKEN").ok().or(toml.admin_token),
            std::env::var("CI_SETTINGS_ADMIN_TOKEN")
                .ok()
                .or(toml.ci_admin_token),
        ]
        .into_iter()
        .flatten()
        {
            if !token.is_empty() && !admin_tokens.contains(&token) {
                admin_tokens.push(token);
            }
        }

        let stream_secret = std::env::var("OPS_STREAM_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.stream_secret);

        let fake_mode = fake
            || std::env::var("DEV_LOCAL_LLM")
                .map(|v| truthy(&v))
                .unwrap_or(false);

        Self {
            port,
            bind_address,
            data_dir,
            log,
            log_json,
            admin_tokens,
            stream_secret,
            fake_mode,
            in_memory,
            slow_query_threshold_ms: toml.slow_query_threshold_ms.unwrap_or(0),
        }
    }

    /// Secret used to sign and verify stream tokens: the dedicated secret if
    /// set, else the first admin token, else nothing (unsigned tokens).
    pub fn effective_stream_secret(&self) -> Option<String> {
        self.stream_secret
            .clone()
            .or_else(|| self.admin_tokens.first().cloned())
    }
}

fn truthy(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/opsd or ~/.local/share/opsd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("opsd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("opsd");
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("opsd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("opsd");
        }
    }
    // Fallback
    PathBuf::from(".opsd")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
