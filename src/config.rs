use serde::Deserialize;

#[derive(Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Deserialize)]
pub struct ServerConfig {
    /// Base URL of the REST API, e.g. `https://judge.example.com`.
    pub api_url: String,
    /// Base URL of the push channels, `ws://` or `wss://`.
    pub ws_url: String,
}

#[derive(Deserialize)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is not set. Default: "info".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
