use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub token_file: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api".into(),
            poll_interval_ms: 3000,
            request_timeout_secs: 30,
            token_file: None,
        }
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL with a trailing slash so endpoint joins keep any path prefix.
    pub fn api_base_url(&self) -> Result<Url, url::ParseError> {
        let raw = self.api_base_url.trim();
        if raw.ends_with('/') {
            Url::parse(raw)
        } else {
            Url::parse(&format!("{raw}/"))
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<toml::Table>(&raw) {
            if let Some(v) = file_value(&file_cfg, "api_base_url") {
                settings.api_base_url = v;
            }
            if let Some(v) = file_value(&file_cfg, "poll_interval_ms").and_then(|v| v.parse().ok()) {
                settings.poll_interval_ms = v;
            }
            if let Some(v) =
                file_value(&file_cfg, "request_timeout_secs").and_then(|v| v.parse().ok())
            {
                settings.request_timeout_secs = v;
            }
            if let Some(v) = file_value(&file_cfg, "token_file") {
                settings.token_file = Some(PathBuf::from(v));
            }
        }
    }

    if let Some(v) = env("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("APP__POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        settings.request_timeout_secs = v;
    }

    if let Some(v) = env("APP__TOKEN_FILE") {
        settings.token_file = Some(PathBuf::from(v));
    }

    settings
}

fn file_value(table: &toml::Table, key: &str) -> Option<String> {
    match table.get(key)? {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Integer(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from(Path::new("./does/not/exist.toml"), no_env);
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.poll_interval(), Duration::from_millis(3000));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_values_apply_and_env_wins() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("together_client_{suffix}.toml"));
        fs::write(
            &path,
            r#"
api_base_url = "https://file.example/api"
poll_interval_ms = 1500
request_timeout_secs = "not-a-number"
token_file = "/tmp/token"
"#,
        )
        .expect("write settings");

        let settings = load_settings_from(&path, |key| match key {
            "APP__API_BASE_URL" => Some("https://env.example/v2".into()),
            "APP__REQUEST_TIMEOUT_SECS" => Some("5".into()),
            _ => None,
        });

        assert_eq!(settings.api_base_url, "https://env.example/v2");
        assert_eq!(settings.poll_interval_ms, 1500);
        assert_eq!(settings.request_timeout_secs, 5);
        assert_eq!(settings.token_file, Some(PathBuf::from("/tmp/token")));

        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn default_loader_reads_working_directory_file_and_process_env() {
        let expected = load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| {
            std::env::var(key).ok()
        });
        assert_eq!(load_settings(), expected);
    }

    #[test]
    fn base_url_keeps_path_prefix_for_joins() {
        let settings = ClientSettings {
            api_base_url: "https://api.example/v1".into(),
            ..ClientSettings::default()
        };
        let base = settings.api_base_url().expect("url");
        assert_eq!(
            base.join("couples/status").expect("join").as_str(),
            "https://api.example/v1/couples/status"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let settings = ClientSettings {
            api_base_url: "not a url".into(),
            ..ClientSettings::default()
        };
        assert!(settings.api_base_url().is_err());
    }
}
