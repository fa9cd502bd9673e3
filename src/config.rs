#![forbid(unsafe_code)]

//! Runtime configuration for the service.
//!
//! Values are layered: explicit overrides (CLI flags) win over the process
//! environment, which wins over the `.env` file, which wins over the profile
//! defaults.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_STORAGE_ROOT: &str = "downloads";
pub const TESTING_STORAGE_ROOT: &str = "test_downloads";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_EXTRACTOR_RETRIES: u32 = 3;
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Deployment profile selected through `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
    Testing,
}

impl Profile {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            "testing" | "test" => Some(Self::Testing),
            _ => None,
        }
    }

    pub fn default_log_level(self) -> &'static str {
        match self {
            Self::Development | Self::Testing => "debug",
            Self::Production => "warn",
        }
    }

    pub fn default_storage_root(self) -> &'static str {
        match self {
            Self::Testing => TESTING_STORAGE_ROOT,
            Self::Development | Self::Production => DEFAULT_STORAGE_ROOT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub profile: Profile,
    pub storage_root: PathBuf,
    pub host: IpAddr,
    pub port: u16,
    pub ytdlp_bin: PathBuf,
    pub extraction_timeout: Duration,
    pub extractor_retries: u32,
    pub max_body_bytes: usize,
    pub log_level: String,
}

impl ServiceConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub storage_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_service_config(overrides: ConfigOverrides) -> Result<ServiceConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_service_config(&file_vars, env_var_string, overrides)
}

fn build_service_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<ServiceConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let profile = match lookup("APP_ENV") {
        Some(raw) => Profile::parse(&raw).ok_or_else(|| {
            anyhow!("invalid APP_ENV: {raw} (expected development|production|testing)")
        })?,
        None => Profile::Production,
    };

    let storage_root = overrides
        .storage_root
        .or_else(|| lookup("UPLOAD_FOLDER").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(profile.default_storage_root()));

    let host_raw = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let host = host_raw
        .parse::<IpAddr>()
        .with_context(|| format!("expected a valid IPv4 or IPv6 address for HOST, got {host_raw}"))?;

    let port = overrides
        .port
        .or_else(|| lookup("PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);

    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup("YT_DLP_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));

    let timeout_secs = lookup("YT_DLP_TIMEOUT")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT_SECS);

    let extractor_retries = lookup("YT_DLP_RETRIES")
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_EXTRACTOR_RETRIES);

    let max_body_bytes = lookup("MAX_CONTENT_LENGTH")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);

    let log_level = lookup("LOG_LEVEL")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| profile.default_log_level().to_string());

    Ok(ServiceConfig {
        profile,
        storage_root,
        host,
        port,
        ytdlp_bin,
        extraction_timeout: Duration::from_secs(timeout_secs),
        extractor_retries,
        max_body_bytes,
        log_level,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Parses a dotenv-style file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> ServiceConfig {
        let file = make_env_file(contents);
        let vars = read_env_file(file.path()).unwrap();
        build_service_config(&vars, |_| None, ConfigOverrides::default()).unwrap()
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let cfg = build_service_config(&HashMap::new(), |_| None, ConfigOverrides::default())
            .unwrap();
        assert_eq!(cfg.profile, Profile::Production);
        assert_eq!(cfg.storage_root, PathBuf::from(DEFAULT_STORAGE_ROOT));
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.host, DEFAULT_HOST.parse::<IpAddr>().unwrap());
        assert_eq!(cfg.ytdlp_bin, PathBuf::from(DEFAULT_YTDLP_BIN));
        assert_eq!(
            cfg.extraction_timeout,
            Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS)
        );
        assert_eq!(cfg.extractor_retries, 3);
        assert_eq!(cfg.max_body_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.log_level, "warn");
    }

    #[test]
    fn env_file_values_are_read() {
        let cfg = config_from(
            "UPLOAD_FOLDER=\"/srv/clips\"\nPORT=\"9090\"\nHOST=127.0.0.1\nYT_DLP_TIMEOUT=45\n",
        );
        assert_eq!(cfg.storage_root, PathBuf::from("/srv/clips"));
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.host, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(cfg.extraction_timeout, Duration::from_secs(45));
    }

    #[test]
    fn testing_profile_switches_storage_and_log_level() {
        let cfg = config_from("APP_ENV=testing\n");
        assert_eq!(cfg.profile, Profile::Testing);
        assert_eq!(cfg.storage_root, PathBuf::from(TESTING_STORAGE_ROOT));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let file = make_env_file("APP_ENV=staging\n");
        let vars = read_env_file(file.path()).unwrap();
        let err = build_service_config(&vars, |_| None, ConfigOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("invalid APP_ENV"));
    }

    #[test]
    fn process_env_wins_over_file() {
        let file = make_env_file("PORT=7000\nUPLOAD_FOLDER=/file\n");
        let vars = read_env_file(file.path()).unwrap();
        let cfg = build_service_config(
            &vars,
            |key| (key == "PORT").then(|| "7100".to_string()),
            ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.port, 7100);
        assert_eq!(cfg.storage_root, PathBuf::from("/file"));
    }

    #[test]
    fn overrides_win_over_everything() {
        let mut vars = HashMap::new();
        vars.insert("UPLOAD_FOLDER".to_string(), "/file".to_string());
        vars.insert("HOST".to_string(), "10.0.0.1".to_string());
        let cfg = build_service_config(
            &vars,
            |key| (key == "PORT").then(|| "7100".to_string()),
            ConfigOverrides {
                storage_root: Some(PathBuf::from("/override")),
                host: Some("127.0.0.1".into()),
                port: Some(9000),
                ytdlp_bin: Some(PathBuf::from("/opt/yt-dlp")),
                env_path: None,
            },
        )
        .unwrap();
        assert_eq!(cfg.storage_root, PathBuf::from("/override"));
        assert_eq!(cfg.host, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.ytdlp_bin, PathBuf::from("/opt/yt-dlp"));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let cfg = config_from("PORT=nope\nYT_DLP_TIMEOUT=0\nMAX_CONTENT_LENGTH=-5\n");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(
            cfg.extraction_timeout,
            Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS)
        );
        assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn invalid_host_is_an_error() {
        let file = make_env_file("HOST=not-an-ip\n");
        let vars = read_env_file(file.path()).unwrap();
        assert!(build_service_config(&vars, |_| None, ConfigOverrides::default()).is_err());
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let cfg = build_service_config(
            &HashMap::new(),
            |_| None,
            ConfigOverrides {
                host: Some("   ".into()),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.host, DEFAULT_HOST.parse::<IpAddr>().unwrap());
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let file = make_env_file(
            r#"
            export UPLOAD_FOLDER="/media"
            LOG_LEVEL='INFO'
            PORT =  "9090"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(file.path()).unwrap();
        assert_eq!(vars.get("UPLOAD_FOLDER").unwrap(), "/media");
        assert_eq!(vars.get("LOG_LEVEL").unwrap(), "INFO");
        assert_eq!(vars.get("PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn log_level_is_lowercased() {
        let cfg = config_from("LOG_LEVEL=INFO\n");
        assert_eq!(cfg.log_level, "info");
    }
}
