//! Server configuration.
//!
//! Every setting is resolved from the command line (or its environment variable), then from the
//! configuration file, then from the defaults below.
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::HeaderName;
use serde::Deserialize;

use crate::common::cli::ServerStartOpts;
use crate::common::error::DataJobError;
use crate::common::timeutils::{deserialize_duration, get_duration_from_env};
use crate::server::backend::{BackendConfig, BackendKind};
use crate::server::bootstrap::ServerConfig;
use crate::server::manager::JobTemplate;
use crate::server::submit::SubmitMode;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8181;
pub const DEFAULT_NAMESPACE: &str = "test";
pub const DEFAULT_IMAGE: &str = "nginx";
pub const DEFAULT_COMMAND: &[&str] = &["ls"];
pub const DEFAULT_TENANT_HEADER: &str = "jwt_token";
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Delay of the reconciliation round that follows the acceptance of a job.
pub const ACCEPTED_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// How many consecutive status errors of a job are tolerated before the job is failed.
pub const DEFAULT_MAX_STATUS_ERRORS: u32 = 3;

/// How often is the backend queried when a submission waits for a job to finish.
pub fn get_status_poll_interval() -> Duration {
    get_duration_from_env("DATAJOB_STATUS_POLL_INTERVAL_MS").unwrap_or(Duration::from_secs(2))
}

pub fn max_status_errors() -> u32 {
    std::env::var("DATAJOB_MAX_STATUS_ERRORS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|&count| count > 0)
        .unwrap_or(DEFAULT_MAX_STATUS_ERRORS)
}

/// Contents of the TOML configuration file.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub backend: Option<BackendKind>,
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub tenant_header: Option<String>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub submit_timeout: Option<Duration>,
    pub submit_mode: Option<SubmitMode>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub run_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub reconcile_interval: Option<Duration>,
}

pub fn load_config_file(path: &Path) -> crate::Result<FileConfig> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        DataJobError::ConfigError(format!(
            "Cannot read configuration file {}: {error}",
            path.display()
        ))
    })?;
    Ok(toml::from_str(&content)?)
}

pub fn resolve_server_config(opts: ServerStartOpts) -> crate::Result<ServerConfig> {
    let file = match &opts.config {
        Some(path) => {
            log::debug!("Loading configuration from {}", path.display());
            load_config_file(path)?
        }
        None => FileConfig::default(),
    };
    let command = if opts.command.is_empty() {
        file.command
            .unwrap_or_else(|| DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect())
    } else {
        opts.command
    };

    let config = ServerConfig {
        host: opts
            .host
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: opts.port.or(file.port).unwrap_or(DEFAULT_PORT),
        backend: BackendConfig {
            kind: opts
                .backend
                .or(file.backend)
                .unwrap_or(BackendKind::Kubernetes),
            namespace: opts
                .namespace
                .or(file.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            kubeconfig: opts.kubeconfig.or(file.kubeconfig),
        },
        template: JobTemplate {
            image: opts
                .image
                .or(file.image)
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            command,
        },
        tenant_header: opts
            .tenant_header
            .or(file.tenant_header)
            .unwrap_or_else(|| DEFAULT_TENANT_HEADER.to_string()),
        submit_timeout: opts
            .submit_timeout
            .map(|d| d.unpack())
            .or(file.submit_timeout)
            .unwrap_or(DEFAULT_SUBMIT_TIMEOUT),
        submit_mode: opts.submit_mode.or(file.submit_mode).unwrap_or_default(),
        run_timeout: opts.run_timeout.map(|d| d.unpack()).or(file.run_timeout),
        reconcile_interval: opts
            .reconcile_interval
            .map(|d| d.unpack())
            .or(file.reconcile_interval)
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL),
        max_status_errors: max_status_errors(),
        status_poll_interval: get_status_poll_interval(),
    };
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ServerConfig) -> crate::Result<()> {
    let invalid = |message: &str| Err(DataJobError::ConfigError(message.to_string()));
    if config.template.command.is_empty() {
        return invalid("Job command cannot be empty");
    }
    if config.template.image.is_empty() {
        return invalid("Job image cannot be empty");
    }
    if config.backend.namespace.is_empty() {
        return invalid("Namespace cannot be empty");
    }
    if config.submit_timeout.is_zero() {
        return invalid("Submit timeout has to be positive");
    }
    if config.reconcile_interval.is_zero() {
        return invalid("Reconcile interval has to be positive");
    }
    if config.status_poll_interval.is_zero() {
        return invalid("Status poll interval has to be positive");
    }
    if HeaderName::from_bytes(config.tenant_header.as_bytes()).is_err() {
        return Err(DataJobError::ConfigError(format!(
            "`{}` is not a valid header name",
            config.tenant_header
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::str::FromStr;
    use std::time::Duration;

    use super::{FileConfig, load_config_file, resolve_server_config};
    use crate::common::cli::ServerStartOpts;
    use crate::common::error::DataJobError;
    use crate::common::timeutils::ArgDuration;
    use crate::server::backend::BackendKind;
    use crate::server::submit::SubmitMode;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = resolve_server_config(ServerStartOpts::default()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8181);
        assert_eq!(config.backend.kind, BackendKind::Kubernetes);
        assert_eq!(config.backend.namespace, "test");
        assert!(config.backend.kubeconfig.is_none());
        assert_eq!(config.template.image, "nginx");
        assert_eq!(config.template.command, vec!["ls"]);
        assert_eq!(config.tenant_header, "jwt_token");
        assert_eq!(config.submit_timeout, Duration::from_secs(30));
        assert_eq!(config.submit_mode, SubmitMode::Detached);
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.reconcile_interval, Duration::from_secs(10));
    }

    #[test]
    fn parse_file_config() {
        let file = write_config(
            r#"
port = 9000
backend = "local"
command = ["sh", "-c", "exit 0"]
submit_timeout = "5s"
submit_mode = "wait"
run_timeout = "1h"
"#,
        );
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(
            config,
            FileConfig {
                port: Some(9000),
                backend: Some(BackendKind::Local),
                command: Some(vec!["sh".into(), "-c".into(), "exit 0".into()]),
                submit_timeout: Some(Duration::from_secs(5)),
                submit_mode: Some(SubmitMode::Wait),
                run_timeout: Some(Duration::from_secs(3600)),
                ..Default::default()
            }
        );
    }

    #[test]
    fn unknown_file_key() {
        let file = write_config("prot = 9000\n");
        assert!(matches!(
            load_config_file(file.path()),
            Err(DataJobError::ConfigError(_))
        ));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::TempDir::with_prefix("datajob").unwrap();
        assert!(matches!(
            load_config_file(&dir.path().join("missing.toml")),
            Err(DataJobError::ConfigError(_))
        ));
    }

    #[test]
    fn cli_overrides_file() {
        let file = write_config(
            r#"
port = 9000
image = "busybox"
submit_timeout = "5s"
"#,
        );
        let config = resolve_server_config(ServerStartOpts {
            config: Some(file.path().to_path_buf()),
            port: Some(9100),
            submit_timeout: Some(ArgDuration::from_str("1m").unwrap()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.template.image, "busybox");
        assert_eq!(config.submit_timeout, Duration::from_secs(60));
    }

    #[test]
    fn invalid_values() {
        let file = write_config("command = []\n");
        assert!(matches!(
            resolve_server_config(ServerStartOpts {
                config: Some(file.path().to_path_buf()),
                ..Default::default()
            }),
            Err(DataJobError::ConfigError(_))
        ));
        assert!(matches!(
            resolve_server_config(ServerStartOpts {
                reconcile_interval: Some(ArgDuration::from_str("0s").unwrap()),
                ..Default::default()
            }),
            Err(DataJobError::ConfigError(_))
        ));
        assert!(matches!(
            resolve_server_config(ServerStartOpts {
                tenant_header: Some("not a header".to_string()),
                ..Default::default()
            }),
            Err(DataJobError::ConfigError(_))
        ));
    }
}
