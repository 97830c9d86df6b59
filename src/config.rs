use crate::error::RelayError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_RELATIVE_PATH: &str = ".msgrelay/config.toml";
pub const DEFAULT_PARTICIPANT: &str = "relay";
pub const DEFAULT_MAX_MESSAGE_BYTES: u64 = 1024 * 1024;
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub version: u32,
    pub runtime: RuntimeConfig,
    pub database: DatabaseConfig,
    pub file: FileCommsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub run_dir: PathBuf,
    pub participant: String,
    pub max_message_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

/// Resolved `[comms.file]` settings. Extensions are stored without a leading dot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCommsConfig {
    pub inbound: PathBuf,
    pub outbound: PathBuf,
    pub archive: PathBuf,
    pub message_extension: String,
    pub semaphore_extension: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRelayConfig {
    version: Option<u32>,
    runtime: Option<RawRuntimeConfig>,
    database: Option<RawDatabaseConfig>,
    comms: Option<RawCommsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRuntimeConfig {
    run_dir: Option<String>,
    participant: Option<String>,
    max_message_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDatabaseConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCommsConfig {
    file: Option<RawFileCommsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFileCommsConfig {
    inbound: Option<String>,
    outbound: Option<String>,
    archive: Option<String>,
    message_extension: Option<String>,
    semaphore_extension: Option<String>,
}

impl RelayConfig {
    /// Path of the SQLite message store.
    pub fn state_db_path(&self) -> PathBuf {
        match &self.database.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.runtime.run_dir.join(path),
            None => default_state_db(),
        }
    }
}

pub fn default_config_path(cwd: &Path) -> PathBuf {
    cwd.join(CONFIG_RELATIVE_PATH)
}

pub fn default_state_db() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("msgrelay").join("state.db");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("msgrelay")
            .join("state.db");
    }
    PathBuf::from(".msgrelay/state.db")
}

pub fn load_relay_config(path: &Path) -> Result<RelayConfig> {
    if !path.exists() {
        return Err(RelayError::Config(format!("config file {} not found", path.display())).into());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read relay config {}", path.display()))?;
    parse_relay_config(&raw, path)
}

/// Parse and validate config text. `origin` is the file the text came from; its
/// directory is the default run root.
pub fn parse_relay_config(raw: &str, origin: &Path) -> Result<RelayConfig> {
    let parsed: RawRelayConfig =
        toml::from_str(raw).with_context(|| format!("parse {}", origin.display()))?;
    validate_relay_config(parsed, origin)
}

fn validate_relay_config(raw: RawRelayConfig, path: &Path) -> Result<RelayConfig> {
    let version = raw
        .version
        .ok_or_else(|| config_error(format!("{} missing required `version`", path.display())))?;
    if version != SUPPORTED_VERSION {
        return Err(config_error(format!(
            "{} has unsupported version {version}; expected version = {SUPPORTED_VERSION}",
            path.display()
        )));
    }

    let config_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let runtime = raw.runtime.unwrap_or(RawRuntimeConfig {
        run_dir: None,
        participant: None,
        max_message_bytes: None,
    });
    let run_dir = match sanitize_optional(runtime.run_dir) {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            if dir.is_absolute() {
                dir
            } else {
                config_dir.join(dir)
            }
        }
        None => config_dir,
    };
    let max_message_bytes = runtime
        .max_message_bytes
        .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES);
    if max_message_bytes == 0 {
        return Err(config_error(format!(
            "{} has `[runtime].max_message_bytes = 0`",
            path.display()
        )));
    }
    let runtime = RuntimeConfig {
        participant: sanitize_optional(runtime.participant)
            .unwrap_or_else(|| DEFAULT_PARTICIPANT.to_string()),
        run_dir,
        max_message_bytes,
    };

    let database = DatabaseConfig {
        path: raw
            .database
            .and_then(|db| sanitize_optional(db.path))
            .map(PathBuf::from),
    };

    let file = raw
        .comms
        .and_then(|comms| comms.file)
        .ok_or_else(|| config_error(format!("{} missing `[comms.file]` section", path.display())))?;
    let file = validate_file_comms(file, &runtime.run_dir, path)?;

    Ok(RelayConfig {
        version,
        runtime,
        database,
        file,
    })
}

fn validate_file_comms(
    raw: RawFileCommsConfig,
    run_dir: &Path,
    path: &Path,
) -> Result<FileCommsConfig> {
    let inbound = required_key(raw.inbound, "inbound", path)?;
    let outbound = required_key(raw.outbound, "outbound", path)?;
    let archive = required_key(raw.archive, "archive", path)?;
    let message_extension = normalize_extension(
        required_key(raw.message_extension, "message_extension", path)?,
        "message_extension",
        path,
    )?;
    let semaphore_extension = normalize_extension(
        required_key(raw.semaphore_extension, "semaphore_extension", path)?,
        "semaphore_extension",
        path,
    )?;
    if message_extension == semaphore_extension {
        return Err(config_error(format!(
            "{} uses `{message_extension}` for both message_extension and semaphore_extension",
            path.display()
        )));
    }
    // `a.smp` next to `smp` would make every message file look like a semaphore.
    if message_extension.ends_with(&format!(".{semaphore_extension}"))
        || semaphore_extension.ends_with(&format!(".{message_extension}"))
    {
        return Err(config_error(format!(
            "{} has overlapping extensions `{message_extension}` and `{semaphore_extension}`",
            path.display()
        )));
    }

    Ok(FileCommsConfig {
        inbound: resolve_comms_dir(run_dir, &inbound),
        outbound: resolve_comms_dir(run_dir, &outbound),
        archive: resolve_comms_dir(run_dir, &archive),
        message_extension,
        semaphore_extension,
    })
}

/// Absolute paths stay as they are; relative ones live under `<run_dir>/comms/file/`.
pub fn resolve_comms_dir(run_dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        run_dir.join("comms").join("file").join(path)
    }
}

fn required_key(value: Option<String>, key: &str, path: &Path) -> Result<String> {
    sanitize_optional(value)
        .ok_or_else(|| config_error(format!("{} missing `[comms.file].{key}`", path.display())))
}

fn normalize_extension(raw: String, key: &str, path: &Path) -> Result<String> {
    let ext = raw.trim_start_matches('.').to_string();
    if ext.is_empty() {
        return Err(config_error(format!(
            "{} has empty `[comms.file].{key}`",
            path.display()
        )));
    }
    if ext.contains('/') || ext.contains('\\') {
        return Err(config_error(format!(
            "{} has path separator in `[comms.file].{key}`",
            path.display()
        )));
    }
    Ok(ext)
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn config_error(message: String) -> anyhow::Error {
    RelayError::Config(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = default_config_path(dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_valid_minimal_config() {
        let tmp = tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
version = 1
[comms.file]
inbound = "inbound"
outbound = "/srv/relay/outbound"
archive = "archive"
message_extension = ".json"
semaphore_extension = "smp"
"#,
        );

        let cfg = load_relay_config(&path).unwrap();
        let run_dir = tmp.path().join(".msgrelay");
        assert_eq!(cfg.runtime.run_dir, run_dir);
        assert_eq!(cfg.runtime.participant, DEFAULT_PARTICIPANT);
        assert_eq!(cfg.runtime.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(
            cfg.file.inbound,
            run_dir.join("comms").join("file").join("inbound")
        );
        assert_eq!(cfg.file.outbound, PathBuf::from("/srv/relay/outbound"));
        assert_eq!(cfg.file.message_extension, "json");
        assert_eq!(cfg.file.semaphore_extension, "smp");
    }

    #[test]
    fn explicit_run_dir_and_database_path() {
        let tmp = tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
version = 1
[runtime]
run_dir = "/var/lib/relay"
participant = "Relay"
[database]
path = "state.db"
[comms.file]
inbound = "in"
outbound = "out"
archive = "done"
message_extension = "json"
semaphore_extension = "smp"
"#,
        );

        let cfg = load_relay_config(&path).unwrap();
        assert_eq!(cfg.runtime.participant, "Relay");
        assert_eq!(
            cfg.file.archive,
            PathBuf::from("/var/lib/relay/comms/file/done")
        );
        assert_eq!(cfg.state_db_path(), PathBuf::from("/var/lib/relay/state.db"));
    }

    #[test]
    fn rejects_invalid_version() {
        let tmp = tempdir().unwrap();
        let path = write_config(tmp.path(), "version = 2");

        let err = load_relay_config(&path).unwrap_err();
        assert!(format!("{err}").contains("unsupported version"));
    }

    #[test]
    fn missing_comms_key_is_config_error() {
        let tmp = tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
version = 1
[comms.file]
inbound = "in"
outbound = "out"
message_extension = "json"
semaphore_extension = "smp"
"#,
        );

        let err = load_relay_config(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Config(_))
        ));
        assert!(format!("{err}").contains("missing `[comms.file].archive`"));
    }

    #[test]
    fn rejects_missing_section_and_missing_file() {
        let tmp = tempdir().unwrap();
        let path = write_config(tmp.path(), "version = 1");
        let err = load_relay_config(&path).unwrap_err();
        assert!(format!("{err}").contains("missing `[comms.file]` section"));

        let err = load_relay_config(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn rejects_clashing_extensions() {
        let tmp = tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
version = 1
[comms.file]
inbound = "in"
outbound = "out"
archive = "done"
message_extension = ".msg"
semaphore_extension = "msg"
"#,
        );

        let err = load_relay_config(&path).unwrap_err();
        assert!(format!("{err}").contains("both message_extension and semaphore_extension"));
    }

    #[test]
    fn rejects_extension_that_ends_with_the_other() {
        let tmp = tempdir().unwrap();
        for (message, semaphore) in [("x.smp", "smp"), ("json", ".done.json")] {
            let path = write_config(
                tmp.path(),
                &format!(
                    r#"
version = 1
[comms.file]
inbound = "in"
outbound = "out"
archive = "done"
message_extension = "{message}"
semaphore_extension = "{semaphore}"
"#
                ),
            );
            let err = load_relay_config(&path).unwrap_err();
            assert!(
                format!("{err}").contains("overlapping extensions"),
                "{message} / {semaphore}: {err}"
            );
        }
        // A shared tail without the dot boundary is fine.
        let path = write_config(
            tmp.path(),
            r#"
version = 1
[comms.file]
inbound = "in"
outbound = "out"
archive = "done"
message_extension = "xsmp"
semaphore_extension = "smp"
"#,
        );
        load_relay_config(&path).unwrap();
    }
}
