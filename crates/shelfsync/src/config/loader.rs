use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::jobs::schedule::Trigger;

/// Longest accepted interval trigger: 366 days.
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 60 * 60;
/// Longest accepted history retention: one hundred years.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Returns the default config location: `~/.shelfsync/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".shelfsync").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.candidates_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "candidates_directory must not be empty".to_string(),
        });
    }

    let output = &config.output;
    if output.root_write_path.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "output.root_write_path must not be empty".to_string(),
        });
    }
    if output.root_server_visible_path.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "output.root_server_visible_path must not be empty".to_string(),
        });
    }
    if output.namespace.is_empty()
        || output.namespace.contains(['/', '\\'])
        || output.namespace == "."
        || output.namespace == ".."
    {
        return Err(ConfigError::Validation {
            message: format!(
                "output.namespace must be a single path segment, got '{}'",
                output.namespace
            ),
        });
    }

    if config.history_retention_days > MAX_RETENTION_DAYS {
        return Err(ConfigError::Validation {
            message: format!(
                "history_retention_days must be at most {}, got {}",
                MAX_RETENTION_DAYS, config.history_retention_days
            ),
        });
    }

    let mut seen = HashSet::new();
    for entry in &config.schedules {
        if !seen.insert(entry.job.as_str()) {
            return Err(ConfigError::InvalidSchedule {
                job: entry.job.clone(),
                reason: "Duplicate schedule entry".to_string(),
            });
        }
        validate_trigger(&entry.job, &entry.trigger)?;
    }

    Ok(())
}

fn validate_trigger(job: &str, trigger: &Trigger) -> Result<(), ConfigError> {
    match *trigger {
        Trigger::Interval { seconds } if seconds == 0 => Err(ConfigError::InvalidSchedule {
            job: job.to_string(),
            reason: "Interval must be at least one second".to_string(),
        }),
        Trigger::Interval { seconds } if seconds > MAX_INTERVAL_SECONDS => {
            Err(ConfigError::InvalidSchedule {
                job: job.to_string(),
                reason: format!(
                    "Interval of {}s exceeds the maximum of {}s",
                    seconds, MAX_INTERVAL_SECONDS
                ),
            })
        }
        Trigger::Daily { hour, minute } if hour > 23 || minute > 59 => {
            Err(ConfigError::InvalidSchedule {
                job: job.to_string(),
                reason: format!("Invalid time of day {:02}:{:02}", hour, minute),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::OutputMode;

    const VALID: &str = r#"{
        "version": "1.0",
        "database_path": "/tmp/shelfsync.db",
        "candidates_directory": "/var/lib/shelfsync/candidates",
        "output": {
            "mode": "folder_link",
            "root_write_path": "/data/recommendations",
            "root_server_visible_path": "/media/recommendations",
            "namespace": "movies"
        },
        "schedules": [
            { "job": "library-sync", "trigger": { "type": "interval", "seconds": 3600 } },
            { "job": "history-cleanup", "trigger": { "type": "daily", "hour": 4, "minute": 30 } }
        ]
    }"#;

    #[test]
    fn test_load_valid_config() {
        let config = load_config_from_str(VALID).unwrap();
        assert_eq!(config.output.mode, OutputMode::FolderLink);
        assert!(config.output.download_images);
        assert_eq!(config.history_retention_days, 30);
        assert_eq!(config.schedules.len(), 2);
        assert_eq!(
            config.schedules[1].trigger,
            Trigger::Daily { hour: 4, minute: 30 }
        );
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/tmp/shelfsync.db"))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, VALID).unwrap();
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let content = VALID.replace("\"1.0\"", "\"2.0\"");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_rejects_nested_namespace() {
        let content = VALID.replace("\"movies\"", "\"movies/extra\"");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_root() {
        let content = VALID.replace("\"/data/recommendations\"", "\"  \"");
        assert!(load_config_from_str(&content).is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let content = VALID.replace("\"seconds\": 3600", "\"seconds\": 0");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_rejects_huge_interval() {
        let content = VALID.replace("\"seconds\": 3600", "\"seconds\": 10000000000000");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::InvalidSchedule { .. })
        ));

        let at_limit = VALID.replace(
            "\"seconds\": 3600",
            &format!("\"seconds\": {}", MAX_INTERVAL_SECONDS),
        );
        assert!(load_config_from_str(&at_limit).is_ok());
    }

    #[test]
    fn test_rejects_huge_retention() {
        let content = VALID.replacen('{', "{ \"history_retention_days\": 4294967295,", 1);
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_accepts_folder_plus_link_spelling() {
        let content = VALID.replace("\"folder_link\"", "\"folder+link\"");
        let config = load_config_from_str(&content).unwrap();
        assert_eq!(config.output.mode, OutputMode::FolderLink);
    }

    #[test]
    fn test_rejects_bad_daily_time() {
        let content = VALID.replace("\"hour\": 4", "\"hour\": 24");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_schedule() {
        let content = VALID.replace("\"history-cleanup\"", "\"library-sync\"");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }
}
