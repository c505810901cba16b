use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Environment variable consulted when no config path is given on the command line.
pub const CONFIG_ENV_VAR: &str = "CENSUSGEN_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Picks the config file: explicit argument, then `$CENSUSGEN_CONFIG`, then `./config.yaml`.
pub fn resolve_config_path(arg: Option<String>) -> PathBuf {
    arg.filter(|a| !a.trim().is_empty())
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().filter(|v| !v.trim().is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Loads a config file. Relative paths inside it are resolved against the
/// directory containing the file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = load_config_from_str(&content)?;

    if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        resolve_relative_paths(&mut config, base);
    }

    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_yaml::from_str(content)?;

    normalize_ids(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn normalize_ids(config: &mut Config) {
    for portal in &mut config.portals {
        portal.id = portal.id.trim().to_uppercase();
    }
    if let Some(email) = &mut config.email {
        for id in &mut email.portals {
            *id = id.trim().to_uppercase();
        }
    }
    for id in &mut config.unimplemented {
        *id = id.trim().to_uppercase();
    }
    for target in config.aliases.values_mut() {
        *target = target.trim().to_uppercase();
    }
}

fn resolve_relative_paths(config: &mut Config, base: &Path) {
    let join = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };

    if let Some(db_path) = &mut config.database.path {
        join(db_path);
    }
    join(&mut config.paths.staging_dir);
    for dir in &mut config.paths.extra_clear_dirs {
        join(dir);
    }
    if let Some(file) = &mut config.logging.file {
        join(file);
    }
    for portal in &mut config.portals {
        join(&mut portal.output_dir);
    }
    if let Some(email) = &mut config.email {
        join(&mut email.output_dir);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.paths.staging_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "paths.staging_dir must not be empty".to_string(),
        });
    }

    if config.polling.idle_secs == 0
        || config.polling.cooldown_secs == 0
        || config.polling.error_backoff_secs == 0
    {
        return Err(ConfigError::Validation {
            message: "polling intervals must be positive".to_string(),
        });
    }

    if config.mapper.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "mapper.timeout_secs must be positive".to_string(),
        });
    }

    let stability = &config.stability;
    if stability.poll_interval_ms == 0
        || stability.quiet_polls == 0
        || stability.max_polls < stability.quiet_polls
        || stability.read_attempts == 0
    {
        return Err(ConfigError::Validation {
            message: "stability settings must be positive with max_polls >= quiet_polls"
                .to_string(),
        });
    }

    let mut portal_ids = HashSet::new();
    for portal in &config.portals {
        if portal.id.is_empty() {
            return Err(ConfigError::Validation {
                message: "portal id must not be empty".to_string(),
            });
        }
        if !portal_ids.insert(portal.id.as_str()) {
            return Err(invalid_portal(&portal.id, "Duplicate portal ID"));
        }
        validate_command(&portal.id, &portal.command)?;
        validate_output_file(&portal.id, &portal.output_file)?;
    }

    let mut email_ids = HashSet::new();
    if let Some(email) = &config.email {
        if email.portals.is_empty() {
            return Err(ConfigError::Validation {
                message: "email.portals must list at least one portal".to_string(),
            });
        }
        for id in &email.portals {
            if portal_ids.contains(id.as_str()) {
                return Err(invalid_portal(
                    id,
                    "listed both as a file portal and as an email portal",
                ));
            }
            if !email_ids.insert(id.as_str()) {
                return Err(invalid_portal(id, "Duplicate email portal ID"));
            }
        }
        validate_command("EMAIL", &email.command)?;
        validate_output_file("EMAIL", &email.output_file)?;
    }

    let unimplemented: HashSet<&str> = config.unimplemented.iter().map(String::as_str).collect();
    for (alias, target) in &config.aliases {
        let known = portal_ids.contains(target.as_str())
            || email_ids.contains(target.as_str())
            || unimplemented.contains(target.as_str());
        if !known {
            return Err(ConfigError::Validation {
                message: format!("alias '{}' points to unknown portal '{}'", alias, target),
            });
        }
    }

    Ok(())
}

fn validate_command(id: &str, command: &[String]) -> Result<(), ConfigError> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(invalid_portal(id, "command must not be empty")),
    }
}

fn validate_output_file(id: &str, output_file: &str) -> Result<(), ConfigError> {
    if output_file.trim().is_empty() {
        return Err(invalid_portal(id, "output_file must not be empty"));
    }
    if output_file.contains('/') || output_file.contains('\\') {
        return Err(invalid_portal(
            id,
            "output_file must be a file name, not a path",
        ));
    }
    Ok(())
}

fn invalid_portal(id: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidPortal {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;

    const MINIMAL: &str = r#"
paths:
  staging_dir: attachments
"#;

    const FULL: &str = r#"
database:
  path: data/census.db
paths:
  staging_dir: attachments
  extra_clear_dirs: [scratch]
polling:
  idle_secs: 3
mapper:
  timeout_secs: 30
logging:
  level: debug
  format: json
portals:
  - id: adnic
    output_dir: generated/adnic
    output_file: MemberUpload.xlsx
    command: ["python", "-m", "census.adnic"]
  - id: GIG
    output_dir: generated/gig
    output_file: gig_map.xlsx
    command: ["python", "-m", "census.gig"]
    accepts_auxiliary_data: true
email:
  portals: [allianz, BUPA]
  output_dir: generated/email
  output_file: "Lifecare_Census Template.xlsx"
  command: ["python", "-m", "census.email"]
aliases:
  "Abu Dhabi National Insurance": adnic
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.polling.idle_secs, 10);
        assert_eq!(config.polling.cooldown_secs, 5);
        assert_eq!(config.polling.error_backoff_secs, 10);
        assert_eq!(config.mapper.timeout_secs, 600);
        assert_eq!(config.stability.read_attempts, 3);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.portals.is_empty());
        assert!(config.email.is_none());
        assert!(config.unimplemented.contains(&"ALSAGR".to_string()));
    }

    #[test]
    fn test_load_full_config_normalizes_ids() {
        let config = load_config_from_str(FULL).unwrap();
        assert_eq!(config.portals[0].id, "ADNIC");
        assert!(config.portals[1].accepts_auxiliary_data);
        assert_eq!(config.email.as_ref().unwrap().portals, vec!["ALLIANZ", "BUPA"]);
        assert_eq!(config.aliases["Abu Dhabi National Insurance"], "ADNIC");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.mapper.timeout().as_secs(), 30);
    }

    #[test]
    fn test_duplicate_portal_id() {
        let yaml = r#"
paths:
  staging_dir: a
portals:
  - { id: ADNIC, output_dir: x, output_file: a.xlsx, command: [run] }
  - { id: adnic, output_dir: y, output_file: b.xlsx, command: [run] }
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::InvalidPortal { .. })
        ));
    }

    #[test]
    fn test_email_portal_overlapping_file_portal() {
        let yaml = r#"
paths:
  staging_dir: a
portals:
  - { id: BUPA, output_dir: x, output_file: a.xlsx, command: [run] }
email:
  portals: [BUPA]
  output_dir: e
  output_file: e.xlsx
  command: [run]
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        let yaml = r#"
paths:
  staging_dir: a
portals:
  - { id: ADNIC, output_dir: x, output_file: a.xlsx, command: [] }
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_output_file_with_separator_rejected() {
        let yaml = r#"
paths:
  staging_dir: a
portals:
  - { id: ADNIC, output_dir: x, output_file: "sub/a.xlsx", command: [run] }
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_alias_to_unknown_portal_rejected() {
        let yaml = r#"
paths:
  staging_dir: a
aliases:
  "Somebody": NOWHERE
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_alias_to_unimplemented_portal_allowed() {
        let yaml = r#"
paths:
  staging_dir: a
aliases:
  "Al Sagr National": alsagr
"#;
        assert!(load_config_from_str(yaml).is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = r#"
paths:
  staging_dir: a
polling:
  idle_secs: 0
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            load_config_from_str("paths: [unterminated"),
            Err(ConfigError::ParseYaml(_))
        ));
    }

    #[test]
    fn test_load_config_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, FULL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.paths.staging_dir, dir.path().join("attachments"));
        assert_eq!(config.portals[0].output_dir, dir.path().join("generated/adnic"));
        assert_eq!(
            config.database.path.as_deref(),
            Some(dir.path().join("data/census.db").as_path())
        );
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/censusgen/config.yaml"),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_config_path_precedence() {
        std::env::remove_var(CONFIG_ENV_VAR);
        assert_eq!(resolve_config_path(None), PathBuf::from("config.yaml"));

        std::env::set_var(CONFIG_ENV_VAR, "/etc/censusgen.yaml");
        assert_eq!(resolve_config_path(None), PathBuf::from("/etc/censusgen.yaml"));
        assert_eq!(
            resolve_config_path(Some("local.yaml".to_string())),
            PathBuf::from("local.yaml")
        );
        std::env::remove_var(CONFIG_ENV_VAR);
    }
}
