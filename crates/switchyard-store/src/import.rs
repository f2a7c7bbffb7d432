//! Administrative import-file parsing.
//!
//! The import file is declarative TOML, one `[[job]]` table per job:
//!
//! ```toml
//! [[job]]
//! id = "nightly-backup"            # optional, generated when absent
//! command = "config-backup"
//! description = "Nightly running-config backup"
//! pre_hook = "per-device"          # optional fan-out hook
//! schedules = ["30 2 * * *"]       # one binding per entry
//!
//! [job.args]
//! backup_dir = "/var/backups/configs"
//! ```
//!
//! Parsing validates every cron string up front; a bad file or expression
//! aborts the import before the store is touched.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use switchyard_core::cron;
use switchyard_core::{ArgMap, ConfigError, JobDefinition};

/// One job from the import file together with its schedule expressions.
#[derive(Debug, Clone)]
pub struct ImportedJob {
    pub job: JobDefinition,
    pub schedules: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImportFile {
    #[serde(default, rename = "job")]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    id: Option<String>,
    command: String,
    #[serde(default)]
    description: String,
    pre_hook: Option<String>,
    post_hook: Option<String>,
    #[serde(default)]
    args: ArgMap,
    #[serde(default)]
    schedules: Vec<String>,
}

/// Parse and validate an import file from disk.
pub fn parse_import_file(path: impl AsRef<Path>) -> Result<Vec<ImportedJob>, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_import_str(&text, &path.display().to_string())
}

/// Parse and validate import-file text. `origin` names the source in errors.
pub fn parse_import_str(text: &str, origin: &str) -> Result<Vec<ImportedJob>, ConfigError> {
    let file: ImportFile = toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        reason: e.to_string(),
    })?;

    let mut imported = Vec::with_capacity(file.jobs.len());
    for entry in file.jobs {
        for expr in &entry.schedules {
            cron::validate(expr)?;
        }
        let job = JobDefinition {
            id: entry.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            command: entry.command,
            description: entry.description,
            pre_hook: entry.pre_hook,
            post_hook: entry.post_hook,
            default_args: entry.args,
        };
        imported.push(ImportedJob {
            job,
            schedules: entry.schedules,
        });
    }

    let mut seen = std::collections::HashSet::new();
    for i in &imported {
        if !seen.insert(i.job.id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate job id '{}' in {origin}",
                i.job.id
            )));
        }
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[job]]
id = "nightly-backup"
command = "config-backup"
description = "Nightly running-config backup"
pre_hook = "per-device"
schedules = ["30 2 * * *", "30 14 * * *"]

[job.args]
backup_dir = "/var/backups/configs"

[[job]]
command = "render-configs"
schedules = ["*/5 * * * *"]
"#;

    #[test]
    fn parses_jobs_and_schedules() {
        let jobs = parse_import_str(SAMPLE, "sample").unwrap();
        assert_eq!(jobs.len(), 2);

        let backup = &jobs[0];
        assert_eq!(backup.job.id, "nightly-backup");
        assert_eq!(backup.job.command, "config-backup");
        assert_eq!(backup.job.pre_hook.as_deref(), Some("per-device"));
        assert_eq!(backup.schedules.len(), 2);
        assert_eq!(backup.job.default_args["backup_dir"], "/var/backups/configs");

        // Missing id gets generated, missing fields default.
        let render = &jobs[1];
        assert!(!render.job.id.is_empty());
        assert_eq!(render.job.description, "");
        assert!(render.job.default_args.is_empty());
    }

    #[test]
    fn bad_cron_aborts_parse() {
        let text = r#"
[[job]]
command = "config-backup"
schedules = ["not a cron"]
"#;
        assert!(matches!(
            parse_import_str(text, "bad"),
            Err(ConfigError::InvalidCron { .. })
        ));
    }

    #[test]
    fn bad_toml_aborts_parse() {
        assert!(matches!(
            parse_import_str("[[job]\ncommand=", "bad"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let text = r#"
[[job]]
id = "dup"
command = "a"

[[job]]
id = "dup"
command = "b"
"#;
        assert!(matches!(
            parse_import_str(text, "dups"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
