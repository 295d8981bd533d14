//! Hand-off to the external configuration-apply step.

use crate::CoreError;
use std::path::Path;
use std::process::Command;
use tracing::info;

const STDERR_TAIL_LINES: usize = 20;

pub trait ConfigApplier: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the generated configuration at `config_path`. Blocks until the
    /// external system reports success or failure.
    fn apply(&self, config_path: &Path) -> Result<(), CoreError>;
}

/// Used when no apply command is configured.
#[derive(Debug, Default)]
pub struct NoopApplier;

impl ConfigApplier for NoopApplier {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn apply(&self, config_path: &Path) -> Result<(), CoreError> {
        info!("no apply command configured; {} left for the operator", config_path.display());
        Ok(())
    }
}

/// Runs an argv. The generated file's path is exported as
/// `BOSUN_GENERATED_CONFIG`.
#[derive(Debug, Clone)]
pub struct CommandApplier {
    argv: Vec<String>,
}

impl CommandApplier {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl ConfigApplier for CommandApplier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn apply(&self, config_path: &Path) -> Result<(), CoreError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(CoreError::Apply("empty apply command".to_owned()));
        };
        info!("applying configuration: {}", self.argv.join(" "));
        let output = Command::new(program)
            .args(args)
            .env("BOSUN_GENERATED_CONFIG", config_path)
            .output()
            .map_err(|e| CoreError::Apply(format!("cannot run {program}: {e}")))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Err(CoreError::Apply(format!(
            "{program} exited with {}: {}",
            output.status,
            tail.trim()
        )))
    }
}

pub fn applier_for(argv: &[String]) -> Box<dyn ConfigApplier> {
    if argv.is_empty() {
        Box::new(NoopApplier)
    } else {
        Box::new(CommandApplier::new(argv.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandApplier {
        CommandApplier::new(vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()])
    }

    #[test]
    fn empty_argv_selects_noop() {
        assert_eq!(applier_for(&[]).name(), "noop");
        assert_eq!(applier_for(&["true".to_owned()]).name(), "command");
    }

    #[test]
    fn successful_command() {
        sh("exit 0").apply(Path::new("/tmp/x.nix")).unwrap();
    }

    #[test]
    fn failure_carries_stderr() {
        let err = sh("echo 'error: attribute missing' >&2; exit 3")
            .apply(Path::new("/tmp/x.nix"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("attribute missing"), "{msg}");
    }

    #[test]
    fn generated_path_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("seen");
        let script = format!("printf %s \"$BOSUN_GENERATED_CONFIG\" > {}", marker.display());
        sh(&script).apply(Path::new("/etc/nixos/bosun/apps.nix")).unwrap();
        assert_eq!(
            std::fs::read_to_string(marker).unwrap(),
            "/etc/nixos/bosun/apps.nix"
        );
    }

    #[test]
    fn missing_program_is_an_apply_error() {
        let err = CommandApplier::new(vec!["/nonexistent/bosun-apply".to_owned()])
            .apply(Path::new("/tmp/x"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Apply(_)));
    }
}
