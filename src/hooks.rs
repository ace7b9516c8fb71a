//! Runs user-configured external programs at named points in the
//! install/uninstall lifecycle.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    InstallBeforeAll,
    InstallBeforeEach,
    InstallAfterEach,
    InstallAfterAll,
    UninstallBeforeAll,
    UninstallBeforeEach,
    UninstallAfterEach,
    UninstallAfterAll,
}

impl HookPoint {
    fn key(&self) -> &'static str {
        match self {
            Self::InstallBeforeAll => "install.before_all",
            Self::InstallBeforeEach => "install.before_each",
            Self::InstallAfterEach => "install.after_each",
            Self::InstallAfterAll => "install.after_all",
            Self::UninstallBeforeAll => "uninstall.before_all",
            Self::UninstallBeforeEach => "uninstall.before_each",
            Self::UninstallAfterEach => "uninstall.after_each",
            Self::UninstallAfterAll => "uninstall.after_all",
        }
    }

    /// `before_*` failures are fatal unless `force` is set; `after_*`
    /// failures are always a warning.
    fn is_fatal_by_default(&self) -> bool {
        matches!(
            self,
            Self::InstallBeforeAll | Self::InstallBeforeEach | Self::UninstallBeforeAll | Self::UninstallBeforeEach
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    /// `hook point key -> executable path (with args)`.
    #[serde(default)]
    pub commands: HashMap<String, String>,
}

impl HookConfig {
    fn command_for(&self, point: HookPoint) -> Option<&str> {
        self.commands.get(point.key()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct HookContext {
    pub game_id: String,
    pub game_path: PathBuf,
    pub mod_path: PathBuf,
    pub mod_id: Option<String>,
    pub mod_name: Option<String>,
    pub mod_version: Option<String>,
}

pub struct HookRunner {
    timeout: Duration,
}

pub struct HookOutcome {
    pub ran: bool,
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl HookRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs the hook configured for `point`, if any. `force` downgrades a
    /// non-zero exit or timeout at a `before_*` point from fatal to a
    /// logged warning; `after_*` points are never fatal regardless of
    /// `force`. A missing hook is not an error.
    pub async fn run(
        &self,
        config: &HookConfig,
        point: HookPoint,
        ctx: &HookContext,
        force: bool,
    ) -> Result<HookOutcome> {
        let Some(command_line) = config.command_for(point) else {
            return Ok(HookOutcome {
                ran: false,
                status_code: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        };

        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            return Ok(HookOutcome {
                ran: false,
                status_code: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        };

        let mut command = Command::new(program);
        command.args(parts);
        command.kill_on_drop(true);
        command.env("HOOK_NAME", point.key());
        command.env("GAME_ID", &ctx.game_id);
        command.env("GAME_PATH", &ctx.game_path);
        command.env("MOD_PATH", &ctx.mod_path);
        if let Some(id) = &ctx.mod_id {
            command.env("MOD_ID", id);
        }
        if let Some(name) = &ctx.mod_name {
            command.env("MOD_NAME", name);
        }
        if let Some(version) = &ctx.mod_version {
            command.env("MOD_VERSION", version);
        }
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let spawned = command.output();
        let output = match timeout(self.timeout, spawned).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::HookFailed(format!("{}: {}", point.key(), e))),
            Err(_) => {
                let message = format!("{} timed out after {:?}", point.key(), self.timeout);
                if point.is_fatal_by_default() && !force {
                    return Err(Error::HookFailed(message));
                }
                tracing::warn!(hook = point.key(), "{message}");
                return Ok(HookOutcome {
                    ran: true,
                    status_code: None,
                    stdout: String::new(),
                    stderr: message,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let status_code = output.status.code();

        if !output.status.success() {
            let message = format!("{} exited with status {:?}", point.key(), status_code);
            if point.is_fatal_by_default() && !force {
                return Err(Error::HookFailed(message));
            }
            tracing::warn!(hook = point.key(), status = ?status_code, "{message}");
        }

        Ok(HookOutcome {
            ran: true,
            status_code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HookContext {
        HookContext {
            game_id: "skyrimse".into(),
            game_path: PathBuf::from("/games/skyrimse"),
            mod_path: PathBuf::from("/games/skyrimse/Data"),
            mod_id: Some("100".into()),
            mod_name: Some("Example".into()),
            mod_version: Some("1.0".into()),
        }
    }

    #[tokio::test]
    async fn missing_hook_is_not_an_error() {
        let runner = HookRunner::new(Duration::from_secs(1));
        let config = HookConfig::default();
        let outcome = runner.run(&config, HookPoint::InstallBeforeAll, &ctx(), false).await.unwrap();
        assert!(!outcome.ran);
    }

    #[tokio::test]
    async fn before_each_failure_is_fatal_without_force() {
        let runner = HookRunner::new(Duration::from_secs(5));
        let mut config = HookConfig::default();
        config.commands.insert("install.before_each".into(), "false".into());
        let result = runner.run(&config, HookPoint::InstallBeforeEach, &ctx(), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn before_each_failure_is_logged_not_fatal_with_force() {
        let runner = HookRunner::new(Duration::from_secs(5));
        let mut config = HookConfig::default();
        config.commands.insert("install.before_each".into(), "false".into());
        let outcome = runner.run(&config, HookPoint::InstallBeforeEach, &ctx(), true).await.unwrap();
        assert_eq!(outcome.status_code, Some(1));
    }

    #[tokio::test]
    async fn after_each_failure_is_never_fatal() {
        let runner = HookRunner::new(Duration::from_secs(5));
        let mut config = HookConfig::default();
        config.commands.insert("install.after_each".into(), "false".into());
        let outcome = runner.run(&config, HookPoint::InstallAfterEach, &ctx(), false).await.unwrap();
        assert_eq!(outcome.status_code, Some(1));
    }

    #[tokio::test]
    async fn successful_hook_captures_stdout() {
        let runner = HookRunner::new(Duration::from_secs(5));
        let mut config = HookConfig::default();
        config.commands.insert("install.after_all".into(), "echo hi".into());
        let outcome = runner.run(&config, HookPoint::InstallAfterAll, &ctx(), false).await.unwrap();
        assert_eq!(outcome.stdout.trim(), "hi");
    }
}
