//! Go handler toolchain
//!
//! [`GoToolchain`] is the `go build` implementation of the
//! [`HandlerToolchain`] capability seam: it compiles the handler source
//! into a single stripped binary at a path scoped by the function key,
//! and resolves that artifact as the worker command. Builds run
//! synchronously relative to dispatch; the dispatcher blocks on them
//! before any worker spawns.

use crate::config::RunnerConfig;
use crate::dispatch::{HandlerToolchain, RunSpec};
use crate::error::{LocalRuntimeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Builds and resolves Go handler binaries.
pub struct GoToolchain {
    config: RunnerConfig,
    go_binary: String,
}

impl GoToolchain {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            go_binary: "go".to_string(),
        }
    }

    /// Overrides the compiler executable (tests point this at shell
    /// builtins to simulate toolchain outcomes).
    pub fn with_go_binary(mut self, binary: impl Into<String>) -> Self {
        self.go_binary = binary.into();
        self
    }

    /// Deterministic artifact location, scoped by function key so
    /// functions sharing a workspace never collide.
    pub fn artifact_path(&self) -> PathBuf {
        self.config
            .bin_dir
            .join(&self.config.function_key)
            .join("handler")
    }

    fn build_target(&self) -> String {
        format!("{}.{}", self.config.handler_path, self.config.handler_name)
    }
}

#[async_trait]
impl HandlerToolchain for GoToolchain {
    async fn build(&self) -> Result<()> {
        let artifact = self.artifact_path();
        if let Some(parent) = artifact.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let target = self.build_target();
        debug!(
            function = %self.config.function_key,
            artifact = %artifact.display(),
            %target,
            "building handler"
        );

        // -s -w strips symbol tables and DWARF, matching a deployable
        // artifact rather than a debug build.
        let output = Command::new(&self.go_binary)
            .arg("build")
            .arg("-ldflags")
            .arg("-s -w")
            .arg("-o")
            .arg(&artifact)
            .arg(&target)
            .current_dir(&self.config.code_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                LocalRuntimeError::build(
                    &self.config.function_key,
                    format!("failed to run {}: {e}", self.go_binary),
                )
            })?;

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
            detail.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(LocalRuntimeError::build(&self.config.function_key, detail));
        }
        info!(function = %self.config.function_key, artifact = %artifact.display(), "build succeeded");
        Ok(())
    }

    fn resolve(&self, _runtime: &str) -> RunSpec {
        RunSpec {
            command: self.artifact_path().display().to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}
