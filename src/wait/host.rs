// src/wait/host.rs

//! Port for the code-hosting provider, plus an implementation that shells
//! out to the `gh` CLI.
//!
//! The resolver depends only on the three query shapes below, not on any
//! specific provider.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::wait::reference::PrRef;

/// One CI check attached to a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub state: String,
}

impl CheckRun {
    /// Whether this check counts as passing.
    pub fn is_passing(&self) -> bool {
        matches!(
            self.state.to_ascii_uppercase().as_str(),
            "SUCCESS" | "NEUTRAL" | "SKIPPED"
        )
    }
}

/// Merge-relevant state of a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrStatus {
    /// Provider state string, e.g. `OPEN`, `CLOSED`, `MERGED`.
    pub state: String,
    pub merged: bool,
}

impl PrStatus {
    pub fn is_closed(&self) -> bool {
        self.state.eq_ignore_ascii_case("closed")
    }
}

/// External signal provider consumed by the wait-condition resolver.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// All CI check statuses for the referenced pull request.
    async fn ci_checks(&self, pr: &PrRef) -> Result<Vec<CheckRun>>;

    /// Merge status of the referenced pull request.
    async fn pr_status(&self, pr: &PrRef) -> Result<PrStatus>;

    /// Raw comment bodies on the referenced issue or pull request.
    async fn comments(&self, pr: &PrRef) -> Result<Vec<String>>;
}

/// [`HostClient`] backed by the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhClient {
    program: String,
}

impl GhClient {
    pub fn new() -> Self {
        Self {
            program: "gh".to_string(),
        }
    }

    /// Use a different executable (test doubles, wrapper scripts).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `gh` and return stdout. `allow_failure` keeps stdout from calls
    /// where `gh` signals domain state through its exit code (e.g.
    /// `gh pr checks` exits non-zero while checks are failing or pending).
    async fn run(&self, args: &[String], allow_failure: bool) -> Result<String> {
        debug!(program = %self.program, ?args, "running host CLI query");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("spawning {} {:?}", self.program, args))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() && !(allow_failure && !stdout.trim().is_empty()) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {:?} failed ({}): {}",
                self.program,
                args,
                output.status,
                stderr.trim()
            );
        }
        Ok(stdout)
    }
}

impl Default for GhClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostClient for GhClient {
    async fn ci_checks(&self, pr: &PrRef) -> Result<Vec<CheckRun>> {
        let args = vec![
            "pr".to_string(),
            "checks".to_string(),
            pr.number.to_string(),
            "--repo".to_string(),
            format!("{}/{}", pr.owner, pr.repo),
            "--json".to_string(),
            "name,state".to_string(),
        ];
        let out = self.run(&args, true).await?;
        let checks: Vec<CheckRun> =
            serde_json::from_str(&out).with_context(|| format!("parsing CI checks for {pr}"))?;
        Ok(checks)
    }

    async fn pr_status(&self, pr: &PrRef) -> Result<PrStatus> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawStatus {
            state: String,
            #[serde(default)]
            merged_at: Option<String>,
        }

        let args = vec![
            "pr".to_string(),
            "view".to_string(),
            pr.number.to_string(),
            "--repo".to_string(),
            format!("{}/{}", pr.owner, pr.repo),
            "--json".to_string(),
            "state,mergedAt".to_string(),
        ];
        let out = self.run(&args, false).await?;
        let raw: RawStatus =
            serde_json::from_str(&out).with_context(|| format!("parsing PR status for {pr}"))?;

        let merged = raw.merged_at.is_some() || raw.state.eq_ignore_ascii_case("merged");
        Ok(PrStatus {
            state: raw.state,
            merged,
        })
    }

    async fn comments(&self, pr: &PrRef) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct RawComment {
            body: String,
        }

        let args = vec![
            "api".to_string(),
            format!(
                "repos/{}/{}/issues/{}/comments",
                pr.owner, pr.repo, pr.number
            ),
        ];
        let out = self.run(&args, false).await?;
        let raw: Vec<RawComment> =
            serde_json::from_str(&out).with_context(|| format!("parsing comments for {pr}"))?;
        Ok(raw.into_iter().map(|c| c.body).collect())
    }
}
