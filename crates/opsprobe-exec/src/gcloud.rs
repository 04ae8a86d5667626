//! Thin wrapper around the `gcloud` CLI.
//!
//! All provisioning goes through the CLI rather than the compute API so that
//! failures look exactly like what an operator would see by hand, which is
//! also what the error classifier matches on.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use opsprobe_core::CallContext;
use opsprobe_core::constants::ACCESS_TOKEN_TTL;
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::time::Instant;
use tracing::debug;

use crate::error::AccessTokenSnafu;
use crate::error::CreateDirSnafu;
use crate::error::ExecError;
use crate::error::Result;
use crate::runner::CommandOutput;
use crate::runner::run_command;

/// Environment variable that points `gcloud` at a configuration directory.
pub const CLOUDSDK_CONFIG: &str = "CLOUDSDK_CONFIG";

/// Source of OAuth access tokens for the REST clients.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, ctx: &CallContext) -> Result<String>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    fetched_at: Instant,
}

/// Handle on a `gcloud` binary and, optionally, a private configuration
/// directory.
#[derive(Debug, Clone)]
pub struct Gcloud {
    path: PathBuf,
    config_dir: Option<PathBuf>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl Gcloud {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config_dir: None,
            token: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A handle that runs with `CLOUDSDK_CONFIG` set to `dir`.
    ///
    /// Lets a test change the active account or project without touching the
    /// configuration other tests use.
    pub fn with_config_dir(&self, dir: impl Into<PathBuf>) -> Self {
        Self {
            path: self.path.clone(),
            config_dir: Some(dir.into()),
            token: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CLOUDSDK_CORE_DISABLE_PROMPTS".to_string(), "1".to_string());
        if let Some(dir) = &self.config_dir {
            env.insert(CLOUDSDK_CONFIG.to_string(), dir.display().to_string());
        }
        env
    }

    /// Run `gcloud <args>`.
    pub async fn run<S: AsRef<str>>(&self, ctx: &CallContext, args: &[S]) -> Result<CommandOutput> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(self.path.display().to_string());
        full.extend(args.iter().map(|a| a.as_ref().to_string()));
        run_command(ctx, &full, None, &self.env()).await
    }

    /// Directory holding the configuration this handle currently uses.
    pub async fn active_config_dir(&self, ctx: &CallContext) -> Result<PathBuf> {
        let args = ["info", "--format=value(config.paths.global_config_dir)"];
        let output = self.run(ctx, &args).await?;
        let dir = output.stdout.trim();
        if dir.is_empty() {
            return Err(ExecError::UnexpectedOutput {
                command: "gcloud info".to_string(),
                reason: "empty global_config_dir".to_string(),
            });
        }
        Ok(PathBuf::from(dir))
    }

    /// Copy the active configuration into `dest` and return a handle using it.
    ///
    /// `dest` may already exist; the configuration lands directly in it.
    pub async fn setup_config_dir(&self, ctx: &CallContext, dest: &Path) -> Result<Gcloud> {
        let source = self.active_config_dir(ctx).await?;
        tokio::fs::create_dir_all(dest).await.context(CreateDirSnafu {
            path: dest.display().to_string(),
        })?;
        let args = [
            "cp".to_string(),
            "-r".to_string(),
            format!("{}/.", source.display()),
            format!("{}/.", dest.display()),
        ];
        run_command(ctx, &args, None, &BTreeMap::new()).await?;
        debug!(from = %source.display(), to = %dest.display(), "copied gcloud config dir");
        Ok(self.with_config_dir(dest))
    }
}

#[async_trait]
impl AccessTokenSource for Gcloud {
    async fn access_token(&self, ctx: &CallContext) -> Result<String> {
        let cached = self.token.lock().clone();
        if let Some(cached) = cached
            && cached.fetched_at.elapsed() < ACCESS_TOKEN_TTL
        {
            return Ok(cached.token);
        }

        let output = self.run(ctx, &["auth", "print-access-token"]).await.context(AccessTokenSnafu)?;
        let token = output.stdout.trim().to_string();
        if token.is_empty() {
            return Err(ExecError::UnexpectedOutput {
                command: "gcloud auth print-access-token".to_string(),
                reason: "empty token".to_string(),
            });
        }
        *self.token.lock() = Some(CachedToken {
            token: token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(token)
    }
}
