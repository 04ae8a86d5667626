//! Per-run ssh key pair and the client options every connection uses.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use opsprobe_core::CallContext;
use opsprobe_core::constants::SSH_CONNECT_TIMEOUT_SECS;
use snafu::ResultExt;
use tempfile::TempDir;
use tracing::info;

use crate::error::ReadFileSnafu;
use crate::error::Result;
use crate::error::TempDirSnafu;
use crate::runner::run_command;

/// Key pair injected into every VM's metadata.
///
/// A generated pair lives in a temporary directory removed on drop.
#[derive(Debug)]
pub struct SshKeyPair {
    _dir: Option<TempDir>,
    private_key: PathBuf,
    public_key: String,
}

impl SshKeyPair {
    /// Generate a fresh RSA key pair with `ssh-keygen`.
    pub async fn generate(ctx: &CallContext, ssh_keygen: &Path, comment: &str) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("opsprobe-ssh-").tempdir().context(TempDirSnafu)?;
        let private_key = dir.path().join("id_rsa");
        let args = [
            ssh_keygen.display().to_string(),
            "-t".to_string(),
            "rsa".to_string(),
            "-f".to_string(),
            private_key.display().to_string(),
            "-C".to_string(),
            comment.to_string(),
            "-N".to_string(),
            String::new(),
        ];
        run_command(ctx, &args, None, &BTreeMap::new()).await?;

        let public_path = dir.path().join("id_rsa.pub");
        let public_key = tokio::fs::read_to_string(&public_path).await.context(ReadFileSnafu {
            path: public_path.display().to_string(),
        })?;
        info!(path = %private_key.display(), "generated ssh key pair");
        Ok(Self {
            _dir: Some(dir),
            private_key,
            public_key: public_key.trim().to_string(),
        })
    }

    /// Use an existing key pair.
    pub fn from_files(private_key: impl Into<PathBuf>, public_key: impl Into<String>) -> Self {
        Self {
            _dir: None,
            private_key: private_key.into(),
            public_key: public_key.into().trim().to_string(),
        }
    }

    pub fn private_key(&self) -> &Path {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Value for the `ssh-keys` metadata entry.
    pub fn metadata_entry(&self, user: &str) -> String {
        format!("{user}:{}", self.public_key)
    }
}

/// Client options for every connection: no host key prompts, bounded
/// connect time, public-key auth only.
pub fn ssh_options(private_key: &Path) -> Vec<String> {
    vec![
        format!("-oIdentityFile={}", private_key.display()),
        format!("-oConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}"),
        "-oStrictHostKeyChecking=no".to_string(),
        "-oUserKnownHostsFile=/dev/null".to_string(),
        "-oLogLevel=ERROR".to_string(),
        "-oPreferredAuthentications=publickey".to_string(),
    ]
}
