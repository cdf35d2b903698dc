//! Authentication material resolution
//!
//! Order: explicit identity file (if it exists), SSH agent from
//! `SSH_AUTH_SOCK`, default identity files, then `none`.

use std::path::{Path, PathBuf};

/// Default identity files under `~/.ssh`, in the order they are tried
pub const DEFAULT_IDENTITY_FILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// A source of credentials, tried in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSource {
    /// A private key file on disk
    KeyFile(PathBuf),
    /// Identities held by the running SSH agent
    Agent,
    /// The `none` method
    None,
}

/// Build the ordered list of credential sources
///
/// `explicit` is skipped when the file does not exist; default identity
/// files are listed only when present and not already covered by `explicit`.
pub fn auth_sources(
    explicit: Option<&Path>,
    agent_available: bool,
    ssh_dir: Option<&Path>,
) -> Vec<AuthSource> {
    let mut sources = Vec::new();

    if let Some(path) = explicit {
        if path.exists() {
            sources.push(AuthSource::KeyFile(path.to_path_buf()));
        } else {
            tracing::warn!("Identity file {} does not exist, skipping", path.display());
        }
    }

    if agent_available {
        sources.push(AuthSource::Agent);
    }

    if let Some(dir) = ssh_dir {
        for name in DEFAULT_IDENTITY_FILES {
            let path = dir.join(name);
            if path.exists() && Some(path.as_path()) != explicit {
                sources.push(AuthSource::KeyFile(path));
            }
        }
    }

    sources.push(AuthSource::None);
    sources
}

/// `~/.ssh`, if a home directory is known
pub fn default_ssh_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh"))
}

/// Whether an SSH agent socket is advertised
pub fn agent_available() -> bool {
    cfg!(unix) && std::env::var_os("SSH_AUTH_SOCK").is_some_and(|s| !s.is_empty())
}
