//! Credential resolution and the scoped credential file handed to `mount.cifs`.

use std::fmt;
use std::io::{self, BufRead, IsTerminal, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::config::StorageConfig;
use crate::errors::CredentialError;
use crate::guard::is_process_alive;
use crate::naming;

/// Environment override for the share password.
pub const PASSWORD_ENV: &str = "SMB_PASSWORD";

/// Username, password and optional domain for one mount attempt.
///
/// The password buffer is zeroed on drop and never appears in `Debug` output.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    password: Zeroizing<String>,
    pub domain: Option<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: Zeroizing<String>, domain: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
            domain,
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Resolve the password in priority order:
/// 1. `supplied` (from `--password-stdin`)
/// 2. `env_password` (`SMB_PASSWORD`)
/// 3. `prompt`, only when `interactive`
pub fn resolve_from<P>(
    cfg: &StorageConfig,
    supplied: Option<Zeroizing<String>>,
    env_password: Option<Zeroizing<String>>,
    interactive: bool,
    prompt: P,
) -> Result<Credential, CredentialError>
where
    P: FnOnce(&str) -> io::Result<String>,
{
    let password = if let Some(password) = supplied {
        tracing::debug!("using password from standard input");
        password
    } else if let Some(password) = env_password.filter(|p| !p.is_empty()) {
        tracing::debug!("using password from {PASSWORD_ENV}");
        password
    } else if interactive {
        let text = format!("Password for {}@{}: ", cfg.username, cfg.server_address);
        Zeroizing::new(
            prompt(&text)
                .map_err(|e| CredentialError::Unavailable(format!("cannot read password: {e}")))?,
        )
    } else {
        return Err(CredentialError::Unavailable(format!(
            "no password supplied; pipe it with --password-stdin or set {PASSWORD_ENV}"
        )));
    };

    if password.is_empty() {
        return Err(CredentialError::Unavailable("password is empty".to_string()));
    }
    if password.contains(['\n', '\r']) {
        return Err(CredentialError::Unavailable(
            "password must be a single line".to_string(),
        ));
    }
    Ok(Credential::new(
        cfg.username.clone(),
        password,
        cfg.domain.clone(),
    ))
}

/// Resolve a credential for `cfg` from the process environment.
pub fn resolve(
    cfg: &StorageConfig,
    supplied: Option<Zeroizing<String>>,
) -> Result<Credential, CredentialError> {
    resolve_from(
        cfg,
        supplied,
        std::env::var(PASSWORD_ENV).ok().map(Zeroizing::new),
        io::stdin().is_terminal(),
        |text| rpassword::prompt_password(text),
    )
}

/// Read the first line of standard input as a password.
pub fn read_password_stdin() -> Result<Zeroizing<String>, CredentialError> {
    if io::stdin().is_terminal() {
        return Err(CredentialError::Unavailable(
            "--password-stdin requires the password to be piped in.\n\
             Example: echo \"$SMB_PASSWORD\" | nasmount mount --password-stdin"
                .to_string(),
        ));
    }
    let mut line = Zeroizing::new(String::new());
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| CredentialError::Unavailable(format!("cannot read standard input: {e}")))?;
    let password = Zeroizing::new(line.trim_end_matches(['\n', '\r']).to_string());
    if password.is_empty() {
        return Err(CredentialError::Unavailable(
            "password from standard input is empty".to_string(),
        ));
    }
    Ok(password)
}

/// Owner-only credential file in `mount.cifs` format.
///
/// Dropping the value overwrites the contents with zeros and deletes the file.
pub struct CredentialFile {
    file: NamedTempFile,
    len: usize,
}

impl CredentialFile {
    pub fn create(cred: &Credential, dir: &Path) -> Result<Self, CredentialError> {
        let store_err = |source| CredentialError::Store {
            dir: dir.to_path_buf(),
            source,
        };
        naming::ensure_private_dir(dir).map_err(store_err)?;

        let prefix = format!("{}{}-", naming::CRED_PREFIX, std::process::id());
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(8)
            .tempfile_in(dir)
            .map_err(store_err)?;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(store_err)?;

        let mut body = Zeroizing::new(format!(
            "username={}\npassword={}\n",
            cred.username,
            cred.password()
        ));
        if let Some(domain) = &cred.domain {
            body.push_str(&format!("domain={domain}\n"));
        }
        file.write_all(body.as_bytes()).map_err(store_err)?;
        file.as_file().sync_all().map_err(store_err)?;
        tracing::debug!(path = %file.path().display(), "credential file written");
        Ok(Self {
            file,
            len: body.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl fmt::Debug for CredentialFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialFile")
            .field("path", &self.file.path())
            .finish()
    }
}

impl Drop for CredentialFile {
    fn drop(&mut self) {
        if let Err(e) = scrub(self.file.as_file_mut(), self.len) {
            tracing::warn!(path = %self.file.path().display(), "cannot scrub credential file: {e}");
        }
        // NamedTempFile removes the file when the field drops.
        tracing::debug!(path = %self.file.path().display(), "credential file removed");
    }
}

fn scrub(file: &mut std::fs::File, len: usize) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&vec![0u8; len])?;
    file.sync_all()
}

/// Delete credential files left by processes that no longer exist.
///
/// Returns the number of files removed. A missing directory is not an error.
pub fn sweep_stale(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let own_pid = std::process::id() as i32;
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = naming::cred_file_pid(&name.to_string_lossy()) else {
            continue;
        };
        if pid == own_pid || is_process_alive(pid) {
            continue;
        }
        let path: PathBuf = entry.path();
        let scrubbed = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut f| {
                let len = f.metadata()?.len() as usize;
                scrub(&mut f, len)
            });
        if let Err(e) = scrubbed {
            tracing::warn!(path = %path.display(), "cannot scrub stale credential file: {e}");
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), stale_pid = pid, "removed stale credential file");
                removed += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), "cannot remove stale credential file: {e}"),
        }
    }
    removed
}
