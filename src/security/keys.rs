//! API-key persistence.
//!
//! The key lives in `<config dir>/conduit/api-key`, readable only by the
//! owner. It is only touched at startup and by `--key`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::RngCore;
use tracing::{debug, info};

use crate::error::{ConduitError, Result};

const APP_DIR: &str = "conduit";
const KEY_FILE_NAME: &str = "api-key";
const KEY_BYTES: usize = 32;

/// Generate a fresh key: 32 random bytes, URL-safe base64.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Location of the persisted API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyFile {
    path: PathBuf,
}

impl ApiKeyFile {
    /// `<user config dir>/conduit/api-key`.
    pub fn default_location() -> Result<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            ConduitError::Unsupported("no user configuration directory".to_string())
        })?;
        Ok(Self::at(config_dir.join(APP_DIR).join(KEY_FILE_NAME)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored key. `None` when the file does not exist or is empty.
    pub fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let key = content.trim();
                debug!("Loaded API key from {}", self.path.display());
                Ok((!key.is_empty()).then(|| key.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the stored key, creating one when none exists.
    ///
    /// Returns the key and whether it was newly generated.
    pub fn load_or_generate(&self) -> Result<(String, bool)> {
        if let Some(key) = self.load()? {
            return Ok((key, false));
        }
        let key = generate_api_key();
        self.store(&key)?;
        info!("Generated new API key at {}", self.path.display());
        Ok((key, true))
    }

    /// Write `key`, replacing any existing one.
    pub fn store(&self, key: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }
        let mut file = private_file_options().open(&self.path)?;
        file.write_all(key.as_bytes())?;
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

fn private_file_options() -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}
