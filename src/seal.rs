//! Tamper-evident storage for durable state (ledger, manifests, history).
//!
//! Every record is wrapped in a versioned JSON envelope:
//! - `sealed`: XChaCha20-Poly1305 ciphertext of the canonical JSON payload
//! - `signed`: the payload in clear plus a keyed BLAKE3 digest of its canonical form
//!
//! Both keys are derived from a per-installation secret (`install.key`).
//! Any decoding, authentication or integrity failure makes the record unusable;
//! [`StateStore::read`] then deletes it and reports it as absent.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::helpers::io_error_with_help;
use crate::platform;

pub const KEY_FILE: &str = "install.key";
pub const ENVELOPE_VERSION: u32 = 1;

const SECRET_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const CIPHER_CONTEXT: &str = "batch_split 2024-01-01 durable state cipher key";
const INTEGRITY_CONTEXT: &str = "batch_split 2024-01-01 durable state integrity key";
const AAD: &[u8] = b"batch_split/state/v1";

#[derive(Debug, Error)]
pub enum SealError {
    #[error("malformed state envelope: {0}")]
    Format(#[from] serde_json::Error),
    #[error("malformed hex field: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("unsupported state envelope version {0}")]
    UnsupportedVersion(u32),
    #[error("state nonce has wrong length")]
    BadNonce,
    #[error("state failed authentication")]
    Authentication,
    #[error("state failed integrity check")]
    Integrity,
}

/// Sub-keys derived from the installation secret.
#[derive(Clone)]
pub struct StateKeys {
    cipher: [u8; 32],
    integrity: [u8; 32],
}

impl fmt::Debug for StateKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateKeys(..)")
    }
}

impl StateKeys {
    pub fn from_secret(secret: &[u8; SECRET_LEN]) -> Self {
        Self {
            cipher: blake3::derive_key(CIPHER_CONTEXT, secret),
            integrity: blake3::derive_key(INTEGRITY_CONTEXT, secret),
        }
    }

    /// Read `install.key` from `state_dir`, creating (or replacing) it when
    /// missing or malformed. Replacing the secret orphans existing state.
    pub fn load_or_create(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(KEY_FILE);
        match fs::read(&path) {
            Ok(bytes) => {
                if let Ok(secret) = <[u8; SECRET_LEN]>::try_from(bytes.as_slice()) {
                    return Ok(Self::from_secret(&secret));
                }
                warn!(path = %path.display(), "installation key is malformed; generating a new one");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "creating installation key");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "installation key unreadable; generating a new one");
            }
        }
        let mut secret = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        platform::atomic_write_0600(&path, &secret)
            .with_context(|| format!("write installation key {}", path.display()))?;
        Ok(Self::from_secret(&secret))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Envelope {
    Sealed {
        version: u32,
        nonce: String,
        data: String,
    },
    Signed {
        version: u32,
        digest: String,
        payload: Value,
    },
}

/// Serialize a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Wraps and unwraps records with the installation keys.
#[derive(Debug, Clone)]
pub struct Sealer {
    keys: StateKeys,
    encrypt: bool,
}

impl Sealer {
    pub fn new(keys: StateKeys, encrypt: bool) -> Self {
        Self { keys, encrypt }
    }

    pub fn seal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SealError> {
        let canonical = canonical_json(&serde_json::to_value(value)?);
        let envelope = if self.encrypt {
            let mut nonce = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            let data = self
                .cipher()
                .encrypt(
                    XNonce::from_slice(&nonce),
                    Payload {
                        msg: canonical.as_bytes(),
                        aad: AAD,
                    },
                )
                .map_err(|_| SealError::Authentication)?;
            Envelope::Sealed {
                version: ENVELOPE_VERSION,
                nonce: hex::encode(nonce),
                data: hex::encode(data),
            }
        } else {
            let digest = blake3::keyed_hash(&self.keys.integrity, canonical.as_bytes());
            Envelope::Signed {
                version: ENVELOPE_VERSION,
                digest: digest.to_hex().to_string(),
                payload: serde_json::from_str(&canonical)?,
            }
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    /// Either envelope kind is accepted, so toggling encryption keeps old state readable.
    pub fn open<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SealError> {
        match serde_json::from_slice::<Envelope>(bytes)? {
            Envelope::Sealed { version, nonce, data } => {
                check_version(version)?;
                let nonce = hex::decode(nonce)?;
                if nonce.len() != NONCE_LEN {
                    return Err(SealError::BadNonce);
                }
                let data = hex::decode(data)?;
                let plain = self
                    .cipher()
                    .decrypt(
                        XNonce::from_slice(&nonce),
                        Payload {
                            msg: &data,
                            aad: AAD,
                        },
                    )
                    .map_err(|_| SealError::Authentication)?;
                Ok(serde_json::from_slice(&plain)?)
            }
            Envelope::Signed { version, digest, payload } => {
                check_version(version)?;
                let expected = blake3::Hash::from_hex(&digest).map_err(|_| SealError::Integrity)?;
                let actual = blake3::keyed_hash(&self.keys.integrity, canonical_json(&payload).as_bytes());
                // blake3::Hash equality is constant-time.
                if expected != actual {
                    return Err(SealError::Integrity);
                }
                Ok(serde_json::from_value(payload)?)
            }
        }
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.keys.cipher))
    }
}

fn check_version(version: u32) -> Result<(), SealError> {
    if version != ENVELOPE_VERSION {
        return Err(SealError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Sealed records stored as files under the state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    sealer: Arc<Sealer>,
}

impl StateStore {
    /// Open the store rooted at `state_dir`, loading or creating the installation key.
    pub fn open(state_dir: &Path, encrypt: bool) -> Result<Self> {
        fs::create_dir_all(state_dir).map_err(io_error_with_help("create state dir", state_dir))?;
        let keys = StateKeys::load_or_create(state_dir)?;
        Ok(Self::with_sealer(state_dir, Sealer::new(keys, encrypt)))
    }

    pub fn with_sealer(state_dir: &Path, sealer: Sealer) -> Self {
        Self {
            dir: state_dir.to_path_buf(),
            sealer: Arc::new(sealer),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }

    /// Seal `value` and atomically replace `rel`.
    pub fn write<T: Serialize>(&self, rel: &str, value: &T) -> Result<()> {
        let path = self.path(rel);
        let bytes = self
            .sealer
            .seal(value)
            .with_context(|| format!("seal {}", path.display()))?;
        platform::atomic_write_0600(&path, &bytes)
    }

    /// Read and verify `rel`. A record that fails verification is deleted and
    /// reported as absent.
    pub fn read<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>> {
        let path = self.path(rel);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error_with_help("read state file", &path)(e)),
        };
        match self.sealer.open(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable state file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "could not remove unreadable state file");
                }
                Ok(None)
            }
        }
    }

    /// Remove `rel` and any leftover temp siblings. Returns whether the record existed.
    pub fn remove(&self, rel: &str) -> Result<bool> {
        let path = self.path(rel);
        let existed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(io_error_with_help("remove state file", &path)(e)),
        };
        platform::remove_tmp_siblings(&path);
        Ok(existed)
    }
}
