//! Encryption of project source files.
//!
//! A key is any text file chosen by the user. Its id is the MD5 of its content,
//! which is what the cloud stores to know which key a project is encrypted with.
//! File contents are encrypted with AES-256-CBC (PKCS#7 padding). The cipher key is
//! the hex form of a 16 byte PBKDF2-HMAC-SHA256 derivation of the key content,
//! salted with the organization id; the IV is the first 16 characters of the key id.
//!
//! The IV is fixed per key, so encrypting the same content twice yields the same
//! text and encrypted projects do not look modified on every pull or push.
//!
//! Encrypted files are stored as base64 wrapped at 80 columns.

use std::fs;
use std::path::{Path, PathBuf};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use sha2::Sha256;
use thiserror::Error;

use crate::api::CloudProject;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const LINE_WIDTH: usize = 80;
const PBKDF2_ROUNDS: u32 = 100_000;
const DERIVED_KEY_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Errors raised while handling encryption keys and encrypted files.
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Cannot read encryption key {path}: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encryption key {0} is empty")]
    EmptyKey(PathBuf),

    #[error(
        "Encryption key mismatch for project '{project}'. Local project key: {local}. Cloud project key: {cloud}. Please provide the correct encryption key with --key to proceed"
    )]
    CloudKeyMismatch {
        project: String,
        local: String,
        cloud: String,
    },

    #[error(
        "The provided encryption key ({provided}) does not match the key of project '{project}' ({expected})"
    )]
    ProvidedKeyMismatch {
        project: String,
        provided: String,
        expected: String,
    },

    #[error("No encryption key was provided, please provide one using --key")]
    MissingKey,

    #[error("Project '{0}' is encrypted but its encryption key is not available, please provide one using --key")]
    LocalKeyUnavailable(String),

    #[error("The given encryption key is not registered with the organization")]
    KeyNotRegistered,

    #[error("Invalid cipher parameters: {0}")]
    InvalidCipher(String),

    #[error("Failed to decrypt {name}: {reason}")]
    DecryptFailed { name: String, reason: String },
}

/// Whether files are encrypted or decrypted by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAction {
    Encrypt,
    Decrypt,
}

impl std::fmt::Display for EncryptionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypt => write!(f, "encrypt"),
            Self::Decrypt => write!(f, "decrypt"),
        }
    }
}

/// A user-supplied key file.
#[derive(Debug, Clone)]
pub struct EncryptionKey {
    path: PathBuf,
    content: String,
    id: String,
}

impl EncryptionKey {
    pub fn load(path: &Path) -> Result<Self, EncryptionError> {
        let content = fs::read_to_string(path)
            .map_err(|source| EncryptionError::KeyUnreadable {
                path: path.to_path_buf(),
                source,
            })?
            .replace("\r\n", "\n")
            .replace('\r', "\n");
        if content.trim().is_empty() {
            return Err(EncryptionError::EmptyKey(path.to_path_buf()));
        }
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            id: key_id(&content),
            path,
            content,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier of the key, as registered with the cloud.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File name of the key, used in messages.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Cipher for the files of projects owned by `organization_id`.
    pub fn cipher(&self, organization_id: &str) -> Result<ProjectCipher, EncryptionError> {
        let mut derived = [0u8; DERIVED_KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.content.as_bytes(),
            organization_id.as_bytes(),
            PBKDF2_ROUNDS,
            &mut derived,
        );
        // the hex text of the derived key is the AES-256 key
        let mut key = [0u8; 2 * DERIVED_KEY_LEN];
        key.copy_from_slice(hex::encode(derived).as_bytes());

        let mut iv = [0u8; IV_LEN];
        let id = self.id.as_bytes();
        if id.len() < IV_LEN {
            return Err(EncryptionError::InvalidCipher(format!("key id '{}' is too short", self.id)));
        }
        iv.copy_from_slice(&id[..IV_LEN]);
        Ok(ProjectCipher { key, iv })
    }
}

/// Identifier of a key with the given content.
pub fn key_id(content: &str) -> String {
    hex::encode(Md5::digest(content.as_bytes()))
}

/// Id of the key stored at `path`, `None` when the file cannot be read.
pub fn key_id_of(path: &Path) -> Option<String> {
    EncryptionKey::load(path).ok().map(|k| k.id)
}

/// Encrypts and decrypts file contents of one project.
#[derive(Clone)]
pub struct ProjectCipher {
    key: [u8; 2 * DERIVED_KEY_LEN],
    iv: [u8; IV_LEN],
}

impl std::fmt::Debug for ProjectCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCipher").finish_non_exhaustive()
    }
}

impl ProjectCipher {
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let plaintext = plaintext.replace("\r\n", "\n");
        let encryptor = Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|e| EncryptionError::InvalidCipher(e.to_string()))?;
        let sealed = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(wrap_lines(&STANDARD.encode(sealed), LINE_WIDTH))
    }

    /// Decrypt content produced by [`encrypt`](Self::encrypt). `name` is used in errors.
    pub fn decrypt(&self, name: &str, encrypted: &str) -> Result<String, EncryptionError> {
        let failed = |reason: &str| EncryptionError::DecryptFailed {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let compact: String = encrypted.chars().filter(|c| !c.is_whitespace()).collect();
        let sealed = STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| failed("content is not valid base64"))?;
        if sealed.is_empty() || sealed.len() % IV_LEN != 0 {
            return Err(failed("content is not a whole number of blocks"));
        }
        let decryptor = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|e| EncryptionError::InvalidCipher(e.to_string()))?;
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&sealed)
            .map_err(|_| failed("wrong key or corrupted content"))?;
        let text = String::from_utf8(plaintext).map_err(|_| failed("wrong key or corrupted content"))?;
        Ok(text.replace("\r\n", "\n"))
    }
}

fn wrap_lines(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / width + 1);
    for (i, chunk) in text.as_bytes().chunks(width).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    out
}

/// Check that the keys involved in syncing `project` agree with each other.
///
/// - Without an explicit key, a local project encrypted with a readable key must
///   use the same key as the encrypted cloud project.
/// - With an explicit key, it must match the cloud key when the cloud project is
///   encrypted; otherwise it must match the local key when the local project is
///   encrypted with a readable key.
pub fn validate_key_state(
    project: &CloudProject,
    local_encrypted: bool,
    local_key_path: Option<&Path>,
    explicit_key: Option<&EncryptionKey>,
) -> Result<(), EncryptionError> {
    let cloud_key_id = project.encryption_key_id();
    let local_key_id = if local_encrypted {
        local_key_path.and_then(key_id_of)
    } else {
        None
    };

    match explicit_key {
        None => {
            if let (Some(local), Some(cloud)) = (local_key_id.as_deref(), cloud_key_id) {
                if local != cloud {
                    return Err(EncryptionError::CloudKeyMismatch {
                        project: project.name.clone(),
                        local: local_key_path
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        cloud: project
                            .encryption_key
                            .as_ref()
                            .map(|k| k.name.clone())
                            .unwrap_or_else(|| cloud.to_string()),
                    });
                }
            }
            if local_encrypted != project.encrypted {
                tracing::debug!(
                    project = %project.name,
                    local_encrypted,
                    cloud_encrypted = project.encrypted,
                    "Force overwrite: project encryption state mismatch"
                );
            }
            Ok(())
        }
        Some(key) => {
            let expected = cloud_key_id.or(local_key_id.as_deref());
            match expected {
                Some(expected) if expected != key.id() => Err(EncryptionError::ProvidedKeyMismatch {
                    project: project.name.clone(),
                    provided: key.display_name(),
                    expected: expected.to_string(),
                }),
                _ => Ok(()),
            }
        }
    }
}

/// Pick the key for the local encrypt/decrypt commands.
///
/// Falls back to the key configured for the project; a provided key that differs
/// from the configured one is an error.
pub fn resolve_user_key(
    provided: Option<&Path>,
    configured: Option<&Path>,
) -> Result<PathBuf, EncryptionError> {
    let configured = configured.filter(|p| p.exists());
    match (provided, configured) {
        (None, None) => Err(EncryptionError::MissingKey),
        (Some(provided), None) => Ok(provided.to_path_buf()),
        (None, Some(configured)) => Ok(configured.to_path_buf()),
        (Some(provided), Some(configured)) => {
            if same_file(provided, configured) {
                Ok(configured.to_path_buf())
            } else {
                Err(EncryptionError::ProvidedKeyMismatch {
                    project: String::new(),
                    provided: provided.display().to_string(),
                    expected: configured.display().to_string(),
                })
            }
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
