//! AES-256-GCM encryption for individual configuration fields.
//!
//! Credentials stored in user config documents (`notification.password`,
//! `notification.token`) are encrypted at rest with a key that lives next to
//! the config directory.
//!
//! # Tagged Format
//!
//! An encrypted field is a single string:
//!
//! ```text
//! enc:<iv hex, 16 bytes>:<auth tag hex, 16 bytes>:<ciphertext hex>
//! ```
//!
//! The `enc:` prefix makes both directions idempotent: encrypting a tagged
//! value and decrypting an untagged value are no-ops.
//!
//! # Key File
//!
//! ```text
//! {storage_root}/.secret_key    # 32 random bytes, hex, mode 0600
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use data_encoding::HEXLOWER_PERMISSIVE;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Prefix marking a string as an encrypted field.
pub const ENCRYPTED_PREFIX: &str = "enc:";

/// Key file name inside the storage root.
pub const KEY_FILE_NAME: &str = ".secret_key";

/// AES-256 key length (256 bits).
const KEY_LENGTH: usize = 32;
/// IV length (128 bits). Longer than the usual 96-bit GCM nonce.
const IV_LENGTH: usize = 16;
/// Authentication tag length (128 bits).
const TAG_LENGTH: usize = 16;

/// AES-256-GCM with a 16-byte nonce.
type FieldCipher = AesGcm<Aes256, U16>;

/// Errors from the field codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encrypt or decrypt was called before [`SecretCodec::init_key`].
    #[error("Encryption key not initialized")]
    KeyNotInitialized,

    /// The key file exists but does not hold a usable key.
    #[error("Invalid encryption key at {path}: {reason}")]
    Key {
        /// Key file path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Reading or writing the key file failed.
    #[error("Failed to access encryption key at {path}: {source}")]
    KeyIo {
        /// Key file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A tagged value does not have the `iv:tag:ciphertext` structure.
    #[error("Invalid encrypted data format: {0}")]
    Format(String),

    /// The authentication tag did not verify (tampered data or wrong key).
    #[error("Decryption failed: authentication tag mismatch")]
    Authentication,

    /// The cipher rejected the input during encryption.
    #[error("Encryption failed")]
    Encryption,
}

/// Returns `true` if `value` carries the encrypted-field prefix.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Field encryptor bound to one storage root's key.
///
/// A codec starts without a key; [`SecretCodec::init_key`] loads or creates
/// it. Every encrypt/decrypt before that fails with
/// [`CodecError::KeyNotInitialized`].
#[derive(Default)]
pub struct SecretCodec {
    key: Option<Zeroizing<[u8; KEY_LENGTH]>>,
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec")
            .field("initialized", &self.key.is_some())
            .finish()
    }
}

impl SecretCodec {
    /// Create a codec with no key loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec and immediately load or create the key under `storage_root`.
    pub fn open(storage_root: &Path) -> Result<Self, CodecError> {
        let mut codec = Self::new();
        codec.init_key(storage_root)?;
        Ok(codec)
    }

    /// Create a codec from raw key bytes.
    pub fn with_key(key: [u8; KEY_LENGTH]) -> Self {
        Self {
            key: Some(Zeroizing::new(key)),
        }
    }

    /// Load the key from `{storage_root}/.secret_key`, generating it on first use.
    ///
    /// An existing file with anything other than 32 hex-encoded bytes is an
    /// error. It is never regenerated, since that would orphan every value
    /// encrypted under the old key.
    pub fn init_key(&mut self, storage_root: &Path) -> Result<(), CodecError> {
        let path = storage_root.join(KEY_FILE_NAME);

        let key = if path.exists() {
            load_key(&path)?
        } else {
            create_key(storage_root, &path)?
        };

        self.key = Some(key);
        Ok(())
    }

    /// Encrypt a field value.
    ///
    /// Empty and already-tagged values are returned unchanged. Each call uses a
    /// fresh random IV, so equal plaintexts produce different ciphertexts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let key = self.key.as_ref().ok_or(CodecError::KeyNotInitialized)?;

        if plaintext.is_empty() || is_encrypted(plaintext) {
            return Ok(plaintext.to_string());
        }

        let cipher = FieldCipher::new(GenericArray::from_slice(key.as_slice()));

        let mut iv = [0u8; IV_LENGTH];
        rand::rng().fill_bytes(&mut iv);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_aead_error| CodecError::Encryption)?;

        Ok(format!(
            "{ENCRYPTED_PREFIX}{}:{}:{}",
            HEXLOWER_PERMISSIVE.encode(&iv),
            HEXLOWER_PERMISSIVE.encode(tag.as_slice()),
            HEXLOWER_PERMISSIVE.encode(&buffer)
        ))
    }

    /// Decrypt a field value.
    ///
    /// Untagged values are returned unchanged.
    pub fn decrypt(&self, value: &str) -> Result<String, CodecError> {
        let key = self.key.as_ref().ok_or(CodecError::KeyNotInitialized)?;

        let Some(data) = value.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(value.to_string());
        };

        let parts: Vec<&str> = data.split(':').collect();
        let [iv_hex, tag_hex, ciphertext_hex] = parts.as_slice() else {
            return Err(CodecError::Format(format!(
                "expected 3 segments, found {}",
                parts.len()
            )));
        };

        let iv = decode_segment(iv_hex, "iv")?;
        let tag = decode_segment(tag_hex, "auth tag")?;
        let mut buffer = decode_segment(ciphertext_hex, "ciphertext")?;

        if iv.len() != IV_LENGTH {
            return Err(CodecError::Format(format!(
                "iv must be {IV_LENGTH} bytes, found {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LENGTH {
            return Err(CodecError::Format(format!(
                "auth tag must be {TAG_LENGTH} bytes, found {}",
                tag.len()
            )));
        }

        let cipher = FieldCipher::new(GenericArray::from_slice(key.as_slice()));
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_aead_error| CodecError::Authentication)?;

        String::from_utf8(buffer)
            .map_err(|e| CodecError::Format(format!("plaintext is not valid UTF-8: {e}")))
    }
}

fn decode_segment(segment: &str, label: &str) -> Result<Vec<u8>, CodecError> {
    HEXLOWER_PERMISSIVE
        .decode(segment.as_bytes())
        .map_err(|e| CodecError::Format(format!("{label} is not valid hex: {e}")))
}

fn load_key(path: &Path) -> Result<Zeroizing<[u8; KEY_LENGTH]>, CodecError> {
    let content = Zeroizing::new(fs::read_to_string(path).map_err(|source| CodecError::KeyIo {
        path: path.to_path_buf(),
        source,
    })?);

    let bytes = Zeroizing::new(HEXLOWER_PERMISSIVE.decode(content.trim().as_bytes()).map_err(
        |e| CodecError::Key {
            path: path.to_path_buf(),
            reason: format!("not valid hex: {e}"),
        },
    )?);

    if bytes.len() != KEY_LENGTH {
        return Err(CodecError::Key {
            path: path.to_path_buf(),
            reason: format!("expected {KEY_LENGTH} bytes, found {}", bytes.len()),
        });
    }

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Write `contents` to `path`, readable and writable by the owner only.
///
/// On unix the file is created with mode 0600, and an existing file is
/// narrowed to 0600 before anything is written to it.
pub(crate) fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;

    // `mode` only applies when the file is created
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(contents)?;
    file.sync_all()
}

fn create_key(storage_root: &Path, path: &Path) -> Result<Zeroizing<[u8; KEY_LENGTH]>, CodecError> {
    let io_err = |source: io::Error| CodecError::KeyIo {
        path: path.to_path_buf(),
        source,
    };

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    rand::rng().fill_bytes(key.as_mut_slice());

    fs::create_dir_all(storage_root).map_err(io_err)?;
    let encoded = Zeroizing::new(HEXLOWER_PERMISSIVE.encode(key.as_slice()));
    write_owner_only(path, encoded.as_bytes()).map_err(io_err)?;

    log::info!("[Crypto] Generated new encryption key at {}", path.display());
    Ok(key)
}
