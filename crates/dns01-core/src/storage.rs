//! Certificate and private key files
//!
//! Every file for a target is named after [`Target::file_stem`] and lives in
//! one output directory. Writing over an existing file first moves it aside to
//! `<file>.old`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pem::{EncodeConfig, LineEnding, Pem};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SignatureAlgorithm};
use thiserror::Error;

use crate::state::write_private;
use crate::target::Target;

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// Longest value allowed in a certificate common name
const MAX_COMMON_NAME: usize = 64;

/// Modulus size for generated RSA keys
const RSA_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Private key {path:?} is unreadable: {message}")]
    InvalidKey { path: PathBuf, message: String },

    #[error("No private key for {0} found to pair with the certificate")]
    KeyMissing(String),

    #[error("Failed to build certificate request: {0}")]
    Csr(String),

    #[error("Certificate chain is not valid PEM: {0}")]
    InvalidChain(String),
}

/// Private key algorithm for issued certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyType {
    /// ECDSA P-256
    #[default]
    Ec,
    /// ECDSA P-384
    Ec384,
    /// RSA 2048-bit
    Rsa,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ec => "ec",
            KeyType::Ec384 => "ec384",
            KeyType::Rsa => "rsa",
        }
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        match self {
            KeyType::Ec => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyType::Ec384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyType::Rsa => &rcgen::PKCS_RSA_SHA256,
        }
    }

    /// Generate a fresh key of this type
    pub fn generate(&self) -> Result<KeyPair, StorageError> {
        match self {
            KeyType::Rsa => generate_rsa(),
            _ => KeyPair::generate_for(self.algorithm())
                .map_err(|e| StorageError::KeyGeneration(e.to_string())),
        }
    }

    /// Parse a PKCS#8 PEM key of this type
    fn parse(&self, pem: &str) -> Result<KeyPair, rcgen::Error> {
        KeyPair::from_pkcs8_pem_and_sign_algo(pem, self.algorithm())
    }
}

/// rcgen signs with RSA keys but cannot generate them
fn generate_rsa() -> Result<KeyPair, StorageError> {
    use rand_core::OsRng;
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::RsaPrivateKey;

    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| StorageError::KeyGeneration(e.to_string()))?;
    let der = private_key
        .to_pkcs8_der()
        .map_err(|e| StorageError::KeyGeneration(e.to_string()))?;

    let pem = encode(&Pem::new(PRIVATE_KEY_TAG, der.as_bytes()));
    KeyType::Rsa
        .parse(&pem)
        .map_err(|e| StorageError::KeyGeneration(e.to_string()))
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ec" => Ok(KeyType::Ec),
            "ec384" => Ok(KeyType::Ec384),
            "rsa" => Ok(KeyType::Rsa),
            other => Err(format!("Invalid key type: {}", other)),
        }
    }
}

/// How the issued certificate is written out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputLayout {
    /// `<stem>.pem`: private key followed by the full chain
    #[default]
    Combined,
    /// `<stem>.crt` leaf, `<stem>.chn` intermediates, key kept in its own file
    Split,
}

/// Paths written by a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFiles {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// Output directory for keys and certificates
#[derive(Debug, Clone)]
pub struct CertificateStore {
    dir: PathBuf,
    layout: OutputLayout,
    key_type: KeyType,
}

impl CertificateStore {
    pub fn new(dir: impl Into<PathBuf>, layout: OutputLayout, key_type: KeyType) -> Self {
        Self {
            dir: dir.into(),
            layout,
            key_type,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// `<stem>-<keytype>.key`
    pub fn key_path(&self, target: &Target) -> PathBuf {
        self.dir.join(format!("{}-{}.key", target.file_stem(), self.key_type))
    }

    pub fn pem_path(&self, target: &Target) -> PathBuf {
        self.dir.join(format!("{}.pem", target.file_stem()))
    }

    pub fn cert_path(&self, target: &Target) -> PathBuf {
        self.dir.join(format!("{}.crt", target.file_stem()))
    }

    pub fn chain_path(&self, target: &Target) -> PathBuf {
        self.dir.join(format!("{}.chn", target.file_stem()))
    }

    /// Reuse the target's key if one exists, otherwise generate and store one
    pub fn load_or_create_key(&self, target: &Target) -> Result<KeyPair, StorageError> {
        let path = self.key_path(target);
        if path.exists() {
            tracing::debug!(path = ?path, "Reusing private key");
            return read_key(&path, self.key_type);
        }

        tracing::info!(path = ?path, key_type = %self.key_type, "Generating new private key");
        let key = self.key_type.generate()?;

        self.ensure_dir()?;
        write_private(&path, key.serialize_pem()).map_err(|source| io_error(&path, source))?;

        Ok(key)
    }

    /// Write the chain (and key, for the combined layout)
    ///
    /// The key comes from the key file. When an earlier run already folded it
    /// into the combined PEM, it is recovered from there.
    pub fn save(&self, target: &Target, chain_pem: &str) -> Result<SavedFiles, StorageError> {
        self.ensure_dir()?;

        match self.layout {
            OutputLayout::Combined => self.save_combined(target, chain_pem),
            OutputLayout::Split => self.save_split(target, chain_pem),
        }
    }

    fn save_combined(&self, target: &Target, chain_pem: &str) -> Result<SavedFiles, StorageError> {
        let key_pem = self.key_pem(target)?;
        let pem_path = self.pem_path(target);

        let content = format!("{}\n{}", key_pem.trim_end(), chain_pem);
        write_saving_old(&pem_path, &content, Privacy::OwnerOnly)?;
        tracing::info!(path = ?pem_path, "Wrote PEM file");

        let mut removed = Vec::new();
        let key_path = self.key_path(target);
        if key_path.exists() {
            std::fs::remove_file(&key_path).map_err(|source| io_error(&key_path, source))?;
            tracing::debug!(path = ?key_path, "Removed standalone key file");
            removed.push(key_path);
        }

        Ok(SavedFiles {
            written: vec![pem_path],
            removed,
        })
    }

    fn save_split(&self, target: &Target, chain_pem: &str) -> Result<SavedFiles, StorageError> {
        let (leaf, rest) = split_chain(chain_pem)?;

        let cert_path = self.cert_path(target);
        write_saving_old(&cert_path, &leaf, Privacy::Public)?;
        tracing::info!(path = ?cert_path, "Wrote certificate file");

        let chain_path = self.chain_path(target);
        write_saving_old(&chain_path, &rest, Privacy::Public)?;
        tracing::info!(path = ?chain_path, "Wrote chain file");

        Ok(SavedFiles {
            written: vec![cert_path, chain_path],
            removed: Vec::new(),
        })
    }

    fn key_pem(&self, target: &Target) -> Result<String, StorageError> {
        let key_path = self.key_path(target);
        if key_path.exists() {
            return read_key(&key_path, self.key_type).map(|key| key.serialize_pem());
        }

        let pem_path = self.pem_path(target);
        if pem_path.exists() {
            let content =
                std::fs::read_to_string(&pem_path).map_err(|source| io_error(&pem_path, source))?;
            let blocks = pem::parse_many(&content)
                .map_err(|e| StorageError::InvalidChain(e.to_string()))?;
            if let Some(block) = blocks.iter().find(|p| p.tag() == PRIVATE_KEY_TAG) {
                tracing::debug!(path = ?pem_path, "Recovered private key from existing PEM");
                return Ok(encode(block));
            }
        }

        Err(StorageError::KeyMissing(target.fqdn().to_string()))
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))
    }
}

/// DER-encoded certificate request for the target, signed with `key`
pub fn build_csr(target: &Target, key: &KeyPair) -> Result<Vec<u8>, StorageError> {
    let fqdn = target.fqdn().to_string();

    let mut params = CertificateParams::new(vec![fqdn.clone()])
        .map_err(|e| StorageError::Csr(e.to_string()))?;

    let mut name = DistinguishedName::new();
    if fqdn.len() <= MAX_COMMON_NAME {
        name.push(DnType::CommonName, fqdn);
    }
    params.distinguished_name = name;

    let request = params
        .serialize_request(key)
        .map_err(|e| StorageError::Csr(e.to_string()))?;
    Ok(request.der().to_vec())
}

/// Split a PEM chain into the leaf certificate and everything after it
pub fn split_chain(chain_pem: &str) -> Result<(String, String), StorageError> {
    let blocks =
        pem::parse_many(chain_pem).map_err(|e| StorageError::InvalidChain(e.to_string()))?;

    let (leaf, rest) = blocks
        .split_first()
        .ok_or_else(|| StorageError::InvalidChain("no certificates".to_string()))?;

    Ok((encode(leaf), rest.iter().map(encode).collect()))
}

fn encode(block: &Pem) -> String {
    pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

fn read_key(path: &Path, key_type: KeyType) -> Result<KeyPair, StorageError> {
    let pem = std::fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    key_type.parse(&pem).map_err(|e| StorageError::InvalidKey {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Who may read a written file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Privacy {
    /// Holds a private key
    OwnerOnly,
    Public,
}

fn write_saving_old(path: &Path, content: &str, privacy: Privacy) -> Result<(), StorageError> {
    if path.exists() {
        let mut old = path.as_os_str().to_owned();
        old.push(".old");
        std::fs::rename(path, &old).map_err(|source| io_error(path, source))?;
    }
    let written = match privacy {
        Privacy::OwnerOnly => write_private(path, content),
        Privacy::Public => std::fs::write(path, content),
    };
    written.map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}
