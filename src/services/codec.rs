//! Content codec: deflate, AES-256-CBC in the OpenSSL salted container, text
//! encoding. Byte-compatible with what the legacy web client stored.

use std::io::{Read, Write};

use aes::Aes256;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::models::{EncryptedChapter, RawChapter};
use crate::services::kdf::{self, SALT_LEN};
use crate::utils::base91;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Literal header of the salted container.
pub const MAGIC: &[u8; 8] = b"Salted__";
/// Base64 of `MAGIC` plus the first salt bits; every base64 armor starts with it.
const ARMOR_PREFIX: &str = "U2FsdGVkX1";
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN;
const BLOCK_LEN: usize = 16;

/// How the binary container is turned into transport text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// basE91 over the base64 armor. What the web client writes.
    #[default]
    Base91,
    /// Plain base64 armor, as printed by `openssl enc -a`.
    Base64,
}

impl std::str::FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base91" => Ok(TextEncoding::Base91),
            "base64" => Ok(TextEncoding::Base64),
            other => Err(format!("unknown text encoding: {}", other)),
        }
    }
}

/// Password and output format for codec calls. Passed explicitly by whoever
/// owns the session; nothing in this crate keeps a password around.
#[derive(Clone)]
pub struct CodecContext {
    password: Zeroizing<String>,
    encoding: TextEncoding,
}

impl CodecContext {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            encoding: TextEncoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    fn password(&self) -> &[u8] {
        self.password.as_bytes()
    }
}

impl std::fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecContext")
            .field("password", &"<redacted>")
            .field("encoding", &self.encoding)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),

    #[error("codec worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// The blob could not be turned back into text. Deliberately carries no
/// detail: callers show "content unavailable" and move on.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("content unavailable")]
pub struct DecodeFailure;

/// Encrypt `plaintext` into a CipherBlob with a fresh random salt.
pub fn encode(plaintext: &str, ctx: &CodecContext) -> Result<String, EncodeError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    encode_with_salt(plaintext, ctx, salt)
}

pub(crate) fn encode_with_salt(
    plaintext: &str,
    ctx: &CodecContext,
    salt: [u8; SALT_LEN],
) -> Result<String, EncodeError> {
    let mut deflater = ZlibEncoder::new(Vec::new(), Compression::default());
    deflater.write_all(plaintext.as_bytes())?;
    let compressed = Zeroizing::new(deflater.finish()?);

    let material = kdf::derive(ctx.password(), &salt);
    let ciphertext = Aes256CbcEnc::new(&material.key.into(), &material.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&compressed);

    let mut container = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    container.extend_from_slice(MAGIC);
    container.extend_from_slice(&salt);
    container.extend_from_slice(&ciphertext);

    let armor = STANDARD.encode(&container);
    Ok(match ctx.encoding {
        TextEncoding::Base64 => armor,
        TextEncoding::Base91 => base91::encode(armor.as_bytes()),
    })
}

/// Decrypt a CipherBlob written in either text encoding.
pub fn decode(blob: &str, ctx: &CodecContext) -> Result<String, DecodeFailure> {
    decode_inner(blob, ctx).map_err(|stage| {
        tracing::debug!(stage, "CipherBlob could not be decoded");
        DecodeFailure
    })
}

fn decode_inner(blob: &str, ctx: &CodecContext) -> Result<String, &'static str> {
    let container = unwrap_text(blob).ok_or("text")?;
    if container.len() < HEADER_LEN + BLOCK_LEN || !container.starts_with(MAGIC) {
        return Err("header");
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&container[MAGIC.len()..HEADER_LEN]);
    let ciphertext = &container[HEADER_LEN..];
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err("length");
    }

    let material = kdf::derive(ctx.password(), &salt);
    let compressed = Zeroizing::new(
        Aes256CbcDec::new(&material.key.into(), &material.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| "padding")?,
    );

    let mut plain = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut plain)
        .map_err(|_| "inflate")?;

    String::from_utf8(plain).map_err(|_| "utf8")
}

/// Recover the binary container from transport text.
fn unwrap_text(blob: &str) -> Option<Vec<u8>> {
    let blob = blob.trim();
    if blob.starts_with(ARMOR_PREFIX) {
        return STANDARD.decode(blob).ok();
    }

    let bytes = base91::decode(blob);
    if bytes.starts_with(MAGIC) {
        return Some(bytes);
    }
    let armor = std::str::from_utf8(&bytes).ok()?;
    STANDARD.decode(armor.trim()).ok()
}

pub fn encrypt_chapter(
    chapter: &RawChapter,
    ctx: &CodecContext,
) -> Result<EncryptedChapter, EncodeError> {
    Ok(EncryptedChapter {
        title: encode(&chapter.title, ctx)?,
        content: encode(&chapter.content, ctx)?,
    })
}

/// Encrypt a whole book on the blocking pool.
pub async fn encrypt_chapters(
    chapters: Vec<RawChapter>,
    ctx: CodecContext,
) -> Result<Vec<EncryptedChapter>, EncodeError> {
    tokio::task::spawn_blocking(move || {
        chapters
            .iter()
            .map(|chapter| encrypt_chapter(chapter, &ctx))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?
}

pub async fn encode_async(plaintext: String, ctx: CodecContext) -> Result<String, EncodeError> {
    tokio::task::spawn_blocking(move || encode(&plaintext, &ctx)).await?
}

pub async fn decode_async(blob: String, ctx: CodecContext) -> Result<String, DecodeFailure> {
    tokio::task::spawn_blocking(move || decode(&blob, &ctx))
        .await
        .map_err(|e| {
            tracing::error!("Codec worker failed: {}", e);
            DecodeFailure
        })?
}
