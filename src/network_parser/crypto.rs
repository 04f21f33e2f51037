//! 正文解密。
//!
//! 晋江章节接口有两层加密：
//! - 整个响应体加密：密钥由响应头 `accesskey` / `keystring` 与正文前缀共同推导；
//! - `content` 字段加密：固定 key/iv 的 DES-CBC，外层 base64。

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use thiserror::Error;

use super::transport::HttpReply;

type DesCbcDec = cbc::Decryptor<des::Des>;

const ENVELOPE_SALT_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("missing response header `{0}`")]
    MissingHeader(&'static str),
    #[error("empty header `{0}`")]
    EmptyHeader(&'static str),
    #[error("payload too short for envelope decrypt")]
    TooShort,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("des key/iv must be 8 bytes")]
    KeyLength,
    #[error("bad padding or wrong key")]
    Padding,
    #[error("decrypted bytes are not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// 章节正文解密能力；先整体、后字段，调用方保证顺序。
pub trait ChapterCipher: Send + Sync {
    fn decrypt_envelope(&self, reply: &HttpReply) -> Result<String, DecryptError>;
    fn decrypt_field(&self, text: &str) -> Result<String, DecryptError>;
}

pub struct DesCipher {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl DesCipher {
    pub fn new(key: &str, iv: &str) -> Result<Self, DecryptError> {
        if key.len() != 8 || iv.len() != 8 {
            return Err(DecryptError::KeyLength);
        }
        Ok(Self {
            key: key.as_bytes().to_vec(),
            iv: iv.as_bytes().to_vec(),
        })
    }
}

impl ChapterCipher for DesCipher {
    fn decrypt_envelope(&self, reply: &HttpReply) -> Result<String, DecryptError> {
        let accesskey = reply
            .header("accesskey")
            .ok_or(DecryptError::MissingHeader("accesskey"))?;
        let keystring = reply
            .header("keystring")
            .ok_or(DecryptError::MissingHeader("keystring"))?;
        let body = reply.text();
        let (key, iv, payload) = derive_envelope_key(accesskey, keystring, body.trim())?;
        let plain = des_cbc_decrypt(key.as_bytes(), iv.as_bytes(), &payload)?;
        Ok(String::from_utf8(plain)?)
    }

    fn decrypt_field(&self, text: &str) -> Result<String, DecryptError> {
        let plain = des_cbc_decrypt(&self.key, &self.iv, text)?;
        Ok(String::from_utf8(plain)?)
    }
}

/// base64 解码后做 DES-CBC/PKCS7 解密。
pub fn des_cbc_decrypt(key: &[u8], iv: &[u8], b64: &str) -> Result<Vec<u8>, DecryptError> {
    let compact: String = b64.chars().filter(|c| !c.is_whitespace()).collect();
    let data = STANDARD.decode(compact.as_bytes())?;
    let dec = DesCbcDec::new_from_slices(key, iv).map_err(|_| DecryptError::KeyLength)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(&data)
        .map_err(|_| DecryptError::Padding)
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// 整体加密的密钥推导，返回 `(key, iv, 密文)`。
///
/// `accesskey` 末字符的码点 `n` 决定：从 `keystring` 的 `n % len` 处截取 `n / 65` 个字符，
/// 以及 12 位盐取自正文尾部（`n` 为奇数）还是头部。key 为 md5(截取段 + 盐) 前 8 位，
/// iv 为 md5(盐) 前 8 位。
pub(crate) fn derive_envelope_key(
    accesskey: &str,
    keystring: &str,
    body: &str,
) -> Result<(String, String, String), DecryptError> {
    let last = accesskey
        .chars()
        .last()
        .ok_or(DecryptError::EmptyHeader("accesskey"))?;
    let ks: Vec<char> = keystring.chars().collect();
    if ks.is_empty() {
        return Err(DecryptError::EmptyHeader("keystring"));
    }

    let n = last as usize;
    let start = n % ks.len();
    let take = n / 65;
    let end = if start + take > ks.len() {
        ks.len()
    } else {
        start + take
    };
    let segment: String = ks[start..end].iter().collect();

    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= ENVELOPE_SALT_LEN {
        return Err(DecryptError::TooShort);
    }
    let (salt, payload): (String, String) = if n % 2 == 1 {
        let split = chars.len() - ENVELOPE_SALT_LEN;
        (
            chars[split..].iter().collect(),
            chars[..split].iter().collect(),
        )
    } else {
        (
            chars[..ENVELOPE_SALT_LEN].iter().collect(),
            chars[ENVELOPE_SALT_LEN..].iter().collect(),
        )
    };

    let key = md5_hex(&format!("{segment}{salt}"))[..8].to_string();
    let iv = md5_hex(&salt)[..8].to_string();
    Ok((key, iv, payload))
}
