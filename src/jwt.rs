//! Session-token codec compatible with Auth.js (`@auth/core/jwt`).
//!
//! Tokens are compact JWE with direct key agreement (`alg: "dir"`). The
//! content key is derived with HKDF-SHA256 from the configured secret, using
//! the cookie name as salt, so a token minted for one cookie name does not
//! decode under another.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, Payload};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::types::TokenRecord;

/// Default session lifetime: 30 days.
pub const DEFAULT_MAX_AGE: i64 = 30 * 24 * 60 * 60;

/// Leeway applied to `exp` when decoding.
const CLOCK_TOLERANCE: i64 = 15;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentEncryption {
    A256CbcHs512,
    A256Gcm,
}

impl ContentEncryption {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "A256CBC-HS512" => Some(Self::A256CbcHs512),
            "A256GCM" => Some(Self::A256Gcm),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A256Gcm => "A256GCM",
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::A256CbcHs512 => 64,
            Self::A256Gcm => 32,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: TokenRecord,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    jti: Option<String>,
}

fn token_err(msg: impl Into<String>) -> Error {
    Error::Token(msg.into())
}

fn derive_key(secret: &SecretString, salt: &str, enc: ContentEncryption) -> Result<Vec<u8>, Error> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), secret.expose_secret().as_bytes());
    let info = format!("Auth.js Generated Encryption Key ({salt})");
    let mut okm = vec![0u8; enc.key_len()];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|_| token_err("key derivation failed"))?;
    Ok(okm)
}

/// RFC 7638 thumbprint of the derived key as an `oct` JWK.
fn thumbprint(key: &[u8]) -> String {
    let jwk = format!(r#"{{"k":"{}","kty":"oct"}}"#, URL_SAFE_NO_PAD.encode(key));
    if key.len() == 64 {
        URL_SAFE_NO_PAD.encode(Sha512::digest(jwk.as_bytes()))
    } else {
        URL_SAFE_NO_PAD.encode(Sha256::digest(jwk.as_bytes()))
    }
}

fn cbc_hs512_tag(mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac =
        <HmacSha512 as Mac>::new_from_slice(mac_key).map_err(|_| token_err("invalid MAC key"))?;
    mac.update(aad);
    mac.update(iv);
    mac.update(ciphertext);
    let aad_bits = (aad.len() as u64) * 8;
    mac.update(&aad_bits.to_be_bytes());
    let full = mac.finalize().into_bytes();
    Ok(full[..32].to_vec())
}

/// Seal a token record for the session cookie named `salt`.
///
/// # Errors
///
/// Returns [`Error::Token`] if the record cannot be serialized or encrypted.
pub fn encode(
    token: &TokenRecord,
    secret: &SecretString,
    salt: &str,
    max_age: i64,
) -> Result<String, Error> {
    encode_at(token, secret, salt, max_age, crate::now_unix())
}

pub(crate) fn encode_at(
    token: &TokenRecord,
    secret: &SecretString,
    salt: &str,
    max_age: i64,
    now: i64,
) -> Result<String, Error> {
    let enc = ContentEncryption::A256CbcHs512;
    let key = derive_key(secret, salt, enc)?;

    let header = ProtectedHeader {
        alg: "dir".into(),
        enc: enc.name().into(),
        kid: Some(thumbprint(&key)),
    };
    let header_json = serde_json::to_vec(&header).map_err(|e| token_err(e.to_string()))?;
    let protected = URL_SAFE_NO_PAD.encode(header_json);

    let claims = Claims {
        token: token.clone(),
        iat: Some(now),
        exp: Some(now + max_age),
        jti: Some(uuid::Uuid::new_v4().to_string()),
    };
    let plaintext = serde_json::to_vec(&claims).map_err(|e| token_err(e.to_string()))?;

    let iv: [u8; 16] = rand::rng().random();
    let (mac_key, enc_key) = key.split_at(32);
    let ciphertext = Aes256CbcEnc::new_from_slices(enc_key, &iv)
        .map_err(|_| token_err("invalid encryption key"))?
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    let tag = cbc_hs512_tag(mac_key, protected.as_bytes(), &iv, &ciphertext)?;

    Ok(format!(
        "{protected}..{}.{}.{}",
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Open a sealed session token.
///
/// Accepts `A256CBC-HS512` and `A256GCM` content encryption. Expired tokens
/// (beyond a 15 second leeway) are rejected.
///
/// # Errors
///
/// Returns [`Error::Token`] for any malformed, tampered, foreign-key or
/// expired input. Callers resolving a request's session treat every error
/// the same as "no session".
pub fn decode(token: &str, secret: &SecretString, salt: &str) -> Result<TokenRecord, Error> {
    decode_at(token, secret, salt, crate::now_unix())
}

pub(crate) fn decode_at(
    token: &str,
    secret: &SecretString,
    salt: &str,
    now: i64,
) -> Result<TokenRecord, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    let &[protected, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
        return Err(token_err("invalid token format"));
    };
    if !encrypted_key.is_empty() {
        return Err(token_err("unexpected encrypted key for alg dir"));
    }

    let b64 = |part: &str| {
        URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|_| token_err("invalid base64url segment"))
    };
    let header: ProtectedHeader =
        serde_json::from_slice(&b64(protected)?).map_err(|_| token_err("invalid header"))?;
    if header.alg != "dir" {
        return Err(token_err(format!("unsupported alg: {}", header.alg)));
    }
    let enc = ContentEncryption::from_name(&header.enc)
        .ok_or_else(|| token_err(format!("unsupported enc: {}", header.enc)))?;

    let key = derive_key(secret, salt, enc)?;
    if let Some(kid) = &header.kid
        && *kid != thumbprint(&key)
    {
        return Err(token_err("key id does not match secret"));
    }

    let iv = b64(iv)?;
    let ciphertext = b64(ciphertext)?;
    let tag = b64(tag)?;
    let aad = protected.as_bytes();

    let plaintext = match enc {
        ContentEncryption::A256CbcHs512 => {
            let (mac_key, enc_key) = key.split_at(32);
            let expected = cbc_hs512_tag(mac_key, aad, &iv, &ciphertext)?;
            if !bool::from(expected.ct_eq(&tag)) {
                return Err(token_err("authentication tag mismatch"));
            }
            Aes256CbcDec::new_from_slices(enc_key, &iv)
                .map_err(|_| token_err("invalid iv"))?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map_err(|_| token_err("decryption failed"))?
        }
        ContentEncryption::A256Gcm => {
            if iv.len() != 12 {
                return Err(token_err("invalid iv"));
            }
            let cipher = <Aes256Gcm as aes_gcm::KeyInit>::new_from_slice(&key)
                .map_err(|_| token_err("invalid encryption key"))?;
            let mut msg = ciphertext;
            msg.extend_from_slice(&tag);
            cipher
                .decrypt(
                    aes_gcm::Nonce::from_slice(&iv),
                    Payload { msg: &msg, aad },
                )
                .map_err(|_| token_err("decryption failed"))?
        }
    };

    let claims: Claims =
        serde_json::from_slice(&plaintext).map_err(|_| token_err("invalid claims"))?;
    if let Some(exp) = claims.exp
        && exp + CLOCK_TOLERANCE < now
    {
        return Err(token_err("token expired"));
    }
    Ok(claims.token)
}
