//! Symmetric encryption, digests, signatures and password hashing.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey};
use md5::Md5;
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use super::Module;
use crate::runtime::error::RuntimeError;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

type HmacSha256 = Hmac<Sha256>;

fn aes_encrypt<C>(input: &str, key: &str, key_len: usize) -> Result<String, RuntimeError>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = aes_cipher::<C>(key, key_len)?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, input.as_bytes())
        .map_err(|_| RuntimeError::internal("failed to encrypt input"))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

fn aes_decrypt<C>(input: &str, key: &str, key_len: usize) -> Result<String, RuntimeError>
where
    C: Aead + KeyInit,
{
    let cipher = aes_cipher::<C>(key, key_len)?;
    let data = BASE64
        .decode(input)
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid cipher text: {e}")))?;
    if data.len() <= NONCE_LEN {
        return Err(RuntimeError::invalid_argument(
            "invalid cipher text: too short",
        ));
    }

    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| RuntimeError::invalid_argument("failed to decrypt cipher text"))?;

    String::from_utf8(plaintext)
        .map_err(|_| RuntimeError::invalid_argument("decrypted text is not valid UTF-8"))
}

fn aes_cipher<C: KeyInit>(key: &str, key_len: usize) -> Result<C, RuntimeError> {
    if key.len() != key_len {
        return Err(RuntimeError::invalid_argument(format!(
            "key must be {key_len} bytes, got {}",
            key.len()
        )));
    }
    C::new_from_slice(key.as_bytes())
        .map_err(|_| RuntimeError::invalid_argument("invalid encryption key"))
}

/// RSASSA-PKCS1-v1_5 SHA-256 signature, base64url without padding.
fn rsa_sign(input: &str, pem: &str) -> Result<String, RuntimeError> {
    let key = EncodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid RSA private key: {e}")))?;
    jsonwebtoken::crypto::sign(input.as_bytes(), &key, Algorithm::RS256)
        .map_err(|e| RuntimeError::invalid_argument(format!("failed to sign input: {e}")))
}

impl Module {
    /// AES-128-GCM encrypt; `key` must be exactly 16 bytes.
    ///
    /// Returns `base64(nonce || ciphertext)`.
    pub fn aes128_encrypt(&self, input: &str, key: &str) -> Result<String, RuntimeError> {
        aes_encrypt::<Aes128Gcm>(input, key, 16)
    }

    pub fn aes128_decrypt(&self, input: &str, key: &str) -> Result<String, RuntimeError> {
        aes_decrypt::<Aes128Gcm>(input, key, 16)
    }

    /// AES-256-GCM encrypt; `key` must be exactly 32 bytes.
    pub fn aes256_encrypt(&self, input: &str, key: &str) -> Result<String, RuntimeError> {
        aes_encrypt::<Aes256Gcm>(input, key, 32)
    }

    pub fn aes256_decrypt(&self, input: &str, key: &str) -> Result<String, RuntimeError> {
        aes_decrypt::<Aes256Gcm>(input, key, 32)
    }

    /// MD5 digest as lowercase hex.
    pub fn md5_hash(&self, input: &str) -> String {
        hex::encode(Md5::digest(input.as_bytes()))
    }

    /// SHA-256 digest as lowercase hex.
    pub fn sha256_hash(&self, input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    /// RSASSA-PKCS1-v1_5 SHA-256 signature of `input`, base64 encoded.
    ///
    /// `key` is a PEM private key in PKCS#8 or PKCS#1 form.
    pub fn rsa_sha256_hash(&self, input: &str, key: &str) -> Result<String, RuntimeError> {
        let signature = URL_SAFE_NO_PAD
            .decode(rsa_sign(input, key)?)
            .map_err(|_| RuntimeError::internal("failed to sign input"))?;
        Ok(BASE64.encode(signature))
    }

    /// HMAC-SHA-256 of `input` as lowercase hex.
    pub fn hmac_sha256_hash(&self, input: &str, key: &str) -> Result<String, RuntimeError> {
        if key.is_empty() {
            return Err(RuntimeError::invalid_argument("key must not be empty"));
        }
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|_| RuntimeError::invalid_argument("invalid HMAC key"))?;
        mac.update(input.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Salted adaptive password hash (Argon2id, PHC string format).
    pub fn bcrypt_hash(&self, password: &str) -> Result<String, RuntimeError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| RuntimeError::internal(format!("failed to hash password: {e}")))
    }

    /// Check `password` against a hash produced by [`Module::bcrypt_hash`].
    ///
    /// A mismatch is `Ok(false)`; only a malformed hash is an error.
    pub fn bcrypt_compare(&self, hash: &str, password: &str) -> Result<bool, RuntimeError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| RuntimeError::invalid_argument(format!("invalid password hash: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}
