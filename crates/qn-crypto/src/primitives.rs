//! Thin glue over the crypto primitives: AEAD, CBC, HMAC, KDFs, random,
//! and encodings. Operators compose these; nothing here knows about
//! payloads or versions.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload as AeadPayload},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::{IV_SIZE, NONCE_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

// ── Random ────────────────────────────────────────────────────────────────────

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// `len` random bytes as a lowercase hex string.
pub fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

// ── AES-256-CBC (001-003 item crypto) ────────────────────────────────────────

pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| anyhow::anyhow!("aes-cbc key/iv length: {e}"))?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let dec = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| anyhow::anyhow!("aes-cbc key/iv length: {e}"))?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| anyhow::anyhow!("aes-cbc decrypt failed: wrong key or corrupted data"))
}

/// Legacy items may omit the IV entirely; a 16-byte zero IV is substituted.
pub fn zero_iv() -> [u8; IV_SIZE] {
    [0u8; IV_SIZE]
}

// ── HMAC-SHA256 ───────────────────────────────────────────────────────────────

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("hmac key length: {e}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time verification of an HMAC-SHA256 tag.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

// ── KDFs ──────────────────────────────────────────────────────────────────────

pub fn pbkdf2_sha1(password: &[u8], salt: &[u8], rounds: u32, out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(password, salt, rounds, &mut out);
    out
}

pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], rounds: u32, out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2_hmac::<sha2::Sha512>(password, salt, rounds, &mut out);
    out
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ── XChaCha20-Poly1305 (004 item crypto) ─────────────────────────────────────

pub fn xchacha_encrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            AeadPayload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("aead encryption failed: {e}"))
}

pub fn xchacha_decrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            AeadPayload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| anyhow::anyhow!("aead decryption failed: wrong key, nonce, or aad"))
}

// ── Encodings ─────────────────────────────────────────────────────────────────

pub fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| anyhow::anyhow!("base64 decode: {e}"))
}

pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| anyhow::anyhow!("hex decode: {e}"))
}

/// Decode a 64-char hex string into a 32-byte key.
pub fn key_from_hex(s: &str) -> Result<[u8; 32]> {
    let bytes = hex_decode(s)?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("key must be 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length_and_uniqueness() {
        let a = random_hex(32);
        let b = random_hex(32);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b, "random keys must differ");
    }

    #[test]
    fn test_aes_cbc_roundtrip() {
        let key = random_bytes(32);
        let iv = random_bytes(16);
        let plaintext = b"the quick brown fox";

        let ct = aes_cbc_encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(&ct[..plaintext.len().min(ct.len())], plaintext.as_slice());
        let pt = aes_cbc_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn test_aes_cbc_wrong_key_fails() {
        let key = random_bytes(32);
        let other = random_bytes(32);
        let iv = random_bytes(16);
        let ct = aes_cbc_encrypt(&key, &iv, b"secret").unwrap();
        assert!(aes_cbc_decrypt(&other, &iv, &ct).is_err());
    }

    #[test]
    fn test_hmac_verify() {
        let key = random_bytes(32);
        let tag = hmac_sha256(&key, b"data").unwrap();
        assert!(hmac_sha256_verify(&key, b"data", &tag));
        assert!(!hmac_sha256_verify(&key, b"tampered", &tag));
    }

    #[test]
    fn test_pbkdf2_deterministic() {
        let a = pbkdf2_sha512(b"password", b"salt", 100, 64);
        let b = pbkdf2_sha512(b"password", b"salt", 100, 64);
        assert_eq!(a, b, "KDF must be deterministic");
        let c = pbkdf2_sha512(b"password", b"other", 100, 64);
        assert_ne!(a, c, "different salts must produce different keys");
    }

    #[test]
    fn test_xchacha_roundtrip_and_aad_binding() {
        let key = [7u8; 32];
        let nonce = [9u8; NONCE_SIZE];
        let ct = xchacha_encrypt(&key, &nonce, b"aad", b"plaintext").unwrap();

        let pt = xchacha_decrypt(&key, &nonce, b"aad", &ct).unwrap();
        assert_eq!(pt, b"plaintext");
        assert!(
            xchacha_decrypt(&key, &nonce, b"other-aad", &ct).is_err(),
            "aad mismatch must fail"
        );
    }

    #[test]
    fn test_xchacha_tamper_fails() {
        let key = [7u8; 32];
        let nonce = [9u8; NONCE_SIZE];
        let mut ct = xchacha_encrypt(&key, &nonce, b"", b"plaintext").unwrap();
        ct[0] ^= 0xFF;
        assert!(xchacha_decrypt(&key, &nonce, b"", &ct).is_err());
    }

    #[test]
    fn test_key_from_hex() {
        let hexed = "ab".repeat(32);
        let key = key_from_hex(&hexed).unwrap();
        assert_eq!(key, [0xabu8; 32]);
        assert!(key_from_hex("abcd").is_err());
    }
}
