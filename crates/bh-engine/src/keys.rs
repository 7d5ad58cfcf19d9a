//! API-key material: minting, hashing, and the signed-proxy HMAC.

use ring::rand::{SecureRandom, SystemRandom};

/// Prefix carried by every plaintext key.
pub const KEY_PREFIX: &str = "aw_sk_";

/// Characters in the opaque token body.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Token body length: 43 base-62 characters carry > 256 bits of entropy.
const TOKEN_LEN: usize = 43;

/// Mint a fresh plaintext key. Returned exactly once; only the hash is
/// stored.
pub fn mint_key() -> String {
    let rng = SystemRandom::new();
    let mut out = String::with_capacity(KEY_PREFIX.len() + TOKEN_LEN);
    out.push_str(KEY_PREFIX);
    let mut buf = [0u8; 1];
    while out.len() < KEY_PREFIX.len() + TOKEN_LEN {
        rng.fill(&mut buf).expect("system rng unavailable");
        // Rejection sampling keeps the distribution uniform over the alphabet.
        if (buf[0] as usize) < ALPHABET.len() * 4 {
            out.push(ALPHABET[buf[0] as usize % ALPHABET.len()] as char);
        }
    }
    out
}

/// SHA-256 hex of a plaintext key; the stored lookup form.
pub fn hash_key(plaintext: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, plaintext.as_bytes());
    hex(digest.as_ref())
}

/// HMAC-SHA256 over the proxy context string, hex encoded.
pub fn sign_proxy_context(secret: &str, context: &str) -> String {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    hex(ring::hmac::sign(&key, context.as_bytes()).as_ref())
}

/// Constant-time verification of a proxy signature.
pub fn verify_proxy_context(secret: &str, context: &str, hex_mac: &str) -> bool {
    let Some(mac) = unhex(hex_mac) else {
        return false;
    };
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    ring::hmac::verify(&key, context.as_bytes(), &mac).is_ok()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn unhex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_keys_have_prefix_and_length() {
        let key = mint_key();
        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(key.len(), KEY_PREFIX.len() + 43);
        assert!(key[KEY_PREFIX.len()..]
            .bytes()
            .all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn minted_keys_are_unique() {
        assert_ne!(mint_key(), mint_key());
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_key("aw_sk_test");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_key("aw_sk_test"));
        assert_ne!(h, hash_key("aw_sk_other"));
    }

    #[test]
    fn proxy_signature_round_trips() {
        let context = "v2:p1:k:key1:actor1";
        let mac = sign_proxy_context("secret", context);
        assert!(verify_proxy_context("secret", context, &mac));
        assert!(!verify_proxy_context("wrong", context, &mac));
        assert!(!verify_proxy_context("secret", "v2:p2:k:key1:actor1", &mac));
        assert!(!verify_proxy_context("secret", context, "zz"));
    }
}
