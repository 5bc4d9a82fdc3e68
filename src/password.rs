//! Password hashing for registered accounts.
//!
//! Stored form: `sha256$<rounds>$<salt>$<hex digest>`. The digest is SHA-256
//! over salt and password, re-hashed with the password for `rounds` rounds.

use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";
const ROUNDS: u32 = 100_000;

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    encode(ROUNDS, &salt, password)
}

/// Check a password against a stored hash. Empty or malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(4, '$');
    let (Some(SCHEME), Some(rounds), Some(salt), Some(_)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(rounds) = rounds.parse::<u32>() else {
        return false;
    };
    if rounds == 0 {
        return false;
    }

    constant_time_eq(encode(rounds, salt, password).as_bytes(), stored.as_bytes())
}

fn encode(rounds: u32, salt: &str, password: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..rounds {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(password.as_bytes())
            .finalize();
    }
    format!("{}${}${}${:x}", SCHEME, rounds, salt, digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_round_trip() {
        let stored = hash_password("correct horse");
        assert!(stored.starts_with("sha256$100000$"));
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("correct horsE", &stored));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_known_digest() {
        // One round is a single SHA-256 over salt + password
        assert_eq!(
            encode(1, "", "abc"),
            "sha256$1$$ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unusable_hashes_never_match() {
        assert!(!verify_password("", ""));
        assert!(!verify_password("pw", "md5$1$salt$abc"));
        assert!(!verify_password("pw", "sha256$lots$salt$abc"));
        assert!(!verify_password("pw", "sha256$0$salt$abc"));
    }
}
