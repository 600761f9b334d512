//! Random identifiers and password hashing.

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Result;

/// bcrypt work factor for stored password hashes.
pub const HASH_COST: u32 = 10;

pub const USER_ID_PREFIX: &str = "usr_";
pub const USER_ID_LENGTH: usize = 16;
pub const SESSION_ID_PREFIX: &str = "sess_";
pub const SESSION_ID_LENGTH: usize = 20;

const PASSWORD_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!@#$%^&*()_-=+/?[]{}|<>~;:,.";
pub const GENERATED_PASSWORD_LENGTH: usize = 16;

/// `prefix` followed by `len` random alphanumerics from the OS RNG.
#[must_use]
pub fn generate_id(prefix: &str, len: usize) -> String {
    let mut rng = OsRng;
    let mut id = String::with_capacity(prefix.len() + len);
    id.push_str(prefix);
    id.extend((0..len).map(|_| char::from(rng.sample(Alphanumeric))));
    id
}

#[must_use]
pub fn generate_user_id() -> String {
    generate_id(USER_ID_PREFIX, USER_ID_LENGTH)
}

#[must_use]
pub fn generate_session_id() -> String {
    generate_id(SESSION_ID_PREFIX, SESSION_ID_LENGTH)
}

/// Random password for accounts created without operator input.
#[must_use]
pub fn generate_password() -> SecretString {
    let mut rng = OsRng;
    let password: String = (0..GENERATED_PASSWORD_LENGTH)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]))
        .collect();
    SecretString::from(password)
}

/// Hash on the blocking pool; bcrypt at cost 10 takes tens of milliseconds.
///
/// # Errors
/// Returns an error if bcrypt fails or the blocking task panics.
pub async fn hash_password(password: &str) -> Result<String> {
    let password = SecretString::from(password.to_string());
    let hash =
        tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), HASH_COST))
            .await??;
    Ok(hash)
}

/// Constant-time check of `password` against a stored bcrypt hash.
///
/// # Errors
/// Returns an error if the stored hash is malformed or the blocking task panics.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = SecretString::from(password.to_string());
    let hash = hash.to_string();
    let matches =
        tokio::task::spawn_blocking(move || bcrypt::verify(password.expose_secret(), &hash))
            .await??;
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_prefix_and_length() {
        let id = generate_user_id();
        assert!(id.starts_with("usr_"));
        assert_eq!(id.len(), 4 + 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric()));

        let id = generate_session_id();
        assert!(id.starts_with("sess_"));
        assert_eq!(id.len(), 5 + 20);
    }

    #[test]
    fn ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..256).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 256);
    }

    #[test]
    fn generated_password_uses_alphabet() {
        let password = generate_password();
        let password = password.expose_secret();
        assert_eq!(password.chars().count(), GENERATED_PASSWORD_LENGTH);
        assert!(password.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn hash_round_trip() -> anyhow::Result<()> {
        let hash = hash_password("password1").await?;
        assert_ne!(hash, "password1");
        assert!(hash.starts_with("$2"));
        assert!(verify_password("password1", &hash).await?);
        assert!(!verify_password("password2", &hash).await?);
        Ok(())
    }
}
