use crate::core::types::{ClientSecret, HashedClientSecret};
use crate::provider::error::Error;

use super::random::FromRandom;

#[derive(Debug)]
pub struct Salt(pub String);

pub trait HashTo: AsRef<str> {
    type HashedType;
}

impl HashTo for ClientSecret {
    type HashedType = HashedClientSecret;
}

/// Argon2 hashing keyed with a server-wide secret (pepper).
pub struct HashingService {
    secret_key: String,
}

impl std::fmt::Debug for HashingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashingService {{ ... }}")
    }
}

impl HashingService {
    pub fn with_secret_key(secret_key: String) -> Self {
        Self { secret_key }
    }

    fn get_config(&self) -> argon2::Config {
        let mut config = argon2::Config::default();
        config.secret = self.secret_key.as_bytes();
        config
    }

    pub fn hash<T, H>(&self, to_hash: &T) -> Result<H, Error>
    where
        T: HashTo<HashedType = H>,
        H: From<String>,
    {
        let s = to_hash.as_ref();
        let salt = Salt::from_random();
        let hash = argon2::hash_encoded(s.as_bytes(), salt.0.as_bytes(), &self.get_config())?;

        Ok(hash.into())
    }

    /// Constant-time comparison of `secret` against an encoded hash.
    pub fn verify<T, H>(&self, secret: &T, hashed: &H) -> Result<bool, Error>
    where
        T: HashTo<HashedType = H>,
        H: AsRef<str>,
    {
        let hashed = hashed.as_ref();
        let result = argon2::verify_encoded_ext(
            hashed,
            secret.as_ref().as_bytes(),
            self.secret_key.as_bytes(),
            &[],
        )?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_only_the_original_secret() {
        let hasher = HashingService::with_secret_key("pepper".to_string());
        let hashed: HashedClientSecret = hasher.hash(&ClientSecret("foobar".into())).unwrap();

        assert!(hasher.verify(&ClientSecret("foobar".into()), &hashed).unwrap());
        assert!(!hasher.verify(&ClientSecret("wrong".into()), &hashed).unwrap());
    }

    #[test]
    fn verify_depends_on_the_secret_key() {
        let hasher = HashingService::with_secret_key("pepper".to_string());
        let other = HashingService::with_secret_key("salt".to_string());
        let hashed: HashedClientSecret = hasher.hash(&ClientSecret("foobar".into())).unwrap();

        assert!(!other.verify(&ClientSecret("foobar".into()), &hashed).unwrap());
    }
}
