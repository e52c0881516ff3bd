//! Account registration, password hashing and login checks.

use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::store::{Role, Store, StoreError, UserRecord};

/// PBKDF2 rounds for new passwords.
pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;
/// Account name seeded from `GLOWSCAN_ADMIN_PASSWORD`.
pub const ADMIN_USERNAME: &str = "admin";

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("password hashing task failed: {0}")]
    Hashing(#[from] tokio::task::JoinError),
}

/// Hash a password as `pbkdf2-sha256$<iterations>$<salt hex>$<digest hex>`.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = stretch(password.as_bytes(), &salt, iterations);
    format!("{SCHEME}${iterations}${}${}", hex::encode(salt), hex::encode(digest))
}

/// Check a password against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(iterations), Ok(salt), Ok(expected)) =
        (iterations.parse::<u32>(), hex::decode(salt), hex::decode(expected))
    else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let actual = stretch(password.as_bytes(), &salt, iterations);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn stretch(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut digest = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut digest);
    digest
}

/// Account operations over the [`Store`].
#[derive(Clone)]
pub struct Accounts {
    store: Store,
    iterations: u32,
}

impl Accounts {
    pub fn new(store: Store, iterations: u32) -> Self {
        Self {
            store,
            iterations: iterations.max(1),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a regular account.
    pub async fn register(&self, username: &str, password: &str) -> Result<i64, AccountError> {
        let hash = self.hash(password).await?;
        let id = self.store.create_user(username, &hash, Role::User).await?;
        tracing::info!(username, id, "account registered");
        Ok(id)
    }

    /// Return the account if the credentials match.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, AccountError> {
        let Some(user) = self.store.find_user(username).await? else {
            return Ok(None);
        };
        let password = password.to_string();
        let stored = user.password_hash.clone();
        let ok = tokio::task::spawn_blocking(move || verify_password(&password, &stored)).await?;
        if !ok {
            tracing::debug!(username, "password mismatch");
        }
        Ok(ok.then_some(user))
    }

    /// (Re)create the admin account with the given password.
    pub async fn seed_admin(&self, password: &str) -> Result<(), AccountError> {
        let hash = self.hash(password).await?;
        self.store.reset_admin(ADMIN_USERNAME, &hash).await?;
        tracing::info!(username = ADMIN_USERNAME, "admin account seeded");
        Ok(())
    }

    async fn hash(&self, password: &str) -> Result<String, AccountError> {
        let password = password.to_string();
        let iterations = self.iterations;
        Ok(tokio::task::spawn_blocking(move || hash_password(&password, iterations)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verifies() {
        let hash = hash_password("s3cret", 10);
        assert!(hash.starts_with("pbkdf2-sha256$10$"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("S3cret", &hash));
        assert!(!verify_password("", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same", 10);
        let b = hash_password("same", 10);
        assert_ne!(a, b);
        assert!(verify_password("same", &a) && verify_password("same", &b));
    }

    #[test]
    fn test_malformed_hash_rejected() {
        for stored in [
            "",
            "plaintext",
            "md5$10$00$00",
            "sha256$10$00$00",
            "pbkdf2-sha256$x$00$00",
            "pbkdf2-sha256$0$00$00",
            "pbkdf2-sha256$10$zz$00",
            "pbkdf2-sha256$10$00$00",
            "pbkdf2-sha256$10$00$00$extra",
        ] {
            assert!(!verify_password("anything", stored), "{stored}");
        }
    }

    #[test]
    fn test_known_pbkdf2_vector() {
        // PBKDF2-HMAC-SHA256, password "password", salt "salt".
        let one = "pbkdf2-sha256$1$73616c74$120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b";
        let two = "pbkdf2-sha256$2$73616c74$ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43";
        assert!(verify_password("password", one));
        assert!(verify_password("password", two));
        assert!(!verify_password("Password", one));
    }

    #[test]
    fn test_iteration_count_matters() {
        let hash = hash_password("pw", 3);
        let tampered = hash.replacen("$3$", "$4$", 1);
        assert!(!verify_password("pw", &tampered));
    }

    async fn accounts() -> Accounts {
        Accounts::new(Store::open_in_memory().await.unwrap(), 10)
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let accounts = accounts().await;
        accounts.register("ana", "pw1").await.unwrap();

        let user = accounts.authenticate("ana", "pw1").await.unwrap().unwrap();
        assert_eq!(user.username, "ana");
        assert_eq!(user.role, Role::User);
        assert!(accounts.authenticate("ana", "nope").await.unwrap().is_none());
        assert!(accounts.authenticate("bob", "pw1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let accounts = accounts().await;
        accounts.register("ana", "pw1").await.unwrap();
        let err = accounts.register("ana", "pw2").await.unwrap_err();
        assert!(matches!(err, AccountError::Store(StoreError::DuplicateUser(_))));
    }

    #[tokio::test]
    async fn test_seed_admin_resets_password() {
        let accounts = accounts().await;
        accounts.seed_admin("first").await.unwrap();
        accounts.seed_admin("second").await.unwrap();

        assert!(accounts.authenticate(ADMIN_USERNAME, "first").await.unwrap().is_none());
        let admin = accounts.authenticate(ADMIN_USERNAME, "second").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
    }
}
