//! On-disk credential store: a magic-prefixed flat-file database of user
//! records plus a sidecar file used to detect tampering, backed by an
//! in-memory map guarded by a single mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::digest::Digest;
use crate::protocol::Permission;

pub const MAGIC: [u8; 4] = [0xFF, 0xAA, 0xFA, 0xBA];
pub const STORE_DIR: &str = ".cape";
pub const DB_FILE: &str = ".cape.db";
pub const HASH_FILE: &str = ".cape.hash";
pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "password";

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct UserAccount {
    pub username: String,
    pub permission: Permission,
    pub password_hash: Digest,
}

#[derive(Debug)]
pub enum StoreError {
    Corrupt(String),
    UserExists,
    UserNoExist,
    CredRuleError,
    Io(std::io::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Corrupt(msg) => write!(f, "credential store corrupt: {}", msg),
            StoreError::UserExists => write!(f, "user already exists"),
            StoreError::UserNoExist => write!(f, "user does not exist"),
            StoreError::CredRuleError => write!(f, "username/password violate length rules"),
            StoreError::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

pub type Result<T> = std::result::Result<T, StoreError>;

struct Inner {
    users: HashMap<String, UserAccount>,
}

pub struct CredentialStore {
    store_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl CredentialStore {
    /// Loads the store from `home_dir`, bootstrapping default state if absent.
    pub async fn load(home_dir: &Path) -> Result<Self> {
        let store_dir = home_dir.join(STORE_DIR);
        let db_path = store_dir.join(DB_FILE);
        let hash_path = store_dir.join(HASH_FILE);

        if !store_dir.exists() {
            tokio::fs::create_dir_all(&store_dir).await?;
        }

        let db_exists = db_path.exists();
        let hash_exists = hash_path.exists();

        if !db_exists && !hash_exists {
            bootstrap_default(&db_path, &hash_path).await?;
        } else if db_exists != hash_exists {
            return Err(StoreError::Corrupt(
                "db and sidecar files disagree on existence".into(),
            ));
        }

        let db_bytes = tokio::fs::read(&db_path).await?;
        let hash_bytes = tokio::fs::read(&hash_path).await?;
        verify_sidecar(&db_bytes, &hash_bytes)?;
        let users = parse_db(&db_bytes)?;

        Ok(CredentialStore {
            store_dir,
            inner: Mutex::new(Inner { users }),
        })
    }

    /// Looks up `username`, checks `password` against the stored hash, and
    /// returns a clone of the account on success. A missing user and a wrong
    /// password are indistinguishable to the caller by design.
    pub async fn lookup(&self, username: &str, password: &str) -> Option<UserAccount> {
        let inner = self.inner.lock().await;
        let result = inner.users.get(username).and_then(|acct| {
            if acct.password_hash == Digest::sha256(password.as_bytes()) {
                Some(acct.clone())
            } else {
                None
            }
        });
        match &result {
            Some(acct) => info!(username = %acct.username, "authentication succeeded"),
            None => warn!(username, "authentication failed"),
        }
        result
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        permission: Permission,
    ) -> Result<()> {
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len())
            || !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len())
        {
            warn!(username, "create_user rejected: credential rule violation");
            return Err(StoreError::CredRuleError);
        }
        let mut inner = self.inner.lock().await;
        if inner.users.contains_key(username) {
            warn!(username, "create_user rejected: user already exists");
            return Err(StoreError::UserExists);
        }
        inner.users.insert(
            username.to_string(),
            UserAccount {
                username: username.to_string(),
                permission,
                password_hash: Digest::sha256(password.as_bytes()),
            },
        );
        self.persist(&inner).await?;
        info!(username, ?permission, "user created");
        Ok(())
    }

    pub async fn remove_user(&self, username: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.users.remove(username).is_none() {
            warn!(username, "remove_user rejected: user does not exist");
            return Err(StoreError::UserNoExist);
        }
        self.persist(&inner).await?;
        info!(username, "user removed");
        Ok(())
    }

    async fn persist(&self, inner: &Inner) -> Result<()> {
        let mut db_bytes = Vec::new();
        db_bytes.extend_from_slice(&MAGIC);
        for account in inner.users.values() {
            db_bytes.extend_from_slice(
                format!(
                    "{}:{}:{}\n",
                    account.username,
                    account.permission as u8,
                    account.password_hash.to_hex()
                )
                .as_bytes(),
            );
        }
        let db_path = self.store_dir.join(DB_FILE);
        let hash_path = self.store_dir.join(HASH_FILE);
        tokio::fs::write(&db_path, &db_bytes).await?;
        let digest = Digest::sha256(&db_bytes);
        let mut hash_bytes = Vec::with_capacity(4 + 32);
        hash_bytes.extend_from_slice(&MAGIC);
        hash_bytes.extend_from_slice(digest.as_bytes());
        tokio::fs::write(&hash_path, &hash_bytes).await?;
        Ok(())
    }
}

async fn bootstrap_default(db_path: &Path, hash_path: &Path) -> Result<()> {
    let default_hash = Digest::sha256(DEFAULT_PASSWORD.as_bytes());
    let mut db_bytes = Vec::new();
    db_bytes.extend_from_slice(&MAGIC);
    db_bytes.extend_from_slice(
        format!(
            "{}:{}:{}\n",
            DEFAULT_USER,
            Permission::Admin as u8,
            default_hash.to_hex()
        )
        .as_bytes(),
    );
    tokio::fs::write(db_path, &db_bytes).await?;
    let digest = Digest::sha256(&db_bytes);
    let mut hash_bytes = Vec::with_capacity(4 + 32);
    hash_bytes.extend_from_slice(&MAGIC);
    hash_bytes.extend_from_slice(digest.as_bytes());
    tokio::fs::write(hash_path, &hash_bytes).await?;
    Ok(())
}

fn verify_sidecar(db_bytes: &[u8], hash_bytes: &[u8]) -> Result<()> {
    if hash_bytes.len() != 4 + 32 || hash_bytes[..4] != MAGIC {
        return Err(StoreError::Corrupt("sidecar magic/length mismatch".into()));
    }
    let expected = Digest::sha256(db_bytes);
    if &hash_bytes[4..] != expected.as_bytes() {
        return Err(StoreError::Corrupt("sidecar hash does not match db file".into()));
    }
    Ok(())
}

fn parse_db(db_bytes: &[u8]) -> Result<HashMap<String, UserAccount>> {
    if db_bytes.len() < 4 || db_bytes[..4] != MAGIC {
        return Err(StoreError::Corrupt("db magic mismatch".into()));
    }
    let body = std::str::from_utf8(&db_bytes[4..])
        .map_err(|_| StoreError::Corrupt("db body is not valid utf-8".into()))?;
    let mut users = HashMap::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ':');
        let username = parts
            .next()
            .ok_or_else(|| StoreError::Corrupt("missing username field".into()))?;
        let perm_digit = parts
            .next()
            .ok_or_else(|| StoreError::Corrupt("missing permission field".into()))?;
        let hex_hash = parts
            .next()
            .ok_or_else(|| StoreError::Corrupt("missing hash field".into()))?;
        if username.len() > MAX_USERNAME_LEN || hex_hash.len() > 64 {
            return Err(StoreError::Corrupt("record field too long".into()));
        }
        let permission = Permission::from_digit(perm_digit.parse().map_err(|_| {
            StoreError::Corrupt("permission field is not a digit".into())
        })?)
        .ok_or_else(|| StoreError::Corrupt("unknown permission digit".into()))?;
        let password_hash = Digest::from_hex(hex_hash)
            .ok_or_else(|| StoreError::Corrupt("hash field is not valid hex".into()))?;
        users.insert(
            username.to_string(),
            UserAccount {
                username: username.to_string(),
                permission,
                password_hash,
            },
        );
    }
    Ok(users)
}
