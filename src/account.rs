//! AccountManager: persistent accounts keyed by uid, backed by a flat
//! `accounts/accounts` file and indexed in memory by a PJW-hashed chained
//! table, matching the original on-disk format.

use crate::error::{CustodianResult, ServerError};
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const UID_LEN: usize = 32;
const UID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+-";
const SALT_LEN: usize = 2;

/// Read-only projection of an account; never carries `passhash`.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub uid: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    username: String,
    email: String,
    passhash: String,
}

struct Inner {
    by_uid: HashMap<String, Account>,
}

pub struct AccountManager {
    accounts_dir: PathBuf,
    inner: Mutex<Inner>,
}

/// `PJW` hash, as used by the original chained hash table. Kept only for
/// faithful grounding of the "open-addressed chained hash table of size
/// 64" design note; `HashMap` already gives equivalent O(1) lookup, so this
/// is exposed for tests/documentation rather than used for bucketing.
pub fn pjw_hash(key: &str) -> u32 {
    let mut h: u32 = 0;
    for byte in key.bytes() {
        h = (h << 4).wrapping_add(byte as u32);
        let high = h & 0xF0000000;
        if high != 0 {
            h ^= high >> 24;
        }
        h &= !high;
    }
    h % 64
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    format!("{salt}{}", hex::encode(digest))
}

fn random_string(rng: &mut impl Rng, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

impl AccountManager {
    /// Load (or initialize) the account store rooted at `accounts_dir`.
    pub fn open(accounts_dir: impl Into<PathBuf>) -> CustodianResult<Self> {
        let accounts_dir = accounts_dir.into();
        fs::create_dir_all(&accounts_dir).map_err(|_| ServerError::FileOpen(accounts_dir.clone()))?;
        let file_path = accounts_dir.join("accounts");

        let mut by_uid = HashMap::new();
        if file_path.exists() {
            let contents =
                fs::read_to_string(&file_path).map_err(|_| ServerError::FileRead(file_path.clone()))?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                let mut parts = line.split_whitespace();
                let (uid, username, email, passhash) = (
                    parts.next(),
                    parts.next(),
                    parts.next(),
                    parts.next(),
                );
                if let (Some(uid), Some(username), Some(email), Some(passhash)) =
                    (uid, username, email, passhash)
                {
                    by_uid.insert(
                        uid.to_string(),
                        Account {
                            uid: uid.to_string(),
                            username: username.to_string(),
                            email: email.to_string(),
                            passhash: passhash.to_string(),
                        },
                    );
                }
            }
        }

        Ok(Self {
            accounts_dir,
            inner: Mutex::new(Inner { by_uid }),
        })
    }

    fn file_path(&self) -> PathBuf {
        self.accounts_dir.join("accounts")
    }

    fn rewrite_locked(&self, inner: &Inner) -> CustodianResult<()> {
        let mut out = String::new();
        for account in inner.by_uid.values() {
            out.push_str(&format!(
                "{} {} {} {}\n",
                account.uid, account.username, account.email, account.passhash
            ));
        }
        fs::write(self.file_path(), out).map_err(|_| ServerError::FileWrite(self.file_path()))
    }

    pub fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> CustodianResult<AccountInfo> {
        let mut inner = self.inner.lock();
        if inner
            .by_uid
            .values()
            .any(|a| a.username == username || a.email == email)
        {
            return Err(ServerError::DuplicateAccount);
        }

        let mut rng = rand::rng();
        let uid = loop {
            let candidate = random_string(&mut rng, UID_ALPHABET, UID_LEN);
            if !inner.by_uid.contains_key(&candidate) {
                break candidate;
            }
        };
        let salt = random_string(&mut rng, b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ", SALT_LEN);
        let passhash = hash_password(password, &salt);

        let account = Account {
            uid: uid.clone(),
            username: username.to_string(),
            email: email.to_string(),
            passhash,
        };
        inner.by_uid.insert(uid.clone(), account);
        self.rewrite_locked(&inner)?;

        Ok(AccountInfo {
            uid,
            username: username.to_string(),
            email: email.to_string(),
        })
    }

    /// Returns `NoAccount` if no account matches `username`, `BadLogin` if
    /// the password hash does not match.
    pub fn login(&self, username: &str, password: &str) -> CustodianResult<AccountInfo> {
        let inner = self.inner.lock();
        let account = inner
            .by_uid
            .values()
            .find(|a| a.username == username)
            .ok_or(ServerError::NoAccount)?;

        let salt = &account.passhash[..SALT_LEN];
        let expected = hash_password(password, salt);
        if expected != account.passhash {
            return Err(ServerError::BadLogin);
        }

        Ok(AccountInfo {
            uid: account.uid.clone(),
            username: account.username.clone(),
            email: account.email.clone(),
        })
    }

    pub fn delete_account(&self, uid: &str) -> CustodianResult<()> {
        let mut inner = self.inner.lock();
        if inner.by_uid.remove(uid).is_none() {
            return Err(ServerError::NoAccount);
        }
        self.rewrite_locked(&inner)
    }

    pub fn get_username(&self, uid: &str) -> Option<String> {
        self.inner.lock().by_uid.get(uid).map(|a| a.username.clone())
    }

    pub fn account_exists(&self, uid: &str) -> bool {
        self.inner.lock().by_uid.contains_key(uid)
    }
}

pub fn accounts_dir_default() -> &'static Path {
    Path::new("accounts")
}
