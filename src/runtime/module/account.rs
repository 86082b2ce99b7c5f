//! Custom-id account authentication.
//!
//! Accounts are kept by an [`AccountStore`]. The default store lives in
//! process memory; hosts with a user table plug in their own.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rand_core::{OsRng, RngCore};

use super::Module;
use crate::runtime::error::{ErrorCode, RuntimeError};

/// Accepted custom id length in bytes.
const CUSTOM_ID_LEN: std::ops::RangeInclusive<usize> = 6..=128;

/// Longest accepted username in bytes.
const MAX_USERNAME_LEN: usize = 128;

/// Length of generated usernames.
const GENERATED_USERNAME_LEN: usize = 10;

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user_id: String,
    pub username: String,
    pub custom_id: String,
}

/// Persistence for accounts.
pub trait AccountStore: Send + Sync {
    /// Find the account linked to `custom_id`, creating it with `username`
    /// when missing and `create` is set. Returns the account and whether it
    /// was created.
    fn authenticate_custom(
        &self,
        custom_id: &str,
        username: &str,
        create: bool,
    ) -> Result<(Account, bool), RuntimeError>;
}

/// Accounts held in process memory.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    inner: Mutex<Accounts>,
}

#[derive(Debug, Default)]
struct Accounts {
    by_custom_id: HashMap<String, Account>,
    usernames: HashSet<String>,
}

impl AccountStore for MemoryAccountStore {
    fn authenticate_custom(
        &self,
        custom_id: &str,
        username: &str,
        create: bool,
    ) -> Result<(Account, bool), RuntimeError> {
        let mut accounts = self
            .inner
            .lock()
            .map_err(|_| RuntimeError::internal("account store is unavailable"))?;

        if let Some(account) = accounts.by_custom_id.get(custom_id) {
            return Ok((account.clone(), false));
        }
        if !create {
            return Err(RuntimeError::not_found("User account not found."));
        }
        if accounts.usernames.contains(username) {
            return Err(RuntimeError::new(
                ErrorCode::AlreadyExists,
                "Username is already in use.",
            ));
        }

        let account = Account {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            custom_id: custom_id.to_string(),
        };
        accounts.usernames.insert(account.username.clone());
        accounts
            .by_custom_id
            .insert(custom_id.to_string(), account.clone());
        Ok((account, true))
    }
}

fn generate_username() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    (0..GENERATED_USERNAME_LEN)
        .map(|_| ALPHABET[OsRng.next_u32() as usize % ALPHABET.len()] as char)
        .collect()
}

fn validate_username(username: &str) -> Result<(), RuntimeError> {
    if username.len() > MAX_USERNAME_LEN
        || username.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(RuntimeError::invalid_argument(
            "Username invalid, no spaces or control characters allowed.",
        ));
    }
    Ok(())
}

impl Module {
    /// Authenticate by custom id.
    ///
    /// Returns `(user_id, username, created)`. An empty `username` gets a
    /// generated one when the account is created and is ignored otherwise.
    pub fn authenticate(
        &self,
        custom_id: &str,
        username: &str,
        create: bool,
    ) -> Result<(String, String, bool), RuntimeError> {
        if custom_id.is_empty() {
            return Err(RuntimeError::invalid_argument("Custom ID is required."));
        }
        if !CUSTOM_ID_LEN.contains(&custom_id.len()) {
            return Err(RuntimeError::invalid_argument(
                "Custom ID invalid, must be 6-128 bytes.",
            ));
        }
        let username = if username.is_empty() {
            generate_username()
        } else {
            validate_username(username)?;
            username.to_string()
        };

        let (account, created) = self
            .accounts
            .authenticate_custom(custom_id, &username, create)?;
        if created {
            tracing::info!(user_id = %account.user_id, "Created account");
        }
        Ok((account.user_id, account.username, created))
    }
}
