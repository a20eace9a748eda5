use keyring::Entry;

use super::storage::{SessionStorage, StorageError};
use super::Session;

const SERVICE_NAME: &str = "fieldsync";

/// Session kept in the OS keychain, one entry per account.
///
/// The whole session is stored as a single JSON secret so the access and
/// refresh tokens are always written and removed together.
pub struct KeyringSessionStorage {
    account: String,
}

impl KeyringSessionStorage {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(SERVICE_NAME, &self.account)?)
    }
}

impl SessionStorage for KeyringSessionStorage {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &Session) -> Result<(), StorageError> {
        let secret = serde_json::to_string(session)?;
        self.entry()?.set_password(&secret)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
