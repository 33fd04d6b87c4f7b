use std::fmt;

use crate::StorageError;

/// Identifier length: exactly 10 characters.
pub const STORAGE_ID_LEN: usize = 10;

/// A 10-character lowercase alphanumeric bucket identifier.
///
/// Minted identifiers come from a v4 UUID with the hyphens stripped, which
/// yields lowercase hex, a subset of the accepted `[a-z0-9]` alphabet, so
/// externally supplied ids may use the full set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageId(String);

impl StorageId {
    /// Mints a fresh identifier.
    pub fn mint() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..STORAGE_ID_LEN].to_string())
    }

    /// Validates an externally supplied identifier.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        if s.len() != STORAGE_ID_LEN {
            return Err(StorageError::InvalidId(format!(
                "must be exactly {STORAGE_ID_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(StorageError::InvalidId(
                "only lowercase letters and digits are allowed".into(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
