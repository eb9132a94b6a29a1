/// Per-organization secret storage on top of the vault
///
/// Plaintext only exists on the way in (`store`, `replace`) and on the deploy path
/// (`resolve`). Listing returns key names and timestamps.

use super::{EncryptedSecret, VaultService};
use crate::error::{Result, TesseraError};
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Stored ciphertext for one organization key
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRecord {
    pub id: String,
    pub organization_id: String,
    pub key_name: String,
    pub sealed: EncryptedSecret,
    pub created_at: DateTime<Utc>,
}

/// What callers may see about a secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub id: String,
    pub key_name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&SecretRecord> for SecretSummary {
    fn from(record: &SecretRecord) -> Self {
        Self {
            id: record.id.clone(),
            key_name: record.key_name.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Clone)]
pub struct SecretManager {
    repository: Arc<dyn Repository>,
    vault: Arc<VaultService>,
}

impl SecretManager {
    pub fn new(repository: Arc<dyn Repository>, vault: Arc<VaultService>) -> Self {
        Self { repository, vault }
    }

    /// Encrypt and persist a new key. Fails with `Conflict` if the key exists.
    pub async fn store(
        &self,
        organization_id: &str,
        key_name: &str,
        plaintext: &str,
    ) -> Result<SecretSummary> {
        validate_key_name(key_name)?;

        let record = SecretRecord {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            key_name: key_name.to_string(),
            sealed: self.vault.encrypt(plaintext)?,
            created_at: Utc::now(),
        };
        self.repository.insert_secret(&record).await?;

        tracing::info!("🔑 Stored secret '{}' for org {}", key_name, organization_id);
        Ok(SecretSummary::from(&record))
    }

    /// Delete then recreate under a fresh nonce, atomically
    pub async fn replace(
        &self,
        organization_id: &str,
        key_name: &str,
        plaintext: &str,
    ) -> Result<SecretSummary> {
        validate_key_name(key_name)?;

        let record = SecretRecord {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            key_name: key_name.to_string(),
            sealed: self.vault.encrypt(plaintext)?,
            created_at: Utc::now(),
        };
        let replaced = self.repository.replace_secret(&record).await?;

        tracing::info!(
            "🔑 {} secret '{}' for org {}",
            if replaced { "Replaced" } else { "Stored" },
            key_name,
            organization_id
        );
        Ok(SecretSummary::from(&record))
    }

    pub async fn delete(&self, organization_id: &str, key_name: &str) -> Result<bool> {
        let removed = self.repository.delete_secret(organization_id, key_name).await?;
        if removed {
            tracing::info!("🗑️ Deleted secret '{}' for org {}", key_name, organization_id);
        }
        Ok(removed)
    }

    pub async fn list(&self, organization_id: &str) -> Result<Vec<SecretSummary>> {
        self.repository.list_secrets(organization_id).await
    }

    /// Decrypt a key for deployment. Missing keys are `None`; tampered ones fail.
    pub async fn resolve(&self, organization_id: &str, key_name: &str) -> Result<Option<String>> {
        match self.repository.get_secret(organization_id, key_name).await? {
            Some(record) => self.vault.decrypt_secret(&record.sealed).map(Some),
            None => Ok(None),
        }
    }
}

fn validate_key_name(key_name: &str) -> Result<()> {
    let valid = !key_name.is_empty()
        && key_name.len() <= 128
        && key_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(TesseraError::Validation(format!(
            "secret key '{}' must be 1-128 characters of [A-Za-z0-9_.-]",
            key_name
        )))
    }
}
