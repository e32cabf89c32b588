use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// A named bag of secrets for one external service (e.g. an API key,
/// a connection string, an OAuth token).
pub type Credentials = HashMap<String, String>;

/// In-memory store of credentials, keyed by credential name.
///
/// Values are held in plaintext; at-rest encryption is out of scope.
/// The store can be seeded from a JSON file of the shape
/// `{ "msg91": { "authkey": "..." }, "postgres": { "conn": "..." } }`.
#[derive(Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<String, Credentials>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
struct CredentialFile(HashMap<String, Credentials>);

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load credentials from a JSON file, replacing any existing entries
    /// with the same names.
    pub async fn load_file(&self, path: impl AsRef<Path>) -> crate::Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let file: CredentialFile = serde_json::from_str(&raw)?;
        let count = file.0.len();
        let mut entries = self.entries.write().await;
        entries.extend(file.0);
        Ok(count)
    }

    pub async fn set(&self, name: impl Into<String>, credentials: Credentials) {
        self.entries.write().await.insert(name.into(), credentials);
    }

    pub async fn get(&self, name: &str) -> Option<Credentials> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn list_names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let store = CredentialStore::new();
        let mut creds = Credentials::new();
        creds.insert("authkey".to_string(), "secret".to_string());
        store.set("msg91", creds).await;

        let fetched = store.get("msg91").await.unwrap();
        assert_eq!(fetched.get("authkey").map(String::as_str), Some("secret"));
        assert!(store.get("missing").await.is_none());
    }
}
