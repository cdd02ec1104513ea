//! The secret-store abstraction (spec §4.9, §6 "SecretStore/..."). The
//! concrete backend (Vault, a mounted file, whatever the deployment
//! uses) is out of scope; this crate only needs a `get(path, key)`
//! call it can make before it opens the message bus, since bus
//! credentials are themselves a secret.

use async_trait::async_trait;
use device_svc_api::Error;
use std::collections::HashMap;
use std::path::Path;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, path: &str, key: &str) -> Result<String, Error>;
}

/// A flat `[path] \n key = "value"` TOML document, the simplest
/// backend `SecretStore/Type` can name (spec §6).
pub struct SecretsFile {
    secrets: HashMap<String, HashMap<String, String>>,
}

impl SecretsFile {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| Error::ConfParse(e.to_string()))?;
        let secrets = toml::from_str(&contents).map_err(|e| Error::ConfParse(e.to_string()))?;
        Ok(SecretsFile { secrets })
    }

    /// No secrets file configured: every lookup fails `MissingPeer`,
    /// which is exactly what an anonymous bus connection needs.
    pub fn empty() -> Self {
        SecretsFile { secrets: HashMap::new() }
    }
}

#[async_trait]
impl SecretStore for SecretsFile {
    async fn get(&self, path: &str, key: &str) -> Result<String, Error> {
        self.secrets
            .get(path)
            .and_then(|section| section.get(key))
            .cloned()
            .ok_or_else(|| Error::MissingPeer(format!("no secret {}/{}", path, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_get_known_secret() {
        let mut file = tempfile_doc("[mqtt]\nusername = \"svc\"\npassword = \"hunter2\"\n");
        let store = SecretsFile::load(file.path()).await.unwrap();
        assert_eq!(store.get("mqtt", "username").await.unwrap(), "svc");
        file.close();
    }

    #[tokio::test]
    async fn test_missing_secret_is_missing_peer() {
        let mut file = tempfile_doc("[mqtt]\nusername = \"svc\"\n");
        let store = SecretsFile::load(file.path()).await.unwrap();
        let err = store.get("mqtt", "password").await.unwrap_err();
        assert!(matches!(err, Error::MissingPeer(_)));
        file.close();
    }

    struct TempDoc {
        path: std::path::PathBuf,
    }

    impl TempDoc {
        fn path(&self) -> &std::path::Path {
            &self.path
        }

        fn close(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_doc(contents: &str) -> TempDoc {
        let path = std::env::temp_dir().join(format!("device-svc-secrets-{}.toml", uuid::Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        TempDoc { path }
    }
}
