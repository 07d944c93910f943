use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dirs::{BaseDir, app_dir};

fn default_auth_service() -> String {
    "google".to_string()
}

/// One login for the external scan service.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    #[serde(default = "default_auth_service")]
    pub auth_service: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth_service", &self.auth_service)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl Credentials {
    fn normalize(&mut self) {
        for account in &mut self.accounts {
            account.username = account.username.trim().to_string();
            account.auth_service = account.auth_service.trim().to_ascii_lowercase();
            if account.auth_service.is_empty() {
                account.auth_service = default_auth_service();
            }
        }
        self.accounts.retain(|a| !a.username.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Account to use for the `n`-th request (round-robin).
    pub fn rotate(&self, n: usize) -> Option<&Account> {
        if self.accounts.is_empty() {
            return None;
        }
        self.accounts.get(n % self.accounts.len())
    }
}

/// `$XDG_CONFIG_HOME/geosweep/credentials.json`.
pub fn default_credentials_path() -> anyhow::Result<PathBuf> {
    Ok(app_dir(BaseDir::Config)?.join("credentials.json"))
}

/// Read a credentials file. `Ok(None)` when the file does not exist.
pub fn load_credentials(path: &Path) -> anyhow::Result<Option<Credentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let mut creds: Credentials = serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("invalid credentials file {}: {err}", path.display()))?;
    creds.normalize();
    Ok(Some(creds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_credentials(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn loads_and_normalizes_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            r#"{"accounts": [
                {"username": " alice ", "password": "pw1", "auth_service": "PTC"},
                {"username": "bob", "password": "pw2"},
                {"username": "   ", "password": "ignored"}
            ]}"#,
        )
        .unwrap();

        let creds = load_credentials(&path).unwrap().unwrap();
        assert_eq!(creds.accounts.len(), 2);
        assert_eq!(creds.accounts[0].username, "alice");
        assert_eq!(creds.accounts[0].auth_service, "ptc");
        assert_eq!(creds.accounts[1].auth_service, "google");
    }

    #[test]
    fn rotate_cycles_through_accounts() {
        let creds = Credentials {
            accounts: vec![
                Account { username: "a".into(), ..Default::default() },
                Account { username: "b".into(), ..Default::default() },
            ],
        };
        let names: Vec<&str> = (0..4)
            .filter_map(|n| creds.rotate(n))
            .map(|a| a.username.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "a", "b"]);
        assert!(Credentials::default().rotate(0).is_none());
    }

    #[test]
    fn debug_output_hides_password() {
        let account = Account {
            username: "alice".into(),
            password: "hunter2".into(),
            auth_service: "google".into(),
        };
        let rendered = format!("{account:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_credentials(&path).is_err());
    }
}
