//! Extension pour intégrer la configuration Tidal dans pmoconfig
//!
//! Ce module fournit le trait `TidalConfigExt` qui ajoute à
//! `pmoconfig::Config` les paramètres du compte Tidal et du flux de login.

use crate::login::LoginPolicy;
use crate::store::SessionStore;
use anyhow::{Result, anyhow};
use pmoconfig::Config;
use serde_yaml::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Trait d'extension pour gérer la configuration Tidal dans pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmotidal::TidalConfigExt;
///
/// let config = get_config();
/// let (client_id, client_secret) = config.get_tidal_client_credentials()?;
/// ```
pub trait TidalConfigExt {
    /// Récupère le client ID et le client secret du flux device code
    ///
    /// # Errors
    ///
    /// Retourne une erreur si l'un des deux n'est pas configuré
    fn get_tidal_client_credentials(&self) -> Result<(String, String)>;

    fn set_tidal_client_credentials(&self, client_id: &str, client_secret: &str) -> Result<()>;

    /// Pays utilisé pour filtrer le catalogue (défaut `US`)
    fn get_tidal_country_code(&self) -> Result<String>;

    fn set_tidal_country_code(&self, country_code: &str) -> Result<()>;

    /// Chemin absolu du fichier de session
    fn get_tidal_session_file(&self) -> Result<PathBuf>;

    /// Chemin absolu du cache de login
    fn get_tidal_login_cache_file(&self) -> Result<PathBuf>;

    /// Stockage construit à partir des deux chemins configurés
    fn get_tidal_session_store(&self) -> Result<SessionStore> {
        Ok(SessionStore::new(
            self.get_tidal_session_file()?,
            self.get_tidal_login_cache_file()?,
        ))
    }

    /// Paramètres du flux de login (tentatives, délai, durée de vie du code)
    fn get_tidal_login_policy(&self) -> Result<LoginPolicy>;
}

impl TidalConfigExt for Config {
    fn get_tidal_client_credentials(&self) -> Result<(String, String)> {
        let client_id = non_empty_string(self, &["accounts", "tidal", "client_id"])
            .ok_or_else(|| anyhow!("Tidal client_id not configured"))?;
        let client_secret = non_empty_string(self, &["accounts", "tidal", "client_secret"])
            .ok_or_else(|| anyhow!("Tidal client_secret not configured"))?;
        Ok((client_id, client_secret))
    }

    fn set_tidal_client_credentials(&self, client_id: &str, client_secret: &str) -> Result<()> {
        self.set_value(
            &["accounts", "tidal", "client_id"],
            Value::String(client_id.to_string()),
        )?;
        self.set_value(
            &["accounts", "tidal", "client_secret"],
            Value::String(client_secret.to_string()),
        )
    }

    fn get_tidal_country_code(&self) -> Result<String> {
        Ok(non_empty_string(self, &["accounts", "tidal", "country_code"])
            .unwrap_or_else(|| "US".to_string()))
    }

    fn set_tidal_country_code(&self, country_code: &str) -> Result<()> {
        self.set_value(
            &["accounts", "tidal", "country_code"],
            Value::String(country_code.to_uppercase()),
        )
    }

    fn get_tidal_session_file(&self) -> Result<PathBuf> {
        self.get_managed_file(&["accounts", "tidal", "session_file"], "tidal_session.json")
    }

    fn get_tidal_login_cache_file(&self) -> Result<PathBuf> {
        self.get_managed_file(
            &["accounts", "tidal", "login_cache_file"],
            "tidal_login_cache.json",
        )
    }

    fn get_tidal_login_policy(&self) -> Result<LoginPolicy> {
        let defaults = LoginPolicy::default();
        let login = |key: &str| self.get_value(&["accounts", "tidal", "login", key]).ok();

        let max_attempts = login("max_attempts")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32)
            .unwrap_or(defaults.max_attempts);
        let retry_delay = login("retry_delay_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay);
        let code_lifetime_secs = login("code_lifetime_secs")
            .and_then(|v| v.as_i64())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.code_lifetime_secs);

        Ok(LoginPolicy {
            max_attempts,
            retry_delay,
            code_lifetime_secs,
        })
    }
}

fn non_empty_string(config: &Config, path: &[&str]) -> Option<String> {
    match config.get_value(path) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir, yaml: &str) -> Config {
        std::fs::write(dir.path().join("config.yaml"), yaml).unwrap();
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_missing_client_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, "host:\n  http_port: 8000\n");
        assert!(config.get_tidal_client_credentials().is_err());
    }

    #[test]
    fn test_client_credentials_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(
            &dir,
            "accounts:\n  tidal:\n    client_id: abc\n    client_secret: xyz\n",
        );

        assert_eq!(
            config.get_tidal_client_credentials().unwrap(),
            ("abc".to_string(), "xyz".to_string())
        );
        assert_eq!(config.get_tidal_country_code().unwrap(), "US");
        assert_eq!(config.get_tidal_login_policy().unwrap(), LoginPolicy::default());
    }

    #[test]
    fn test_session_files_live_in_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, "accounts:\n  tidal:\n    session_file: s.json\n");

        let store = config.get_tidal_session_store().unwrap();
        assert!(store.session_path().ends_with("s.json"));
        assert!(store.session_path().starts_with(config.directory()));
        assert!(store.login_cache_path().ends_with("tidal_login_cache.json"));
    }

    #[test]
    fn test_login_policy_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(
            &dir,
            "accounts:\n  tidal:\n    login:\n      max_attempts: 5\n      retry_delay_secs: 0\n",
        );

        let policy = config.get_tidal_login_policy().unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.retry_delay, Duration::ZERO);
        assert_eq!(policy.code_lifetime_secs, 300);
    }
}
