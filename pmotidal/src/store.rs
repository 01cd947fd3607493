//! Stockage persistant de la session et du cache de login
//!
//! Deux fichiers JSON :
//! - l'enregistrement de session (`access_token`, `refresh_token`,
//!   `token_type`, `last_updated`)
//! - le login en attente (`verification_uri`, `created_at`, `expires_at`, ...)
//!
//! Aucune opération ne remonte d'erreur : un fichier absent ou corrompu est
//! traité comme absent, un échec d'écriture est rapporté par `false`.

use crate::models::{Credentials, PendingLogin};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Champs obligatoires d'un enregistrement de session
const REQUIRED_FIELDS: [&str; 3] = ["access_token", "refresh_token", "token_type"];

/// Stockage des credentials et du login en attente
#[derive(Debug, Clone)]
pub struct SessionStore {
    session_path: PathBuf,
    login_cache_path: PathBuf,
}

impl SessionStore {
    /// Crée un stockage à partir des chemins des deux fichiers
    pub fn new(session_path: impl Into<PathBuf>, login_cache_path: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            login_cache_path: login_cache_path.into(),
        }
    }

    /// Crée un stockage dont les deux fichiers vivent dans `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("tidal_session.json"),
            dir.join("tidal_login_cache.json"),
        )
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn login_cache_path(&self) -> &Path {
        &self.login_cache_path
    }

    // ============ Session ============

    /// Charge les credentials persistés
    ///
    /// Retourne `None` si le fichier est absent, illisible, mal formé ou s'il
    /// manque un des champs obligatoires.
    pub fn load(&self) -> Option<Credentials> {
        debug!(path = %self.session_path.display(), "Loading session record");

        let raw = match fs::read_to_string(&self.session_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No session record found");
                return None;
            }
            Err(e) => {
                warn!("Failed to read session record: {}", e);
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Session record is not valid JSON: {}", e);
                return None;
            }
        };

        let Some(object) = value.as_object() else {
            warn!("Session record is not a JSON object");
            return None;
        };
        debug!(fields = ?object.keys().collect::<Vec<_>>(), "Session record loaded");

        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            info!("Session record incomplete, missing {}", missing);
            return None;
        }

        match serde_json::from_value::<Credentials>(value) {
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!("Session record has unexpected field types: {}", e);
                None
            }
        }
    }

    /// Persiste les credentials
    ///
    /// Écrit d'abord directement dans le fichier cible. En cas d'échec,
    /// écrit un fichier temporaire au nom unique puis le renomme par-dessus
    /// la cible ; le fichier temporaire est supprimé si le renommage échoue.
    pub fn save(&self, credentials: &Credentials) -> bool {
        match write_replacing(&self.session_path, credentials) {
            Ok(()) => {
                info!(path = %self.session_path.display(), "Session saved");
                true
            }
            Err(e) => {
                warn!("Failed to save session: {}", e);
                false
            }
        }
    }

    /// Supprime l'enregistrement de session et le login en attente
    ///
    /// Si le fichier ne peut pas être supprimé, il est écrasé par un objet
    /// vide pour ne pas laisser des credentials lisibles.
    pub fn clear(&self) {
        match fs::remove_file(&self.session_path) {
            Ok(()) => info!("Session record removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove session record ({}), overwriting it", e);
                if let Err(e) = fs::write(&self.session_path, "{}") {
                    warn!("Failed to overwrite session record: {}", e);
                }
            }
        }

        // Un nouveau login ne doit pas réutiliser l'état d'une identité précédente
        self.clear_pending();
    }

    // ============ Login en attente ============

    /// Charge le login en attente, expiré ou non
    pub fn load_pending(&self) -> Option<PendingLogin> {
        let raw = match fs::read_to_string(&self.login_cache_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read login cache: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<PendingLogin>(&raw) {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!("Login cache is corrupt, ignoring it: {}", e);
                None
            }
        }
    }

    /// Persiste le login en attente, remplaçant le précédent
    pub fn save_pending(&self, pending: &PendingLogin) -> bool {
        match write_replacing(&self.login_cache_path, pending) {
            Ok(()) => {
                debug!("Login cache saved");
                true
            }
            Err(e) => {
                warn!("Failed to save login cache: {}", e);
                false
            }
        }
    }

    /// Supprime le login en attente
    pub fn clear_pending(&self) {
        match fs::remove_file(&self.login_cache_path) {
            Ok(()) => debug!("Login cache removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove login cache: {}", e),
        }
    }
}

/// Écriture directe, puis repli sur fichier temporaire + renommage
fn write_replacing<T: Serialize>(path: &Path, data: &T) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(data)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match fs::write(path, &json) {
        Ok(()) => return Ok(()),
        Err(e) => debug!("Direct write to {} failed: {}", path.display(), e),
    }

    let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    if let Err(e) = fs::write(&temp_path, &json) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    let renamed = fs::rename(&temp_path, path).or_else(|_| {
        // Certaines plateformes refusent de renommer par-dessus un fichier existant
        fs::remove_file(path)?;
        fs::rename(&temp_path, path)
    });

    if let Err(e) = renamed {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        assert!(store.load().is_none());
        assert!(store.load_pending().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        let mut creds = Credentials::new("access", "refresh", "Bearer");
        creds.last_updated = Some(Utc::now());

        assert!(store.save(&creds));
        assert_eq!(store.load(), Some(creds));
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(
            dir.path().join("nested/session.json"),
            dir.path().join("nested/login.json"),
        );
        assert!(store.save(&Credentials::new("a", "r", "Bearer")));
        assert!(store.session_path().exists());
    }

    #[test]
    fn test_save_failure_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("session.json");
        // Un répertoire à la place du fichier : écriture et renommage échouent
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();
        let store = SessionStore::new(&target, dir.path().join("login.json"));

        assert!(!store.save(&Credentials::new("a", "r", "Bearer")));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_falls_back_to_rename_when_direct_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        // Lien vers un répertoire absent : l'écriture directe échoue toujours
        std::os::unix::fs::symlink(dir.path().join("missing").join("session.json"), store.session_path())
            .unwrap();

        let replacement = Credentials::new("new", "r2", "Bearer");
        assert!(store.save(&replacement));
        assert_eq!(store.load(), Some(replacement));
        assert!(!fs::symlink_metadata(store.session_path()).unwrap().file_type().is_symlink());

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_clear_also_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        let now = Utc::now();
        store.save(&Credentials::new("a", "r", "Bearer"));
        store.save_pending(&PendingLogin {
            verification_uri: "link.tidal.com/ABC".into(),
            verification_code: Some("ABC".into()),
            device_code: Some("dev".into()),
            created_at: now,
            expires_at: now,
        });

        store.clear();

        assert!(store.load().is_none());
        assert!(store.load_pending().is_none());
        assert!(!store.session_path().exists());
    }
}
