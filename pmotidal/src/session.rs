//! Gestionnaire de la session Tidal
//!
//! Possède l'unique instance de [`Credentials`] du processus. Toutes les
//! mutations (chargement, rafraîchissement, sauvegarde, effacement) passent
//! par un même verrou : au plus une réécriture des credentials à la fois.
//!
//! ```text
//! UNINITIALIZED ─load─> LOADED_VALID ───────────────> VALID
//!               └─────> LOADED_EXPIRED ─> REFRESHING ─> VALID | INVALID
//! ```

use crate::clock::Clock;
use crate::models::{Credentials, PendingLogin};
use crate::provider::AuthProvider;
use crate::store::SessionStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// État de la machine à états de session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    LoadedValid,
    LoadedExpired,
    Refreshing,
    Valid,
    Invalid,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    credentials: Option<Credentials>,
}

/// Propriétaire exclusif de la session et du login en attente
pub struct SessionManager {
    provider: Arc<dyn AuthProvider>,
    store: SessionStore,
    clock: Arc<dyn Clock>,
    inner: Mutex<SessionInner>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn AuthProvider>, store: SessionStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            store,
            clock,
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                credentials: None,
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn AuthProvider> {
        &self.provider
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Initialisation au démarrage du processus
    ///
    /// Efface le login en attente, charge la session persistée, la valide
    /// auprès du fournisseur et tente un rafraîchissement si besoin.
    pub async fn initialize(&self) -> SessionState {
        let mut inner = self.inner.lock().await;
        info!("Initializing Tidal session");

        self.store.clear_pending();
        inner.credentials = None;

        let Some(credentials) = self.store.load() else {
            info!("No stored session could be loaded");
            inner.state = SessionState::Invalid;
            return inner.state;
        };

        if self.provider.check_login(&credentials).await {
            inner.state = SessionState::LoadedValid;
            debug!("Stored session is valid");
            inner.credentials = Some(credentials);
            inner.state = SessionState::Valid;
            info!("Session loaded");
            return inner.state;
        }

        info!("Stored session expired, trying to refresh it");
        inner.state = SessionState::LoadedExpired;
        self.refresh_locked(&mut inner, credentials).await
    }

    /// Interroge le fournisseur sur la validité de la session courante
    ///
    /// Ne se fie jamais aux horodatages locaux : seul le fournisseur fait foi.
    pub async fn is_valid(&self) -> bool {
        let credentials = self.inner.lock().await.credentials.clone();
        match credentials {
            Some(credentials) => self.provider.check_login(&credentials).await,
            None => false,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Copie des credentials courants
    pub async fn credentials(&self) -> Option<Credentials> {
        self.inner.lock().await.credentials.clone()
    }

    /// Rafraîchit la session courante
    ///
    /// En cas d'échec la session est effacée (mémoire et disque).
    pub async fn refresh(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(credentials) = inner.credentials.clone() else {
            debug!("No session to refresh");
            return false;
        };
        self.refresh_locked(&mut inner, credentials).await == SessionState::Valid
    }

    /// Rafraîchit la session si `rejected` est toujours la session courante
    ///
    /// Quand plusieurs appels échouent avec le même token, seul le premier
    /// rafraîchit ; les suivants trouvent un token déjà remplacé et
    /// retournent `true` sans contacter le fournisseur.
    pub async fn refresh_rejected(&self, rejected: &Credentials) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(current) = inner.credentials.clone() else {
            debug!("No session to refresh");
            return false;
        };
        if current.access_token != rejected.access_token {
            debug!("Session already refreshed by a concurrent request");
            return true;
        }
        self.refresh_locked(&mut inner, current).await == SessionState::Valid
    }

    async fn refresh_locked(
        &self,
        inner: &mut MutexGuard<'_, SessionInner>,
        credentials: Credentials,
    ) -> SessionState {
        inner.state = SessionState::Refreshing;

        let mut refreshed = match self.provider.refresh_token(&credentials).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!("Failed to refresh session: {}", e);
                self.invalidate_locked(inner);
                return inner.state;
            }
        };

        if !self.provider.check_login(&refreshed).await {
            warn!("Refreshed session is not accepted by the provider");
            self.invalidate_locked(inner);
            return inner.state;
        }

        refreshed.last_updated = Some(self.clock.now());
        if !self.store.save(&refreshed) {
            warn!("Refreshed session could not be persisted");
        }
        inner.credentials = Some(refreshed);
        inner.state = SessionState::Valid;
        info!("Session refreshed");
        inner.state
    }

    /// Persiste la session courante
    ///
    /// Refuse d'écrire s'il n'y a pas de session validée en direct, ou si un
    /// des trois tokens est absent ou vide.
    pub async fn save(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(credentials) = inner.credentials.clone() else {
            info!("No active session to save");
            return false;
        };
        if !self.accepts(&credentials).await {
            return false;
        }
        self.persist_locked(&mut inner, credentials)
    }

    /// Adopte des credentials fraîchement émis et les persiste
    ///
    /// Les credentials ne remplacent la session courante que s'ils sont
    /// complets et validés par le fournisseur. Retourne `true` si la session
    /// a été adoptée et persistée.
    pub async fn establish(&self, credentials: Credentials) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.accepts(&credentials).await {
            return false;
        }
        inner.state = SessionState::Valid;
        self.persist_locked(&mut inner, credentials)
    }

    async fn accepts(&self, credentials: &Credentials) -> bool {
        let missing = credentials.missing_fields();
        if !missing.is_empty() {
            warn!(?missing, "Refusing to save an incomplete session");
            return false;
        }
        if !self.provider.check_login(credentials).await {
            info!("Refusing to save a session the provider does not accept");
            return false;
        }
        true
    }

    fn persist_locked(
        &self,
        inner: &mut MutexGuard<'_, SessionInner>,
        mut credentials: Credentials,
    ) -> bool {
        credentials.last_updated = Some(self.clock.now());
        let saved = self.store.save(&credentials);
        inner.credentials = Some(credentials);
        saved
    }

    /// Déconnexion : efface la session en mémoire, sur disque et le login en attente
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        self.invalidate_locked(&mut inner);
        info!("Session cleared");
    }

    fn invalidate_locked(&self, inner: &mut MutexGuard<'_, SessionInner>) {
        inner.credentials = None;
        inner.state = SessionState::Invalid;
        self.store.clear();
    }

    // ============ Login en attente ============

    pub fn pending_login(&self) -> Option<PendingLogin> {
        self.store.load_pending()
    }

    pub fn set_pending_login(&self, pending: &PendingLogin) -> bool {
        self.store.save_pending(pending)
    }

    pub fn clear_pending_login(&self) {
        self.store.clear_pending();
    }
}
