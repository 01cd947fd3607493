//! Flux de login par code d'appareil (device code)
//!
//! `get_link` émet (ou réutilise) un lien de vérification à ouvrir dans un
//! navigateur ; `verify` interroge ensuite le fournisseur un nombre borné de
//! fois pour savoir si l'utilisateur a confirmé.

use crate::error::Result;
use crate::models::{LinkResult, LoginOutcome, PendingLogin};
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Paramètres du flux de login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginPolicy {
    /// Nombre maximal d'interrogations du fournisseur par appel à `verify`
    pub max_attempts: u32,
    /// Délai fixe entre deux interrogations
    pub retry_delay: Duration,
    /// Durée de vie d'un login en attente (secondes)
    pub code_lifetime_secs: i64,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            code_lifetime_secs: 300,
        }
    }
}

/// Issue détaillée d'un appel à `verify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Session établie et persistée
    Verified,
    /// Aucun login en attente
    NoPendingLogin,
    /// Fenêtre de confirmation écoulée : il faut demander un nouveau lien
    Expired,
    /// L'utilisateur n'a pas encore confirmé dans le budget de tentatives
    StillWaiting,
    /// Le fournisseur a émis des credentials que la session a refusés
    NotSaved,
    /// Dernière erreur passagère rencontrée, budget épuisé
    Failed(String),
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified)
    }
}

/// Orchestrateur du login par code d'appareil
pub struct DeviceLogin {
    session: Arc<SessionManager>,
    policy: LoginPolicy,
}

impl DeviceLogin {
    pub fn new(session: Arc<SessionManager>, policy: LoginPolicy) -> Self {
        Self { session, policy }
    }

    pub fn policy(&self) -> &LoginPolicy {
        &self.policy
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Retourne un lien de vérification
    ///
    /// Court-circuite si une session valide existe. Sinon, sauf `force_new`,
    /// réutilise le login en attente non expiré ; à défaut, demande un
    /// nouveau code au fournisseur et remplace le login en attente.
    pub async fn get_link(&self, force_new: bool) -> Result<LinkResult> {
        if self.session.is_valid().await {
            debug!("Session already valid, no login link issued");
            return Ok(LinkResult::already_authenticated());
        }

        let now = self.session.clock().now();

        if !force_new {
            if let Some(pending) = self.session.pending_login() {
                if !pending.is_expired(now) {
                    debug!("Reusing pending login link");
                    return Ok(LinkResult::Pending {
                        expires_in: pending.remaining_secs(now),
                        verification_uri: pending.verification_uri,
                        verification_code: pending.verification_code,
                        from_cache: true,
                    });
                }
                debug!("Pending login expired, requesting a new link");
            }
        }

        let link = self.session.provider().device_link().await?;
        let pending = PendingLogin::from_link(&link, now, self.policy.code_lifetime_secs);
        if !self.session.set_pending_login(&pending) {
            warn!("Pending login could not be persisted");
        }
        info!(code = %link.user_code, "New login link issued");

        Ok(LinkResult::Pending {
            verification_uri: pending.verification_uri,
            verification_code: pending.verification_code,
            expires_in: self.policy.code_lifetime_secs,
            from_cache: false,
        })
    }

    /// Vérifie si le login en attente a été confirmé
    pub async fn verify(&self, uri_or_code: &str) -> bool {
        self.verify_detailed(uri_or_code).await.is_verified()
    }

    /// Comme [`verify`](Self::verify), avec la raison d'un échec
    pub async fn verify_detailed(&self, uri_or_code: &str) -> VerifyOutcome {
        let Some(pending) = self.session.pending_login() else {
            info!("No pending login to verify");
            return VerifyOutcome::NoPendingLogin;
        };

        let now = self.session.clock().now();
        if pending.outlived(now, self.policy.code_lifetime_secs) {
            info!("Pending login expired, a new link is required");
            self.session.clear_pending_login();
            return VerifyOutcome::Expired;
        }

        if !pending.matches(uri_or_code) {
            warn!(submitted = %uri_or_code, "Submitted link does not match the pending login");
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = VerifyOutcome::StillWaiting;

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, "Polling device login");

            match self.session.provider().poll_device_login(&pending).await {
                LoginOutcome::Confirmed(credentials) => {
                    if !self.session.establish(credentials).await {
                        warn!("Login confirmed but the session could not be saved");
                        return VerifyOutcome::NotSaved;
                    }
                    self.session.clear_pending_login();
                    info!("Login verified");
                    return VerifyOutcome::Verified;
                }
                LoginOutcome::Expired => {
                    info!("Provider reports the login code as expired");
                    self.session.clear_pending_login();
                    return VerifyOutcome::Expired;
                }
                LoginOutcome::Waiting => {
                    last = VerifyOutcome::StillWaiting;
                }
                LoginOutcome::Failed(reason) => {
                    warn!(attempt, "Device login poll failed: {}", reason);
                    last = VerifyOutcome::Failed(reason);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        info!("Login not confirmed after {} attempts", max_attempts);
        last
    }
}
