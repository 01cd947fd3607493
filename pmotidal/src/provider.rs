//! Capacité d'authentification consommée par la session et le flux de login
//!
//! Le fournisseur sait parler au service d'identité ; il ne conserve aucun
//! état de session. Les credentials appartiennent au [`SessionManager`] et
//! sont passés explicitement à chaque appel.
//!
//! [`SessionManager`]: crate::session::SessionManager

use crate::error::Result;
use crate::models::{Credentials, DeviceLink, LoginOutcome, PendingLogin};
use async_trait::async_trait;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Vérifie en direct auprès du fournisseur que les credentials sont valides
    async fn check_login(&self, credentials: &Credentials) -> bool;

    /// Obtient de nouveaux credentials à partir du refresh token
    async fn refresh_token(&self, credentials: &Credentials) -> Result<Credentials>;

    /// Demande un nouveau code de login (device authorization)
    async fn device_link(&self) -> Result<DeviceLink>;

    /// Interroge le fournisseur une fois sur l'état de confirmation du login
    async fn poll_device_login(&self, pending: &PendingLogin) -> LoginOutcome;
}
