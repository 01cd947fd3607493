//! Module d'authentification OAuth2 (device code) pour l'API Tidal

use super::{OAUTH_SCOPES, TidalApi, error_message};
use crate::error::{Result, TidalError};
use crate::models::{Credentials, DeviceLink, LoginOutcome, PendingLogin, SessionInfo};
use crate::provider::AuthProvider;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Réponse de l'endpoint /device_authorization
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_expires_in() -> u64 {
    300
}

fn default_interval() -> u64 {
    2
}

/// Réponse de l'endpoint /token
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Corps d'erreur du service d'identité
#[derive(Debug, Deserialize)]
struct OAuthError {
    #[serde(default)]
    error: Option<String>,
}

impl TidalApi {
    /// Demande un nouveau code d'appareil
    pub async fn device_authorization(&self) -> Result<DeviceLink> {
        debug!("Requesting a device authorization code");

        let params = [("client_id", self.client_id.as_str()), ("scope", OAUTH_SCOPES)];
        let response = self.post_auth("/device_authorization", &params).await?;
        let auth: DeviceAuthResponse = self.handle_response(response).await?;

        let verification_uri = auth
            .verification_uri_complete
            .unwrap_or_else(|| format!("{}/{}", auth.verification_uri.trim_end_matches('/'), auth.user_code));

        info!(code = %auth.user_code, "Device authorization code received");

        Ok(DeviceLink {
            verification_uri,
            user_code: auth.user_code,
            device_code: auth.device_code,
            expires_in: auth.expires_in,
            interval: auth.interval,
        })
    }

    /// Interroge une fois le service d'identité pour un code d'appareil
    ///
    /// `authorization_pending` est un état d'attente, `expired_token` et
    /// `access_denied` sont terminaux. Les autres échecs sont `Failed`
    /// (réessayable) s'ils sont passagers, terminaux sinon.
    pub async fn poll_device_token(&self, device_code: &str) -> LoginOutcome {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("device_code", device_code),
            ("grant_type", DEVICE_CODE_GRANT),
            ("scope", OAUTH_SCOPES),
        ];

        let response = match self.post_auth("/token", &params).await {
            Ok(response) => response,
            Err(e) => return failure_outcome(e),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<TokenResponse>().await {
                Ok(token) => LoginOutcome::Confirmed(Credentials::new(
                    token.access_token,
                    token.refresh_token.unwrap_or_default(),
                    token.token_type.unwrap_or_else(|| "Bearer".to_string()),
                )),
                Err(e) => LoginOutcome::Failed(format!("invalid token response: {}", e)),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<OAuthError>(&body)
            .ok()
            .and_then(|e| e.error);

        match code.as_deref() {
            Some("authorization_pending") | Some("slow_down") => {
                debug!("Device login not confirmed yet");
                LoginOutcome::Waiting
            }
            Some("expired_token") | Some("access_denied") => {
                info!("Device code rejected: {}", error_message(&body));
                LoginOutcome::Expired
            }
            _ => {
                warn!("Device token request failed ({}): {}", status, error_message(&body));
                failure_outcome(TidalError::from_status_code(
                    status.as_u16(),
                    error_message(&body),
                ))
            }
        }
    }

    /// Obtient un nouvel access token à partir du refresh token
    ///
    /// Si la réponse ne contient pas de nouveau refresh token, l'ancien est
    /// conservé.
    pub async fn refresh_credentials(&self, credentials: &Credentials) -> Result<Credentials> {
        if credentials.refresh_token.trim().is_empty() {
            return Err(TidalError::Unauthorized("no refresh token".to_string()));
        }

        debug!("Refreshing access token");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
            ("scope", OAUTH_SCOPES),
        ];
        let response = self.post_auth("/token", &params).await?;
        let token: TokenResponse = self.handle_response(response).await?;

        Ok(Credentials::new(
            token.access_token,
            token
                .refresh_token
                .unwrap_or_else(|| credentials.refresh_token.clone()),
            token
                .token_type
                .unwrap_or_else(|| credentials.token_type.clone()),
        ))
    }

    /// Vérifie la session auprès de l'endpoint /sessions
    /// Utilisateur et pays de la session ouverte
    pub async fn session_info(&self, credentials: &Credentials) -> Result<SessionInfo> {
        self.get(credentials, "/sessions", &[]).await
    }

    pub async fn check_session(&self, credentials: &Credentials) -> bool {
        if !credentials.is_complete() {
            return false;
        }
        match self.get::<serde_json::Value>(credentials, "/sessions", &[]).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Session check failed: {}", e);
                false
            }
        }
    }
}

/// Un échec passager reste réessayable, tout autre rejet clôt le login
fn failure_outcome(error: TidalError) -> LoginOutcome {
    if error.is_transient() {
        LoginOutcome::Failed(error.to_string())
    } else {
        info!("Device login rejected: {}", error);
        LoginOutcome::Expired
    }
}

#[async_trait]
impl AuthProvider for TidalApi {
    async fn check_login(&self, credentials: &Credentials) -> bool {
        self.check_session(credentials).await
    }

    async fn refresh_token(&self, credentials: &Credentials) -> Result<Credentials> {
        self.refresh_credentials(credentials).await
    }

    async fn device_link(&self) -> Result<DeviceLink> {
        self.device_authorization().await
    }

    async fn poll_device_login(&self, pending: &PendingLogin) -> LoginOutcome {
        match pending.device_code.as_deref() {
            Some(device_code) => self.poll_device_token(device_code).await,
            None => {
                warn!("Pending login has no device code");
                LoginOutcome::Expired
            }
        }
    }
}
