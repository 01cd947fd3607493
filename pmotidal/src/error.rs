//! Gestion des erreurs pour le client Tidal

use thiserror::Error;

/// Type Result personnalisé pour pmotidal
pub type Result<T> = std::result::Result<T, TidalError>;

/// Erreurs possibles lors de l'utilisation du client Tidal
#[derive(Error, Debug)]
pub enum TidalError {
    /// Erreur d'authentification (token invalide ou révoqué)
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Ressource non trouvée (album, track, etc.)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Erreur d'entrée/sortie (fichiers de session)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Erreur de configuration Tidal (client ID, secret, etc.)
    #[error("Tidal configuration error: {0}")]
    Configuration(String),

    /// Erreur de l'API Tidal
    #[error("Tidal API error (code {code}): {message}")]
    ApiError { code: u16, message: String },

    /// Quota dépassé (rate limiting)
    #[error("Rate limit exceeded, please try again later")]
    RateLimitExceeded,

    /// Aucune session active
    #[error("No session, please restart login")]
    NoSession,

    /// Aucun login en attente de confirmation
    #[error("No pending login, request a new link")]
    NoPendingLogin,

    /// La fenêtre de login a expiré
    #[error("Login window expired, request a new link")]
    LoginExpired,

    /// Erreur de cache
    #[error("Cache error: {0}")]
    Cache(String),

    /// Erreur générique
    #[error("Tidal error: {0}")]
    Other(String),
}

impl TidalError {
    /// Crée une erreur API depuis un code de statut HTTP et un message
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        match code {
            401 | 403 => Self::Unauthorized(message.into()),
            404 => Self::NotFound(message.into()),
            429 => Self::RateLimitExceeded,
            _ => Self::ApiError {
                code,
                message: message.into(),
            },
        }
    }

    /// Vérifie si l'erreur est une erreur de credentials (401/403)
    pub fn is_auth_error(&self) -> bool {
        matches!(self, TidalError::Unauthorized(_) | TidalError::NoSession)
    }

    /// Vérifie si l'erreur est passagère (réseau, timeout, 429, 5xx)
    ///
    /// Ces erreurs peuvent être réessayées dans le budget de tentatives du
    /// flux de login ; elles ne sont jamais remontées telles quelles.
    pub fn is_transient(&self) -> bool {
        match self {
            TidalError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TidalError::RateLimitExceeded => true,
            TidalError::ApiError { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Vérifie si l'erreur est une erreur de rate limiting
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TidalError::RateLimitExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_code() {
        assert!(matches!(
            TidalError::from_status_code(401, "bad token"),
            TidalError::Unauthorized(_)
        ));
        assert!(matches!(
            TidalError::from_status_code(404, "missing"),
            TidalError::NotFound(_)
        ));
        assert!(TidalError::from_status_code(429, "slow down").is_rate_limit());
        assert!(matches!(
            TidalError::from_status_code(502, "gateway"),
            TidalError::ApiError { code: 502, .. }
        ));
    }

    #[test]
    fn test_classification() {
        assert!(TidalError::from_status_code(403, "").is_auth_error());
        assert!(TidalError::NoSession.is_auth_error());
        assert!(TidalError::from_status_code(503, "").is_transient());
        assert!(TidalError::RateLimitExceeded.is_transient());
        assert!(!TidalError::LoginExpired.is_transient());
        assert!(!TidalError::from_status_code(400, "").is_transient());
    }
}
