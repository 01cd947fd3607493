//! Couche d'accès à l'API REST Tidal
//!
//! Ce module fournit une interface bas-niveau pour communiquer avec le
//! service d'identité (`auth.tidal.com`), le catalogue (`api.tidal.com`) et
//! le serveur d'images (`resources.tidal.com`).
//!
//! [`TidalApi`] ne conserve aucun état de session : les credentials sont
//! passés à chaque appel authentifié.

pub mod auth;
pub mod catalog;

use crate::error::{Result, TidalError};
use crate::models::Credentials;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// URL de base du service d'identité
pub const AUTH_BASE_URL: &str = "https://auth.tidal.com/v1/oauth2";
/// URL de base de l'API catalogue
pub const API_BASE_URL: &str = "https://api.tidal.com/v1";
/// URL de base du serveur d'images
pub const RESOURCES_BASE_URL: &str = "https://resources.tidal.com/images";

/// Scopes demandés lors du login
pub const OAUTH_SCOPES: &str = "r_usr w_usr w_sub";

/// URLs des trois services contactés
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth_base: String,
    pub api_base: String,
    pub resources_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_base: AUTH_BASE_URL.to_string(),
            api_base: API_BASE_URL.to_string(),
            resources_base: RESOURCES_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Tous les services servis par un même hôte (`{base}/auth`, `{base}/api`,
    /// `{base}/images`)
    pub fn local(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_base: format!("{}/auth", base),
            api_base: format!("{}/api", base),
            resources_base: format!("{}/images", base),
        }
    }
}

/// Client API bas-niveau pour communiquer avec Tidal
pub struct TidalApi {
    /// Client HTTP
    client: Client,
    client_id: String,
    client_secret: String,
    /// Pays utilisé pour filtrer le catalogue
    country_code: String,
    endpoints: Endpoints,
}

impl TidalApi {
    /// Crée une nouvelle instance de l'API
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        country_code: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("PMOTidal/0.1")
            .build()?;

        Ok(Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            country_code: country_code.into(),
            endpoints: Endpoints::default(),
        })
    }

    /// Remplace les URLs des services
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Effectue une requête GET authentifiée sur l'API catalogue
    ///
    /// Le paramètre `countryCode` est ajouté automatiquement.
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.endpoints.api_base, endpoint);

        debug!("GET {} with {} params", url, params.len());

        let response = self
            .client
            .get(&url)
            .header("Authorization", credentials.authorization())
            .query(params)
            .query(&[("countryCode", self.country_code.as_str())])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Effectue une requête POST (formulaire) sur le service d'identité
    pub(crate) async fn post_auth(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Response> {
        let url = format!("{}{}", self.endpoints.auth_base, endpoint);

        debug!("POST {} with {} params", url, params.len());

        Ok(self.client.post(&url).form(params).send().await?)
    }

    /// Vrai si `url` répond avec un statut de succès à une requête HEAD
    pub(crate) async fn head_ok(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }

    /// Traite la réponse HTTP
    pub(crate) async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let status_code = status.as_u16();

        debug!("Response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = error_message(&error_text);
            warn!("API error ({}): {}", status_code, message);
            return Err(TidalError::from_status_code(status_code, message));
        }

        let text = response.text().await?;

        serde_json::from_str(&text).map_err(|e| {
            warn!("Failed to parse response: {}", e);
            TidalError::JsonParse(e)
        })
    }
}

/// Extrait le message lisible d'un corps d'erreur Tidal
///
/// Tidal utilise `userMessage` sur l'API catalogue et `error_description`
/// sur le service d'identité.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for field in ["userMessage", "error_description", "error"] {
            if let Some(message) = json.get(field).and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }
    }
    body.to_string()
}
