//! # pmotidal - Service de session et de catalogue Tidal
//!
//! Cette crate maintient une session authentifiée auprès de Tidal et expose
//! le catalogue via une API REST, avec un cache de réponses en mémoire.
//!
//! ## Vue d'ensemble
//!
//! `pmotidal` fournit :
//! - Un stockage persistant des credentials et du login en attente
//! - Un gestionnaire de session (chargement, validation, rafraîchissement)
//! - Un flux de login par code d'appareil (lien à ouvrir dans un navigateur)
//! - Un cache de réponses compressées avec purge périodique
//! - Des handlers HTTP (axum) pour le login et le catalogue
//! - La bibliothèque de l'utilisateur (playlists, mixes) et les informations
//!   nécessaires au téléchargement d'une piste ou d'une playlist
//!
//! ## Architecture
//!
//! - `TidalClient` : façade qui réunit session, login et cache
//! - `session` : machine à états de la session, sérialisée par un verrou
//! - `login` : `get_link` / `verify` avec un nombre borné de tentatives
//! - `store` : fichiers JSON de session et de login en attente
//! - `cache` : cache de réponses avec TTL
//! - `api` : couche d'accès à l'API REST Tidal
//! - `provider` : capacité d'authentification consommée par la session
//!
//! ## Structure des modules
//!
//! ```text
//! pmotidal/
//! ├── src/
//! │   ├── lib.rs              # Module principal (ce fichier)
//! │   ├── client.rs           # Client Tidal principal
//! │   ├── session.rs          # Gestionnaire de session
//! │   ├── login.rs            # Flux de login par code d'appareil
//! │   ├── store.rs            # Stockage persistant
//! │   ├── cache.rs            # Cache de réponses
//! │   ├── clock.rs            # Horloge injectable
//! │   ├── provider.rs         # Trait AuthProvider
//! │   ├── models.rs           # Structures de données
//! │   ├── api/
//! │   │   ├── mod.rs          # API client
//! │   │   ├── auth.rs         # OAuth2 device code
//! │   │   └── catalog.rs      # Accès au catalogue
//! │   ├── api_rest.rs         # Endpoints HTTP
//! │   └── error.rs            # Gestion des erreurs
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmotidal::TidalClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Utilise automatiquement la config depuis pmoconfig
//!     let client = TidalClient::from_config().await?;
//!
//!     if !client.is_authenticated().await {
//!         let link = client.get_link(false).await?;
//!         println!("Open {:?} in a browser", link.verification_uri());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Cache
//!
//! - Informations de piste : 1 heure
//! - Résultats de recherche : 30 minutes
//!
//! Les entrées expirées sont purgées toutes les 5 minutes par défaut.
//!
//! ## Voir aussi
//!
//! - [`pmoconfig`] : Configuration

pub mod api;
pub mod api_rest;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config_ext;
pub mod error;
pub mod login;
pub mod models;
pub mod provider;
pub mod session;
pub mod store;

pub use api::TidalApi;
pub use cache::{CacheStats, ResponseCache};
pub use client::TidalClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config_ext::TidalConfigExt;
pub use error::{Result, TidalError};
pub use login::{DeviceLogin, LoginPolicy, VerifyOutcome};
pub use models::{
    Album, Credentials, DeviceLink, LinkResult, LoginOutcome, Lyrics, Mix, MixInfo, MixSummary,
    PendingLogin, Playlist, PlaylistDownloadInfo, StreamInfo, Track, TrackDownloadInfo,
    UserPlaylist,
};
pub use provider::AuthProvider;
pub use session::{SessionManager, SessionState};
pub use store::SessionStore;
