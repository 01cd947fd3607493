//! Client principal pour interagir avec l'API Tidal
//!
//! Ce module fournit un client haut-niveau qui réunit la session, le flux de
//! login par code d'appareil et le cache de réponses.

use crate::api::TidalApi;
use crate::cache::{CacheStats, ResponseCache, SEARCH_TTL, TRACK_TTL};
use crate::clock::{Clock, SystemClock};
use crate::config_ext::TidalConfigExt;
use crate::error::{Result, TidalError};
use crate::login::{DeviceLogin, LoginPolicy, VerifyOutcome};
use crate::models::*;
use crate::session::{SessionManager, SessionState};
use crate::store::SessionStore;
use pmoconfig::Config;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Nombre maximal de pistes demandées pour une playlist
const PLAYLIST_TRACKS_LIMIT: u32 = 1000;

/// Client Tidal haut-niveau avec session et cache
pub struct TidalClient {
    /// API bas-niveau
    api: Arc<TidalApi>,
    session: Arc<SessionManager>,
    login: DeviceLogin,
    /// Cache de réponses en mémoire
    cache: Arc<ResponseCache>,
}

impl TidalClient {
    /// Assemble un client ; la session n'est pas encore initialisée
    pub fn new(
        api: Arc<TidalApi>,
        store: SessionStore,
        clock: Arc<dyn Clock>,
        policy: LoginPolicy,
    ) -> Self {
        let session = Arc::new(SessionManager::new(api.clone(), store, clock.clone()));
        Self {
            login: DeviceLogin::new(session.clone(), policy),
            cache: Arc::new(ResponseCache::new(clock)),
            api,
            session,
        }
    }

    /// Crée un client en utilisant la configuration de pmoconfig
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmotidal::TidalClient;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let client = TidalClient::from_config().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn from_config() -> Result<Self> {
        let config = pmoconfig::get_config();
        Self::from_config_obj(config.as_ref()).await
    }

    /// Crée un client depuis un objet Config spécifique et initialise la session
    pub async fn from_config_obj(config: &Config) -> Result<Self> {
        let (client_id, client_secret) = config.get_tidal_client_credentials()?;
        let country_code = config.get_tidal_country_code()?;
        let store = config.get_tidal_session_store()?;
        let policy = config.get_tidal_login_policy()?;

        info!(country = %country_code, "Creating Tidal client");

        let api = Arc::new(TidalApi::new(client_id, client_secret, country_code)?);
        let client = Self::new(api, store, Arc::new(SystemClock), policy);
        client.initialize().await;
        Ok(client)
    }

    /// Charge et valide la session persistée
    pub async fn initialize(&self) -> SessionState {
        self.session.initialize().await
    }

    pub fn api(&self) -> &Arc<TidalApi> {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Retourne une référence au cache
    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    // ============ Login ============

    /// Voir [`DeviceLogin::get_link`]
    pub async fn get_link(&self, force_new: bool) -> Result<LinkResult> {
        self.login.get_link(force_new).await
    }

    /// Voir [`DeviceLogin::verify`]
    pub async fn verify(&self, uri_or_code: &str) -> bool {
        self.login.verify(uri_or_code).await
    }

    pub async fn verify_detailed(&self, uri_or_code: &str) -> VerifyOutcome {
        self.login.verify_detailed(uri_or_code).await
    }

    /// Efface la session (mémoire, disque et login en attente)
    pub async fn logout(&self) {
        self.session.clear().await;
    }

    /// Vrai si des credentials sont chargés (sans appel réseau)
    pub async fn has_session(&self) -> bool {
        self.session.credentials().await.is_some()
    }

    /// Vrai si le fournisseur accepte la session courante
    pub async fn is_authenticated(&self) -> bool {
        self.session.is_valid().await
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.state().await
    }

    /// Exécute un appel authentifié
    ///
    /// Sur une erreur d'authentification, la session est rafraîchie une fois
    /// (sauf si un autre appel l'a déjà fait) et l'appel rejoué.
    async fn with_session<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(Credentials) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credentials = self.session.credentials().await.ok_or(TidalError::NoSession)?;

        match call(credentials.clone()).await {
            Err(e) if e.is_auth_error() => {
                debug!("Authenticated call rejected, refreshing session: {}", e);
                if !self.session.refresh_rejected(&credentials).await {
                    return Err(TidalError::NoSession);
                }
                let credentials = self.session.credentials().await.ok_or(TidalError::NoSession)?;
                call(credentials).await
            }
            other => other,
        }
    }

    async fn require_session(&self) -> Result<()> {
        if self.has_session().await {
            Ok(())
        } else {
            Err(TidalError::NoSession)
        }
    }

    // ============ Tracks ============

    /// Récupère une track par son ID (mise en cache 1 h)
    pub async fn get_track(&self, track_id: &str) -> Result<Track> {
        self.require_session().await?;
        let api = &self.api;
        self.cache
            .get_or_compute("track", &json!({ "track_id": track_id }), TRACK_TTL, || {
                self.with_session(move |c| async move { api.get_track(&c, track_id).await })
            })
            .await
    }

    /// Récupère les paroles d'une track
    pub async fn get_lyrics(&self, track_id: &str) -> Result<Lyrics> {
        let api = &self.api;
        self.with_session(move |c| async move { api.get_lyrics(&c, track_id).await })
            .await
    }

    /// Résout l'URL de streaming d'une track (jamais mise en cache)
    pub async fn get_stream_url(&self, track_id: &str) -> Result<StreamInfo> {
        let api = &self.api;
        self.with_session(move |c| async move { api.get_stream_url(&c, track_id).await })
            .await
    }

    // ============ Albums ============

    pub async fn get_album(&self, album_id: &str) -> Result<Album> {
        let api = &self.api;
        self.with_session(move |c| async move { api.get_album(&c, album_id).await })
            .await
    }

    /// URL de couverture disponible, à partir de la taille demandée
    pub async fn cover_url(&self, cover_id: &str, size: u32) -> Option<String> {
        self.api.resolve_cover_url(cover_id, size).await
    }

    // ============ Playlists et mixes ============

    pub async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        let api = &self.api;
        self.with_session(move |c| async move { api.get_playlist(&c, playlist_id).await })
            .await
    }

    pub async fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let api = &self.api;
        self.with_session(move |c| async move {
            api.get_playlist_tracks(&c, playlist_id, PLAYLIST_TRACKS_LIMIT)
                .await
        })
        .await
    }

    pub async fn get_mix_tracks(&self, mix_id: &str) -> Result<Vec<Track>> {
        let api = &self.api;
        self.with_session(move |c| async move { api.get_mix_tracks(&c, mix_id).await })
            .await
    }

    /// Playlists créées ou suivies par l'utilisateur
    pub async fn get_user_playlists(&self) -> Result<Vec<UserPlaylist>> {
        let api = &self.api;
        self.with_session(move |c| async move { api.get_user_playlists(&c).await })
            .await
    }

    /// Mixes personnalisés de l'utilisateur
    pub async fn get_mixes(&self) -> Result<Vec<MixSummary>> {
        let api = &self.api;
        let mixes = self
            .with_session(move |c| async move { api.get_mixes(&c).await })
            .await?;
        Ok(mixes.iter().map(MixSummary::from).collect())
    }

    /// Description d'un mix et ses pistes
    pub async fn get_mix_info(&self, mix_id: &str) -> Result<MixInfo> {
        let api = &self.api;
        let mix = self
            .with_session(move |c| async move { api.get_mix(&c, mix_id).await })
            .await?;
        let tracks = self.get_mix_tracks(mix_id).await?;
        Ok(MixInfo {
            summary: MixSummary::from(&mix),
            number_of_tracks: tracks.len(),
            tracks,
        })
    }

    // ============ Téléchargement ============

    /// Métadonnées, URL de streaming, couverture et paroles d'une track
    ///
    /// L'absence de couverture ou de paroles n'est pas une erreur.
    pub async fn get_track_download_info(
        &self,
        track_id: &str,
        cover_size: u32,
    ) -> Result<TrackDownloadInfo> {
        let track = self.get_track(track_id).await?;
        let stream = self.get_stream_url(track_id).await?;

        let cover_url = match track.album.as_ref().and_then(|a| a.cover.as_deref()) {
            Some(cover) => self.cover_url(cover, cover_size).await,
            None => None,
        };
        let lyrics = match self.get_lyrics(track_id).await {
            Ok(lyrics) => lyrics.lyrics,
            Err(e) => {
                debug!("No lyrics for track {}: {}", track_id, e);
                None
            }
        };

        Ok(TrackDownloadInfo {
            id: track.id.clone(),
            name: track.title.clone(),
            artist: track.artist_name().map(str::to_string),
            album: track.album_title().map(str::to_string),
            duration: track.duration,
            stream_url: stream.url,
            quality: stream.quality,
            cover_url,
            lyrics,
        })
    }

    /// Pistes d'une playlist avec leur URL de streaming
    ///
    /// Les pistes sans flux disponible sont omises.
    pub async fn get_playlist_download_info(&self, playlist_id: &str) -> Result<PlaylistDownloadInfo> {
        let playlist = self.get_playlist(playlist_id).await?;
        let tracks = self.get_playlist_tracks(playlist_id).await?;

        let mut downloads = Vec::with_capacity(tracks.len());
        for track in tracks {
            let stream = match self.get_stream_url(&track.id).await {
                Ok(stream) => stream,
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => {
                    warn!("Skipping track {} of playlist {}: {}", track.id, playlist_id, e);
                    continue;
                }
            };
            downloads.push(PlaylistTrackDownload {
                artist: track.artist_name().map(str::to_string),
                album: track.album_title().map(str::to_string),
                id: track.id,
                name: track.title,
                duration: track.duration,
                stream_url: stream.url,
            });
        }

        Ok(PlaylistDownloadInfo {
            playlist_name: playlist.title,
            total_tracks: downloads.len(),
            tracks: downloads,
        })
    }

    // ============ Recherche ============

    /// Recherche des tracks (mise en cache 30 min)
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<Track>> {
        self.require_session().await?;
        let api = &self.api;
        self.cache
            .get_or_compute(
                "search",
                &json!({ "query": query, "limit": limit }),
                SEARCH_TTL,
                || self.with_session(move |c| async move { api.search_tracks(&c, query, limit).await }),
            )
            .await
    }

    /// Recherche des albums (mise en cache 30 min)
    pub async fn search_albums(&self, query: &str, limit: u32) -> Result<Vec<Album>> {
        self.require_session().await?;
        let api = &self.api;
        self.cache
            .get_or_compute(
                "search_albums",
                &json!({ "query": query, "limit": limit }),
                SEARCH_TTL,
                || self.with_session(move |c| async move { api.search_albums(&c, query, limit).await }),
            )
            .await
    }

    /// Recherche des tracks d'un titre par un artiste (mise en cache 30 min)
    pub async fn search_tracks_by_artist(
        &self,
        title: &str,
        artist: &str,
        limit: u32,
    ) -> Result<Vec<Track>> {
        self.require_session().await?;
        let api = &self.api;
        self.cache
            .get_or_compute(
                "search_artist",
                &json!({ "title": title, "artist": artist, "limit": limit }),
                SEARCH_TTL,
                || {
                    self.with_session(move |c| async move {
                        api.search_tracks_by_artist(&c, title, artist, limit).await
                    })
                },
            )
            .await
    }

    /// Recherche des albums d'un titre par un artiste (mise en cache 30 min)
    pub async fn search_albums_by_artist(
        &self,
        title: &str,
        artist: &str,
        limit: u32,
    ) -> Result<Vec<Album>> {
        self.require_session().await?;
        let api = &self.api;
        self.cache
            .get_or_compute(
                "search_albums_artist",
                &json!({ "title": title, "artist": artist, "limit": limit }),
                SEARCH_TTL,
                || {
                    self.with_session(move |c| async move {
                        api.search_albums_by_artist(&c, title, artist, limit).await
                    })
                },
            )
            .await
    }

    // ============ Maintenance ============

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}
