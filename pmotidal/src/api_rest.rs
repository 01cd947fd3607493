//! Endpoints API REST pour Tidal
//!
//! Ce module définit les handlers HTTP du flux de login et de l'accès au
//! catalogue. Les échecs visibles par l'utilisateur sont toujours l'un de :
//! pas de session (401), login en attente (202), fenêtre de login expirée
//! (410).

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{cache::CacheStats, client::TidalClient, error::TidalError, login::VerifyOutcome, models::*};

/// Chemin du point d'entrée du login
pub const LOGIN_PATH: &str = "/tidal/login";

/// Limite par défaut des recherches
const DEFAULT_SEARCH_LIMIT: u32 = 10;
/// Limite maximale des recherches
const MAX_SEARCH_LIMIT: u32 = 100;

/// État partagé de l'application
#[derive(Clone)]
pub struct TidalState {
    pub client: Arc<TidalClient>,
}

impl TidalState {
    pub fn new(client: Arc<TidalClient>) -> Self {
        Self { client }
    }
}

/// Paramètres de `GET /tidal/login`
#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub force_new: bool,
}

/// Corps de `POST /tidal/login/verify`
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub verification_uri: Option<String>,
    /// Ancien nom du champ, toujours accepté
    #[serde(default)]
    pub verification_url: Option<String>,
}

/// Paramètres de recherche
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Paramètres de recherche par titre et artiste
#[derive(Debug, Deserialize)]
pub struct ArtistSearchParams {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Paramètres de `GET /tidal/track/{id}/download-info`
#[derive(Debug, Deserialize)]
pub struct DownloadInfoParams {
    #[serde(default)]
    pub cover_size: Option<u32>,
}

/// Paramètres de couverture
#[derive(Debug, Deserialize)]
pub struct CoverParams {
    #[serde(default)]
    pub size: Option<u32>,
}

/// Crée le router Axum avec tous les endpoints Tidal
pub fn create_router(state: TidalState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/login", get(login_redirect))
        // Login
        .route(LOGIN_PATH, get(get_login_link))
        .route("/tidal/login/verify", post(verify_login))
        .route(
            "/tidal/login/verify/{code}",
            get(verify_login_code).post(verify_login_code),
        )
        .route("/tidal/logout", post(logout))
        .route("/tidal/session", get(get_session))
        // Tracks
        .route("/tidal/track/{id}", get(get_track))
        .route("/tidal/track/{id}/lyrics", get(get_lyrics))
        .route("/tidal/track/{id}/stream-url", get(get_stream_url))
        .route("/tidal/track/{id}/download-info", get(get_track_download_info))
        // Recherche
        .route("/tidal/search", get(search_tracks))
        .route("/tidal/search/albums", get(search_albums))
        .route("/tidal/search/artist", get(search_tracks_by_artist))
        .route("/tidal/search/albums/artist", get(search_albums_by_artist))
        // Albums, playlists, mixes
        .route("/tidal/album/{id}", get(get_album))
        .route("/tidal/cover/{id}", get(get_cover))
        .route("/tidal/playlist/{id}", get(get_playlist))
        .route("/tidal/playlist/{id}/tracks", get(get_playlist_tracks))
        .route(
            "/tidal/playlist/{id}/download-info",
            get(get_playlist_download_info),
        )
        .route("/tidal/user/playlists", get(get_user_playlists))
        .route("/tidal/mixes", get(get_mixes))
        .route("/tidal/mix/{id}", get(get_mix_info))
        .route("/tidal/mix/{id}/tracks", get(get_mix_tracks))
        // Cache
        .route("/tidal/cache/stats", get(get_cache_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Login ============

async fn login_redirect() -> Redirect {
    Redirect::temporary(LOGIN_PATH)
}

async fn get_login_link(
    State(state): State<TidalState>,
    Query(params): Query<LoginParams>,
) -> Result<Json<LinkResult>, AppError> {
    let link = state.client.get_link(params.force_new).await?;
    Ok(Json(link))
}

async fn verify_login(
    State(state): State<TidalState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Response, AppError> {
    let submitted = body
        .verification_uri
        .or(body.verification_url)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("verification_uri is required".to_string()))?;

    Ok(verification_response(state.client.verify_detailed(&submitted).await))
}

async fn verify_login_code(State(state): State<TidalState>, Path(code): Path<String>) -> Response {
    let uri = format!("link.tidal.com/{}", code);
    verification_response(state.client.verify_detailed(&uri).await)
}

fn verification_response(outcome: VerifyOutcome) -> Response {
    let (status, body) = match outcome {
        VerifyOutcome::Verified => {
            info!("Tidal login verified through the REST API");
            (
                StatusCode::OK,
                json!({ "status": "success", "message": "Login verified" }),
            )
        }
        VerifyOutcome::StillWaiting | VerifyOutcome::Failed(_) => (
            StatusCode::ACCEPTED,
            json!({ "status": "pending", "message": "Login pending, retry shortly" }),
        ),
        VerifyOutcome::Expired => (
            StatusCode::GONE,
            json!({
                "status": "expired",
                "message": TidalError::LoginExpired.to_string(),
                "login_url": LOGIN_PATH,
            }),
        ),
        VerifyOutcome::NoPendingLogin => (
            StatusCode::BAD_REQUEST,
            json!({
                "status": "error",
                "message": TidalError::NoPendingLogin.to_string(),
                "login_url": LOGIN_PATH,
            }),
        ),
        VerifyOutcome::NotSaved => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "status": "error", "message": "Login confirmed but the session could not be saved" }),
        ),
    };
    (status, Json(body)).into_response()
}

async fn logout(State(state): State<TidalState>) -> Json<serde_json::Value> {
    state.client.logout().await;
    Json(json!({ "status": "success", "message": "Logged out" }))
}

async fn get_session(State(state): State<TidalState>) -> Json<serde_json::Value> {
    let authenticated = state.client.is_authenticated().await;
    let session_state = state.client.session_state().await;
    Json(json!({ "authenticated": authenticated, "state": session_state }))
}

// ============ Catalogue ============

async fn get_track(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<Track>, AppError> {
    Ok(Json(state.client.get_track(&id).await?))
}

async fn get_lyrics(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<Lyrics>, AppError> {
    Ok(Json(state.client.get_lyrics(&id).await?))
}

async fn get_stream_url(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<StreamInfo>, AppError> {
    Ok(Json(state.client.get_stream_url(&id).await?))
}

async fn search_tracks(
    State(state): State<TidalState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Track>>, AppError> {
    let limit = search_limit(params.limit)?;
    Ok(Json(state.client.search(&params.query, limit).await?))
}

async fn search_albums(
    State(state): State<TidalState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Album>>, AppError> {
    let limit = search_limit(params.limit)?;
    Ok(Json(state.client.search_albums(&params.query, limit).await?))
}

async fn search_tracks_by_artist(
    State(state): State<TidalState>,
    Query(params): Query<ArtistSearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = search_limit(params.limit)?;
    let tracks = state
        .client
        .search_tracks_by_artist(&params.title, &params.artist, limit)
        .await?;
    Ok(Json(json!({
        "title": params.title,
        "artist": params.artist,
        "total_results": tracks.len(),
        "tracks": tracks,
    })))
}

async fn search_albums_by_artist(
    State(state): State<TidalState>,
    Query(params): Query<ArtistSearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = search_limit(params.limit)?;
    let albums = state
        .client
        .search_albums_by_artist(&params.title, &params.artist, limit)
        .await?;
    Ok(Json(json!({
        "title": params.title,
        "artist": params.artist,
        "total_results": albums.len(),
        "albums": albums,
    })))
}

fn search_limit(limit: Option<u32>) -> Result<u32, AppError> {
    match limit {
        None => Ok(DEFAULT_SEARCH_LIMIT),
        Some(n) if (1..=MAX_SEARCH_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}, got {}",
            MAX_SEARCH_LIMIT, n
        ))),
    }
}

async fn get_album(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<Album>, AppError> {
    Ok(Json(state.client.get_album(&id).await?))
}

async fn get_cover(
    State(state): State<TidalState>,
    Path(id): Path<String>,
    Query(params): Query<CoverParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let size = params.size.unwrap_or(1280);
    let url = state
        .client
        .cover_url(&id, size)
        .await
        .ok_or_else(|| TidalError::NotFound(format!("cover {}", id)))?;
    Ok(Json(json!({ "url": url })))
}

async fn get_playlist(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<Playlist>, AppError> {
    Ok(Json(state.client.get_playlist(&id).await?))
}

async fn get_playlist_tracks(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Track>>, AppError> {
    Ok(Json(state.client.get_playlist_tracks(&id).await?))
}

async fn get_playlist_download_info(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<PlaylistDownloadInfo>, AppError> {
    Ok(Json(state.client.get_playlist_download_info(&id).await?))
}

async fn get_track_download_info(
    State(state): State<TidalState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadInfoParams>,
) -> Result<Json<TrackDownloadInfo>, AppError> {
    let cover_size = params.cover_size.unwrap_or(1280);
    Ok(Json(state.client.get_track_download_info(&id, cover_size).await?))
}

async fn get_user_playlists(State(state): State<TidalState>) -> Result<Json<serde_json::Value>, AppError> {
    let playlists = state.client.get_user_playlists().await?;
    Ok(Json(json!({
        "total_playlists": playlists.len(),
        "playlists": playlists,
    })))
}

async fn get_mixes(State(state): State<TidalState>) -> Result<Json<serde_json::Value>, AppError> {
    let mixes = state.client.get_mixes().await?;
    Ok(Json(json!({ "total_mixes": mixes.len(), "mixes": mixes })))
}

async fn get_mix_info(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<MixInfo>, AppError> {
    Ok(Json(state.client.get_mix_info(&id).await?))
}

async fn get_mix_tracks(
    State(state): State<TidalState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Track>>, AppError> {
    Ok(Json(state.client.get_mix_tracks(&id).await?))
}

async fn get_cache_stats(State(state): State<TidalState>) -> Json<CacheStats> {
    Json(state.client.cache_stats().await)
}

// ============ Gestion des erreurs ============

pub enum AppError {
    Tidal(TidalError),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = match self {
            AppError::BadRequest(message) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
            }
            AppError::Tidal(error) => error,
        };

        let status = match &error {
            TidalError::NoSession | TidalError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TidalError::NotFound(_) => StatusCode::NOT_FOUND,
            TidalError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            TidalError::LoginExpired => StatusCode::GONE,
            TidalError::NoPendingLogin => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", error);
        }

        let body = if status == StatusCode::UNAUTHORIZED {
            json!({
                "error": TidalError::NoSession.to_string(),
                "login_url": LOGIN_PATH,
            })
        } else {
            json!({ "error": error.to_string() })
        };

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<TidalError>,
{
    fn from(err: E) -> Self {
        Self::Tidal(err.into())
    }
}
