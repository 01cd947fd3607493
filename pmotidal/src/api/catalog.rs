//! Module d'accès au catalogue Tidal (tracks, albums, playlists, mixes)

use super::TidalApi;
use crate::error::{Result, TidalError};
use crate::models::*;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Tailles de couverture servies par le serveur d'images, de la plus grande
/// à la plus petite
pub const COVER_SIZES: [u32; 5] = [1280, 640, 320, 160, 80];

/// Nombre maximal de playlists demandées par liste de l'utilisateur
const USER_PLAYLISTS_LIMIT: u32 = 1000;

/// Type MIME du manifeste BTS (JSON encodé en base64)
const BTS_MANIFEST: &str = "application/vnd.tidal.bts";

/// Réponse paginée de l'API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaginatedResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total_number_of_items: Option<u32>,
}

/// Réponse de l'endpoint /search
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tracks: Option<PaginatedResponse<Track>>,
    #[serde(default)]
    albums: Option<PaginatedResponse<Album>>,
}

/// Élément d'un mix : une piste ou une vidéo
#[derive(Debug, Deserialize)]
struct MixItem {
    item: Value,
    #[serde(rename = "type")]
    kind: String,
}

/// Favori de l'utilisateur, enveloppé avec sa date d'ajout
#[derive(Debug, Deserialize)]
struct FavoriteItem<T> {
    item: T,
}

/// Page éditoriale (`/pages/...`) : des lignes de modules
#[derive(Debug, Default, Deserialize)]
struct Page {
    #[serde(default)]
    rows: Vec<PageRow>,
}

#[derive(Debug, Deserialize)]
struct PageRow {
    #[serde(default)]
    modules: Vec<PageModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageModule {
    #[serde(default)]
    mix: Option<Mix>,
    #[serde(default)]
    paged_list: Option<PaginatedResponse<Value>>,
}

impl Page {
    fn into_modules(self) -> impl Iterator<Item = PageModule> {
        self.rows.into_iter().flat_map(|row| row.modules)
    }
}

/// Réponse de l'endpoint /tracks/{id}/playbackinfopostpaywall
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackInfo {
    manifest_mime_type: String,
    manifest: String,
    #[serde(default)]
    audio_quality: Option<AudioQuality>,
}

/// Contenu décodé d'un manifeste BTS
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BtsManifest {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

impl TidalApi {
    /// Récupère les détails d'une track
    pub async fn get_track(&self, credentials: &Credentials, track_id: &str) -> Result<Track> {
        debug!("Fetching track {}", track_id);
        self.get(credentials, &format!("/tracks/{}", track_id), &[]).await
    }

    /// Récupère les détails d'un album
    pub async fn get_album(&self, credentials: &Credentials, album_id: &str) -> Result<Album> {
        debug!("Fetching album {}", album_id);
        self.get(credentials, &format!("/albums/{}", album_id), &[]).await
    }

    /// Récupère les détails d'une playlist
    pub async fn get_playlist(&self, credentials: &Credentials, playlist_id: &str) -> Result<Playlist> {
        debug!("Fetching playlist {}", playlist_id);
        self.get(credentials, &format!("/playlists/{}", playlist_id), &[])
            .await
    }

    /// Récupère les tracks d'une playlist
    pub async fn get_playlist_tracks(
        &self,
        credentials: &Credentials,
        playlist_id: &str,
        limit: u32,
    ) -> Result<Vec<Track>> {
        debug!("Fetching tracks for playlist {}", playlist_id);
        let limit = limit.to_string();
        let response: PaginatedResponse<Track> = self
            .get(
                credentials,
                &format!("/playlists/{}/tracks", playlist_id),
                &[("limit", limit.as_str())],
            )
            .await?;
        Ok(response.items)
    }

    /// Récupère les tracks d'un mix (les vidéos sont ignorées)
    pub async fn get_mix_tracks(&self, credentials: &Credentials, mix_id: &str) -> Result<Vec<Track>> {
        debug!("Fetching tracks for mix {}", mix_id);
        let response: PaginatedResponse<MixItem> = self
            .get(credentials, &format!("/mixes/{}/items", mix_id), &[])
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter(|item| item.kind == "track")
            .filter_map(|item| match serde_json::from_value::<Track>(item.item) {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("Skipping malformed mix item: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Liste les mixes personnalisés de l'utilisateur
    pub async fn get_mixes(&self, credentials: &Credentials) -> Result<Vec<Mix>> {
        debug!("Fetching user mixes");
        let page: Page = self
            .get(
                credentials,
                "/pages/my_collection_my_mixes",
                &[("deviceType", "BROWSER")],
            )
            .await?;

        Ok(page
            .into_modules()
            .filter_map(|module| module.paged_list)
            .flat_map(|list| list.items)
            .filter_map(|item| match serde_json::from_value::<Mix>(item) {
                Ok(mix) => Some(mix),
                Err(e) => {
                    warn!("Skipping malformed mix: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Récupère la description d'un mix
    pub async fn get_mix(&self, credentials: &Credentials, mix_id: &str) -> Result<Mix> {
        debug!("Fetching mix {}", mix_id);
        let page: Page = self
            .get(
                credentials,
                "/pages/mix",
                &[("mixId", mix_id), ("deviceType", "BROWSER")],
            )
            .await?;

        page.into_modules()
            .find_map(|module| module.mix)
            .ok_or_else(|| TidalError::NotFound(format!("mix {}", mix_id)))
    }

    /// Playlists créées puis playlists suivies par l'utilisateur
    ///
    /// Une playlist n'apparaît qu'une fois ; un favori créé par l'utilisateur
    /// lui-même reste dans la liste des siennes.
    pub async fn get_user_playlists(&self, credentials: &Credentials) -> Result<Vec<UserPlaylist>> {
        let user_id = self.session_info(credentials).await?.user_id;
        debug!("Fetching playlists of user {}", user_id);

        let limit = USER_PLAYLISTS_LIMIT.to_string();
        let params = [("limit", limit.as_str())];
        let own: PaginatedResponse<Playlist> = self
            .get(credentials, &format!("/users/{}/playlists", user_id), &params)
            .await?;
        let favorites: PaginatedResponse<FavoriteItem<Playlist>> = self
            .get(
                credentials,
                &format!("/users/{}/favorites/playlists", user_id),
                &params,
            )
            .await?;

        Ok(merge_user_playlists(
            &user_id,
            own.items,
            favorites.items.into_iter().map(|favorite| favorite.item),
        ))
    }

    /// Recherche des tracks d'un titre par un artiste donné
    ///
    /// Le double de `limit` est demandé à la recherche avant filtrage.
    pub async fn search_tracks_by_artist(
        &self,
        credentials: &Credentials,
        title: &str,
        artist: &str,
        limit: u32,
    ) -> Result<Vec<Track>> {
        let candidates = self
            .search_tracks(credentials, title, limit.saturating_mul(2))
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|track| {
                loosely_matches(&track.title, title)
                    && track.artist.as_ref().is_some_and(|a| loosely_matches(&a.name, artist))
            })
            .take(limit as usize)
            .collect())
    }

    /// Recherche des albums d'un titre par un artiste donné
    pub async fn search_albums_by_artist(
        &self,
        credentials: &Credentials,
        title: &str,
        artist: &str,
        limit: u32,
    ) -> Result<Vec<Album>> {
        let candidates = self
            .search_albums(credentials, title, limit.saturating_mul(2))
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|album| {
                loosely_matches(&album.title, title)
                    && album.artist.as_ref().is_some_and(|a| loosely_matches(&a.name, artist))
            })
            .take(limit as usize)
            .collect())
    }

    /// Recherche des tracks
    pub async fn search_tracks(
        &self,
        credentials: &Credentials,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Track>> {
        debug!("Searching tracks for '{}'", query);
        let limit = limit.to_string();
        let params = [("query", query), ("types", "TRACKS"), ("limit", limit.as_str())];
        let response: SearchResponse = self.get(credentials, "/search", &params).await?;
        Ok(response.tracks.map(|page| page.items).unwrap_or_default())
    }

    /// Recherche des albums
    pub async fn search_albums(
        &self,
        credentials: &Credentials,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Album>> {
        debug!("Searching albums for '{}'", query);
        let limit = limit.to_string();
        let params = [("query", query), ("types", "ALBUMS"), ("limit", limit.as_str())];
        let response: SearchResponse = self.get(credentials, "/search", &params).await?;
        Ok(response.albums.map(|page| page.items).unwrap_or_default())
    }

    /// Récupère les paroles d'une track
    pub async fn get_lyrics(&self, credentials: &Credentials, track_id: &str) -> Result<Lyrics> {
        debug!("Fetching lyrics for track {}", track_id);
        self.get(credentials, &format!("/tracks/{}/lyrics", track_id), &[])
            .await
    }

    /// Récupère l'URL de streaming d'une track
    ///
    /// Les qualités sont essayées de la meilleure à la moins bonne ; une
    /// qualité dont le manifeste ne peut être décodé est ignorée.
    pub async fn get_stream_url(&self, credentials: &Credentials, track_id: &str) -> Result<StreamInfo> {
        let mut last_error = None;

        for quality in AudioQuality::CASCADE {
            debug!("Trying quality {} for track {}", quality.as_str(), track_id);

            let params = [
                ("audioquality", quality.as_str()),
                ("playbackmode", "STREAM"),
                ("assetpresentation", "FULL"),
            ];
            let info: PlaybackInfo = match self
                .get(
                    credentials,
                    &format!("/tracks/{}/playbackinfopostpaywall", track_id),
                    &params,
                )
                .await
            {
                Ok(info) => info,
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => {
                    debug!("Quality {} unavailable: {}", quality.as_str(), e);
                    last_error = Some(e);
                    continue;
                }
            };

            match decode_manifest(&info.manifest_mime_type, &info.manifest) {
                Ok((url, mime_type)) => {
                    return Ok(StreamInfo {
                        track_id: track_id.to_string(),
                        url,
                        quality: info.audio_quality.unwrap_or(quality),
                        mime_type,
                    });
                }
                Err(e) => {
                    debug!("Cannot decode manifest for quality {}: {}", quality.as_str(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TidalError::NotFound(format!("no stream available for track {}", track_id))
        }))
    }

    /// URLs candidates d'une couverture, à partir de la taille demandée
    pub fn cover_candidates(&self, cover_id: &str, size: u32) -> Vec<String> {
        cover_candidates(&self.endpoints.resources_base, cover_id, size)
    }

    /// Première URL de couverture servie par le serveur d'images
    pub async fn resolve_cover_url(&self, cover_id: &str, size: u32) -> Option<String> {
        for url in self.cover_candidates(cover_id, size) {
            if self.head_ok(&url).await {
                return Some(url);
            }
        }
        debug!("No cover available for {}", cover_id);
        None
    }
}

/// Vrai si l'un des deux textes contient l'autre, sans tenir compte de la
/// casse ni des espaces en bordure
pub fn loosely_matches(candidate: &str, wanted: &str) -> bool {
    let candidate = candidate.trim().to_lowercase();
    let wanted = wanted.trim().to_lowercase();
    candidate.contains(&wanted) || wanted.contains(&candidate)
}

fn merge_user_playlists(
    user_id: &str,
    own: Vec<Playlist>,
    favorites: impl IntoIterator<Item = Playlist>,
) -> Vec<UserPlaylist> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for playlist in own {
        if seen.insert(playlist.uuid.clone()) {
            merged.push(UserPlaylist { playlist, is_own: true });
        }
    }
    for playlist in favorites {
        let created_by_user = playlist
            .creator
            .as_ref()
            .and_then(|creator| creator.id.as_deref())
            == Some(user_id);
        if !created_by_user && seen.insert(playlist.uuid.clone()) {
            merged.push(UserPlaylist { playlist, is_own: false });
        }
    }
    merged
}

/// Construit les URLs candidates d'une couverture
///
/// Une taille hors de [`COVER_SIZES`] est remplacée par 1280.
pub fn cover_candidates(resources_base: &str, cover_id: &str, size: u32) -> Vec<String> {
    let start = COVER_SIZES.iter().position(|s| *s == size).unwrap_or(0);
    let path = cover_id.replace('-', "/");
    COVER_SIZES[start..]
        .iter()
        .map(|s| format!("{}/{}/{}x{}.jpg", resources_base.trim_end_matches('/'), path, s, s))
        .collect()
}

/// Décode un manifeste de lecture et choisit l'URL à streamer
///
/// Une URL `.flac` est préférée, sinon la première.
fn decode_manifest(mime_type: &str, manifest: &str) -> Result<(String, Option<String>)> {
    if mime_type != BTS_MANIFEST {
        return Err(TidalError::Other(format!("unsupported manifest type {}", mime_type)));
    }

    let raw = BASE64
        .decode(manifest.trim())
        .map_err(|e| TidalError::Other(format!("invalid manifest encoding: {}", e)))?;
    let manifest: BtsManifest = serde_json::from_slice(&raw)?;

    let url = manifest
        .urls
        .iter()
        .find(|u| u.split('?').next().is_some_and(|path| path.ends_with(".flac")))
        .or_else(|| manifest.urls.first())
        .cloned()
        .ok_or_else(|| TidalError::Other("manifest contains no URL".to_string()))?;

    Ok((url, manifest.mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bts(json: &str) -> String {
        BASE64.encode(json)
    }

    #[test]
    fn test_cover_candidates_from_requested_size() {
        let urls = cover_candidates("https://img", "ab-cd-ef", 320);
        assert_eq!(
            urls,
            vec![
                "https://img/ab/cd/ef/320x320.jpg",
                "https://img/ab/cd/ef/160x160.jpg",
                "https://img/ab/cd/ef/80x80.jpg",
            ]
        );
    }

    #[test]
    fn test_cover_candidates_invalid_size() {
        let urls = cover_candidates("https://img", "x", 500);
        assert_eq!(urls.len(), COVER_SIZES.len());
        assert_eq!(urls[0], "https://img/x/1280x1280.jpg");
    }

    fn playlist(uuid: &str, creator: Option<&str>) -> Playlist {
        serde_json::from_value(serde_json::json!({
            "uuid": uuid,
            "title": uuid,
            "creator": { "id": creator },
        }))
        .unwrap()
    }

    #[test]
    fn test_loosely_matches_either_direction() {
        assert!(loosely_matches("Kind of Blue (Legacy Edition)", "kind of blue"));
        assert!(loosely_matches("  Miles Davis ", "Miles Davis Quintet"));
        assert!(!loosely_matches("Blue in Green", "So What"));
    }

    #[test]
    fn test_user_playlists_own_first_without_duplicates() {
        let own = vec![playlist("a", Some("42")), playlist("b", Some("42"))];
        let favorites = vec![
            playlist("b", Some("7")),
            playlist("c", Some("42")),
            playlist("d", Some("7")),
            playlist("e", None),
        ];

        let merged = merge_user_playlists("42", own, favorites);
        let ids: Vec<(&str, bool)> = merged
            .iter()
            .map(|p| (p.playlist.uuid.as_str(), p.is_own))
            .collect();
        assert_eq!(ids, vec![("a", true), ("b", true), ("d", false), ("e", false)]);
    }

    #[test]
    fn test_decode_manifest_prefers_flac() {
        let manifest = bts(
            r#"{"mimeType":"audio/flac","urls":["https://cdn/a.mp4","https://cdn/b.flac?token=1"]}"#,
        );
        let (url, mime) = decode_manifest(BTS_MANIFEST, &manifest).unwrap();
        assert_eq!(url, "https://cdn/b.flac?token=1");
        assert_eq!(mime.as_deref(), Some("audio/flac"));
    }

    #[test]
    fn test_decode_manifest_first_url_fallback() {
        let manifest = bts(r#"{"urls":["https://cdn/a.mp4","https://cdn/b.mp4"]}"#);
        let (url, _) = decode_manifest(BTS_MANIFEST, &manifest).unwrap();
        assert_eq!(url, "https://cdn/a.mp4");
    }

    #[test]
    fn test_decode_manifest_rejects_dash_and_empty() {
        assert!(decode_manifest("application/dash+xml", "PE1QRD4=").is_err());
        assert!(decode_manifest(BTS_MANIFEST, &bts(r#"{"urls":[]}"#)).is_err());
        assert!(decode_manifest(BTS_MANIFEST, "%%%").is_err());
    }
}
