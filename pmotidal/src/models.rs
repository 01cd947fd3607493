//! Structures de données pour la session Tidal et les objets du catalogue
//!
//! Le catalogue n'est modélisé que dans la mesure où l'API REST en a besoin :
//! les champs inconnus sont ignorés à la désérialisation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Désérialiseur flexible pour les IDs qui peuvent être des strings ou des integers
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::custom("ID must be a string or number")),
    }
}

// ============ Session ============

/// Credentials OAuth d'une session Tidal
///
/// C'est aussi le format du fichier de session persistant :
/// `access_token`, `refresh_token`, `token_type` sont obligatoires,
/// `last_updated` est un horodatage ISO-8601.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
            last_updated: None,
        }
    }

    /// Vrai si aucun des trois tokens n'est vide
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Liste les champs obligatoires vides
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_token.trim().is_empty() {
            missing.push("access_token");
        }
        if self.refresh_token.trim().is_empty() {
            missing.push("refresh_token");
        }
        if self.token_type.trim().is_empty() {
            missing.push("token_type");
        }
        missing
    }

    /// Valeur de l'en-tête `Authorization`
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

// Les tokens ne doivent jamais apparaître dans les logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("last_updated", &self.last_updated)
            .finish()
    }
}

/// Lien de login émis par le fournisseur d'identité (device authorization)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLink {
    /// URI complète à ouvrir dans un navigateur (code inclus)
    pub verification_uri: String,
    /// Code court à saisir par l'utilisateur
    pub user_code: String,
    /// Code opaque utilisé pour interroger le fournisseur
    pub device_code: String,
    /// Durée de vie annoncée par le fournisseur (secondes)
    pub expires_in: u64,
    /// Intervalle de polling recommandé (secondes)
    pub interval: u64,
}

/// Login en attente de confirmation par l'utilisateur
///
/// Persisté dans le cache de login. `expires_at - created_at` est fixé à la
/// création et n'est jamais prolongé.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub verification_uri: String,
    #[serde(default)]
    pub verification_code: Option<String>,
    #[serde(default)]
    pub device_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingLogin {
    pub fn from_link(link: &DeviceLink, created_at: DateTime<Utc>, lifetime_secs: i64) -> Self {
        Self {
            verification_uri: link.verification_uri.clone(),
            verification_code: Some(link.user_code.clone()),
            device_code: Some(link.device_code.clone()),
            created_at,
            expires_at: created_at + chrono::Duration::seconds(lifetime_secs),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Secondes restantes avant expiration (jamais négatif)
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Vrai dès que le login a dépassé `lifetime_secs`, à la nanoseconde près
    pub fn outlived(&self, now: DateTime<Utc>, lifetime_secs: i64) -> bool {
        now - self.created_at > chrono::Duration::seconds(lifetime_secs)
    }

    /// Vrai si la valeur soumise désigne ce login (URI ou code court)
    pub fn matches(&self, uri_or_code: &str) -> bool {
        let submitted = uri_or_code.trim();
        let strip = |s: &str| {
            s.trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string()
        };
        if strip(&self.verification_uri) == strip(submitted) {
            return true;
        }
        match &self.verification_code {
            Some(code) => {
                submitted.eq_ignore_ascii_case(code)
                    || submitted
                        .rsplit('/')
                        .next()
                        .is_some_and(|tail| tail.eq_ignore_ascii_case(code))
            }
            None => false,
        }
    }
}

/// Réponse de `get_link`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkResult {
    /// Une session valide existe déjà, aucun lien n'est émis
    Success { message: String },
    /// Un lien est en attente de confirmation
    Pending {
        verification_uri: String,
        verification_code: Option<String>,
        expires_in: i64,
        from_cache: bool,
    },
}

impl LinkResult {
    pub fn already_authenticated() -> Self {
        Self::Success {
            message: "Already authenticated".to_string(),
        }
    }

    pub fn verification_uri(&self) -> Option<&str> {
        match self {
            LinkResult::Pending {
                verification_uri, ..
            } => Some(verification_uri),
            LinkResult::Success { .. } => None,
        }
    }

    pub fn verification_code(&self) -> Option<&str> {
        match self {
            LinkResult::Pending {
                verification_code, ..
            } => verification_code.as_deref(),
            LinkResult::Success { .. } => None,
        }
    }

    pub fn expires_in(&self) -> Option<i64> {
        match self {
            LinkResult::Pending { expires_in, .. } => Some(*expires_in),
            LinkResult::Success { .. } => None,
        }
    }
}

/// Résultat d'une tentative de confirmation auprès du fournisseur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// L'utilisateur a confirmé, le fournisseur a émis des credentials
    Confirmed(Credentials),
    /// Pas encore confirmé (état d'attente récupérable)
    Waiting,
    /// Code expiré ou fenêtre de confirmation écoulée (terminal)
    Expired,
    /// Erreur passagère (réseau, 5xx) : réessayable
    Failed(String),
}

// ============ Catalogue ============

/// Représente un artiste Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artist {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
}

impl Artist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Référence d'album embarquée dans une piste
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlbumRef {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    /// Identifiant d'image de couverture (UUID)
    #[serde(default)]
    pub cover: Option<String>,
}

/// Représente une piste (track) Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    /// Durée en secondes
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub volume_number: Option<u32>,
    #[serde(default)]
    pub artist: Option<Artist>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub audio_quality: Option<String>,
    #[serde(default)]
    pub explicit: bool,
}

impl Track {
    pub fn artist_name(&self) -> Option<&str> {
        self.artist.as_ref().map(|a| a.name.as_str())
    }

    pub fn album_title(&self) -> Option<&str> {
        self.album.as_ref().map(|a| a.title.as_str())
    }

    /// URL publique de la piste
    pub fn web_url(&self) -> String {
        format!("https://tidal.com/track/{}", self.id)
    }
}

/// Représente un album Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<Artist>,
    #[serde(default)]
    pub number_of_tracks: Option<u32>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
}

/// Créateur d'une playlist
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistCreator {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Représente une playlist Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub uuid: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator: Option<PlaylistCreator>,
    #[serde(default)]
    pub number_of_tracks: Option<u32>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub created: Option<String>,
    /// Identifiant d'image carrée (UUID)
    #[serde(default)]
    pub square_image: Option<String>,
}

/// Playlist de la bibliothèque de l'utilisateur
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserPlaylist {
    #[serde(flatten)]
    pub playlist: Playlist,
    /// Créée par l'utilisateur (sinon simplement suivie)
    pub is_own: bool,
}

/// Informations de la session ouverte (`GET /sessions`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub country_code: Option<String>,
}

/// Image d'un mix, dans une des tailles SMALL, MEDIUM ou LARGE
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
}

/// Mix personnalisé généré par Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mix {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sub_title: Option<String>,
    #[serde(default)]
    pub mix_type: Option<String>,
    #[serde(default)]
    pub images: BTreeMap<String, MixImage>,
}

impl Mix {
    /// URL de la plus grande image disponible
    pub fn cover_url(&self) -> Option<&str> {
        ["LARGE", "MEDIUM", "SMALL"]
            .iter()
            .find_map(|size| self.images.get(*size))
            .map(|image| image.url.as_str())
    }
}

/// Résumé d'un mix tel qu'exposé par l'API REST
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MixSummary {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub cover_url: Option<String>,
}

impl From<&Mix> for MixSummary {
    fn from(mix: &Mix) -> Self {
        Self {
            id: mix.id.clone(),
            title: mix.title.clone(),
            subtitle: mix.sub_title.clone(),
            cover_url: mix.cover_url().map(str::to_string),
        }
    }
}

/// Mix avec ses pistes
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MixInfo {
    #[serde(flatten)]
    pub summary: MixSummary,
    pub number_of_tracks: usize,
    pub tracks: Vec<Track>,
}

/// Tout ce qu'il faut pour récupérer une piste hors ligne
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackDownloadInfo {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: u32,
    pub stream_url: String,
    pub quality: AudioQuality,
    pub cover_url: Option<String>,
    pub lyrics: Option<String>,
}

/// Piste d'une playlist avec son URL de streaming
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaylistTrackDownload {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: u32,
    pub stream_url: String,
}

/// Pistes d'une playlist dont l'URL de streaming a pu être résolue
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaylistDownloadInfo {
    pub playlist_name: String,
    pub total_tracks: usize,
    pub tracks: Vec<PlaylistTrackDownload>,
}

/// Paroles d'une piste
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lyrics {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub track_id: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default)]
    pub subtitles: Option<String>,
    #[serde(default)]
    pub lyrics_provider: Option<String>,
    #[serde(default)]
    pub is_right_to_left: bool,
}

/// Qualités audio essayées, de la meilleure à la moins bonne
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioQuality {
    HiResLossless,
    Lossless,
    High,
    Low,
}

impl AudioQuality {
    pub const CASCADE: [AudioQuality; 4] = [
        AudioQuality::HiResLossless,
        AudioQuality::Lossless,
        AudioQuality::High,
        AudioQuality::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioQuality::HiResLossless => "HI_RES_LOSSLESS",
            AudioQuality::Lossless => "LOSSLESS",
            AudioQuality::High => "HIGH",
            AudioQuality::Low => "LOW",
        }
    }
}

/// URL de streaming résolue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamInfo {
    pub track_id: String,
    pub url: String,
    pub quality: AudioQuality,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_credentials_missing_fields() {
        let creds = Credentials::new("a", "", " ");
        assert_eq!(creds.missing_fields(), vec!["refresh_token", "token_type"]);
        assert!(!creds.is_complete());
        assert!(Credentials::new("a", "r", "Bearer").is_complete());
    }

    #[test]
    fn test_credentials_debug_redacts_tokens() {
        let creds = Credentials::new("secret-access", "secret-refresh", "Bearer");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret-access"));
        assert!(!printed.contains("secret-refresh"));
        assert!(printed.contains("Bearer"));
    }

    #[test]
    fn test_pending_login_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let link = DeviceLink {
            verification_uri: "link.tidal.com/ABC-123".into(),
            user_code: "ABC-123".into(),
            device_code: "dev".into(),
            expires_in: 600,
            interval: 2,
        };
        let pending = PendingLogin::from_link(&link, t0, 300);

        assert_eq!(pending.remaining_secs(t0), 300);
        assert!(!pending.is_expired(t0 + chrono::Duration::seconds(299)));
        assert!(pending.is_expired(t0 + chrono::Duration::seconds(300)));
        assert_eq!(pending.remaining_secs(t0 + chrono::Duration::seconds(400)), 0);

        assert!(!pending.outlived(t0 + chrono::Duration::seconds(300), 300));
        assert!(pending.outlived(t0 + chrono::Duration::milliseconds(300_001), 300));
    }

    #[test]
    fn test_pending_login_matches_uri_or_code() {
        let now = Utc::now();
        let pending = PendingLogin {
            verification_uri: "https://link.tidal.com/ABC-123".into(),
            verification_code: Some("ABC-123".into()),
            device_code: None,
            created_at: now,
            expires_at: now,
        };
        assert!(pending.matches("link.tidal.com/ABC-123"));
        assert!(pending.matches("abc-123"));
        assert!(!pending.matches("link.tidal.com/XYZ-999"));
    }

    #[test]
    fn test_link_result_serialization() {
        let pending = LinkResult::Pending {
            verification_uri: "link.tidal.com/ABC-123".into(),
            verification_code: Some("ABC-123".into()),
            expires_in: 300,
            from_cache: false,
        };
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["verification_code"], "ABC-123");
        assert_eq!(json["expires_in"], 300);

        let done = serde_json::to_value(LinkResult::already_authenticated()).unwrap();
        assert_eq!(done["status"], "success");
    }

    #[test]
    fn test_mix_cover_prefers_largest_image() {
        let json = r#"{
            "id": "0123abc",
            "title": "My Mix 1",
            "subTitle": "Miles Davis, John Coltrane",
            "images": {
                "SMALL": {"width": 320, "url": "https://img/s.jpg"},
                "MEDIUM": {"width": 640, "url": "https://img/m.jpg"}
            }
        }"#;
        let mix: Mix = serde_json::from_str(json).unwrap();
        let summary = MixSummary::from(&mix);
        assert_eq!(summary.cover_url.as_deref(), Some("https://img/m.jpg"));
        assert_eq!(summary.subtitle.as_deref(), Some("Miles Davis, John Coltrane"));
    }

    #[test]
    fn test_track_deserialization() {
        let json = r#"{
            "id": 12345,
            "title": "So What",
            "duration": 545,
            "trackNumber": 1,
            "artist": {"id": 7, "name": "Miles Davis"},
            "album": {"id": 99, "title": "Kind of Blue", "cover": "aaaa-bbbb"},
            "audioQuality": "LOSSLESS"
        }"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, "12345");
        assert_eq!(track.artist_name(), Some("Miles Davis"));
        assert_eq!(track.album_title(), Some("Kind of Blue"));
        assert_eq!(track.web_url(), "https://tidal.com/track/12345");
    }
}
