//! Cache de réponses en mémoire pour les appels au catalogue Tidal
//!
//! Chaque entrée est indexée par l'empreinte `opération + paramètres` et
//! stocke la réponse sérialisée puis compressée (gzip). L'expiration est
//! calculée à partir d'une [`Clock`] ; une tâche de fond purge
//! périodiquement les entrées expirées, sans attendre qu'elles soient relues.
//!
//! Deux accès simultanés manqués sur une même clé peuvent tous deux calculer
//! la valeur : la dernière écriture l'emporte.

use crate::clock::Clock;
use crate::error::{Result, TidalError};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use moka::future::Cache as MokaCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Durée de vie des informations de piste
pub const TRACK_TTL: Duration = Duration::from_secs(3600);
/// Durée de vie des résultats de recherche
pub const SEARCH_TTL: Duration = Duration::from_secs(1800);
/// Intervalle par défaut de la purge
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Entrée du cache : jamais modifiée, seulement remplacée
#[derive(Debug)]
pub struct CacheEntry {
    payload: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Taille compressée de la réponse
    pub fn compressed_len(&self) -> usize {
        self.payload.len()
    }
}

/// Statistiques du cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    /// Nombre d'entrées présentes (expirées non purgées comprises)
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Cache de réponses partagé entre toutes les requêtes
pub struct ResponseCache {
    entries: MokaCache<String, Arc<CacheEntry>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Cache sans borne de taille : seules l'expiration et la purge retirent
    /// une entrée
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: MokaCache::builder().build(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Retourne la réponse en cache ou la calcule
    ///
    /// Une entrée n'est servie que si `now < expires_at`. Une erreur de
    /// `compute` n'est jamais mise en cache et remonte telle quelle.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        op: &str,
        params: &Value,
        ttl: Duration,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = cache_key(op, params);
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(&key).await {
            if now < entry.expires_at {
                match decode::<T>(&entry.payload) {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        trace!(key = %key, "Response cache hit");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(key = %key, "Corrupt cache entry, recomputing: {}", e);
                        self.entries.invalidate(&key).await;
                    }
                }
            } else {
                trace!(key = %key, "Response cache entry expired");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Response cache miss");

        let value = compute().await?;

        match encode(&value) {
            Ok(payload) => {
                let entry = CacheEntry {
                    payload,
                    expires_at: expiry(self.clock.now(), ttl),
                };
                self.entries.insert(key, Arc::new(entry)).await;
            }
            Err(e) => warn!(key = %key, "Failed to encode response for caching: {}", e),
        }

        Ok(value)
    }

    /// Supprime toutes les entrées dont `expires_at` est dépassé
    ///
    /// Retourne le nombre d'entrées supprimées.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key.as_str()).await;
        }
        self.entries.run_pending_tasks().await;

        if !expired.is_empty() {
            debug!("Response cache sweep removed {} entries", expired.len());
        }
        expired.len()
    }

    /// Lance la purge périodique en tâche de fond
    ///
    /// Le premier passage a lieu après `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        CacheStats {
            entries: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Empreinte déterministe d'un appel : `op:{paramètres triés}`
///
/// L'ordre d'insertion des paramètres n'a pas d'influence sur la clé.
pub fn cache_key(op: &str, params: &Value) -> String {
    format!("{}:{}", op, canonical_json(params))
}

/// Sérialisation JSON avec les clés d'objets triées récursivement
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    let mut json = Vec::new();
    GzDecoder::new(payload)
        .read_to_end(&mut json)
        .map_err(|e| TidalError::Cache(format!("gzip: {}", e)))?;
    Ok(serde_json::from_slice(&json)?)
}
