//! Cookie storage.
//!
//! Keeps a jar file with one cookie per line in wire form:
//!
//! ```text
//! name=<percent-encoded JSON>; expires=<RFC 1123 UTC date>; path=/
//! ```
//!
//! Every write stamps a fresh expiration. Expired cookies are invisible to
//! readers and dropped on the next write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use clipdo_core::{codec, BackendKind, PreservedKeys, StorageConfig, StoredValue, Time};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use super::{Backend, Result, StorageError};

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Default expiration window.
pub const DEFAULT_TTL_DAYS: i64 = 3;

/// Longest accepted expiration window, matching what browsers honor.
pub const MAX_TTL_DAYS: i64 = 400;

/// Default ceiling for one `name=value` pair.
pub const DEFAULT_MAX_BYTES: usize = 4096;

#[derive(Debug, Clone)]
struct Cookie {
    name: String,
    value: String,
    expires: Time,
}

impl Cookie {
    fn is_expired(&self, now: Time) -> bool {
        self.expires <= now
    }

    fn to_line(&self) -> String {
        format!(
            "{}={}; expires={}; path=/",
            codec::encode_component(&self.name),
            codec::encode_component(&self.value),
            self.expires.format(EXPIRES_FORMAT),
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        let mut expires = None;
        for attr in parts {
            if let Some((k, v)) = attr.split_once('=') {
                if k.eq_ignore_ascii_case("expires") {
                    expires = chrono::DateTime::parse_from_rfc2822(v)
                        .ok()
                        .map(|d| d.with_timezone(&Utc));
                }
            }
        }
        Some(Self {
            name: codec::decode_component(name),
            value: codec::decode_component(value),
            expires: expires?,
        })
    }
}

/// Cookie jar storage with a per-cookie size ceiling.
pub struct CookieBackend {
    path: PathBuf,
    ttl: Duration,
    max_bytes: usize,
    write_lock: Mutex<()>,
}

impl CookieBackend {
    /// Create storage backed by the jar file at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            ttl: Duration::days(DEFAULT_TTL_DAYS),
            max_bytes: DEFAULT_MAX_BYTES,
            write_lock: Mutex::new(()),
        })
    }

    /// Create storage from the cookie section of `config`.
    ///
    /// `ttl_days` must lie within `0..=MAX_TTL_DAYS`.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let ttl_days = config.cookie.ttl_days;
        let ttl = Duration::try_days(ttl_days)
            .filter(|_| (0..=MAX_TTL_DAYS).contains(&ttl_days))
            .ok_or_else(|| {
                StorageError::InvalidBackend(format!(
                    "cookie.ttl_days must be between 0 and {}, got {}",
                    MAX_TTL_DAYS, ttl_days
                ))
            })?;
        Ok(Self::new(config.cookie_path())
            .await?
            .with_ttl(ttl)
            .with_max_bytes(config.cookie.max_bytes))
    }

    /// Set the expiration window applied to writes.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the per-cookie size ceiling.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn load(&self) -> Result<Vec<Cookie>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut cookies = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match Cookie::parse(line) {
                Some(cookie) => cookies.push(cookie),
                None => warn!("Skipping malformed cookie line in {}", self.path.display()),
            }
        }
        Ok(cookies)
    }

    async fn live(&self) -> Result<Vec<Cookie>> {
        let now = Utc::now();
        Ok(self.load().await?.into_iter().filter(|c| !c.is_expired(now)).collect())
    }

    async fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let mut text = String::new();
        for cookie in cookies {
            text.push_str(&cookie.to_line());
            text.push('\n');
        }
        fs::write(&self.path, text.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let cookies = self.live().await?;
        Ok(cookies
            .iter()
            .find(|c| c.name == key)
            .and_then(|c| codec::decode(&c.value)))
    }

    async fn set(&self, key: &str, value: &StoredValue) -> Result<()> {
        let raw = codec::encode(value);
        let size = codec::encode_component(key).len() + 1 + codec::encode_component(&raw).len();
        if size > self.max_bytes {
            return Err(StorageError::CookieTooLarge {
                key: key.to_string(),
                size,
                limit: self.max_bytes,
            });
        }

        let expires = Utc::now().checked_add_signed(self.ttl).ok_or_else(|| {
            StorageError::InvalidBackend(format!("cookie expiration window {} overflows", self.ttl))
        })?;

        let _guard = self.write_lock.lock().await;
        let mut cookies = self.live().await?;
        let cookie = Cookie {
            name: key.to_string(),
            value: raw,
            expires,
        };
        match cookies.iter_mut().find(|c| c.name == key) {
            Some(existing) => *existing = cookie,
            None => cookies.push(cookie),
        }
        debug!("cookie set {} ({} bytes)", key, size);
        self.save(&cookies).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut cookies = self.live().await?;
        let before = cookies.len();
        cookies.retain(|c| c.name != key);
        if cookies.len() != before {
            debug!("cookie remove {}", key);
            self.save(&cookies).await?;
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .live()
            .await?
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect())
    }

    async fn clear(&self, except: &PreservedKeys) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut cookies = self.live().await?;
        cookies.retain(|c| except.contains(&c.name));
        self.save(&cookies).await
    }
}
