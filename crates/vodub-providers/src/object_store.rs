//! Content-addressed object store adapter (TOS-compatible S3-style API).
//!
//! Object keys derive from the file's content hash, so uploads are
//! idempotent: a `HEAD` pre-check skips the PUT when the object already
//! exists and only the presigned GET URL is returned. `HEAD` 404 means
//! absent; any other non-success status is a hard error.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::info;

use vodub_core::fingerprint::hash_file;
use vodub_core::ports::{ObjectStore, PortError};

type HmacSha256 = Hmac<Sha256>;

/// Credentials and addressing, loaded from the environment.
#[derive(Debug, Clone)]
pub struct TosConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    /// Host without scheme, e.g. `tos-cn-beijing.volces.com`.
    pub endpoint: String,
}

impl TosConfig {
    pub fn from_env() -> Result<Self, PortError> {
        let access_key_id = std::env::var("TOS_ACCESS_KEY_ID")
            .map_err(|_| PortError::Credentials("TOS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = std::env::var("TOS_SECRET_ACCESS_KEY")
            .map_err(|_| PortError::Credentials("TOS_SECRET_ACCESS_KEY is not set".to_string()))?;
        let region = std::env::var("TOS_REGION").unwrap_or_else(|_| "cn-beijing".to_string());
        let bucket = std::env::var("TOS_BUCKET").unwrap_or_else(|_| "vodub-media".to_string());
        let endpoint = std::env::var("TOS_ENDPOINT")
            .unwrap_or_else(|_| format!("tos-{region}.volces.com"))
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        Ok(Self {
            access_key_id,
            secret_access_key,
            region,
            bucket,
            endpoint,
        })
    }
}

/// `{prefix or parent-dir}/{stem}-{sha256[:8]}{suffix}`
pub fn build_object_key(local_path: &Path, content_hash: &str, prefix: Option<&str>) -> String {
    let parent = prefix
        .map(str::to_string)
        .or_else(|| {
            local_path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(str::to_string)
        })
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "files".to_string());
    let stem = local_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let suffix = local_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let short_hash: String = content_hash.chars().take(8).collect();
    format!("{parent}/{stem}-{short_hash}{suffix}")
}

pub struct TosObjectStore {
    config: TosConfig,
    client: reqwest::Client,
}

impl TosObjectStore {
    pub fn new(config: TosConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, PortError> {
        Ok(Self::new(TosConfig::from_env()?))
    }

    fn host(&self) -> String {
        format!("{}.{}", self.config.bucket, self.config.endpoint)
    }

    fn object_url(&self, key: &str) -> String {
        format!("https://{}/{key}", self.host())
    }

    fn hmac(key: &[u8], data: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(data.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// V4-style presigned GET: the signature goes into the query string so
    /// the URL is directly fetchable by the ASR provider.
    fn presigned_get(&self, key: &str, expires_seconds: u64) -> String {
        let now = Utc::now();
        let date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let day = now.format("%Y%m%d").to_string();
        let scope = format!("{day}/{}/tos/request", self.config.region);
        let credential = format!("{}/{scope}", self.config.access_key_id);

        let query = format!(
            "X-Tos-Algorithm=TOS4-HMAC-SHA256&X-Tos-Credential={}&X-Tos-Date={date}&X-Tos-Expires={expires_seconds}&X-Tos-SignedHeaders=host",
            urlencoding::encode(&credential)
        );

        let canonical_request = format!(
            "GET\n/{key}\n{query}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.host()
        );
        let hashed_request = Self::hex(&Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!("TOS4-HMAC-SHA256\n{date}\n{scope}\n{hashed_request}");

        let k_date = Self::hmac(self.config.secret_access_key.as_bytes(), &day);
        let k_region = Self::hmac(&k_date, &self.config.region);
        let k_service = Self::hmac(&k_region, "tos");
        let k_signing = Self::hmac(&k_service, "request");
        let signature = Self::hex(&Self::hmac(&k_signing, &string_to_sign));

        format!(
            "{}?{query}&X-Tos-Signature={signature}",
            self.object_url(key)
        )
    }

    /// `HEAD` the object. 404 is "absent"; anything else non-success is a
    /// hard error so auth/permission problems never masquerade as cache
    /// misses.
    async fn exists(&self, key: &str) -> Result<bool, PortError> {
        let url = self.presigned_head_url(key);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("object-store HEAD failed: {e}")))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(PortError::Permanent(format!(
                "object-store HEAD {key} returned {status}"
            ))),
        }
    }

    fn presigned_head_url(&self, key: &str) -> String {
        // Reuse the GET signature; the service accepts HEAD on the same
        // presigned resource.
        self.presigned_get(key, 300)
    }

    async fn put(&self, key: &str, path: &Path) -> Result<(), PortError> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(PortError::Permanent(format!(
                "refusing to upload empty file: {}",
                path.display()
            )));
        }
        let url = self.presigned_put_url(key);
        let response = self
            .client
            .put(&url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("object-store PUT failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PortError::Permanent(format!(
                "object-store PUT {key} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn presigned_put_url(&self, key: &str) -> String {
        // Same signing flow with the PUT verb in the canonical request.
        let now = Utc::now();
        let date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let day = now.format("%Y%m%d").to_string();
        let scope = format!("{day}/{}/tos/request", self.config.region);
        let credential = format!("{}/{scope}", self.config.access_key_id);
        let query = format!(
            "X-Tos-Algorithm=TOS4-HMAC-SHA256&X-Tos-Credential={}&X-Tos-Date={date}&X-Tos-Expires=600&X-Tos-SignedHeaders=host",
            urlencoding::encode(&credential)
        );
        let canonical_request = format!(
            "PUT\n/{key}\n{query}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.host()
        );
        let hashed_request = Self::hex(&Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!("TOS4-HMAC-SHA256\n{date}\n{scope}\n{hashed_request}");
        let k_date = Self::hmac(self.config.secret_access_key.as_bytes(), &day);
        let k_region = Self::hmac(&k_date, &self.config.region);
        let k_service = Self::hmac(&k_region, "tos");
        let k_signing = Self::hmac(&k_service, "request");
        let signature = Self::hex(&Self::hmac(&k_signing, &string_to_sign));
        format!(
            "{}?{query}&X-Tos-Signature={signature}",
            self.object_url(key)
        )
    }
}

#[async_trait]
impl ObjectStore for TosObjectStore {
    async fn upload(
        &self,
        path: &Path,
        prefix: Option<&str>,
        overwrite: bool,
        expires_seconds: u64,
    ) -> Result<String, PortError> {
        if !path.exists() {
            return Err(PortError::Permanent(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let content_hash = hash_file(path)?
            .trim_start_matches("sha256:")
            .to_string();
        let key = build_object_key(path, &content_hash, prefix);

        if !overwrite && self.exists(&key).await? {
            info!(key, "object already present, skipping upload");
            return Ok(self.presigned_get(&key, expires_seconds));
        }

        info!(key, file = %path.display(), "uploading to object store");
        self.put(&key, path).await?;
        Ok(self.presigned_get(&key, expires_seconds))
    }
}
