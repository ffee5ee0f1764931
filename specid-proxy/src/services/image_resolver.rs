//! Image locator resolution
//!
//! A locator is either a URL (anything starting with `http`) or a path
//! relative to the interim folder. Remote images are probed with `HEAD` to
//! learn their content type, then downloaded into the interim folder.
//! Downloads are removed again by [`ImageResolver::release`] unless the
//! resolver is told to keep them.

use specid_common::{Error, Result};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Some image hosts reject requests without a browser-like agent
const PROBE_USER_AGENT: &str = "Mozilla";

const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Image read into memory, ready to be forwarded
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    /// Local file holding the image
    pub path: PathBuf,
    /// Sniffed media type, `application/octet-stream` when unknown
    pub media_type: String,
    pub bytes: Vec<u8>,
    /// Fetched from a URL into the interim folder by this request
    pub downloaded: bool,
}

impl ResolvedImage {
    /// File name component used for multipart parts
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    }
}

/// Resolves locators against the interim folder
pub struct ImageResolver {
    interim_folder: PathBuf,
    probe_client: reqwest::Client,
    download_client: reqwest::Client,
    max_download_bytes: u64,
    keep_downloads: bool,
}

impl ImageResolver {
    pub fn new(
        interim_folder: impl Into<PathBuf>,
        download_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self> {
        let probe_client = reqwest::Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .timeout(probe_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        let download_client = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            interim_folder: interim_folder.into(),
            probe_client,
            download_client,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            keep_downloads: false,
        })
    }

    pub fn with_max_download_bytes(mut self, max_bytes: u64) -> Self {
        self.max_download_bytes = max_bytes;
        self
    }

    pub fn keep_downloads(mut self, keep: bool) -> Self {
        self.keep_downloads = keep;
        self
    }

    /// Resolve every locator, in order
    ///
    /// On failure, images already downloaded for this call are released.
    pub async fn resolve_all(&self, locators: &[String]) -> Result<Vec<ResolvedImage>> {
        let mut images = Vec::with_capacity(locators.len());
        for locator in locators {
            match self.resolve(locator).await {
                Ok(image) => images.push(image),
                Err(e) => {
                    self.release(&images).await;
                    return Err(e);
                }
            }
        }
        Ok(images)
    }

    pub async fn resolve(&self, locator: &str) -> Result<ResolvedImage> {
        if is_remote(locator) {
            let path = self.download(locator).await?;
            let loaded = load(path.clone(), true).await;
            if loaded.is_err() {
                self.remove_download(&path).await;
            }
            loaded
        } else {
            load(self.local_path(locator)?, false).await
        }
    }

    /// Remove downloaded images once their bytes have been forwarded
    ///
    /// Local references are never touched.
    pub async fn release(&self, images: &[ResolvedImage]) {
        if self.keep_downloads {
            return;
        }
        for image in images.iter().filter(|image| image.downloaded) {
            self.remove_download(&image.path).await;
        }
    }

    async fn remove_download(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Downloaded image removed"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove downloaded image"),
        }
    }

    /// Join a local reference onto the interim folder
    ///
    /// References may not climb out of the folder.
    pub fn local_path(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator.trim().trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::InvalidInput(format!(
                "Image reference {} is outside the interim folder",
                locator
            )));
        }
        Ok(self.interim_folder.join(relative))
    }

    async fn download(&self, url: &str) -> Result<PathBuf> {
        let probe = self
            .probe_client
            .head(url)
            .send()
            .await
            .map_err(|e| Error::UnsupportedMediaType(format!("Content type probe for {} failed: {}", url, e)))?;
        let content_type = probe
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let extension = extension_for(&content_type)
            .ok_or_else(|| Error::UnsupportedMediaType(format!("Unhandled content type: {}", content_type)))?;

        tokio::fs::create_dir_all(&self.interim_folder).await?;
        let target = self
            .interim_folder
            .join(format!("specid_{}.{}", Uuid::new_v4().simple(), extension));

        debug!(url = %url, content_type = %content_type, "Downloading remote image");

        let download_failed =
            |e: reqwest::Error| Error::InvalidInput(format!("Image download from {} failed: {}", url, e));
        let mut response = self
            .download_client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_failed)?;
        if response.content_length().is_some_and(|len| len > self.max_download_bytes) {
            return Err(self.too_large(url));
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(download_failed)? {
            if (bytes.len() + chunk.len()) as u64 > self.max_download_bytes {
                return Err(self.too_large(url));
            }
            bytes.extend_from_slice(&chunk);
        }
        tokio::fs::write(&target, &bytes).await?;

        info!(url = %url, path = %target.display(), bytes = bytes.len(), "Remote image stored");
        Ok(target)
    }

    fn too_large(&self, url: &str) -> Error {
        Error::InvalidInput(format!(
            "Image at {} exceeds the {} byte download limit",
            url, self.max_download_bytes
        ))
    }
}

fn is_remote(locator: &str) -> bool {
    locator.trim_start().starts_with("http")
}

/// File extension for an accepted image content type
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        _ => None,
    }
}

async fn load(path: PathBuf, downloaded: bool) -> Result<ResolvedImage> {
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        Error::InvalidInput(format!("The image {} could not be opened: {}", path.display(), e))
    })?;
    let media_type = infer::get(&bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(ResolvedImage {
        path,
        media_type,
        bytes,
        downloaded,
    })
}
