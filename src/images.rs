//! Best-effort photo download. A failed image never fails the listing.

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub struct ImageFetcher {
    client: reqwest::Client,
    root: PathBuf,
}

/// Where a listing's photos went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImages {
    pub dir: PathBuf,
    pub saved: usize,
}

impl ImageFetcher {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build image HTTP client")?;
        Ok(Self {
            client,
            root: root.into(),
        })
    }

    /// Download every URL into `<root>/<listing_ref>/NNN.<ext>`, numbered from 1
    /// in listing order.
    pub async fn fetch_all(&self, listing_ref: &str, urls: &[String]) -> Result<SavedImages> {
        let dir = self.root.join(listing_ref);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut saved = 0;
        for (i, url) in urls.iter().enumerate() {
            if url.is_empty() || url.starts_with("data:") {
                continue;
            }
            match self.fetch_one(url, &dir, i + 1).await {
                Ok(path) => {
                    debug!(listing_ref, path = %path.display(), "Image saved");
                    saved += 1;
                }
                Err(e) => debug!(listing_ref, url = %url, error = %e, "Image failed"),
            }
        }
        info!(listing_ref, saved, total = urls.len(), dir = %dir.display(), "Images saved");
        Ok(SavedImages { dir, saved })
    }

    async fn fetch_one(&self, url: &str, dir: &Path, index: usize) -> Result<PathBuf> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let ext = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for)
            .unwrap_or_else(|| "jpg".to_string());
        let bytes = response.bytes().await?;
        let path = dir.join(format!("{index:03}.{ext}"));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// File extension from a content type: "image/jpeg; q=1" → "jpg"
fn extension_for(content_type: &str) -> String {
    let subtype = content_type
        .split(';')
        .next()
        .and_then(|mime| mime.rsplit('/').next())
        .map(str::trim)
        .unwrap_or("");
    match subtype {
        "" => "jpg".to_string(),
        "jpeg" => "jpg".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extensions_from_content_type() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/webp; charset=binary"), "webp");
        assert_eq!(extension_for(""), "jpg");
    }

    #[tokio::test]
    async fn partial_failure_keeps_the_rest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0xFF, 0xD8, 0xFF], "image/jpeg"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/3.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50], "image/png"))
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let fetcher = ImageFetcher::new(root.path(), Duration::from_secs(2), "test").unwrap();
        let urls = vec![
            format!("{}/1.jpg", server.uri()),
            format!("{}/2.jpg", server.uri()),
            "data:image/gif;base64,AAAA".to_string(),
            format!("{}/3.png", server.uri()),
        ];

        let saved = fetcher.fetch_all("8983182", &urls).await.unwrap();

        assert_eq!(saved.saved, 2);
        assert_eq!(saved.dir, root.path().join("8983182"));
        assert_eq!(std::fs::read(saved.dir.join("001.jpg")).unwrap(), vec![0xFF, 0xD8, 0xFF]);
        assert!(!saved.dir.join("002.jpg").exists());
        assert!(saved.dir.join("004.png").exists());
    }
}
