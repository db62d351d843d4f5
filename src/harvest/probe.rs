use crate::scrapers::characteristics::visible_text;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

/// Cheap re-check of a known listing's title, without rendering.
#[async_trait]
pub trait TitleProbe: Send + Sync {
    /// Current title, or `None` when it could not be read
    async fn current_title(&self, url: &str) -> Option<String>;
}

/// Plain HTTP GET of the detail page, reading the first `<h1>` with the same
/// text normalisation the extractor stores.
pub struct HttpTitleProbe {
    client: Client,
    heading: Selector,
}

impl HttpTitleProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;
        let heading = Selector::parse("h1").map_err(|e| anyhow::anyhow!("Invalid selector: {e:?}"))?;
        Ok(Self { client, heading })
    }

    async fn fetch_title(&self, url: &str) -> Result<Option<String>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let document = Html::parse_document(&body);
        Ok(document
            .select(&self.heading)
            .next()
            .map(visible_text)
            .filter(|title| !title.is_empty()))
    }
}

#[async_trait]
impl TitleProbe for HttpTitleProbe {
    async fn current_title(&self, url: &str) -> Option<String> {
        match self.fetch_title(url).await {
            Ok(title) => title,
            Err(e) => {
                debug!(url, error = %e, "Title re-check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe() -> HttpTitleProbe {
        HttpTitleProbe::new(Duration::from_secs(2), "test").unwrap()
    }

    #[tokio::test]
    async fn reads_first_heading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/id-100.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><h1>  Appartement\n 2 chambres </h1><h1>Other</h1></body></html>",
            ))
            .mount(&server)
            .await;

        let title = probe().current_title(&format!("{}/id-100.html", server.uri())).await;
        assert_eq!(title.as_deref(), Some("Appartement 2 chambres"));
    }

    #[tokio::test]
    async fn errors_and_missing_heading_read_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blank"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>x</p></body></html>"))
            .mount(&server)
            .await;

        let probe = probe();
        assert!(probe.current_title(&format!("{}/gone", server.uri())).await.is_none());
        assert!(probe.current_title(&format!("{}/blank", server.uri())).await.is_none());
    }
}
