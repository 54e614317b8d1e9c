use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chart::ChartConfig;

#[derive(Debug, Clone, Default)]
pub struct OutgoingPost {
    pub text: String,
    pub images: Vec<Vec<u8>>,
    pub alt_text: Option<String>,
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, config: &ChartConfig) -> anyhow::Result<Vec<u8>>;
}

#[async_trait]
pub trait PostClient: Send + Sync {
    /// Uploads the images, publishes the status and returns its id.
    async fn submit(&self, post: OutgoingPost) -> anyhow::Result<String>;
}

/// Renders through a Chart.js rendering service such as QuickChart.
pub struct QuickChartRenderer {
    client: reqwest::Client,
    endpoint: String,
    width: u32,
    height: u32,
}

impl QuickChartRenderer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            width: 1200,
            height: 675,
        }
    }
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    chart: &'a ChartConfig,
    width: u32,
    height: u32,
    format: &'static str,
    #[serde(rename = "backgroundColor")]
    background_color: &'static str,
}

#[async_trait]
impl ChartRenderer for QuickChartRenderer {
    async fn render(&self, config: &ChartConfig) -> anyhow::Result<Vec<u8>> {
        let request = RenderRequest {
            chart: config,
            width: self.width,
            height: self.height,
            format: "png",
            background_color: "white",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach chart service at {}", self.endpoint))?
            .error_for_status()
            .context("chart service rejected the chart")?;

        let image = response.bytes().await?.to_vec();
        debug!(bytes = image.len(), "chart rendered");
        Ok(image)
    }
}

/// Client for a Mastodon-compatible status API.
pub struct HttpPostClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpPostClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn upload_media(&self, image: Vec<u8>, alt_text: Option<&str>) -> anyhow::Result<String> {
        let part = Part::bytes(image)
            .file_name("chart.png")
            .mime_str("image/png")?;
        let mut form = Form::new().part("file", part);
        if let Some(alt_text) = alt_text {
            form = form.text("description", alt_text.to_string());
        }

        let created: Created = self
            .client
            .post(format!("{}/api/v2/media", self.base_url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .context("media upload request failed")?
            .error_for_status()
            .context("media upload rejected")?
            .json()
            .await?;
        Ok(created.id)
    }
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<&'a str>,
}

#[async_trait]
impl PostClient for HttpPostClient {
    async fn submit(&self, post: OutgoingPost) -> anyhow::Result<String> {
        let mut media_ids = Vec::with_capacity(post.images.len());
        for image in post.images {
            media_ids.push(self.upload_media(image, post.alt_text.as_deref()).await?);
        }

        let payload = StatusPayload {
            status: &post.text,
            media_ids,
            in_reply_to_id: post.reply_to.as_deref(),
        };

        let created: Created = self
            .client
            .post(format!("{}/api/v1/statuses", self.base_url))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .context("status request failed")?
            .error_for_status()
            .context("status rejected")?
            .json()
            .await?;

        debug!(post_id = %created.id, reply_to = ?post.reply_to, "status published");
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_post_has_no_reply_field() {
        let payload = StatusPayload {
            status: "hello",
            media_ids: vec![],
            in_reply_to_id: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "hello" }));
    }

    #[test]
    fn replies_carry_parent_and_media() {
        let payload = StatusPayload {
            status: "hello",
            media_ids: vec!["m1".to_string()],
            in_reply_to_id: Some("42"),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["in_reply_to_id"], "42");
        assert_eq!(json["media_ids"][0], "m1");
    }

    #[test]
    fn base_url_is_normalized() {
        let client = HttpPostClient::new("https://social.example/", "token");
        assert_eq!(client.base_url, "https://social.example");
    }
}
