use chrono::Local;
use reqwest::{multipart, Client};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use super::types::*;
use crate::alert::COMPACT_TIME_FORMAT;
use crate::error::{RelayError, Result};

const TOKEN_PATH: &str = "/gettoken";
const UPLOAD_PATH: &str = "/media/upload";
const SEND_PATH: &str = "/message/send";

/// Short-lived WeCom API credential.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    #[cfg(test)]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// WeCom (enterprise WeChat) application API.
#[derive(Clone)]
pub struct WeixinClient {
    http: Client,
    base_url: String,
    corp_id: String,
    secret: String,
}

impl WeixinClient {
    pub fn new(base_url: &str, corp_id: String, secret: String) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| RelayError::transport("Failed to build WeCom HTTP client", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            corp_id,
            secret,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Trade corp id and secret for an access token.
    pub async fn exchange_token(&self) -> Result<AccessToken> {
        let resp = self
            .http
            .get(self.url(TOKEN_PATH))
            .query(&[("corpid", self.corp_id.as_str()), ("corpsecret", self.secret.as_str())])
            .send()
            .await
            .map_err(|e| RelayError::transport("WeCom token request failed", e.without_url()))?;

        let parsed: TokenResponse = read_json(resp, TOKEN_PATH).await?;
        if let Some(expires_in) = parsed.expires_in {
            debug!(expires_in, "Access token issued");
        }
        let token = parsed.into_token(TOKEN_PATH)?;
        info!("Obtained WeCom access token");
        Ok(AccessToken(token))
    }

    /// Upload an image as temporary media and return its `media_id`.
    pub async fn upload_media(&self, token: &AccessToken, image_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| RelayError::filesystem("Failed to read chart image for upload", image_path, e))?;
        let size = bytes.len();

        let file_name = format!("{}.jpg", Local::now().format(COMPACT_TIME_FORMAT));
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| RelayError::transport("Invalid upload content type", e))?;
        let form = multipart::Form::new().part("media", part);

        let resp = self
            .http
            .post(self.url(UPLOAD_PATH))
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::transport("WeCom media upload failed", e.without_url()))?;

        let parsed: UploadResponse = read_json(resp, UPLOAD_PATH).await?;
        debug!(media_type = ?parsed.media_type, "Upload response");
        let media_id = parsed.into_media_id(UPLOAD_PATH)?;
        info!(file_name = %file_name, bytes = size, media_id = %media_id, "Uploaded chart to WeCom");
        Ok(media_id)
    }

    /// Post the message and hand back the provider's raw reply. The reply's
    /// `errcode` is deliberately not interpreted.
    pub async fn send_message(&self, token: &AccessToken, message: &NewsMessage) -> Result<String> {
        let resp = self
            .http
            .post(self.url(SEND_PATH))
            .query(&[("access_token", token.as_str())])
            .json(message)
            .send()
            .await
            .map_err(|e| RelayError::transport("WeCom message send failed", e.without_url()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RelayError::transport("Failed to read WeCom send response", e.without_url()))?;
        info!(status = %status, touser = %message.touser, "Message posted to WeCom");
        Ok(body)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response, endpoint: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| RelayError::transport(format!("Failed to read {} response", endpoint), e.without_url()))?;
    serde_json::from_str(&body).map_err(|e| {
        RelayError::contract(
            endpoint,
            format!("HTTP {} with undecodable body ({}): {}", status, e, truncate(&body, 200)),
        )
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
