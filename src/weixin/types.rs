use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

// --- Responses ---

/// Every WeCom API reply carries `errcode`/`errmsg`; the payload fields are
/// only present on success, so they are optional here and checked explicitly.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub errcode: Option<i64>,
    pub errmsg: Option<String>,
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub errcode: Option<i64>,
    pub errmsg: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub media_id: Option<String>,
}

/// Pull a required field out of a reply, or report what the provider said instead.
pub(crate) fn require_field(
    endpoint: &str,
    field: &str,
    value: Option<String>,
    errcode: Option<i64>,
    errmsg: Option<&str>,
) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RelayError::contract(
            endpoint,
            format!(
                "response has no `{}` (errcode={}, errmsg={})",
                field,
                errcode.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
                errmsg.unwrap_or("none"),
            ),
        )),
    }
}

impl TokenResponse {
    pub fn into_token(self, endpoint: &str) -> Result<String> {
        require_field(endpoint, "access_token", self.access_token, self.errcode, self.errmsg.as_deref())
    }
}

impl UploadResponse {
    pub fn into_media_id(self, endpoint: &str) -> Result<String> {
        require_field(endpoint, "media_id", self.media_id, self.errcode, self.errmsg.as_deref())
    }
}

// --- Outbound message ---

pub const MSG_TYPE_MPNEWS: &str = "mpnews";

/// `message/send` body for a multi-article news message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewsMessage {
    pub touser: String,
    pub msgtype: String,
    pub agentid: u64,
    pub mpnews: MpNews,
    pub safe: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MpNews {
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Article {
    pub title: String,
    pub thumb_media_id: String,
    pub author: String,
    pub content: String,
}
