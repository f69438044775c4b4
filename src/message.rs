use serde_json::{Map, Value};

use crate::weixin::types::{Article, MpNews, NewsMessage, MSG_TYPE_MPNEWS};

const LABEL_HEAD: &str = "<font color=\"Chocolate\">[";
const LABEL_TAIL: &str = "]: </font>";
const LINE_BREAK: &str = "<br />";

/// Who receives the message and how it is signed.
pub struct Recipient<'a> {
    pub user_id: &'a str,
    pub agent_id: u64,
    pub author: &'a str,
}

/// Render display fields as `<font color="Chocolate">[key]: </font>value<br />`
/// lines, in payload order.
pub fn render_content(fields: &Map<String, Value>) -> String {
    let mut content = String::new();
    for (key, value) in fields {
        content.push_str(LABEL_HEAD);
        content.push_str(key);
        content.push_str(LABEL_TAIL);
        match value {
            Value::String(s) => content.push_str(s),
            other => content.push_str(&other.to_string()),
        }
        content.push_str(LINE_BREAK);
    }
    content
}

/// Build the single-article news message carrying the chart as thumbnail.
pub fn compose(
    recipient: &Recipient<'_>,
    subject: &str,
    thumb_media_id: &str,
    fields: &Map<String, Value>,
) -> NewsMessage {
    NewsMessage {
        touser: recipient.user_id.to_string(),
        msgtype: MSG_TYPE_MPNEWS.to_string(),
        agentid: recipient.agent_id,
        mpnews: MpNews {
            articles: vec![Article {
                title: subject.to_string(),
                thumb_media_id: thumb_media_id.to_string(),
                author: recipient.author.to_string(),
                content: render_content(fields),
            }],
        },
        safe: 0,
    }
}
