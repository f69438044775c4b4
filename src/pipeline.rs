use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::alert::Alert;
use crate::cache::{ChartSource, MediaCache, MediaStore};
use crate::config::Config;
use crate::error::Result;
use crate::message::{self, Recipient};
use crate::weixin::client::{AccessToken, WeixinClient};
use crate::weixin::types::NewsMessage;
use crate::zabbix::chart::{fetch_chart, ChartOptions};
use crate::zabbix::session::ZabbixSession;

/// One alert delivery as requested on the command line.
#[derive(Debug)]
pub struct Invocation {
    pub user_id: String,
    pub subject: String,
    pub payload: String,
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum Outcome {
    /// Raw reply from the send endpoint.
    Sent(String),
    /// Message that would have been sent.
    DryRun(NewsMessage),
}

struct ZabbixCharts<'a> {
    session: &'a ZabbixSession,
    chart_url: &'a str,
    item_id: &'a str,
    options: ChartOptions,
}

#[async_trait]
impl ChartSource for ZabbixCharts<'_> {
    async fn render_chart(&self, dest: &Path) -> Result<()> {
        fetch_chart(self.session, self.chart_url, self.item_id, dest, self.options).await?;
        Ok(())
    }
}

struct WeixinMedia<'a> {
    client: &'a WeixinClient,
    token: &'a AccessToken,
}

#[async_trait]
impl MediaStore for WeixinMedia<'_> {
    async fn upload(&self, image: &Path) -> Result<String> {
        self.client.upload_media(self.token, image).await
    }
}

/// Parse, authenticate, resolve the chart's media handle, compose and send.
/// Any failure aborts the run.
pub async fn run(config: &Config, invocation: &Invocation) -> Result<Outcome> {
    // Reject a bad payload before touching the network.
    let alert = Alert::parse(&invocation.payload)?;
    let key = alert.cache_key();
    info!(
        item_id = %alert.item_id,
        event_id = %alert.event_id,
        alarm_time = %alert.alarm_time,
        cache_key = %key,
        fields = alert.fields.len(),
        "Handling alert"
    );

    let zabbix = &config.zabbix_parameter;
    let session = ZabbixSession::login(&zabbix.login_url, &zabbix.username, &zabbix.password).await?;

    let wx = &config.weixin_parameter;
    let weixin = WeixinClient::new(&wx.api_base_url, wx.corpid.clone(), wx.secret.clone())?;
    let token = weixin.exchange_token().await?;

    let paths = &config.path_parameter;
    let cache = MediaCache::new(
        paths.mediaid_cache_path.clone(),
        paths.picture_save_path.clone(),
        Duration::from_secs(paths.cache_lock_timeout_secs),
    );
    let charts = ZabbixCharts {
        session: &session,
        chart_url: &zabbix.get_picture_url,
        item_id: &alert.item_id,
        options: ChartOptions {
            height: zabbix.picture_height,
            width: zabbix.picture_width,
            period: zabbix.picture_period,
        },
    };
    let media = WeixinMedia {
        client: &weixin,
        token: &token,
    };
    let media_id = cache.resolve(&key, &charts, &media).await?;

    let recipient = Recipient {
        user_id: &invocation.user_id,
        agent_id: wx.appid,
        author: &wx.msg_author,
    };
    let news = message::compose(&recipient, &invocation.subject, &media_id, &alert.fields);

    if invocation.dry_run {
        info!(touser = %news.touser, "Dry run, message not sent");
        return Ok(Outcome::DryRun(news));
    }

    let reply = weixin.send_message(&token, &news).await?;
    Ok(Outcome::Sent(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathConfig, WeixinConfig, ZabbixConfig};
    use crate::error::RelayError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAYLOAD: &str =
        r#"{"itemid":"23305","alarmtime":"2018.12.15 14:59:49","eventid":"1001","note":"test"}"#;
    const KEY: &str = "100120181215145949";

    fn test_config(server: &MockServer, dir: &Path) -> Config {
        Config {
            weixin_parameter: WeixinConfig {
                corpid: "corp-1".into(),
                secret: "secret-1".into(),
                appid: 111,
                msg_author: "Zabbix Server".into(),
                api_base_url: server.uri(),
            },
            zabbix_parameter: ZabbixConfig {
                username: "Admin".into(),
                password: "zabbix".into(),
                login_url: format!("{}/index.php", server.uri()),
                get_picture_url: format!("{}/chart.php", server.uri()),
                picture_height: 100,
                picture_width: 450,
                picture_period: 3600,
            },
            path_parameter: PathConfig {
                picture_save_path: dir.to_path_buf(),
                mediaid_cache_path: dir.join("media_id_cache"),
                cache_lock_timeout_secs: 2,
            },
        }
    }

    fn invocation(payload: &str, dry_run: bool) -> Invocation {
        Invocation {
            user_id: "12345678".into(),
            subject: "PROBLEM: load too high".into(),
            payload: payload.into(),
            dry_run,
        }
    }

    /// Mount all five endpoints; chart and upload with the expected call count.
    async fn mount_endpoints(server: &MockServer, chart_and_upload_calls: u64, send_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "zbx_sessionid=s1; Path=/"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gettoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errcode": 0, "errmsg": "ok", "access_token": "tok-1", "expires_in": 7200
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chart.php"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
            .expect(chart_and_upload_calls)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/media/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errcode": 0, "errmsg": "", "type": "image", "media_id": "MEDIA-UPLOADED"
            })))
            .expect(chart_and_upload_calls)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/message/send"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errcode":0,"errmsg":"ok"}"#))
            .expect(send_calls)
            .mount(server)
            .await;
    }

    async fn sent_message(server: &MockServer) -> serde_json::Value {
        let requests = server.received_requests().await.unwrap();
        let send = requests
            .iter()
            .find(|r| r.url.path() == "/message/send")
            .expect("send request recorded");
        serde_json::from_slice(&send.body).unwrap()
    }

    #[tokio::test]
    async fn test_cold_cache_uploads_once_and_stores_handle() {
        let server = MockServer::start().await;
        mount_endpoints(&server, 1, 1).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        std::fs::write(&config.path_parameter.mediaid_cache_path, "{}").unwrap();

        let outcome = run(&config, &invocation(PAYLOAD, false)).await.unwrap();

        match outcome {
            Outcome::Sent(body) => assert_eq!(body, r#"{"errcode":0,"errmsg":"ok"}"#),
            other => panic!("expected Sent, got {:?}", other),
        }
        let cache: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config.path_parameter.mediaid_cache_path).unwrap())
                .unwrap();
        assert_eq!(cache, serde_json::json!({ KEY: "MEDIA-UPLOADED" }));
        assert!(dir.path().join(format!("{}.jpg", KEY)).exists());

        let sent = sent_message(&server).await;
        assert_eq!(sent["touser"], "12345678");
        assert_eq!(sent["msgtype"], "mpnews");
        assert_eq!(sent["agentid"], 111);
        let articles = sent["mpnews"]["articles"].as_array().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0]["thumb_media_id"], "MEDIA-UPLOADED");
        assert_eq!(articles[0]["title"], "PROBLEM: load too high");
        assert_eq!(articles[0]["content"], "<font color=\"Chocolate\">[note]: </font>test<br />");
    }

    #[tokio::test]
    async fn test_warm_cache_skips_chart_and_upload() {
        let server = MockServer::start().await;
        mount_endpoints(&server, 0, 1).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        std::fs::write(
            &config.path_parameter.mediaid_cache_path,
            format!(r#"{{"{}": "3TtUxoOP-IK-rgIXGIXoCoGhLgtICfmYQjtQXGUpFw0Q"}}"#, KEY),
        )
        .unwrap();

        run(&config, &invocation(PAYLOAD, false)).await.unwrap();

        let sent = sent_message(&server).await;
        assert_eq!(
            sent["mpnews"]["articles"][0]["thumb_media_id"],
            "3TtUxoOP-IK-rgIXGIXoCoGhLgtICfmYQjtQXGUpFw0Q"
        );
    }

    #[tokio::test]
    async fn test_missing_eventid_aborts_before_network() {
        let server = MockServer::start().await;
        for p in ["/index.php", "/gettoken", "/chart.php", "/media/upload", "/message/send"] {
            Mock::given(path(p))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&server)
                .await;
        }
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        std::fs::write(&config.path_parameter.mediaid_cache_path, "{}").unwrap();

        let payload = r#"{"itemid":"23305","alarmtime":"2018.12.15 14:59:49","note":"test"}"#;
        let err = run(&config, &invocation(payload, false)).await.unwrap_err();
        assert!(matches!(err, RelayError::Input(_)));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_send() {
        let server = MockServer::start().await;
        mount_endpoints(&server, 1, 0).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        std::fs::write(&config.path_parameter.mediaid_cache_path, "{}").unwrap();

        match run(&config, &invocation(PAYLOAD, true)).await.unwrap() {
            Outcome::DryRun(news) => {
                assert_eq!(news.mpnews.articles[0].thumb_media_id, "MEDIA-UPLOADED");
            }
            other => panic!("expected DryRun, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_cache_file_aborts_before_chart() {
        let server = MockServer::start().await;
        mount_endpoints(&server, 0, 0).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());

        let err = run(&config, &invocation(PAYLOAD, false)).await.unwrap_err();
        assert!(matches!(err, RelayError::Filesystem { .. }));
    }
}
