use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{RelayError, Result};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cookie-carrying HTTP client for the Zabbix web frontend.
///
/// Logging in only stores whatever cookies the frontend hands back. A wrong
/// password is not detected here; it shows up as a useless chart later.
pub struct ZabbixSession {
    http: Client,
}

impl ZabbixSession {
    pub async fn login(login_url: &str, username: &str, password: &str) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| RelayError::transport("Failed to build Zabbix HTTP client", e))?;

        let form = [
            ("name", username),
            ("password", password),
            ("autologin", "1"),
            ("enter", "Sign in"),
        ];

        let resp = http
            .post(login_url)
            .form(&form)
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await
            .map_err(|e| RelayError::transport(format!("Zabbix login to {} failed", login_url), e))?;

        debug!(status = %resp.status(), "Zabbix login response");
        // Drain the body so the connection can be reused for the chart request.
        resp.bytes()
            .await
            .map_err(|e| RelayError::transport("Failed to read Zabbix login response", e))?;

        info!(user = %username, "Logged in to Zabbix frontend");
        Ok(Self { http })
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_login_posts_credentials_form() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/index.php"))
            .and(body_string_contains("name=Admin"))
            .and(body_string_contains("password=zabbix"))
            .and(body_string_contains("autologin=1"))
            .and(body_string_contains("enter=Sign+in"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/index.php", server.uri());
        ZabbixSession::login(&url, "Admin", "zabbix").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_ignores_rejection_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Login name or password is incorrect."))
            .mount(&server)
            .await;

        let url = format!("{}/index.php", server.uri());
        assert!(ZabbixSession::login(&url, "Admin", "wrong").await.is_ok());
    }

    #[tokio::test]
    async fn test_login_unreachable_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to accept connections.
        let err = ZabbixSession::login("http://127.0.0.1:9/index.php", "Admin", "zabbix")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Transport { .. }));
    }
}
