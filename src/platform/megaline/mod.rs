pub mod extract;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap},
    Client, RequestBuilder,
};
use url::Url;

use super::{Credentials, LoginResponse, PortalClient, PortalError};

pub const MEGALINE_BASE_URL: &str = "https://bill.mega.kg";

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Where the portal pages live and how its session cookie is named.
#[derive(Debug, Clone)]
pub struct PortalEndpoints {
    pub login: Url,
    pub select_account: Url,
    pub account_detail: Url,
    pub session_cookie: String,
    pub account_field: String,
}

impl PortalEndpoints {
    pub fn new(base_url: &str) -> Result<Self, PortalError> {
        let mut base = Url::parse(base_url)?;
        // relative joins replace the last path segment unless it ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            login: base.join("?page=login")?,
            select_account: base.join("index.php")?,
            account_detail: base.join("page.php?page=main")?,
            session_cookie: "PHPSESSID".to_string(),
            account_field: "ls_change".to_string(),
        })
    }
}

#[derive(Clone)]
pub struct MegalineClient {
    client: Client,
    endpoints: PortalEndpoints,
}

impl MegalineClient {
    pub fn new(endpoints: PortalEndpoints, timeout: Duration, proxy: Option<&str>) -> Result<Self, PortalError> {
        info!("Initializing MegalineClient for {}", endpoints.login);

        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT);

        if let Some(proxy_url) = proxy {
            info!("Routing portal traffic through proxy");
            builder = builder.proxy(reqwest::Proxy::all(proxy_url).map_err(|e| PortalError::transport("proxy", e))?);
        }

        let client = builder.build().map_err(|e| PortalError::transport("client", e))?;

        info!("MegalineClient initialized");
        Ok(Self { client, endpoints })
    }

    async fn send(
        &self,
        stage: &'static str,
        request: RequestBuilder,
        session: &str,
    ) -> Result<(Vec<u8>, Option<String>), PortalError> {
        let request = if session.is_empty() {
            request
        } else {
            request.header(header::COOKIE, format!("{}={}", self.endpoints.session_cookie, session))
        };

        let response = request.send().await.map_err(|e| PortalError::transport(stage, e))?;

        let status = response.status();
        let token = extract_session_cookie(response.headers(), &self.endpoints.session_cookie);
        let body = response.bytes().await.map_err(|e| PortalError::transport(stage, e))?;

        if !status.is_success() {
            return Err(PortalError::Transport {
                stage,
                message: format!("unexpected status {}", status),
                status: Some(status),
                body: Some(String::from_utf8_lossy(&body).into_owned()),
            });
        }

        debug!("{} answered {} ({} bytes)", stage, status, body.len());
        Ok((body.to_vec(), token))
    }
}

#[async_trait]
impl PortalClient for MegalineClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, PortalError> {
        let (_, pre_auth) = self
            .send("get session id", self.client.get(self.endpoints.login.clone()), "")
            .await?;

        let pre_auth_token = pre_auth.unwrap_or_default();
        if pre_auth_token.is_empty() {
            warn!("Portal did not issue a pre-auth session cookie");
        }

        let form = [
            ("login", credentials.login.as_str()),
            ("pass", credentials.password.as_str()),
            ("act", "login"),
        ];

        let (body, rotated_token) = self
            .send(
                "login",
                self.client.post(self.endpoints.login.clone()).form(&form),
                &pre_auth_token,
            )
            .await?;

        Ok(LoginResponse {
            body,
            pre_auth_token,
            rotated_token,
        })
    }

    async fn fetch_account_detail(&self, session_token: &str, account_number: &str) -> Result<Vec<u8>, PortalError> {
        let form = [(self.endpoints.account_field.as_str(), account_number)];

        self.send(
            "change account",
            self.client.post(self.endpoints.select_account.clone()).form(&form),
            session_token,
        )
        .await?;

        let (body, _) = self
            .send(
                "get account detail",
                self.client.get(self.endpoints.account_detail.clone()),
                session_token,
            )
            .await?;

        Ok(body)
    }
}

/// Value of the named cookie from `Set-Cookie`: the first `;` segment with
/// the `name=` prefix stripped. Empty values count as absent.
pub fn extract_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);

    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix(prefix.as_str()))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{body_string, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MegalineClient {
        let endpoints = PortalEndpoints::new(&server.uri()).unwrap();
        MegalineClient::new(endpoints, Duration::from_secs(5), None).unwrap()
    }

    fn credentials() -> Credentials {
        Credentials {
            login: "u1".into(),
            password: "p1".into(),
        }
    }

    #[test]
    fn test_extract_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("lang=ru; path=/"));
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("PHPSESSID=abc123; path=/; HttpOnly"),
        );

        assert_eq!(extract_session_cookie(&headers, "PHPSESSID"), Some("abc123".to_string()));
        assert_eq!(extract_session_cookie(&headers, "SESSIONID"), None);
    }

    #[test]
    fn test_extract_session_cookie_ignores_empty_value() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("PHPSESSID=; path=/"));

        assert_eq!(extract_session_cookie(&headers, "PHPSESSID"), None);
    }

    #[test]
    fn test_endpoints_from_base_url() {
        let endpoints = PortalEndpoints::new(MEGALINE_BASE_URL).unwrap();

        assert_eq!(endpoints.login.as_str(), "https://bill.mega.kg/?page=login");
        assert_eq!(endpoints.select_account.as_str(), "https://bill.mega.kg/index.php");
        assert_eq!(endpoints.account_detail.as_str(), "https://bill.mega.kg/page.php?page=main");
    }

    #[test]
    fn test_endpoints_keep_base_path_prefix() {
        for base in ["http://proxy.local/megaline", "http://proxy.local/megaline/"] {
            let endpoints = PortalEndpoints::new(base).unwrap();

            assert_eq!(endpoints.login.as_str(), "http://proxy.local/megaline/?page=login");
            assert_eq!(endpoints.select_account.as_str(), "http://proxy.local/megaline/index.php");
            assert_eq!(endpoints.account_detail.as_str(), "http://proxy.local/megaline/page.php?page=main");
        }
    }

    #[tokio::test]
    async fn test_login_handshake_carries_pre_auth_cookie() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("page", "login"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "PHPSESSID=pre123; path=/"))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param("page", "login"))
            .and(header_eq("cookie", "PHPSESSID=pre123"))
            .and(header_eq("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("login=u1&pass=p1&act=login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "PHPSESSID=post456; path=/")
                    .set_body_string("<html>Лицевой счет №</html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).login(&credentials()).await.unwrap();

        assert_eq!(response.pre_auth_token, "pre123");
        assert_eq!(response.rotated_token.as_deref(), Some("post456"));
        assert_eq!(response.session_token(), "post456");
        assert!(String::from_utf8_lossy(&response.body).contains("Лицевой счет №"));
    }

    #[tokio::test]
    async fn test_login_without_rotation_keeps_pre_auth_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "PHPSESSID=pre123; path=/"))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let response = client_for(&server).login(&credentials()).await.unwrap();

        assert_eq!(response.rotated_token, None);
        assert_eq!(response.session_token(), "pre123");
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error_with_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let error = client_for(&server).login(&credentials()).await.unwrap_err();

        match error {
            PortalError::Transport { status, ref body, .. } => {
                assert_eq!(status, Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
                assert_eq!(body.as_deref(), Some("maintenance"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_account_detail_selects_then_reads() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/index.php"))
            .and(header_eq("cookie", "PHPSESSID=sess"))
            .and(body_string("ls_change=000111"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page.php"))
            .and(query_param("page", "main"))
            .and(header_eq("cookie", "PHPSESSID=sess"))
            .respond_with(ResponseTemplate::new(200).set_body_string("detail"))
            .expect(1)
            .mount(&server)
            .await;

        let body = client_for(&server)
            .fetch_account_detail("sess", "000111")
            .await
            .unwrap();

        assert_eq!(body, b"detail".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_account_detail_fails_when_selection_fails() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("detail"))
            .expect(0)
            .mount(&server)
            .await;

        let result = client_for(&server).fetch_account_detail("sess", "000111").await;

        assert!(matches!(result, Err(PortalError::Transport { stage: "change account", .. })));
    }
}
