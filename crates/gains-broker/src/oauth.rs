//! OAuth token endpoint: refresh-token grant, authorization-code grant and
//! the interactive authorize URL.

use std::time::Duration;

use gains_schemas::TokenResponse;
use reqwest::Url;

use crate::credentials::TokenPair;
use crate::error::BrokerError;

pub struct TokenClient {
    http: reqwest::Client,
    oauth_base_url: String,
    app_key: String,
    app_secret: String,
    redirect_uri: String,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("oauth_base_url", &self.oauth_base_url)
            .field("app_key", &"<REDACTED>")
            .field("app_secret", &"<REDACTED>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl TokenClient {
    pub fn new(
        oauth_base_url: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BrokerError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            oauth_base_url: oauth_base_url.into().trim_end_matches('/').to_string(),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            redirect_uri: redirect_uri.into(),
        })
    }

    /// URL the operator opens in a browser to grant access.
    pub fn authorize_url(&self) -> Result<Url, BrokerError> {
        Url::parse_with_params(
            &format!("{}/authorize", self.oauth_base_url),
            &[
                ("client_id", self.app_key.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| BrokerError::Transport(format!("invalid oauth base url: {e}")))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, BrokerError> {
        let resp = self
            .http
            .post(format!("{}/token", self.oauth_base_url))
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BrokerError::from_status(status.as_u16(), body));
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| BrokerError::Decode(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(BrokerError::Decode(
                "token response has no access_token".to_string(),
            ));
        }
        Ok(parsed)
    }

    /// Exchange the current refresh token for a new pair. When the response
    /// omits `refresh_token` the current one is kept.
    pub async fn refresh(&self, current_refresh: &str) -> Result<TokenPair, BrokerError> {
        let resp = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current_refresh),
            ])
            .await?;
        let refresh = resp
            .refresh_token
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| current_refresh.to_string());
        Ok(TokenPair::new(resp.access_token, refresh))
    }

    /// Exchange an authorization code (interactive flow) for the first pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair, BrokerError> {
        let resp = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .await?;
        let refresh = resp
            .refresh_token
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BrokerError::Decode("authorization grant returned no refresh_token".to_string()))?;
        Ok(TokenPair::new(resp.access_token, refresh))
    }
}

/// Pull the `code` query parameter out of the URL the browser was redirected
/// to. The value is returned percent-decoded.
pub fn extract_authorization_code(redirected_url: &str) -> Option<String> {
    let url = Url::parse(redirected_url.trim()).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
