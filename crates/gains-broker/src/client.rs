use std::time::Duration;

use chrono::{DateTime, Utc};
use gains_schemas::AccountNumber;
use serde::de::DeserializeOwned;

use crate::credentials::CredentialCell;
use crate::error::BrokerError;

/// Time format the orders endpoint expects for `fromEnteredTime` / `toEnteredTime`.
pub const ENTERED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Authenticated GET wrapper around the brokerage trader API.
///
/// The bearer token is read from the [`CredentialCell`] on every request, so a
/// refresh published between two calls is picked up by the second one.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    creds: CredentialCell,
}

impl BrokerClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        creds: CredentialCell,
    ) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BrokerError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            creds,
        })
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.creds.current();

        let resp = self
            .http
            .get(url)
            .bearer_auth(&token.bearer)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BrokerError::from_status(status.as_u16(), body));
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let body = self.get_text(path, query).await?;
        serde_json::from_str(&body).map_err(|e| BrokerError::Decode(e.to_string()))
    }

    /// `GET /accounts/accountNumbers`: plaintext number → opaque hash.
    pub async fn get_account_numbers(&self) -> Result<Vec<AccountNumber>, BrokerError> {
        self.get_json("/accounts/accountNumbers", &[]).await
    }

    /// The first linked account; the service tracks exactly one.
    pub async fn primary_account(&self) -> Result<AccountNumber, BrokerError> {
        self.get_account_numbers()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Decode("accountNumbers returned no accounts".to_string()))
    }

    /// `GET /accounts/{hash}/orders` for an entered-time window, body
    /// returned verbatim (a JSON array of orders).
    pub async fn get_orders_raw(
        &self,
        account_hash: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, BrokerError> {
        let path = format!("/accounts/{account_hash}/orders");
        self.get_text(
            &path,
            &[
                ("fromEnteredTime", from.format(ENTERED_TIME_FORMAT).to_string()),
                ("toEnteredTime", to.format(ENTERED_TIME_FORMAT).to_string()),
            ],
        )
        .await
    }
}
