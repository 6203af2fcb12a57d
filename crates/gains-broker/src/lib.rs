//! gains-broker
//!
//! Brokerage-facing IO:
//! - [`BrokerClient`]: authenticated GETs against the trader API
//! - [`TokenClient`]: OAuth token endpoint (refresh + authorization code)
//! - [`CredentialCell`] / [`RefreshTrigger`]: shared credential state and the
//!   on-demand refresh signal
//!
//! Nothing here retries or decides to terminate; callers classify
//! [`BrokerError`] and act.

mod client;
mod credentials;
mod error;
mod oauth;

pub use client::{BrokerClient, ENTERED_TIME_FORMAT};
pub use credentials::{CredentialCell, RefreshTrigger, TokenPair};
pub use error::BrokerError;
pub use oauth::{extract_authorization_code, TokenClient};
