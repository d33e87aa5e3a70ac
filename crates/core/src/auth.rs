//! App-only token acquisition (OAuth client-credentials grant)
//!
//! SharePoint app-only principals registered through `appregnew.aspx` obtain
//! their tokens from the Azure ACS endpoint. The token audience is the fixed
//! SharePoint service principal, qualified with the tenant host and realm.

use crate::error::{Error, Result};
use crate::site::SiteCredentials;
use crate::transport::{ApiRequest, Transport};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};

/// Service principal ID of SharePoint Online.
pub const SHAREPOINT_PRINCIPAL_ID: &str = "00000003-0000-0ff1-ce00-000000000000";

/// Default ACS token endpoint base.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://accounts.accesscontrol.windows.net";

/// Lifetime assumed when the token response carries no `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Bearer token held in memory by one client.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Expired, or expiring within `margin`.
    pub fn is_expired(&self, margin: std::time::Duration) -> bool {
        let margin = Duration::from_std(margin).unwrap_or_else(|_| Duration::zero());
        Utc::now() + margin >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// ACS token response; numbers arrive as strings.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Build the client-credentials form for a site.
pub(crate) fn token_request(
    credentials: &SiteCredentials,
    endpoint: &str,
    timeout: std::time::Duration,
) -> ApiRequest {
    let url = format!(
        "{}/{}/tokens/OAuth/2",
        endpoint.trim_end_matches('/'),
        credentials.tenant_id()
    );

    ApiRequest::post(url)
        .form(vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            (
                "client_id".to_string(),
                format!("{}@{}", credentials.client_id(), credentials.tenant_id()),
            ),
            (
                "client_secret".to_string(),
                credentials.client_secret().to_string(),
            ),
            (
                "resource".to_string(),
                format!(
                    "{}/{}@{}",
                    SHAREPOINT_PRINCIPAL_ID,
                    credentials.host(),
                    credentials.tenant_id()
                ),
            ),
        ])
        .timeout(timeout)
}

/// Exchange the site's client ID/secret for an access token.
///
/// Every failure, including an unreachable endpoint, is reported as
/// [`Error::Authentication`].
pub async fn acquire_token(
    transport: &dyn Transport,
    credentials: &SiteCredentials,
    endpoint: &str,
    timeout: std::time::Duration,
) -> Result<AccessToken> {
    let request = token_request(credentials, endpoint, timeout);
    debug!(url = %request.url, "Requesting app-only token");

    let response = transport
        .execute(request)
        .await
        .map_err(|e| Error::Authentication(format!("token endpoint unreachable: {}", e)))?;

    let status = response.status;
    let body = response
        .text()
        .await
        .map_err(|e| Error::Authentication(format!("failed to read token response: {}", e)))?;

    if !(200..300).contains(&status) {
        let detail = match Error::from_status(status, &body) {
            Error::Api { message, .. }
            | Error::Authentication(message)
            | Error::PermissionDenied(message)
            | Error::NotFound(message)
            | Error::Transient(message) => message,
            other => other.to_string(),
        };
        return Err(Error::Authentication(format!(
            "token request rejected ({}): {}",
            status, detail
        )));
    }

    let token = parse_token_response(&body)?;
    info!(
        host = credentials.host(),
        expires_at = %token.expires_at,
        "Acquired app-only access token"
    );
    Ok(token)
}

fn parse_token_response(body: &str) -> Result<AccessToken> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::Authentication(format!("malformed token response: {}", e)))?;

    let access_token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Authentication("no access_token in response".to_string()))?;

    let expires_in = match parsed.expires_in {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_EXPIRES_IN);

    Ok(AccessToken::new(
        access_token,
        Utc::now() + Duration::seconds(expires_in),
    ))
}
