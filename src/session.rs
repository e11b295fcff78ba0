//! Authenticated portal client.
//!
//! The portal hands out a session through a fixed-name cookie after a
//! form-encoded login. Success is decided only by the presence of that
//! cookie: the portal answers HTTP 200 to bad credentials too.
//!
//! Archive downloads never fail the caller. A 404 means the section was not
//! published for that date; any other status or transport error is logged
//! and reported as "not available" so one missing section never aborts a run.
//!
//! The [`Portal`] and [`SectionFetcher`] traits are the seams the download
//! orchestrator and pipeline depend on, so both can be driven by doubles.

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, ACCEPT, COOKIE};
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::models::{Credentials, SectionRequest};

/// Cookie carrying the portal session token.
pub const SESSION_COOKIE: &str = "inlabs_session_cookie";

const LOGIN_PATH: &str = "/logar.php";
const DOWNLOAD_PATH: &str = "/index.php";
const ORIGIN_HEADER: &str = "origem";
const ORIGIN_VALUE: &str = "736372697074";

/// Something that can log in and hand back a per-run fetcher.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Log in once. Fails with [`PortalError::Auth`] when no session cookie
    /// is issued. No retry happens at this layer.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn SectionFetcher>, PortalError>;
}

/// Fetches one section archive for one date within an authenticated session.
#[async_trait]
pub trait SectionFetcher: Send + Sync {
    /// Returns the raw response body, or `None` when the section is not
    /// available. Never errors.
    async fn fetch(&self, request: &SectionRequest) -> Option<Vec<u8>>;
}

/// HTTP client for the INLABS gazette portal.
pub struct InlabsPortal {
    base_url: String,
    login_timeout: Duration,
    download_timeout: Duration,
}

impl InlabsPortal {
    pub fn new(base_url: &str, login_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            login_timeout,
            download_timeout,
        }
    }

    pub fn from_config(config: &PortalConfig) -> Self {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.login_timeout_secs),
            Duration::from_secs(config.download_timeout_secs),
        )
    }

    /// POST the credentials to the login endpoint and pick the session
    /// cookie out of the resulting cookie jar.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, PortalError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| PortalError::Config(format!("invalid portal URL: {}", e)))?;

        // Redirects after login may carry the cookie, so collect it in a jar.
        let jar = Arc::new(Jar::default());
        let login_client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(self.login_timeout)
            .build()?;

        info!(portal = %self.base_url, "logging in to portal");
        let response = login_client
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .form(&[
                ("email", credentials.principal.as_str()),
                ("password", credentials.secret()),
            ])
            .send()
            .await?;
        let status = response.status();

        let token = jar
            .cookies(&base)
            .as_ref()
            .and_then(|header| session_token(header));

        match token {
            Some(token) => {
                info!("portal login successful");
                let client = reqwest::Client::builder()
                    .timeout(self.download_timeout)
                    .build()?;
                Ok(Session {
                    client,
                    base_url: self.base_url.clone(),
                    token,
                })
            }
            None => {
                error!(status = %status, "portal login returned no session cookie");
                Err(PortalError::Auth)
            }
        }
    }
}

#[async_trait]
impl Portal for InlabsPortal {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn SectionFetcher>, PortalError> {
        let session = self.login(credentials).await?;
        Ok(Box::new(session))
    }
}

/// Pull the session token out of a `Cookie` header value.
fn session_token(header: &HeaderValue) -> Option<String> {
    header
        .to_str()
        .ok()?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// One authenticated portal session. Owned by a single pipeline run.
pub struct Session {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// `GET /index.php?p={date}&dl={date}-{section}.zip`
    pub fn download_url(&self, request: &SectionRequest) -> String {
        format!(
            "{}{}?p={}&dl={}",
            self.base_url,
            DOWNLOAD_PATH,
            request.date.format("%Y-%m-%d"),
            request.file_name()
        )
    }
}

#[async_trait]
impl SectionFetcher for Session {
    async fn fetch(&self, request: &SectionRequest) -> Option<Vec<u8>> {
        let file = request.file_name();
        debug!(file = %file, "downloading archive");

        let response = match self
            .client
            .get(self.download_url(request))
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, self.token))
            .header(ORIGIN_HEADER, ORIGIN_VALUE)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(file = %file, error = %e, "archive download failed");
                return None;
            }
        };

        match response.status() {
            StatusCode::OK => match response.bytes().await {
                Ok(body) => {
                    debug!(file = %file, bytes = body.len(), "archive downloaded");
                    Some(body.to_vec())
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "archive body could not be read");
                    None
                }
            },
            StatusCode::NOT_FOUND => {
                info!(file = %file, "section not published");
                None
            }
            other => {
                warn!(file = %file, status = %other, "unexpected download status");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionCode;
    use chrono::NaiveDate;

    #[test]
    fn session_token_found_among_other_cookies() {
        let header = HeaderValue::from_static("theme=dark; inlabs_session_cookie=abc123; lang=pt");
        assert_eq!(session_token(&header).as_deref(), Some("abc123"));
    }

    #[test]
    fn session_token_absent() {
        let header = HeaderValue::from_static("theme=dark; PHPSESSID=xyz");
        assert_eq!(session_token(&header), None);
    }

    #[test]
    fn empty_session_cookie_is_not_a_session() {
        let header = HeaderValue::from_static("inlabs_session_cookie=");
        assert_eq!(session_token(&header), None);
    }

    #[test]
    fn download_url_matches_portal_contract() {
        let session = Session {
            client: reqwest::Client::new(),
            base_url: "https://inlabs.in.gov.br".to_string(),
            token: "t".to_string(),
        };
        let request = SectionRequest::new(
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            SectionCode::Do1,
        );
        assert_eq!(
            session.download_url(&request),
            "https://inlabs.in.gov.br/index.php?p=2024-03-07&dl=2024-03-07-DO1.zip"
        );
    }

    #[test]
    fn portal_trims_trailing_slash() {
        let portal = InlabsPortal::new(
            "http://localhost:8080/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert_eq!(portal.base_url, "http://localhost:8080");
    }
}
