//! HTTP readiness probes.

use crate::error::{self, Result};
use crate::poll::ReadinessProbe;
use async_trait::async_trait;
use log::trace;
use reqwest::redirect::Policy;
use reqwest::Client;
use snafu::ResultExt;
use std::time::Duration;

/// The request timeout used by readiness probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Ready when a `GET` on `url` answers with one of the accepted status codes. Redirects are not
/// followed, so a `302` to a login page counts as an answer.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: Client,
    url: String,
    accepted: Vec<u16>,
}

impl HttpStatusProbe {
    pub fn new<S: Into<String>>(url: S, accepted: &[u16]) -> Result<Self> {
        Self::with_timeout(url, accepted, PROBE_TIMEOUT)
    }

    pub fn with_timeout<S: Into<String>>(
        url: S,
        accepted: &[u16],
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .context(error::HttpSnafu {
                action: "build readiness probe client",
            })?;
        Ok(Self {
            client,
            url: url.into(),
            accepted: accepted.to_vec(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The status code of one `GET`, or `None` if the request did not complete.
    pub async fn status(&self) -> Option<u16> {
        match self.client.get(&self.url).send().await {
            Ok(response) => Some(response.status().as_u16()),
            Err(e) => {
                trace!("GET '{}' failed: {}", self.url, e);
                None
            }
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpStatusProbe {
    async fn test_connection(&self) -> bool {
        match self.status().await {
            Some(status) => {
                trace!("GET '{}' returned {}", self.url, status);
                self.accepted.contains(&status)
            }
            None => false,
        }
    }
}
