/*!

A small client for the Mission Control HTTP API, used to check that a deployed instance is up and
that the config catalog contains what a test expects.

!*/

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct BasicAuth {
    username: String,
    password: String,
}

#[derive(Debug, Clone)]
pub struct MissionControl {
    client: Client,
    url: Url,
    config_db_url: Url,
    auth: Option<BasicAuth>,
}

impl MissionControl {
    /// A client for the API at `url`. The config-db is assumed to be served from the same URL
    /// until [`MissionControl::with_config_db`] says otherwise.
    pub fn new(url: &str) -> Result<Self> {
        let url = parse_base(url)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context(error::HttpSnafu {
                action: "build mission control client",
            })?;
        Ok(Self {
            client,
            config_db_url: url.clone(),
            url,
            auth: None,
        })
    }

    pub fn with_basic_auth<U, P>(mut self, username: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_config_db(mut self, url: &str) -> Result<Self> {
        self.config_db_url = parse_base(url)?;
        Ok(self)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config_db_url(&self) -> &Url {
        &self.config_db_url
    }

    fn request(&self, method: Method, base: &Url, path: &str) -> Result<RequestBuilder> {
        let url = base
            .join(path.trim_start_matches('/'))
            .context(error::UrlSnafu { url: path })?;
        debug!("{} {}", method, url);
        let request = self.client.request(method, url);
        Ok(match &self.auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        })
    }

    /// `true` if `GET /health` succeeds. Only a failure to reach the server is an error.
    pub async fn is_healthy(&self) -> Result<bool> {
        let response = self
            .request(Method::GET, &self.url, "/health")?
            .send()
            .await
            .context(error::HttpSnafu {
                action: "check mission control health",
            })?;
        Ok(response.status().is_success())
    }

    /// The identity the client is authenticated as.
    pub async fn who_am_i(&self) -> Result<serde_json::Value> {
        let action = "get current user";
        let request = self.request(Method::GET, &self.url, "/auth/whoami")?;
        json(send(request, action).await?, action).await
    }

    pub async fn query_catalog(&self, selector: ResourceSelector) -> Result<Vec<SelectedResource>> {
        let action = "query catalog";
        let body = SearchResourcesRequest {
            limit: None,
            configs: vec![selector],
        };
        let request = self
            .request(Method::POST, &self.url, "/resources/search")?
            .json(&body);
        let response: SearchResourcesResponse = json(send(request, action).await?, action).await?;
        Ok(response.configs)
    }

    /// Free-text search of the catalog.
    pub async fn search_catalog(&self, text: &str) -> Result<Vec<SelectedResource>> {
        self.query_catalog(ResourceSelector {
            search: Some(text.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn search_catalog_changes(
        &self,
        request: &CatalogChangesSearchRequest,
    ) -> Result<CatalogChangesSearchResponse> {
        let action = "search catalog changes";
        let request = self
            .request(Method::POST, &self.url, "/catalog/changes")?
            .json(request);
        json(send(request, action).await?, action).await
    }

    pub fn scraper<S: Into<String>>(&self, id: S) -> Scraper<'_> {
        Scraper {
            client: self,
            id: id.into(),
            name: String::new(),
        }
    }
}

/// A config-db scraper that can be triggered on demand.
#[derive(Debug, Clone)]
pub struct Scraper<'a> {
    client: &'a MissionControl,
    id: String,
    name: String,
}

impl Scraper<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the scraper now and return its summary.
    pub async fn run(&self) -> Result<ScrapeResult> {
        let action = format!("run scraper '{}'", self.id);
        info!("Running scraper '{}'", self.id);
        let path = format!("/run/{}", self.id);
        let request = self
            .client
            .request(Method::POST, &self.client.config_db_url, &path)?
            .json(&ScraperRunRequest { scraper: &self.name });
        json(send(request, &action).await?, &action).await
    }
}

#[derive(Debug, Serialize)]
struct ScraperRunRequest<'a> {
    scraper: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrapeResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<String>,
    #[serde(
        default,
        rename = "scrape_summary",
        deserialize_with = "null_as_default"
    )]
    pub summary: serde_json::Map<String, serde_json::Value>,
}

/// Selects config items. Unset fields do not constrain the search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResourcesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    configs: Vec<ResourceSelector>,
}

#[derive(Debug, Deserialize)]
struct SearchResourcesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    configs: Vec<SelectedResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SelectedResource {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub resource_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub config: String,
    #[serde(deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub properties: BTreeMap<String, String>,
}

/// Filters for `POST /catalog/changes`. `from` and `to` take datemath such as `now-1h`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogChangesSearchRequest {
    #[serde(rename = "id")]
    pub catalog_id: String,
    pub config_type: String,
    #[serde(rename = "type")]
    pub change_type: String,
    pub severity: String,
    pub include_deleted_configs: bool,
    pub depth: u32,
    pub created_by: String,
    pub summary: String,
    pub source: String,
    pub tags: String,
    /// An agent id, or `local` for the local agent.
    pub agent_id: String,
    pub from: String,
    pub to: String,
    pub page_size: u32,
    pub page: u32,
    pub sort_by: String,
    /// `upstream`, `downstream` or `both`.
    pub recursive: String,
    pub soft: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CatalogChangesSearchResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub summary: BTreeMap<String, i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub total: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub changes: Vec<ConfigChangeRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigChangeRow {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub agent_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub external_change_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub config_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub change_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub severity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(deserialize_with = "null_as_default")]
    pub count: i64,
    #[serde(rename = "name", deserialize_with = "null_as_default")]
    pub config_name: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub config_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub first_observed: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    #[serde(deserialize_with = "null_as_default")]
    pub external_created_by: String,
}

/// Reads JSON `null` as the default value. The API sends `null` for empty optional fields.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Base URLs are treated as directories so that paths are appended to, not swapped for, any path
/// prefix they carry.
fn parse_base(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url).context(error::UrlSnafu { url })?;
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

async fn send(request: RequestBuilder, action: &str) -> Result<Response> {
    let response = request
        .send()
        .await
        .context(error::HttpSnafu { action })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error::HttpStatusSnafu {
        action,
        status: status.as_u16(),
        body,
    }
    .fail()
}

async fn json<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
    let body = response
        .text()
        .await
        .context(error::HttpSnafu { action })?;
    serde_json::from_str(&body).context(error::JsonSnafu {
        what: format!("{} response", action),
    })
}
