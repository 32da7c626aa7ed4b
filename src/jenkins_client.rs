use crate::clock::{Clock, SystemClock};
use crate::config::{JenkinsConfig, JenkinsCredentials};
use crate::error::FetchError;
use crate::jenkins_types::{
    BuildDetail, BuildList, BuildSummary, Crumb, JobList, JobSnapshot, NodeInfo, NodeList,
};
use crate::monitor::JobSource;
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const JOBS_TREE: &str = "tree=jobs[name,url,color,lastBuild[number,url,timestamp,duration],lastSuccessfulBuild[number,url,timestamp,duration],lastFailedBuild[number,url,timestamp,duration]]";
const BUILDS_TREE: &str = "tree=builds[number,url,result,timestamp,duration,description]";
const NODES_TREE: &str = "tree=computer[displayName,offline,executors,monitorData]";
const CRUMB_ENDPOINT: &str = "/crumbIssuer/api/json";

#[derive(Clone)]
struct CacheEntry {
    inserted_at: Instant,
    value: JsonValue,
}

/// Cached, authenticated access to the Jenkins JSON API.
pub struct JenkinsClient {
    client: Client,
    base_url: String,
    public_base_url: Option<String>,
    username: String,
    api_token: String,
    cache: Cache<String, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    // Held across the crumb request; see `refresh_crumb` for how concurrent
    // refreshes collapse into one.
    crumb: Mutex<Option<Crumb>>,
}

impl JenkinsClient {
    pub fn new(creds: &JenkinsCredentials, cfg: &JenkinsConfig) -> Self {
        Self::with_clock(creds, cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(creds: &JenkinsCredentials, cfg: &JenkinsConfig, clock: Arc<dyn Clock>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.unwrap_or(10)))
            .build()
            .unwrap_or_default();

        let ttl = Duration::from_secs(cfg.cache_ttl_seconds.unwrap_or(5));
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(cfg.cache_capacity.unwrap_or(1_000))
            .build();

        let public_base_url = cfg
            .public_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        Self {
            client,
            base_url: creds.url.trim_end_matches('/').to_string(),
            public_base_url,
            username: creds.username.clone(),
            api_token: creds.api_token.clone(),
            cache,
            ttl,
            clock,
            crumb: Mutex::new(None),
        }
    }

    /// Returns the crumb, requesting it from Jenkins only when none is cached.
    /// `None` means Jenkins did not hand one out; callers carry on without it.
    pub async fn acquire_crumb(&self) -> Option<Crumb> {
        let mut slot = self.crumb.lock().await;
        if slot.is_none() {
            *slot = self.request_crumb().await;
        }
        slot.clone()
    }

    /// Replaces `stale` with a fresh crumb. If another request already swapped
    /// it out while this one waited for the lock, that crumb is reused.
    async fn refresh_crumb(&self, stale: Option<&Crumb>) -> Option<Crumb> {
        let mut slot = self.crumb.lock().await;
        if slot.is_some() && slot.as_ref() != stale {
            debug!("Crumb already refreshed by a concurrent request");
            return slot.clone();
        }
        *slot = self.request_crumb().await;
        slot.clone()
    }

    async fn request_crumb(&self) -> Option<Crumb> {
        let resp = match self.send(Method::GET, CRUMB_ENDPOINT, None).await {
            Ok(r) => r,
            Err(e) => {
                error!("Error getting crumb: {}", e);
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!("Failed to get crumb: {}", resp.status());
            return None;
        }
        match resp.json::<Crumb>().await {
            Ok(c) => {
                info!("CSRF crumb obtained");
                Some(c)
            }
            Err(e) => {
                warn!("Crumb response could not be decoded: {}", e);
                None
            }
        }
    }

    /// Cached GET. The cache key is the endpoint plus query string.
    pub async fn get(&self, endpoint: &str, query: Option<&str>) -> Result<JsonValue, FetchError> {
        let key = match query {
            Some(q) if !q.is_empty() => format!("{}?{}", endpoint, q),
            _ => endpoint.to_string(),
        };

        if let Some(entry) = self.cache.get(&key) {
            if self.clock.now().saturating_duration_since(entry.inserted_at) < self.ttl {
                debug!("Cache hit for {}", key);
                return Ok(entry.value);
            }
            self.cache.invalidate(&key).await;
        }

        let resp = self.execute(Method::GET, &key).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!("Jenkins API error: {} - {}", status, body);
            return Err(FetchError::Status { endpoint: key, status: status.as_u16(), body });
        }

        let mut value: JsonValue = resp
            .json()
            .await
            .map_err(|e| FetchError::decode(&key, e))?;
        self.rewrite_urls(&mut value);

        self.cache
            .insert(key, CacheEntry { inserted_at: self.clock.now(), value: value.clone() })
            .await;
        Ok(value)
    }

    /// State-changing request. Never cached.
    pub async fn post(&self, endpoint: &str) -> Result<(), FetchError> {
        let resp = self.execute(Method::POST, endpoint).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        error!("Jenkins API error: {} - {}", status, body);
        Err(FetchError::Status { endpoint: endpoint.to_string(), status: status.as_u16(), body })
    }

    pub async fn trigger_build(&self, job_name: &str) -> Result<(), FetchError> {
        self.post(&format!("{}/build", job_path(job_name))).await?;
        info!(job = job_name, "Triggered build");
        Ok(())
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, FetchError> {
        let list: JobList = self.get_typed("/api/json", Some(JOBS_TREE)).await?;
        Ok(list.jobs)
    }

    pub async fn list_builds(&self, job_name: &str, limit: usize) -> Result<Vec<BuildSummary>, FetchError> {
        let endpoint = format!("{}/api/json", job_path(job_name));
        let query = format!("{}{{0,{}}}", BUILDS_TREE, limit);
        let list: BuildList = self.get_typed(&endpoint, Some(&query)).await?;
        Ok(list.builds)
    }

    pub async fn get_build(&self, job_name: &str, build_number: u64) -> Result<BuildDetail, FetchError> {
        self.get_typed(&format!("{}/{}/api/json", job_path(job_name), build_number), None).await
    }

    pub async fn get_node_info(&self) -> Result<Vec<NodeInfo>, FetchError> {
        let list: NodeList = self.get_typed("/computer/api/json", Some(NODES_TREE)).await?;
        Ok(list.computer)
    }

    /// Drops every cached response and the crumb.
    pub async fn clear_cache(&self) {
        self.cache.invalidate_all();
        *self.crumb.lock().await = None;
        info!("Jenkins client cache cleared");
    }

    /// Maps an internal Jenkins link onto the public base address.
    pub fn rewrite_url(&self, url: &str) -> Option<String> {
        let public = self.public_base_url.as_deref()?;
        url.strip_prefix(self.base_url.as_str())
            .map(|rest| format!("{}{}", public, rest))
    }

    fn rewrite_urls(&self, value: &mut JsonValue) {
        if self.public_base_url.is_none() {
            return;
        }
        match value {
            JsonValue::Object(map) => {
                for (k, v) in map.iter_mut() {
                    if k == "url" {
                        if let JsonValue::String(s) = v {
                            if let Some(rewritten) = self.rewrite_url(s) {
                                *s = rewritten;
                            }
                            continue;
                        }
                    }
                    self.rewrite_urls(v);
                }
            }
            JsonValue::Array(items) => items.iter_mut().for_each(|v| self.rewrite_urls(v)),
            _ => {}
        }
    }

    async fn get_typed<T: DeserializeOwned>(&self, endpoint: &str, query: Option<&str>) -> Result<T, FetchError> {
        let value = self.get(endpoint, query).await?;
        serde_json::from_value(value).map_err(|e| FetchError::decode(endpoint, e))
    }

    /// Sends with the crumb retry protocol: state-changing requests carry the
    /// cached crumb, and a first 403 refreshes the crumb and retries exactly once.
    async fn execute(&self, method: Method, endpoint: &str) -> Result<Response, FetchError> {
        let attached = if method == Method::GET {
            None
        } else {
            self.acquire_crumb().await
        };

        let resp = self.send(method.clone(), endpoint, attached.as_ref()).await?;
        if resp.status() != StatusCode::FORBIDDEN {
            return Ok(resp);
        }

        warn!("Jenkins answered 403 for {}; refreshing crumb and retrying once", endpoint);
        let crumb = self.refresh_crumb(attached.as_ref()).await;
        let retry = self.send(method, endpoint, crumb.as_ref()).await?;
        if retry.status() == StatusCode::FORBIDDEN {
            error!("Jenkins still answered 403 for {} after crumb retry", endpoint);
            return Err(FetchError::AuthChallenge { endpoint: endpoint.to_string() });
        }
        Ok(retry)
    }

    async fn send(&self, method: Method, endpoint: &str, crumb: Option<&Crumb>) -> Result<Response, FetchError> {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, endpoint))
            .basic_auth(&self.username, Some(&self.api_token));
        if let Some(c) = crumb {
            req = req.header(c.crumb_request_field.as_str(), c.crumb.as_str());
        }
        req.send().await.map_err(|e| FetchError::from_reqwest(endpoint, e))
    }
}

/// `/job/<name>` with the name percent-encoded as a single path segment.
fn job_path(job_name: &str) -> String {
    format!("/job/{}", urlencoding::encode(job_name))
}

#[async_trait]
impl JobSource for JenkinsClient {
    async fn fetch_jobs(&self) -> Result<Vec<JobSnapshot>, FetchError> {
        self.list_jobs().await
    }

    async fn fetch_build(&self, job_name: &str, build_number: u64) -> Result<BuildDetail, FetchError> {
        self.get_build(job_name, build_number).await
    }
}
