//! Reqwest-backed default fetcher with an optional robots.txt gate.

use async_trait::async_trait;
use eddy_types::{AssetFetcher, CrawlError, FetchedBytes, FetchedPage, Fetcher};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Response headers the fetcher retains on the page.
const KEPT_HEADERS: &[&str] = &["content-type", "last-modified", "etag", "content-language"];

/// Default page fetcher: reqwest with rustls, gzip/brotli, a per-request
/// timeout, and optional robots.txt compliance with per-domain rule caching.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    request_delay: Duration,
    respect_robots: bool,
    user_agent: String,
    robots: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl ReqwestFetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        request_delay: Duration,
        respect_robots: bool,
    ) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            request_delay,
            respect_robots,
            user_agent: user_agent.to_string(),
            robots: Mutex::new(HashMap::new()),
        })
    }

    async fn robots_allows(&self, url: &Url) -> Result<bool, CrawlError> {
        let Some(host) = url.host_str() else {
            return Ok(true);
        };
        let key = format!("{}://{}", url.scheme(), host);

        let rules = {
            let cache = self.robots.lock().await;
            cache.get(&key).cloned()
        };
        let rules = match rules {
            Some(rules) => rules,
            None => {
                let fetched = Arc::new(self.fetch_robots(&key).await);
                self.robots.lock().await.insert(key, Arc::clone(&fetched));
                fetched
            }
        };
        Ok(rules.allows(url.path()))
    }

    async fn fetch_robots(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                let body = response.text().await.unwrap_or_default();
                RobotsRules::parse(&body, &self.user_agent)
            }
            Ok(_) | Err(_) => {
                debug!(url = %robots_url, "no robots.txt, allowing all");
                RobotsRules::allow_all()
            }
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, CrawlError> {
        if self.respect_robots && !self.robots_allows(url).await? {
            warn!(url = %url, "blocked by robots.txt");
            return Err(CrawlError::Admission {
                reason: "blocked by robots.txt".to_string(),
            });
        }
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for name in KEPT_HEADERS {
            if let Some(value) = response.headers().get(*name) {
                if let Ok(value) = value.to_str() {
                    headers.insert(name.to_string(), value.to_string());
                }
            }
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let final_url = response.url().clone();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(FetchedPage {
            url: final_url,
            body,
            status,
            latency: started.elapsed(),
            headers,
            retry_after,
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> CrawlError {
    if error.is_timeout() {
        CrawlError::transport(format!("request timed out: {error}"))
    } else if error.is_connect() {
        CrawlError::transport(format!("connect failed: {error}"))
    } else {
        CrawlError::transport(error.to_string())
    }
}

/// Minimal robots.txt: `User-agent` groups with `Disallow`/`Allow` prefix
/// rules; longest matching rule wins, allow beats disallow on ties.
#[derive(Debug, Default)]
struct RobotsRules {
    disallow: Vec<String>,
    allow: Vec<String>,
}

impl RobotsRules {
    fn allow_all() -> Self {
        Self::default()
    }

    fn parse(body: &str, user_agent: &str) -> Self {
        let agent_token = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .to_ascii_lowercase();

        let mut groups: Vec<(HashSet<String>, RobotsRules)> = Vec::new();
        let mut pending_agents: HashSet<String> = HashSet::new();

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim().to_string();

            match field.as_str() {
                "user-agent" => {
                    pending_agents.insert(value.to_ascii_lowercase());
                }
                "disallow" | "allow" => {
                    // The first rule line seals the accumulated agent list
                    // into a group.
                    if !pending_agents.is_empty() {
                        groups.push((
                            std::mem::take(&mut pending_agents),
                            RobotsRules::default(),
                        ));
                    }
                    if let Some((_, rules)) = groups.last_mut() {
                        if !value.is_empty() {
                            if field == "disallow" {
                                rules.disallow.push(value);
                            } else {
                                rules.allow.push(value);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // Prefer a group naming us, else the wildcard group.
        let mut wildcard = None;
        for (agents, rules) in groups {
            if agents.contains(&agent_token) {
                return rules;
            }
            if agents.contains("*") && wildcard.is_none() {
                wildcard = Some(rules);
            }
        }
        wildcard.unwrap_or_default()
    }

    fn allows(&self, path: &str) -> bool {
        let disallow = self
            .disallow
            .iter()
            .filter(|rule| path.starts_with(rule.as_str()))
            .map(|rule| rule.len())
            .max();
        let Some(disallow_len) = disallow else {
            return true;
        };
        let allow = self
            .allow
            .iter()
            .filter(|rule| path.starts_with(rule.as_str()))
            .map(|rule| rule.len())
            .max();
        allow.is_some_and(|allow_len| allow_len >= disallow_len)
    }
}

/// Default asset-bytes fetcher sharing the page client's configuration.
pub struct ReqwestAssetFetcher {
    client: reqwest::Client,
}

impl ReqwestAssetFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Config(format!("asset http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for ReqwestAssetFetcher {
    async fn fetch_bytes(&self, url: &Url) -> Result<FetchedBytes, CrawlError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CrawlError::Asset(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CrawlError::Asset(format!(
                "asset status {} for {url}",
                response.status().as_u16()
            )));
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Asset(e.to_string()))?;
        Ok(FetchedBytes {
            url: url.clone(),
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
