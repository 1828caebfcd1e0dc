use crate::config::DirectoryConfig;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

/// Remote corporate directory able to map a provider login to an email.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn lookup_email(&self, login: &str) -> Result<Option<String>>;
}

/// Directory served over HTTP as `GET {base_url}/users/{login}`.
pub struct HttpDirectory {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    #[serde(default)]
    email: Option<String>,
}

impl HttpDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("directory base_url is not configured"))?
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build directory http client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl DirectoryLookup for HttpDirectory {
    async fn lookup_email(&self, login: &str) -> Result<Option<String>> {
        let url = format!("{}/users/{}", self.base_url, login);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("directory request for {login} failed"))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let user: DirectoryUser = response
                    .json()
                    .await
                    .with_context(|| format!("invalid directory response for {login}"))?;
                Ok(user
                    .email
                    .map(|email| email.trim().to_string())
                    .filter(|email| !email.is_empty()))
            }
            status => Err(anyhow!("directory returned {status} for {login}")),
        }
    }
}

/// Lookup results keyed by the literal login, negatives included.
#[derive(Clone, Default)]
pub struct DirectoryCache {
    entries: Arc<DashMap<String, Option<String>>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, login: &str) -> Option<Option<String>> {
        self.entries.get(login).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, login: &str, email: Option<String>) {
        self.entries.insert(login.to_string(), email);
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.entries.clear();
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves provider logins to corporate emails, querying the directory at most
/// once per login until the cache is cleared. Never fails: every problem is "not found".
#[derive(Clone)]
pub struct DirectoryResolver {
    lookup: Arc<dyn DirectoryLookup>,
    cache: DirectoryCache,
}

impl DirectoryResolver {
    pub fn new(lookup: Arc<dyn DirectoryLookup>, cache: DirectoryCache) -> Self {
        Self { lookup, cache }
    }

    pub fn from_config(config: &DirectoryConfig) -> Result<Self> {
        let directory = HttpDirectory::new(config)?;
        Ok(Self::new(Arc::new(directory), DirectoryCache::new()))
    }

    pub async fn find_email_by_git_name(&self, login: &str) -> Option<String> {
        if !is_valid_login(login) {
            tracing::debug!(login, "skipping directory lookup for invalid login");
            return None;
        }
        if let Some(cached) = self.cache.get(login) {
            return cached;
        }

        let email = match self.lookup.lookup_email(login).await {
            Ok(email) => email,
            Err(err) => {
                tracing::warn!(login, error = %err, "directory lookup failed; treating as not found");
                None
            }
        };
        self.cache.insert(login, email.clone());
        email
    }

    #[allow(dead_code)]
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[allow(dead_code)]
    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }
}

/// Alphanumeric with hyphens only between characters.
pub fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && !login.starts_with('-')
        && !login.ends_with('-')
        && login.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}
