//! Audience sync adapter.
//!
//! [`AudienceSync`] works with audience names and enforces the sync contract:
//! name resolution, batch ceilings and empty-list no-ops. The HTTP work is
//! behind [`AudienceProvider`]; [`GraphAudienceClient`] talks to the Facebook
//! Marketing API custom-audience endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::AudienceConfig;
use crate::error::{AudienceError, Result};
use crate::utils::{batch_count, batches};

/// Most keys the provider accepts in one add request
pub const ADD_BATCH_CEILING: usize = 10_000;
/// Most keys the provider accepts in one remove request
pub const REMOVE_BATCH_CEILING: usize = 500;

/// An audience as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AudienceInfo {
    /// Provider id
    pub id: String,
    /// Display name, unique per account by convention
    pub name: String,
}

/// Raw audience operations against an ad platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudienceProvider: Send + Sync {
    /// Every audience of the account
    async fn list_audiences(&self) -> Result<Vec<AudienceInfo>>;

    /// Create an audience and return it
    async fn create_audience(&self, name: &str, description: &str) -> Result<AudienceInfo>;

    /// Delete an audience by id
    async fn delete_audience(&self, audience_id: &str) -> Result<()>;

    /// Add one batch of keys
    async fn add_members(&self, audience_id: &str, keys: &[String]) -> Result<()>;

    /// Remove one batch of keys
    async fn remove_members(&self, audience_id: &str, keys: &[String]) -> Result<()>;
}

#[async_trait]
impl<T: AudienceProvider + ?Sized> AudienceProvider for Arc<T> {
    async fn list_audiences(&self) -> Result<Vec<AudienceInfo>> {
        (**self).list_audiences().await
    }

    async fn create_audience(&self, name: &str, description: &str) -> Result<AudienceInfo> {
        (**self).create_audience(name, description).await
    }

    async fn delete_audience(&self, audience_id: &str) -> Result<()> {
        (**self).delete_audience(audience_id).await
    }

    async fn add_members(&self, audience_id: &str, keys: &[String]) -> Result<()> {
        (**self).add_members(audience_id, keys).await
    }

    async fn remove_members(&self, audience_id: &str, keys: &[String]) -> Result<()> {
        (**self).remove_members(audience_id, keys).await
    }
}

/// Per-request key ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Keys per add request
    pub add: usize,
    /// Keys per remove request
    pub remove: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            add: ADD_BATCH_CEILING,
            remove: REMOVE_BATCH_CEILING,
        }
    }
}

/// Name-based audience management on top of a provider
pub struct AudienceSync<P> {
    provider: P,
    limits: BatchLimits,
}

impl<P: AudienceProvider> AudienceSync<P> {
    /// Wrap a provider, clamping limits to the provider ceilings
    pub fn new(provider: P, limits: BatchLimits) -> Self {
        let limits = BatchLimits {
            add: limits.add.clamp(1, ADD_BATCH_CEILING),
            remove: limits.remove.clamp(1, REMOVE_BATCH_CEILING),
        };
        Self { provider, limits }
    }

    /// Borrow the provider
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Limits in effect
    pub const fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Look up an audience by name
    pub async fn find_audience(&self, name: &str) -> Result<Option<AudienceInfo>> {
        Ok(self.provider.list_audiences().await?.into_iter().find(|a| a.name == name))
    }

    async fn resolve(&self, name: &str, action: &str) -> Result<AudienceInfo> {
        self.find_audience(name)
            .await?
            .ok_or_else(|| AudienceError::InvalidState(format!("cannot {action}: audience {name:?} does not exist")))
    }

    /// Create a named audience; fails if the name is taken
    pub async fn create_audience(&self, name: &str, description: &str) -> Result<AudienceInfo> {
        if self.find_audience(name).await?.is_some() {
            return Err(AudienceError::InvalidState(format!("audience {name:?} already exists")));
        }
        let created = self.provider.create_audience(name, description).await?;
        info!(audience = name, id = %created.id, "Created audience");
        Ok(created)
    }

    /// Delete a named audience; fails if it does not exist
    pub async fn delete_audience(&self, name: &str) -> Result<()> {
        let audience = self.resolve(name, "delete").await?;
        self.provider.delete_audience(&audience.id).await?;
        info!(audience = name, id = %audience.id, "Deleted audience");
        Ok(())
    }

    /// Add keys in batches; returns the number of requests made
    pub async fn add_members(&self, name: &str, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            info!(audience = name, "No users to add");
            return Ok(0);
        }
        info!(
            audience = name,
            count = keys.len(),
            batches = batch_count(keys.len(), self.limits.add),
            "Adding users"
        );

        let audience = self.resolve(name, "add users").await?;
        let mut requests = 0;
        for batch in batches(keys, self.limits.add) {
            self.provider.add_members(&audience.id, batch).await?;
            requests += 1;
            debug!(audience = name, batch = requests, size = batch.len(), "Add batch sent");
        }
        Ok(requests)
    }

    /// Remove keys in batches; returns the number of requests made
    pub async fn remove_members(&self, name: &str, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            info!(audience = name, "No users to remove");
            return Ok(0);
        }
        info!(
            audience = name,
            count = keys.len(),
            batches = batch_count(keys.len(), self.limits.remove),
            "Removing users"
        );

        let audience = self.resolve(name, "remove users").await?;
        let mut requests = 0;
        for batch in batches(keys, self.limits.remove) {
            self.provider.remove_members(&audience.id, batch).await?;
            requests += 1;
            debug!(audience = name, batch = requests, size = batch.len(), "Remove batch sent");
        }
        Ok(requests)
    }
}

/// Normalize and SHA-256 hash an email the way the Graph API matches them
#[must_use]
pub fn hash_email(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Facebook Marketing API custom-audience client
pub struct GraphAudienceClient {
    client: Client,
    base_url: String,
    access_token: String,
    account_id: String,
}

impl GraphAudienceClient {
    /// Build a client for one ad account
    pub fn new(config: &AudienceConfig, account_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            account_id: account_id.trim_start_matches("act_").to_string(),
        })
    }

    fn account_url(&self) -> String {
        format!("{}/act_{}/customaudiences", self.base_url, self.account_id)
    }

    fn users_payload(keys: &[String]) -> serde_json::Value {
        let hashed: Vec<String> = keys.iter().map(|k| hash_email(k)).collect();
        json!({ "payload": { "schema": "EMAIL_SHA256", "data": hashed } })
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AudienceError::Api { status: status.as_u16(), body })
    }
}

#[async_trait]
impl AudienceProvider for GraphAudienceClient {
    async fn list_audiences(&self) -> Result<Vec<AudienceInfo>> {
        let mut audiences = Vec::new();
        let first = self
            .client
            .get(self.account_url())
            .query(&[("fields", "id,name"), ("limit", "500"), ("access_token", self.access_token.as_str())])
            .send()
            .await?;
        let mut page: Page<AudienceInfo> = Self::check(first).await?.json().await?;

        loop {
            audiences.append(&mut page.data);
            let Some(next) = page.paging.and_then(|p| p.next) else {
                break;
            };
            let response = self.client.get(next).send().await?;
            page = Self::check(response).await?.json().await?;
        }

        Ok(audiences)
    }

    async fn create_audience(&self, name: &str, description: &str) -> Result<AudienceInfo> {
        let response = self
            .client
            .post(self.account_url())
            .form(&[
                ("name", name),
                ("description", description),
                ("subtype", "CUSTOM"),
                ("customer_file_source", "USER_PROVIDED_ONLY"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?;
        let created: Created = Self::check(response).await?.json().await?;
        Ok(AudienceInfo { id: created.id, name: name.to_string() })
    }

    async fn delete_audience(&self, audience_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{audience_id}", self.base_url))
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn add_members(&self, audience_id: &str, keys: &[String]) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/{audience_id}/users", self.base_url))
            .query(&[("access_token", self.access_token.as_str())])
            .json(&Self::users_payload(keys))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn remove_members(&self, audience_id: &str, keys: &[String]) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{audience_id}/users", self.base_url))
            .query(&[("access_token", self.access_token.as_str())])
            .json(&Self::users_payload(keys))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// One call recorded by [`MemoryAudienceProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `create_audience(name)`
    Create(String),
    /// `delete_audience(id)`
    Delete(String),
    /// `add_members(id, batch_len)`
    Add(String, usize),
    /// `remove_members(id, batch_len)`
    Remove(String, usize),
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    audiences: Vec<AudienceInfo>,
    members: HashMap<String, Vec<String>>,
    calls: Vec<ProviderCall>,
}

/// In-process provider that keeps audiences and members in memory
#[derive(Debug, Default)]
pub struct MemoryAudienceProvider {
    state: Mutex<MemoryState>,
}

impl MemoryAudienceProvider {
    /// Empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Members of an audience by name, in insertion order
    #[must_use]
    pub fn members(&self, name: &str) -> Vec<String> {
        let state = self.lock();
        state
            .audiences
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| state.members.get(&a.id).cloned())
            .unwrap_or_default()
    }

    /// Names of every audience
    #[must_use]
    pub fn audience_names(&self) -> Vec<String> {
        self.lock().audiences.iter().map(|a| a.name.clone()).collect()
    }

    /// Every call made so far
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl AudienceProvider for MemoryAudienceProvider {
    async fn list_audiences(&self) -> Result<Vec<AudienceInfo>> {
        Ok(self.lock().audiences.clone())
    }

    async fn create_audience(&self, name: &str, _description: &str) -> Result<AudienceInfo> {
        let mut state = self.lock();
        state.next_id += 1;
        let audience = AudienceInfo { id: state.next_id.to_string(), name: name.to_string() };
        state.audiences.push(audience.clone());
        state.members.insert(audience.id.clone(), Vec::new());
        state.calls.push(ProviderCall::Create(name.to_string()));
        Ok(audience)
    }

    async fn delete_audience(&self, audience_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.audiences.retain(|a| a.id != audience_id);
        state.members.remove(audience_id);
        state.calls.push(ProviderCall::Delete(audience_id.to_string()));
        Ok(())
    }

    async fn add_members(&self, audience_id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.lock();
        let members = state.members.entry(audience_id.to_string()).or_default();
        for key in keys {
            if !members.contains(key) {
                members.push(key.clone());
            }
        }
        state.calls.push(ProviderCall::Add(audience_id.to_string(), keys.len()));
        Ok(())
    }

    async fn remove_members(&self, audience_id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.lock();
        if let Some(members) = state.members.get_mut(audience_id) {
            members.retain(|m| !keys.contains(m));
        }
        state.calls.push(ProviderCall::Remove(audience_id.to_string(), keys.len()));
        Ok(())
    }
}
