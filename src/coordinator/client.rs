//! HTTP client for the local daemon's membership API

use crate::common::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    Alive,
}

/// One entry of the cluster membership as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub ordinal: u64,
    pub state: MemberState,
    /// Consensus address, when reported
    pub address: Option<String>,
    /// Reachability from the answering node, when reported
    pub reachable: Option<bool>,
}

/// Membership listing keyed by ordinal.
pub type Membership = BTreeMap<u64, MembershipRecord>;

/// Membership operations against a running daemon.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Succeeds once the daemon is ready to serve.
    async fn ready(&self) -> Result<()>;

    async fn members(&self) -> Result<Membership>;

    async fn evict(&self, ordinal: u64) -> Result<()>;
}

/// Node entry of a `/nodes` listing; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    reachable: Option<bool>,
}

#[derive(Debug, Serialize)]
struct RemoveRequest {
    id: String,
}

/// Decode a `/nodes` body into typed records.
///
/// Every key must be a positive integer ordinal: a listing with any other
/// key cannot be trusted for eviction decisions and is rejected whole.
pub fn parse_members(body: &str) -> Result<Membership> {
    let raw: HashMap<String, NodeEntry> = serde_json::from_str(body)?;
    raw.into_iter()
        .map(|(key, entry)| {
            let ordinal = key
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|o| *o > 0)
                .ok_or_else(|| Error::Decode(format!("member id {:?} is not an ordinal", key)))?;
            Ok((
                ordinal,
                MembershipRecord {
                    ordinal,
                    state: MemberState::Alive,
                    address: entry.addr,
                    reachable: entry.reachable,
                },
            ))
        })
        .collect()
}

pub struct HttpClusterClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpClusterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(path: &str, resp: &reqwest::Response) -> Result<()> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::UnexpectedStatus {
                endpoint: path.to_string(),
                status: resp.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl ClusterApi for HttpClusterClient {
    async fn ready(&self) -> Result<()> {
        let resp = self.http.get(self.url("/readyz")).send().await?;
        Self::check("/readyz", &resp)
    }

    async fn members(&self) -> Result<Membership> {
        let resp = self.http.get(self.url("/nodes")).send().await?;
        Self::check("/nodes", &resp)?;
        let body = resp.text().await?;
        parse_members(&body)
    }

    async fn evict(&self, ordinal: u64) -> Result<()> {
        let resp = self
            .http
            .delete(self.url("/remove"))
            .json(&RemoveRequest {
                id: ordinal.to_string(),
            })
            .send()
            .await?;
        Self::check("/remove", &resp)
    }
}
