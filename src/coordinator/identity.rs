//! Role resolution
//!
//! There is no runtime election. The bootstrap leader is the node whose
//! ordinal matches the configured default-leader ordinal; every other node
//! is a follower that reaches the cluster through the join protocol.

use crate::common::{ClusterConfig, NodeIdentity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

pub fn resolve_role(identity: &NodeIdentity, cluster: &ClusterConfig) -> Role {
    if identity.ordinal == cluster.default_leader_ordinal {
        Role::Leader
    } else {
        Role::Follower
    }
}
