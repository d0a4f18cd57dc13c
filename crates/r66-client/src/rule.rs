//! Transfer rules and the rule catalog

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Direction and options of a rule, with the R66 numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleMode {
    /// Requester sends
    Send = 1,
    /// Requester receives
    Recv = 2,
    /// Send with MD5 check
    SendMd5 = 3,
    /// Receive with MD5 check
    RecvMd5 = 4,
    /// Send in through mode
    SendThrough = 5,
    /// Receive in through mode
    RecvThrough = 6,
    /// Send in through mode with MD5 check
    SendMd5Through = 7,
    /// Receive in through mode with MD5 check
    RecvMd5Through = 8,
}

impl RuleMode {
    /// Whether the rule only authorises the receive direction.
    pub fn is_recv(self) -> bool {
        matches!(
            self,
            RuleMode::Recv | RuleMode::RecvMd5 | RuleMode::RecvThrough | RuleMode::RecvMd5Through
        )
    }
}

impl FromStr for RuleMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "1" | "send" => RuleMode::Send,
            "2" | "recv" => RuleMode::Recv,
            "3" | "sendmd5" => RuleMode::SendMd5,
            "4" | "recvmd5" => RuleMode::RecvMd5,
            "5" | "sendthrough" => RuleMode::SendThrough,
            "6" | "recvthrough" => RuleMode::RecvThrough,
            "7" | "sendmd5through" => RuleMode::SendMd5Through,
            "8" | "recvmd5through" => RuleMode::RecvMd5Through,
            other => return Err(ClientError::Other(format!("Invalid rule mode: {other}"))),
        };
        Ok(mode)
    }
}

impl fmt::Display for RuleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleMode::Send => "SEND",
            RuleMode::Recv => "RECV",
            RuleMode::SendMd5 => "SENDMD5",
            RuleMode::RecvMd5 => "RECVMD5",
            RuleMode::SendThrough => "SENDTHROUGH",
            RuleMode::RecvThrough => "RECVTHROUGH",
            RuleMode::SendMd5Through => "SENDMD5THROUGH",
            RuleMode::RecvMd5Through => "RECVMD5THROUGH",
        };
        f.write_str(name)
    }
}

/// A named transfer policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule id
    pub name: String,
    /// Rule mode
    pub mode: RuleMode,
}

/// Lookup of rules and partner identities
pub trait RuleCatalog: Send + Sync {
    /// Fetch a rule by name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownRule`] when no such rule exists.
    fn rule(&self, name: &str) -> Result<Rule>;

    /// This host's id as known by `host`, used as requester in restart requests.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownHost`] when `host` is not a partner.
    fn requester_of(&self, host: &str) -> Result<String>;
}

/// Catalog whose rules and partners are declared up front
#[derive(Debug, Clone, Default)]
pub struct StaticRuleCatalog {
    host_id: String,
    rules: HashMap<String, Rule>,
    partners: HashSet<String>,
}

impl StaticRuleCatalog {
    /// Create an empty catalog for the local host `host_id`.
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            rules: HashMap::new(),
            partners: HashSet::new(),
        }
    }

    /// Declare a rule.
    #[must_use]
    pub fn with_rule(mut self, name: impl Into<String>, mode: RuleMode) -> Self {
        let name = name.into();
        self.rules.insert(name.clone(), Rule { name, mode });
        self
    }

    /// Declare a known partner host.
    #[must_use]
    pub fn with_partner(mut self, host: impl Into<String>) -> Self {
        self.partners.insert(host.into());
        self
    }

    /// Local host id.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}

impl RuleCatalog for StaticRuleCatalog {
    fn rule(&self, name: &str) -> Result<Rule> {
        self.rules
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::UnknownRule(name.to_string()))
    }

    fn requester_of(&self, host: &str) -> Result<String> {
        if self.partners.contains(host) {
            Ok(self.host_id.clone())
        } else {
            Err(ClientError::UnknownHost(host.to_string()))
        }
    }
}
