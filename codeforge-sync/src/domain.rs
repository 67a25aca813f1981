//! Application domains, storage keys and the events that change them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A group of entities persisted under a common key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Domain {
    Files,
    Models,
    Components,
    ComponentTrees,
    Workflows,
    Lambdas,
    Theme,
    Settings,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Files,
        Domain::Models,
        Domain::Components,
        Domain::ComponentTrees,
        Domain::Workflows,
        Domain::Lambdas,
        Domain::Theme,
        Domain::Settings,
    ];

    /// Domains holding many entities keyed by id.
    pub const COLLECTIONS: [Domain; 6] = [
        Domain::Files,
        Domain::Models,
        Domain::Components,
        Domain::ComponentTrees,
        Domain::Workflows,
        Domain::Lambdas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Models => "models",
            Self::Components => "components",
            Self::ComponentTrees => "componentTrees",
            Self::Workflows => "workflows",
            Self::Lambdas => "lambdas",
            Self::Theme => "theme",
            Self::Settings => "settings",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }

    pub fn is_collection(&self) -> bool {
        Self::COLLECTIONS.contains(self)
    }

    /// Fixed entity id of a singleton domain.
    pub fn singleton_id(&self) -> Option<&'static str> {
        match self {
            Self::Theme => Some("current"),
            Self::Settings => Some("appSettings"),
            _ => None,
        }
    }

    pub fn key(&self, id: impl Into<String>) -> StorageKey {
        StorageKey::new(*self, id)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `domain:id` key under which an entity is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey {
    pub domain: Domain,
    pub id: String,
}

impl StorageKey {
    pub fn new(domain: Domain, id: impl Into<String>) -> Self {
        Self {
            domain,
            id: id.into(),
        }
    }

    /// Splits at the first `:`. Keys with an unknown domain are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let (domain, id) = raw.split_once(':')?;
        Some(Self::new(Domain::from_name(domain)?, id))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Put,
    Delete,
}

/// A write waiting to be flushed. At most one exists per key.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub key: StorageKey,
    pub value: Option<Value>,
    /// Milliseconds since the epoch at which the change was observed.
    pub timestamp: i64,
}

impl PendingOperation {
    pub fn put(key: StorageKey, value: Value) -> Self {
        Self {
            kind: OperationKind::Put,
            key,
            value: Some(value),
            timestamp: now_millis(),
        }
    }

    pub fn delete(key: StorageKey) -> Self {
        Self {
            kind: OperationKind::Delete,
            key,
            value: None,
            timestamp: now_millis(),
        }
    }
}

/// A state change dispatched by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// An entity was created or edited.
    Upsert { domain: Domain, item: Value },
    /// A set of entities was loaded or replaced.
    UpsertMany { domain: Domain, items: Vec<Value> },
    Remove { domain: Domain, id: String },
    SetTheme(Value),
    UpdateSettings(Value),
}

impl StateChange {
    pub fn domain(&self) -> Domain {
        match self {
            Self::Upsert { domain, .. }
            | Self::UpsertMany { domain, .. }
            | Self::Remove { domain, .. } => *domain,
            Self::SetTheme(_) => Domain::Theme,
            Self::UpdateSettings(_) => Domain::Settings,
        }
    }

    /// True for edits to collection entities, which count toward auto-sync.
    pub fn is_tracked_edit(&self) -> bool {
        matches!(self, Self::Upsert { .. } | Self::Remove { .. }) && self.domain().is_collection()
    }

    /// Operations this change requires. Items without an id are skipped.
    pub fn operations(&self) -> Vec<PendingOperation> {
        match self {
            Self::Upsert { domain, item } => upsert(*domain, item).into_iter().collect(),
            Self::UpsertMany { domain, items } => {
                items.iter().filter_map(|item| upsert(*domain, item)).collect()
            }
            Self::Remove { domain, id } if !id.is_empty() => {
                vec![PendingOperation::delete(domain.key(id.as_str()))]
            }
            Self::Remove { .. } => Vec::new(),
            Self::SetTheme(value) => singleton(Domain::Theme, value),
            Self::UpdateSettings(value) => singleton(Domain::Settings, value),
        }
    }
}

fn singleton(domain: Domain, value: &Value) -> Vec<PendingOperation> {
    domain
        .singleton_id()
        .map(|id| PendingOperation::put(domain.key(id), value.clone()))
        .into_iter()
        .collect()
}

fn upsert(domain: Domain, item: &Value) -> Option<PendingOperation> {
    let id = entity_id(item)?;
    let mut value = item.clone();
    if let Value::Object(map) = &mut value {
        map.insert("updatedAt".to_string(), Value::from(now_millis()));
    }
    Some(PendingOperation::put(domain.key(id), value))
}

/// The entity's `id` field, if it is a non-empty string or a number.
pub fn entity_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
