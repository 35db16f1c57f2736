//! Trigger model.
//!
//! A [`Trigger`] couples a detection rule ([`TriggerMetadata`], one variant
//! per [`TriggerType`]) with a [`Condition`] list that the firing data must
//! satisfy.  The persisted shape is [`StoredTrigger`]: a type tag, a
//! `{ "conditions": [...] }` config object and a free-form metadata object.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowpilot_store::StoredTrigger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::condition::Condition;
use crate::error::{EngineError, Result};
use crate::schedule;

/// Polling interval used when a context-polling trigger does not name one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Shortest polling interval accepted.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Trigger type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    TimeBased,
    EventBased,
    ContextPolling,
    EmailReceived,
    CalendarEvent,
    TaskStatusChange,
    AiInsight,
    Manual,
}

impl TriggerType {
    pub const ALL: [TriggerType; 8] = [
        Self::TimeBased,
        Self::EventBased,
        Self::ContextPolling,
        Self::EmailReceived,
        Self::CalendarEvent,
        Self::TaskStatusChange,
        Self::AiInsight,
        Self::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeBased => "time_based",
            Self::EventBased => "event_based",
            Self::ContextPolling => "context_polling",
            Self::EmailReceived => "email_received",
            Self::CalendarEvent => "calendar_event",
            Self::TaskStatusChange => "task_status_change",
            Self::AiInsight => "ai_insight",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for TriggerType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| EngineError::UnknownTriggerType(s.to_string()))
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Type-specific metadata
// ---------------------------------------------------------------------------

/// Detection parameters, one variant per trigger type.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerMetadata {
    TimeBased {
        cron: String,
    },
    EventBased {
        event_name: String,
    },
    ContextPolling {
        interval: Duration,
    },
    EmailReceived {
        /// Only fire for mail whose sender contains this text.
        from: Option<String>,
    },
    CalendarEvent {
        /// Allow-list of event subtypes (`created`, `updated`, `starting`..);
        /// empty means all.
        event_types: Vec<String>,
    },
    TaskStatusChange {
        /// Statuses that fire the trigger when a task moves into them.
        target_statuses: Vec<String>,
    },
    AiInsight {
        insight_types: Vec<String>,
    },
    Manual,
}

impl TriggerMetadata {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::TimeBased { .. } => TriggerType::TimeBased,
            Self::EventBased { .. } => TriggerType::EventBased,
            Self::ContextPolling { .. } => TriggerType::ContextPolling,
            Self::EmailReceived { .. } => TriggerType::EmailReceived,
            Self::CalendarEvent { .. } => TriggerType::CalendarEvent,
            Self::TaskStatusChange { .. } => TriggerType::TaskStatusChange,
            Self::AiInsight { .. } => TriggerType::AiInsight,
            Self::Manual => TriggerType::Manual,
        }
    }

    /// Build the variant for `trigger_type` from a free-form metadata object.
    pub fn from_value(trigger_type: TriggerType, metadata: &Value) -> Result<Self> {
        let empty = Map::new();
        let obj = match metadata {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(EngineError::InvalidTriggerMetadata {
                    trigger_type: trigger_type.to_string(),
                    reason: format!("expected an object, got {other}"),
                });
            }
        };
        let fields = MetadataFields { trigger_type, obj };

        let parsed = match trigger_type {
            TriggerType::TimeBased => {
                let cron = fields.required_str("cron")?;
                schedule::parse_schedule(&cron)?;
                Self::TimeBased { cron }
            }
            TriggerType::EventBased => Self::EventBased {
                event_name: fields.required_str("event_name")?,
            },
            TriggerType::ContextPolling => {
                let interval = match obj.get("interval_secs") {
                    None | Some(Value::Null) => DEFAULT_POLL_INTERVAL,
                    Some(v) => {
                        let secs = v.as_u64().ok_or_else(|| fields.invalid("`interval_secs` must be a positive integer"))?;
                        Duration::from_secs(secs)
                    }
                };
                if interval < MIN_POLL_INTERVAL {
                    return Err(fields.invalid(format!(
                        "polling interval must be at least {}s",
                        MIN_POLL_INTERVAL.as_secs()
                    )));
                }
                Self::ContextPolling { interval }
            }
            TriggerType::EmailReceived => Self::EmailReceived {
                from: fields.optional_str("from")?,
            },
            TriggerType::CalendarEvent => Self::CalendarEvent {
                event_types: fields.string_list("event_types")?,
            },
            TriggerType::TaskStatusChange => Self::TaskStatusChange {
                target_statuses: fields.string_list("target_statuses")?,
            },
            TriggerType::AiInsight => Self::AiInsight {
                insight_types: fields.string_list("insight_types")?,
            },
            TriggerType::Manual => Self::Manual,
        };
        Ok(parsed)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::TimeBased { cron } => json!({ "cron": cron }),
            Self::EventBased { event_name } => json!({ "event_name": event_name }),
            Self::ContextPolling { interval } => json!({ "interval_secs": interval.as_secs() }),
            Self::EmailReceived { from } => match from {
                Some(from) => json!({ "from": from }),
                None => json!({}),
            },
            Self::CalendarEvent { event_types } => json!({ "event_types": event_types }),
            Self::TaskStatusChange { target_statuses } => json!({ "target_statuses": target_statuses }),
            Self::AiInsight { insight_types } => json!({ "insight_types": insight_types }),
            Self::Manual => json!({}),
        }
    }
}

struct MetadataFields<'a> {
    trigger_type: TriggerType,
    obj: &'a Map<String, Value>,
}

impl MetadataFields<'_> {
    fn required_str(&self, field: &str) -> Result<String> {
        match self.optional_str(field)? {
            Some(s) => Ok(s),
            None => Err(EngineError::MissingTriggerMetadata {
                trigger_type: self.trigger_type.to_string(),
                field: field.to_string(),
            }),
        }
    }

    fn optional_str(&self, field: &str) -> Result<Option<String>> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(_) => Err(self.invalid(format!("`{field}` must be a string"))),
        }
    }

    fn string_list(&self, field: &str) -> Result<Vec<String>> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(format!("`{field}` must be a list of strings")))
                })
                .collect(),
            Some(_) => Err(self.invalid(format!("`{field}` must be a list of strings"))),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidTriggerMetadata {
            trigger_type: self.trigger_type.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Everything needed to register a trigger, before it has an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub metadata: TriggerMetadata,
    pub conditions: Vec<Condition>,
    pub enabled: bool,
}

impl TriggerSpec {
    pub fn new(metadata: TriggerMetadata) -> Self {
        Self {
            metadata,
            conditions: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build a spec from the loosely typed parts a caller supplies.
    pub fn from_parts(trigger_type: &str, metadata: &Value, conditions: &Value) -> Result<Self> {
        let trigger_type: TriggerType = trigger_type.parse()?;
        let metadata = TriggerMetadata::from_value(trigger_type, metadata)?;
        let conditions = match conditions {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other.clone())?,
        };
        Ok(Self::new(metadata).with_conditions(conditions))
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.metadata.trigger_type()
    }
}

/// A registered trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub id: String,
    pub owner_id: String,
    pub metadata: TriggerMetadata,
    pub conditions: Vec<Condition>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Give `spec` an identity owned by `owner_id`.
    pub fn new(owner_id: &str, spec: TriggerSpec) -> Self {
        let now = Utc::now();
        Self {
            id: generate_trigger_id(owner_id, spec.trigger_type(), now),
            owner_id: owner_id.to_string(),
            metadata: spec.metadata,
            conditions: spec.conditions,
            enabled: spec.enabled,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.metadata.trigger_type()
    }

    pub fn to_stored(&self) -> Result<StoredTrigger> {
        Ok(StoredTrigger {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            trigger_type: self.trigger_type().as_str().to_string(),
            config: json!({ "conditions": serde_json::to_value(&self.conditions)? }),
            metadata: self.metadata.to_value(),
            active: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn from_stored(stored: &StoredTrigger) -> Result<Self> {
        let trigger_type: TriggerType = stored.trigger_type.parse()?;
        let conditions = match stored.config.get("conditions") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v.clone())?,
        };
        Ok(Self {
            id: stored.id.clone(),
            owner_id: stored.owner_id.clone(),
            metadata: TriggerMetadata::from_value(trigger_type, &stored.metadata)?,
            conditions,
            enabled: stored.active,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }

    /// JSON view for listings and the execution's trigger snapshot.
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "owner_id": self.owner_id,
            "type": self.trigger_type(),
            "metadata": self.metadata.to_value(),
            "conditions": self.conditions,
            "enabled": self.enabled,
            "created_at": self.created_at,
        })
    }
}

/// `trg_{owner}_{type}_{unix_millis}_{8 hex}`; the hex suffix comes from a
/// v7 UUID's random bits so ids stay unique within one millisecond.
pub fn generate_trigger_id(owner_id: &str, trigger_type: TriggerType, at: DateTime<Utc>) -> String {
    let simple = Uuid::now_v7().simple().to_string();
    let suffix = &simple[simple.len() - 8..];
    format!(
        "trg_{owner_id}_{}_{}_{suffix}",
        trigger_type.as_str(),
        at.timestamp_millis()
    )
}
