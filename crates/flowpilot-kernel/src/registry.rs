//! Integration connectivity registry.
//!
//! Tracks, per owner, which third-party providers (email, calendar, slack,
//! ...) are connected and active.  Action preconditions consult it before
//! dispatching work that needs a provider.
//!
//! Internally the registry is backed by [`DashMap`] which provides lock-free
//! concurrent reads and fine-grained write locking, making it safe to share
//! across tasks without a global `RwLock`.
//!
//! # Example
//!
//! ```rust
//! # use flowpilot_kernel::registry::{IntegrationRegistry, IntegrationStatus};
//! let registry = IntegrationRegistry::new();
//! registry.register("owner-1", "slack", IntegrationStatus::Connected, true);
//!
//! assert!(registry.is_connected("owner-1", "slack"));
//! assert!(!registry.is_connected("owner-2", "slack"));
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Connection status of an owner's integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    /// Credentials are valid and the provider is reachable.
    Connected,
    /// The owner disconnected the provider or never finished connecting.
    Disconnected,
    /// The last sync failed.
    Error,
}

impl IntegrationStatus {
    /// Parse the persisted string form; unknown values map to `Disconnected`.
    pub fn parse(s: &str) -> Self {
        match s {
            "connected" => Self::Connected,
            "error" => Self::Error,
            _ => Self::Disconnected,
        }
    }

    /// The persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

/// Connectivity snapshot of one `(owner, provider)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationInfo {
    pub owner_id: String,
    /// Provider name (e.g. "email", "google_calendar", "slack").
    pub provider: String,
    pub status: IntegrationStatus,
    /// Whether the owner has the integration switched on.
    pub active: bool,
    pub updated_at: DateTime<Utc>,
    /// If `status == Error`, contains a human-readable error message.
    pub last_error: Option<String>,
}

type Key = (String, String);

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent integration registry backed by [`DashMap`].
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct IntegrationRegistry {
    inner: Arc<DashMap<Key, IntegrationInfo>>,
}

impl IntegrationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Register or overwrite the state of an owner's integration.
    pub fn register(
        &self,
        owner_id: impl Into<String>,
        provider: impl Into<String>,
        status: IntegrationStatus,
        active: bool,
    ) {
        let owner_id = owner_id.into();
        let provider = provider.into();

        tracing::debug!(owner_id = %owner_id, provider = %provider, ?status, active, "integration registered");

        self.inner.insert(
            (owner_id.clone(), provider.clone()),
            IntegrationInfo {
                owner_id,
                provider,
                status,
                active,
                updated_at: Utc::now(),
                last_error: None,
            },
        );
    }

    /// Remove an integration.  Returns the removed entry if it existed.
    pub fn unregister(&self, owner_id: &str, provider: &str) -> Option<IntegrationInfo> {
        self.inner
            .remove(&(owner_id.to_string(), provider.to_string()))
            .map(|(_, info)| info)
    }

    /// Retrieve a snapshot of one integration.
    pub fn get(&self, owner_id: &str, provider: &str) -> Result<IntegrationInfo> {
        self.inner
            .get(&(owner_id.to_string(), provider.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KernelError::IntegrationNotFound {
                owner_id: owner_id.to_string(),
                provider: provider.to_string(),
            })
    }

    /// Update the status of a registered integration.
    pub fn set_status(&self, owner_id: &str, provider: &str, status: IntegrationStatus) -> Result<()> {
        let mut entry = self
            .inner
            .get_mut(&(owner_id.to_string(), provider.to_string()))
            .ok_or_else(|| KernelError::IntegrationNotFound {
                owner_id: owner_id.to_string(),
                provider: provider.to_string(),
            })?;

        let old = entry.status;
        entry.status = status;
        entry.updated_at = Utc::now();

        // Clear the error message when transitioning away from Error.
        if old == IntegrationStatus::Error && status != IntegrationStatus::Error {
            entry.last_error = None;
        }

        tracing::debug!(
            owner_id = %owner_id,
            provider = %provider,
            old_status = ?old,
            new_status = ?status,
            "integration status changed"
        );
        Ok(())
    }

    /// Record a failed sync with an error message.
    pub fn set_error(&self, owner_id: &str, provider: &str, error: impl Into<String>) -> Result<()> {
        let mut entry = self
            .inner
            .get_mut(&(owner_id.to_string(), provider.to_string()))
            .ok_or_else(|| KernelError::IntegrationNotFound {
                owner_id: owner_id.to_string(),
                provider: provider.to_string(),
            })?;

        let error = error.into();
        entry.status = IntegrationStatus::Error;
        entry.last_error = Some(error.clone());
        entry.updated_at = Utc::now();

        tracing::warn!(owner_id = %owner_id, provider = %provider, error = %error, "integration entered error state");
        Ok(())
    }

    /// Whether the provider is connected *and* active for the owner.
    pub fn is_connected(&self, owner_id: &str, provider: &str) -> bool {
        self.inner
            .get(&(owner_id.to_string(), provider.to_string()))
            .map(|e| e.status == IntegrationStatus::Connected && e.active)
            .unwrap_or(false)
    }

    /// All integrations known for an owner.
    pub fn list_for_owner(&self, owner_id: &str) -> Vec<IntegrationInfo> {
        let mut list: Vec<IntegrationInfo> = self
            .inner
            .iter()
            .filter(|e| e.key().0 == owner_id)
            .map(|e| e.value().clone())
            .collect();
        list.sort_by(|a, b| a.provider.cmp(&b.provider));
        list
    }

    /// Return the total number of registered integrations.
    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

impl Default for IntegrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_retrieve() {
        let registry = IntegrationRegistry::new();
        registry.register("o1", "email", IntegrationStatus::Connected, true);

        let info = registry.get("o1", "email").expect("integration should exist");
        assert_eq!(info.provider, "email");
        assert_eq!(info.status, IntegrationStatus::Connected);
        assert!(registry.is_connected("o1", "email"));
    }

    #[test]
    fn inactive_integration_is_not_connected() {
        let registry = IntegrationRegistry::new();
        registry.register("o1", "slack", IntegrationStatus::Connected, false);
        assert!(!registry.is_connected("o1", "slack"));
    }

    #[test]
    fn owners_are_isolated() {
        let registry = IntegrationRegistry::new();
        registry.register("o1", "slack", IntegrationStatus::Connected, true);
        assert!(!registry.is_connected("o2", "slack"));
        assert!(registry.get("o2", "slack").is_err());
    }

    #[test]
    fn error_state_with_message() {
        let registry = IntegrationRegistry::new();
        registry.register("o1", "github", IntegrationStatus::Connected, true);

        registry.set_error("o1", "github", "token revoked").expect("set error");
        let info = registry.get("o1", "github").unwrap();
        assert_eq!(info.status, IntegrationStatus::Error);
        assert_eq!(info.last_error.as_deref(), Some("token revoked"));
        assert!(!registry.is_connected("o1", "github"));

        // Transitioning away from error clears the message.
        registry
            .set_status("o1", "github", IntegrationStatus::Connected)
            .expect("recover");
        let info = registry.get("o1", "github").unwrap();
        assert!(info.last_error.is_none());
    }

    #[test]
    fn list_for_owner_sorted() {
        let registry = IntegrationRegistry::new();
        registry.register("o1", "slack", IntegrationStatus::Connected, true);
        registry.register("o1", "email", IntegrationStatus::Disconnected, true);
        registry.register("o2", "email", IntegrationStatus::Connected, true);

        let list = registry.list_for_owner("o1");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].provider, "email");
        assert_eq!(registry.count(), 3);

        assert!(registry.unregister("o1", "slack").is_some());
        assert!(registry.unregister("o1", "slack").is_none());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            IntegrationStatus::Connected,
            IntegrationStatus::Disconnected,
            IntegrationStatus::Error,
        ] {
            assert_eq!(IntegrationStatus::parse(s.as_str()), s);
        }
        assert_eq!(IntegrationStatus::parse("bogus"), IntegrationStatus::Disconnected);
    }
}
