//! # flowpilot-store
//!
//! SQLite persistence for flowpilot.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  PreferenceStore ── CacheLayer (moka)                │
//! ├──────────────────────────────────────────────────────┤
//! │  TriggerStore  ExecutionStore (+ metrics)            │
//! │  TaskStore  CalendarStore  EmailStore                │
//! │  ActivityStore  AccountStore                         │
//! ├──────────────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking)             │
//! │  Migrations (versioned, transactional)               │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use flowpilot_store::{Database, TriggerStore};
//!
//! let db = Database::open_and_migrate("data/flowpilot.db").await?;
//! let triggers = TriggerStore::new(db.clone());
//! for t in triggers.list_active().await? {
//!     println!("{} ({})", t.id, t.trigger_type);
//! }
//! ```

pub mod account_store;
pub mod activity_store;
pub mod cache;
pub mod calendar_store;
pub mod db;
pub mod email_store;
pub mod error;
pub mod execution_store;
pub mod migration;
pub mod preference_store;
pub mod task_store;
pub mod trigger_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use account_store::{AccountStore, StoredContent, StoredIntegration};
pub use activity_store::{ActivityEntry, ActivityStore, StoredNotification};
pub use cache::{CacheLayer, CacheStats};
pub use calendar_store::{CalendarStore, NewEvent, StoredEvent};
pub use db::Database;
pub use email_store::{EmailStore, StoredEmail};
pub use error::{StoreError, StoreResult};
pub use execution_store::{ExecutionStore, StoredExecution, StoredMetrics};
pub use preference_store::{PreferenceStore, StoredPreferences};
pub use task_store::{NewTask, StoredReminder, StoredTask, TaskStore, TaskUpdate};
pub use trigger_store::{StoredTrigger, TriggerStore};

/// Every store over one shared database handle.
#[derive(Clone)]
pub struct Stores {
    pub db: Database,
    pub triggers: TriggerStore,
    pub executions: ExecutionStore,
    pub tasks: TaskStore,
    pub calendar: CalendarStore,
    pub emails: EmailStore,
    pub activity: ActivityStore,
    pub accounts: AccountStore,
    pub preferences: PreferenceStore,
}

impl Stores {
    pub fn new(db: Database) -> Self {
        Self {
            triggers: TriggerStore::new(db.clone()),
            executions: ExecutionStore::new(db.clone()),
            tasks: TaskStore::new(db.clone()),
            calendar: CalendarStore::new(db.clone()),
            emails: EmailStore::new(db.clone()),
            activity: ActivityStore::new(db.clone()),
            accounts: AccountStore::new(db.clone()),
            preferences: PreferenceStore::new(db.clone()),
            db,
        }
    }

    /// Fresh migrated in-memory database; convenient for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self::new(db))
    }
}
