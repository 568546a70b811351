//! Application registry backed by DashMap with optional MongoDB write-through
//!
//! ## Thread Safety
//!
//! Name uniqueness is claimed through the `names` index entry API, so two
//! concurrent registrations of the same name cannot both succeed.

use bson::doc;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::db::{MongoClient, MongoCollection};
use crate::db::schemas::APPLICATION_COLLECTION;
use crate::registry::{Application, RegisterApplication};
use crate::types::VestibuleError;

/// Registry of remote applications
pub struct ApplicationRegistry {
    /// id → record
    apps: DashMap<String, Application>,
    /// name → id, claims uniqueness
    names: DashMap<String, String>,
    /// MongoDB collection for persistent backing (None = memory-only)
    db: Option<MongoCollection<Application>>,
}

impl ApplicationRegistry {
    /// Create a memory-only registry
    pub fn memory_only() -> Self {
        Self {
            apps: DashMap::new(),
            names: DashMap::new(),
            db: None,
        }
    }

    /// Create a registry backed by MongoDB, loading existing records
    pub async fn with_mongo(mongo: &MongoClient) -> Result<Self, VestibuleError> {
        let collection = mongo.collection::<Application>(APPLICATION_COLLECTION).await?;
        let existing = collection.find_many(doc! {}).await?;

        let registry = Self {
            apps: DashMap::new(),
            names: DashMap::new(),
            db: Some(collection),
        };

        for app in existing {
            if registry.names.contains_key(&app.name) {
                warn!(name = %app.name, id = %app.id, "Skipping duplicate application name from MongoDB");
                continue;
            }
            registry.names.insert(app.name.clone(), app.id.clone());
            registry.apps.insert(app.id.clone(), app);
        }

        info!(
            count = registry.apps.len(),
            db = mongo.db_name(),
            "Loaded applications from MongoDB"
        );

        Ok(registry)
    }

    /// Register a new application
    ///
    /// A duplicate name fails with `Conflict` and leaves no partial state.
    pub async fn register(&self, request: RegisterApplication) -> Result<Application, VestibuleError> {
        let app = request.into_application()?;

        match self.names.entry(app.name.clone()) {
            Entry::Occupied(_) => {
                return Err(VestibuleError::Conflict {
                    field: "name",
                    value: app.name,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(app.id.clone());
            }
        }

        if let Some(ref db) = self.db {
            if let Err(e) = db.insert_one(&app).await {
                self.names.remove(&app.name);
                return Err(e);
            }
        }

        self.apps.insert(app.id.clone(), app.clone());

        info!(
            id = %app.id,
            name = %app.name,
            kind = ?app.integration_kind,
            "Registered application"
        );

        Ok(app)
    }

    /// Get an application by id, active or not
    pub fn get(&self, id: &str) -> Option<Application> {
        self.apps.get(id).map(|entry| entry.value().clone())
    }

    /// Get an application only if it exists and is active
    pub fn get_active(&self, id: &str) -> Option<Application> {
        self.get(id).filter(|app| app.active)
    }

    /// List active applications, ordered by name
    pub fn list_active(&self) -> Vec<Application> {
        let mut apps: Vec<Application> = self
            .apps
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.value().clone())
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }

    /// Toggle the active flag (admin action)
    pub async fn set_active(&self, id: &str, active: bool) -> Result<Application, VestibuleError> {
        let now = Utc::now();

        if let Some(ref db) = self.db {
            let matched = db
                .update_one(
                    doc! { "id": id },
                    doc! { "$set": { "active": active, "updatedAt": now.to_rfc3339() } },
                )
                .await?;
            if !matched {
                warn!(id = %id, "Application missing from MongoDB during active toggle");
            }
        }

        let mut entry = self
            .apps
            .get_mut(id)
            .ok_or_else(|| VestibuleError::NotFound(format!("application {id}")))?;
        entry.active = active;
        entry.updated_at = now;

        info!(id = %id, name = %entry.name, active, "Application active flag changed");

        Ok(entry.value().clone())
    }

    /// Hard delete an application (admin action)
    pub async fn delete(&self, id: &str) -> Result<Application, VestibuleError> {
        if !self.apps.contains_key(id) {
            return Err(VestibuleError::NotFound(format!("application {id}")));
        }

        if let Some(ref db) = self.db {
            db.delete_one(doc! { "id": id }).await?;
        }

        let (_, app) = self
            .apps
            .remove(id)
            .ok_or_else(|| VestibuleError::NotFound(format!("application {id}")))?;
        self.names.remove(&app.name);

        info!(id = %id, name = %app.name, "Deleted application");

        Ok(app)
    }

    /// Number of registered applications (active and inactive)
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Whether the registry holds no applications
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Whether mutations are written through to MongoDB
    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }
}
