//! Repositories over the AIpply store: per-user application collections,
//! the global opportunity catalog with its cascade delete, per-user saved
//! lists, and the store-backed user registry.

use std::fmt;

use aipply_core::{
    mint_opportunity_id, normalize_tags, Application, ApplicationDraft, ApplicationStatus,
    Opportunity, OpportunityDraft, SavedOpportunity, UserProfile,
};
use aipply_store::{KvStore, StoreError};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub const CRATE_NAME: &str = "aipply-repos";

pub const GLOBAL_OPPORTUNITIES_KEY: &str = "opportunities";
pub const USERS_KEY: &str = "users";

pub fn applications_key(user_email: &str) -> String {
    format!("applications_{user_email}")
}

pub fn user_opportunities_key(user_email: &str) -> String {
    format!("user_opportunities_{user_email}")
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0}")]
    Validation(String),
    #[error("no entry with id {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("serializing collection {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
    #[error("cascade delete of {opportunity_id} applied partially: {report}")]
    CascadePartial {
        opportunity_id: String,
        report: CascadeReport,
    },
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("user registry payload: {0}")]
    Payload(serde_json::Error),
}

/// Partial update applied by [`ProfileService::update_profile`]; absent
/// fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub opportunity_preferences: Option<String>,
    pub is_admin: Option<bool>,
    pub recommended_opportunity_ids: Option<Vec<String>>,
}

/// Boundary to the service owning user identity and the admin-curated
/// recommendation sets. The opportunity repository consumes it read-mostly;
/// only the cascade delete writes back through it.
pub trait ProfileService {
    fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, ProfileError>;
    fn create_profile(&self, profile: UserProfile) -> Result<(), ProfileError>;
    fn update_profile(&self, uid: &str, update: ProfileUpdate)
        -> Result<UserProfile, ProfileError>;
    fn list_all_profiles(&self) -> Result<Vec<UserProfile>, ProfileError>;

    /// Unions `ids` into the profile's recommendation set, keeping existing
    /// order and dropping duplicates.
    fn recommend(&self, uid: &str, ids: &[String]) -> Result<UserProfile, ProfileError> {
        let profile = self
            .get_profile(uid)?
            .ok_or_else(|| ProfileError::NotFound(uid.to_string()))?;
        let mut merged = profile.recommended_opportunity_ids.unwrap_or_default();
        for id in ids {
            if !merged.contains(id) {
                merged.push(id.clone());
            }
        }
        self.update_profile(
            uid,
            ProfileUpdate {
                recommended_opportunity_ids: Some(merged),
                ..ProfileUpdate::default()
            },
        )
    }

    fn set_admin(&self, uid: &str, is_admin: bool) -> Result<UserProfile, ProfileError> {
        self.update_profile(
            uid,
            ProfileUpdate {
                is_admin: Some(is_admin),
                ..ProfileUpdate::default()
            },
        )
    }
}

/// User registry persisted as an ordered sequence under the `users` key.
#[derive(Debug)]
pub struct KvProfileService<'a, S: KvStore> {
    store: &'a S,
}

impl<'a, S: KvStore> KvProfileService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn persist(&self, profiles: &[UserProfile]) -> Result<(), ProfileError> {
        let raw = serde_json::to_string(profiles).map_err(ProfileError::Payload)?;
        self.store.set(USERS_KEY, &raw)?;
        Ok(())
    }
}

impl<S: KvStore> ProfileService for KvProfileService<'_, S> {
    fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, ProfileError> {
        let profiles: Vec<UserProfile> = load_collection(self.store, USERS_KEY);
        Ok(profiles.into_iter().find(|p| p.id == uid))
    }

    fn create_profile(&self, profile: UserProfile) -> Result<(), ProfileError> {
        let mut profiles: Vec<UserProfile> = load_collection(self.store, USERS_KEY);
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => profiles.push(profile),
        }
        self.persist(&profiles)
    }

    fn update_profile(
        &self,
        uid: &str,
        update: ProfileUpdate,
    ) -> Result<UserProfile, ProfileError> {
        let mut profiles: Vec<UserProfile> = load_collection(self.store, USERS_KEY);
        let profile = profiles
            .iter_mut()
            .find(|p| p.id == uid)
            .ok_or_else(|| ProfileError::NotFound(uid.to_string()))?;

        if let Some(full_name) = update.full_name {
            profile.full_name = full_name;
        }
        if let Some(preferences) = update.opportunity_preferences {
            profile.opportunity_preferences = preferences;
        }
        if let Some(is_admin) = update.is_admin {
            profile.is_admin = is_admin;
        }
        if let Some(ids) = update.recommended_opportunity_ids {
            profile.recommended_opportunity_ids = Some(ids);
        }
        profile.updated_at = Utc::now();

        let updated = profile.clone();
        self.persist(&profiles)?;
        Ok(updated)
    }

    fn list_all_profiles(&self) -> Result<Vec<UserProfile>, ProfileError> {
        match self.store.get(USERS_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(ProfileError::Payload),
            None => Ok(Vec::new()),
        }
    }
}

/// CRUD over one user's application collection, keyed by
/// `applications_<email>`. Constructed per session; the store handle is
/// injected rather than held globally.
#[derive(Debug)]
pub struct ApplicationRepository<'a, S: KvStore> {
    store: &'a S,
    key: String,
}

impl<'a, S: KvStore> ApplicationRepository<'a, S> {
    pub fn new(store: &'a S, user_email: &str) -> Self {
        Self {
            store,
            key: applications_key(user_email),
        }
    }

    /// Stored collection, or empty when the key is absent or unparsable.
    pub fn load(&self) -> Vec<Application> {
        load_collection(self.store, &self.key)
    }

    /// Validates the draft, mints an id, inserts at the head (newest first),
    /// and persists before returning the updated sequence.
    pub fn add(&self, draft: ApplicationDraft) -> Result<Vec<Application>, RepoError> {
        if draft.name.trim().is_empty()
            || draft.position.trim().is_empty()
            || draft.applicant.trim().is_empty()
        {
            return Err(RepoError::Validation(
                "name, position, and applicant are required".to_string(),
            ));
        }

        let mut applications = self.load();
        applications.insert(0, Application::from_draft(draft));
        persist_collection(self.store, &self.key, &applications)?;
        Ok(applications)
    }

    /// Replaces the status of the matching entry in place; ordering and all
    /// other fields are untouched.
    pub fn change_status(
        &self,
        id: &str,
        status: ApplicationStatus,
    ) -> Result<Vec<Application>, RepoError> {
        let mut applications = self.load();
        let application = applications
            .iter_mut()
            .find(|app| app.id == id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        application.status = status;
        persist_collection(self.store, &self.key, &applications)?;
        Ok(applications)
    }

    /// Removes the matching entry, preserving the order of the rest.
    /// Deleting an absent id is a no-op.
    pub fn delete(&self, id: &str) -> Result<Vec<Application>, RepoError> {
        let mut applications = self.load();
        applications.retain(|app| app.id != id);
        persist_collection(self.store, &self.key, &applications)?;
        Ok(applications)
    }
}

/// Result of [`OpportunityRepository::save_for_user`]. Saving twice is an
/// idempotent no-op, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Vec<SavedOpportunity>),
    AlreadySaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeScope {
    Catalog,
    Registry,
    SavedList,
    RecommendationSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeFailure {
    pub scope: CascadeScope,
    pub user_email: String,
    pub detail: String,
}

/// Per-step accounting for the three-scope cascade delete, so a partial
/// failure is observable instead of swallowed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeReport {
    pub catalog_removed: bool,
    pub saved_lists_updated: usize,
    pub recommendation_sets_updated: usize,
    pub failures: Vec<CascadeFailure>,
}

impl fmt::Display for CascadeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "catalog_removed={} saved_lists_updated={} recommendation_sets_updated={} failures={}",
            self.catalog_removed,
            self.saved_lists_updated,
            self.recommendation_sets_updated,
            self.failures.len()
        )
    }
}

/// CRUD over the shared opportunity catalog and per-user saved lists.
/// Holds the profile service so the cascade delete can reach recommendation
/// sets through the same boundary the rest of the system uses.
#[derive(Debug)]
pub struct OpportunityRepository<'a, S: KvStore, P: ProfileService> {
    store: &'a S,
    profiles: &'a P,
}

impl<'a, S: KvStore, P: ProfileService> OpportunityRepository<'a, S, P> {
    pub fn new(store: &'a S, profiles: &'a P) -> Self {
        Self { store, profiles }
    }

    /// Global catalog, or empty. The first load seeds an explicit empty
    /// catalog so the key exists from then on.
    pub fn load_global(&self) -> Vec<Opportunity> {
        match self.store.get(GLOBAL_OPPORTUNITIES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(catalog) => catalog,
                Err(err) => {
                    warn!(key = GLOBAL_OPPORTUNITIES_KEY, %err, "discarding unparsable catalog");
                    Vec::new()
                }
            },
            Ok(None) => {
                if let Err(err) = self.store.set(GLOBAL_OPPORTUNITIES_KEY, "[]") {
                    warn!(key = GLOBAL_OPPORTUNITIES_KEY, %err, "seeding empty catalog failed");
                }
                Vec::new()
            }
            Err(err) => {
                warn!(key = GLOBAL_OPPORTUNITIES_KEY, %err, "store read failed; starting empty");
                Vec::new()
            }
        }
    }

    pub fn load_saved(&self, user_email: &str) -> Vec<SavedOpportunity> {
        load_collection(self.store, &user_opportunities_key(user_email))
    }

    /// Validates the draft, normalizes tags and team size, mints an `opp-`
    /// id, inserts at the head, and persists the catalog.
    pub fn add_global(&self, draft: OpportunityDraft) -> Result<Vec<Opportunity>, RepoError> {
        if draft.title.trim().is_empty()
            || draft.company.trim().is_empty()
            || draft.kind.trim().is_empty()
        {
            return Err(RepoError::Validation(
                "title, company, and type are required".to_string(),
            ));
        }

        let team_size = match draft.team_size.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(text.parse::<u32>().map_err(|_| {
                RepoError::Validation(format!("team size must be a whole number, got {text:?}"))
            })?),
        };

        let opportunity = Opportunity {
            id: mint_opportunity_id(),
            title: draft.title,
            company: draft.company,
            description: draft.description,
            kind: draft.kind,
            tags: normalize_tags(&draft.tags),
            link: draft.link,
            project_stage: draft.project_stage,
            sector: draft.sector,
            business_model: draft.business_model,
            team_size,
        };

        let mut catalog = self.load_global();
        catalog.insert(0, opportunity);
        persist_collection(self.store, GLOBAL_OPPORTUNITIES_KEY, &catalog)?;
        Ok(catalog)
    }

    /// Removes an opportunity from the catalog and cascades into every
    /// user's saved list and recommendation set. Succeeds only once all
    /// three scopes are updated; any scope failing after the catalog write
    /// is reported as a single partial-cascade error carrying the per-step
    /// report. An id absent from the catalog is a no-op across all scopes.
    pub fn delete_global(&self, opportunity_id: &str) -> Result<CascadeReport, RepoError> {
        let mut catalog = self.load_global();
        let before = catalog.len();
        catalog.retain(|op| op.id != opportunity_id);
        if catalog.len() == before {
            return Ok(CascadeReport::default());
        }

        persist_collection(self.store, GLOBAL_OPPORTUNITIES_KEY, &catalog)?;
        let mut report = CascadeReport {
            catalog_removed: true,
            ..CascadeReport::default()
        };

        let profiles = match self.profiles.list_all_profiles() {
            Ok(profiles) => profiles,
            Err(err) => {
                report.failures.push(CascadeFailure {
                    scope: CascadeScope::Registry,
                    user_email: String::new(),
                    detail: err.to_string(),
                });
                return self.finish_cascade(opportunity_id, report);
            }
        };

        for profile in &profiles {
            let key = user_opportunities_key(&profile.email);
            let mut saved: Vec<SavedOpportunity> = load_collection(self.store, &key);
            let before = saved.len();
            saved.retain(|op| op.id != opportunity_id);
            if saved.len() == before {
                continue;
            }
            match persist_collection(self.store, &key, &saved) {
                Ok(()) => report.saved_lists_updated += 1,
                Err(err) => report.failures.push(CascadeFailure {
                    scope: CascadeScope::SavedList,
                    user_email: profile.email.clone(),
                    detail: err.to_string(),
                }),
            }
        }

        for profile in &profiles {
            let Some(recommended) = &profile.recommended_opportunity_ids else {
                continue;
            };
            if !recommended.iter().any(|id| id == opportunity_id) {
                continue;
            }
            let filtered: Vec<String> = recommended
                .iter()
                .filter(|id| *id != opportunity_id)
                .cloned()
                .collect();
            let update = ProfileUpdate {
                recommended_opportunity_ids: Some(filtered),
                ..ProfileUpdate::default()
            };
            match self.profiles.update_profile(&profile.id, update) {
                Ok(_) => report.recommendation_sets_updated += 1,
                Err(err) => report.failures.push(CascadeFailure {
                    scope: CascadeScope::RecommendationSet,
                    user_email: profile.email.clone(),
                    detail: err.to_string(),
                }),
            }
        }

        self.finish_cascade(opportunity_id, report)
    }

    fn finish_cascade(
        &self,
        opportunity_id: &str,
        report: CascadeReport,
    ) -> Result<CascadeReport, RepoError> {
        if report.failures.is_empty() {
            return Ok(report);
        }
        // The catalog write already landed, so the stores now disagree.
        // This must be distinguishable from a total failure.
        error!(
            opportunity_id,
            failed_scopes = report.failures.len(),
            %report,
            "cascade delete applied partially; stores are inconsistent"
        );
        Err(RepoError::CascadePartial {
            opportunity_id: opportunity_id.to_string(),
            report,
        })
    }

    /// Appends the opportunity to the user's saved list unless an entry
    /// with the same id is already present.
    pub fn save_for_user(
        &self,
        user_email: &str,
        opportunity: SavedOpportunity,
    ) -> Result<SaveOutcome, RepoError> {
        let key = user_opportunities_key(user_email);
        let mut saved: Vec<SavedOpportunity> = load_collection(self.store, &key);
        if saved.iter().any(|op| op.id == opportunity.id) {
            return Ok(SaveOutcome::AlreadySaved);
        }
        saved.push(opportunity);
        persist_collection(self.store, &key, &saved)?;
        Ok(SaveOutcome::Saved(saved))
    }

    /// Filters the entry out of the user's saved list; absent id is a no-op.
    pub fn remove_for_user(
        &self,
        user_email: &str,
        opportunity_id: &str,
    ) -> Result<Vec<SavedOpportunity>, RepoError> {
        let key = user_opportunities_key(user_email);
        let mut saved: Vec<SavedOpportunity> = load_collection(self.store, &key);
        saved.retain(|op| op.id != opportunity_id);
        persist_collection(self.store, &key, &saved)?;
        Ok(saved)
    }
}

fn load_collection<T: DeserializeOwned>(store: &impl KvStore, key: &str) -> Vec<T> {
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(err) => {
                warn!(key, %err, "discarding unparsable collection");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(key, %err, "store read failed; starting empty");
            Vec::new()
        }
    }
}

fn persist_collection<T: Serialize>(
    store: &impl KvStore,
    key: &str,
    items: &[T],
) -> Result<(), RepoError> {
    let raw = serde_json::to_string(items).map_err(|source| RepoError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw)?;
    Ok(())
}
