//! Core domain model for AIpply: applications, opportunities, profiles.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "aipply-core";

/// Review state of a submitted application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    Ideation,
    Prototype,
    MvpTested,
    Traction,
}

/// One applicant's submission to one opportunity. Owned by exactly one user;
/// `id` is minted at creation and never reused within that user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub position: String,
    pub applicant: String,
    pub submitted_date: NaiveDate,
    pub status: ApplicationStatus,
    pub priority: Priority,
    pub funding: Option<f64>,
    pub price: Option<f64>,
}

/// Caller-supplied fields for a new application; `id` and `status` are
/// assigned by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    pub name: String,
    pub position: String,
    pub applicant: String,
    pub submitted_date: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    pub funding: Option<f64>,
    pub price: Option<f64>,
}

impl Application {
    pub fn from_draft(draft: ApplicationDraft) -> Self {
        Self {
            id: mint_application_id(),
            name: draft.name,
            position: draft.position,
            applicant: draft.applicant,
            submitted_date: draft.submitted_date,
            status: ApplicationStatus::default(),
            priority: draft.priority,
            funding: draft.funding,
            price: draft.price,
        }
    }
}

/// Catalog-level entry describing an external opportunity. Visible to all
/// users; created and deleted by admins, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub company: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tags: Vec<String>,
    pub link: String,
    pub project_stage: Option<ProjectStage>,
    pub sector: Option<String>,
    pub business_model: Option<String>,
    pub team_size: Option<u32>,
}

/// Denormalized copy of an [`Opportunity`] taken when a user saves it,
/// keyed by the same `id`.
pub type SavedOpportunity = Opportunity;

/// Admin-supplied fields for a new catalog entry. Tags arrive as free text
/// and team size as raw input; the repository normalizes both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub title: String,
    pub company: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tags: String,
    pub link: String,
    pub project_stage: Option<ProjectStage>,
    pub sector: Option<String>,
    pub business_model: Option<String>,
    pub team_size: Option<String>,
}

/// Identity record owned by the profile service; the opportunity repository
/// consumes `recommended_opportunity_ids` read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub opportunity_preferences: String,
    #[serde(default)]
    pub is_admin: bool,
    pub recommended_opportunity_ids: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uid.into(),
            email: email.into(),
            full_name: String::new(),
            opportunity_preferences: String::new(),
            is_admin: false,
            recommended_opportunity_ids: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Application ids and opportunity ids carry distinct prefixes so the two
/// entity types can never collide if ids are compared across collections.
pub fn mint_application_id() -> String {
    format!("app-{}", Uuid::new_v4())
}

pub fn mint_opportunity_id() -> String {
    format!("opp-{}", Uuid::new_v4())
}

/// Splits a free-text tag field on commas into trimmed, non-empty tags.
pub fn normalize_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Splits the catalog into (recommended, rest) against a profile's
/// recommendation set. Both halves preserve catalog order; an absent set
/// behaves as empty, so everything lands in the remainder.
pub fn partition_by_recommendation(
    catalog: &[Opportunity],
    recommended_ids: Option<&[String]>,
) -> (Vec<Opportunity>, Vec<Opportunity>) {
    let Some(ids) = recommended_ids else {
        return (Vec::new(), catalog.to_vec());
    };
    catalog
        .iter()
        .cloned()
        .partition(|op| ids.iter().any(|id| *id == op.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_opportunity(id: &str) -> Opportunity {
        Opportunity {
            id: id.to_string(),
            title: format!("title {id}"),
            company: "Innovate Ventures".into(),
            description: String::new(),
            kind: "Accelerator".into(),
            tags: vec![],
            link: "https://example.com/apply".into(),
            project_stage: None,
            sector: None,
            business_model: None,
            team_size: None,
        }
    }

    #[test]
    fn minted_ids_are_unique_and_prefixed() {
        let a = mint_application_id();
        let b = mint_application_id();
        assert_ne!(a, b);
        assert!(a.starts_with("app-"));
        assert!(mint_opportunity_id().starts_with("opp-"));
    }

    #[test]
    fn tag_normalization_trims_and_drops_empties() {
        assert_eq!(
            normalize_tags(" AI, Fintech ,, SaaS ,"),
            vec!["AI", "Fintech", "SaaS"]
        );
        assert!(normalize_tags("  ,  ").is_empty());
    }

    #[test]
    fn partition_is_disjoint_order_preserving_and_exhaustive() {
        let catalog = vec![
            mk_opportunity("opp-1"),
            mk_opportunity("opp-2"),
            mk_opportunity("opp-3"),
        ];
        let ids = vec!["opp-3".to_string(), "opp-1".to_string()];
        let (recommended, rest) = partition_by_recommendation(&catalog, Some(&ids));

        let rec_ids: Vec<_> = recommended.iter().map(|o| o.id.as_str()).collect();
        let rest_ids: Vec<_> = rest.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(rec_ids, ["opp-1", "opp-3"]);
        assert_eq!(rest_ids, ["opp-2"]);
        assert!(recommended.iter().all(|r| rest.iter().all(|o| o.id != r.id)));
        assert_eq!(recommended.len() + rest.len(), catalog.len());
    }

    #[test]
    fn partition_with_single_recommended_entry() {
        let catalog = vec![mk_opportunity("opp-1")];
        let ids = vec!["opp-1".to_string()];
        let (recommended, rest) = partition_by_recommendation(&catalog, Some(&ids));
        assert_eq!(recommended.len(), 1);
        assert_eq!(recommended[0].id, "opp-1");
        assert!(rest.is_empty());
    }

    #[test]
    fn partition_treats_absent_set_as_empty() {
        let catalog = vec![mk_opportunity("opp-1"), mk_opportunity("opp-2")];
        let (recommended, rest) = partition_by_recommendation(&catalog, None);
        assert!(recommended.is_empty());
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn status_and_stage_serialize_as_wire_tokens() {
        assert_eq!(
            serde_json::to_string(&ApplicationStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&ProjectStage::MvpTested).unwrap(),
            "\"mvp_tested\""
        );
        let op = mk_opportunity("opp-9");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "Accelerator");
    }

    #[test]
    fn draft_defaults_produce_pending_medium_application() {
        let draft = ApplicationDraft {
            name: "Seed Grant".into(),
            position: "Founder".into(),
            applicant: "Ada".into(),
            submitted_date: "2026-08-01".parse().unwrap(),
            priority: Priority::default(),
            funding: Some(25_000.0),
            price: None,
        };
        let app = Application::from_draft(draft);
        assert_eq!(app.status, ApplicationStatus::Pending);
        assert_eq!(app.priority, Priority::Medium);
        assert!(app.id.starts_with("app-"));
    }
}
