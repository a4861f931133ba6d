use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    RealEstate,
    CorporateStock,
    GovernmentBond,
    Commodity,
    PrivateEquity,
    ArtCollectible,
    CarbonCredit,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Activating,
    Active,
    Paused,
    Archived,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketStatus::Draft => "draft",
            MarketStatus::PendingApproval => "pending_approval",
            MarketStatus::Approved => "approved",
            MarketStatus::Rejected => "rejected",
            MarketStatus::Activating => "activating",
            MarketStatus::Active => "active",
            MarketStatus::Paused => "paused",
            MarketStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl MarketStatus {
    /// Legal transitions of the market lifecycle. `activating -> approved`
    /// is the deployment-failure rollback edge.
    pub fn can_transition_to(self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        matches!(
            (self, next),
            (Draft, PendingApproval)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (Approved, Activating)
                | (Activating, Active)
                | (Activating, Approved)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Archived)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MarketStatus::Archived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Market {
    pub id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub issuer_id: Option<String>,
    pub asset_category: AssetCategory,
    pub status: MarketStatus,
    pub token_symbol: String,
    pub token_name: String,
    pub total_supply: BigDecimal,
    pub contract_address: Option<String>,
    pub deployment_tx_hash: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketAsset {
    pub id: Uuid,
    pub market_id: Uuid,
    pub valuation: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub compliance_document_ids: Vec<String>,
    pub regulatory_info: Value,
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row for every lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketApprovalEvent {
    pub id: Uuid,
    pub market_id: Uuid,
    pub actor_id: String,
    pub decision: String,
    pub from_status: MarketStatus,
    pub to_status: MarketStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_accepts_the_diagram_edges() {
        use MarketStatus::*;
        assert!(Draft.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Activating));
        assert!(Activating.can_transition_to(Active));
        assert!(Activating.can_transition_to(Approved));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Archived));
    }

    #[test]
    fn lifecycle_rejects_shortcuts() {
        use MarketStatus::*;
        assert!(!Draft.can_transition_to(Active));
        assert!(!Draft.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Archived.can_transition_to(Active));
        assert!(!Paused.can_transition_to(Archived));
        assert!(Archived.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&MarketStatus::PendingApproval).unwrap();
        assert_eq!(s, "\"pending_approval\"");
    }
}
