use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ComplianceRecord {
    pub id: Uuid,
    pub user_id: String,
    pub token_id: Option<Uuid>,
    pub kyc_status: KycStatus,
    pub kyc_level: i32,
    pub accreditation_status: Option<String>,
    pub is_whitelisted: bool,
    pub jurisdiction: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComplianceRecord {
    /// An RWA-token-scoped operation requires approved KYC, a whitelist
    /// entry, and an unexpired record.
    pub fn is_cleared(&self, now: DateTime<Utc>) -> bool {
        self.kyc_status == KycStatus::Approved
            && self.is_whitelisted
            && self.expires_at.map_or(true, |exp| now < exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(kyc: KycStatus, whitelisted: bool, expires_at: Option<DateTime<Utc>>) -> ComplianceRecord {
        let now = Utc::now();
        ComplianceRecord {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            token_id: None,
            kyc_status: kyc,
            kyc_level: 1,
            accreditation_status: None,
            is_whitelisted: whitelisted,
            jurisdiction: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cleared_requires_all_three_conditions() {
        let now = Utc::now();
        assert!(record(KycStatus::Approved, true, None).is_cleared(now));
        assert!(record(KycStatus::Approved, true, Some(now + Duration::days(1))).is_cleared(now));
        assert!(!record(KycStatus::Pending, true, None).is_cleared(now));
        assert!(!record(KycStatus::Approved, false, None).is_cleared(now));
        assert!(!record(KycStatus::Approved, true, Some(now - Duration::seconds(1))).is_cleared(now));
    }
}
