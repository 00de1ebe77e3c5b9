use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("unrecognized value: {0}")]
pub struct ParseEnumError(pub String);

/// The three independently metered consumption categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditCategory {
    Words,
    Books,
    Offers,
}

impl CreditCategory {
    pub const ALL: [CreditCategory; 3] = [
        CreditCategory::Words,
        CreditCategory::Books,
        CreditCategory::Offers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditCategory::Words => "words",
            CreditCategory::Books => "books",
            CreditCategory::Offers => "offers",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseEnumError> {
        match raw {
            "words" => Ok(CreditCategory::Words),
            "books" => Ok(CreditCategory::Books),
            "offers" => Ok(CreditCategory::Offers),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Origin of a credit() grant. The plan bucket is deliberately absent: only
/// the subscription cycle logic may write plan allotments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditSource {
    Addon,
    Admin,
    Trial,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditSource::Addon => "addon",
            CreditSource::Admin => "admin",
            CreditSource::Trial => "trial",
        }
    }
}

/// Per-category sub-balances, tagged by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketBalance {
    pub plan_total_this_cycle: i64,
    pub used_this_cycle: i64,
    pub remaining_addon: i64,
    pub remaining_admin: i64,
    pub remaining_trial: i64,
}

impl BucketBalance {
    pub fn available(&self, trial_active: bool) -> i64 {
        let plan_left = (self.plan_total_this_cycle - self.used_this_cycle).max(0);
        let trial = if trial_active { self.remaining_trial } else { 0 };
        plan_left + self.remaining_addon + self.remaining_admin + trial
    }

    /// Drains `amount` across the buckets in fixed precedence order: plan
    /// allotment (expires at cycle end), then addons, then admin grants, then
    /// trial credits. Returns the undrainable remainder, which is zero
    /// whenever the caller checked sufficiency first.
    pub fn drain(&mut self, amount: i64, trial_active: bool) -> i64 {
        let mut left = amount;

        let plan_headroom = (self.plan_total_this_cycle - self.used_this_cycle).max(0);
        let from_plan = plan_headroom.min(left);
        self.used_this_cycle += from_plan;
        left -= from_plan;

        let from_addon = self.remaining_addon.min(left);
        self.remaining_addon -= from_addon;
        left -= from_addon;

        let from_admin = self.remaining_admin.min(left);
        self.remaining_admin -= from_admin;
        left -= from_admin;

        if trial_active {
            let from_trial = self.remaining_trial.min(left);
            self.remaining_trial -= from_trial;
            left -= from_trial;
        }

        left
    }
}

/// One balance document per user, mutated in place and guarded by `version`
/// for optimistic concurrency. The transaction log is the source of truth;
/// this is the materialized view the spend path reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: Uuid,
    pub words: BucketBalance,
    pub books: BucketBalance,
    pub offers: BucketBalance,
    pub cycle_start: OffsetDateTime,
    pub cycle_end: OffsetDateTime,
    pub allow_rollover: bool,
    pub trial_expires_at: Option<OffsetDateTime>,
    pub active_plan_id: Option<String>,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub const DEFAULT_CYCLE_DAYS: i64 = 30;

impl CreditAccount {
    pub fn new(user_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            user_id,
            words: BucketBalance::default(),
            books: BucketBalance::default(),
            offers: BucketBalance::default(),
            cycle_start: now,
            cycle_end: now + Duration::days(DEFAULT_CYCLE_DAYS),
            allow_rollover: false,
            trial_expires_at: None,
            active_plan_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn bucket(&self, category: CreditCategory) -> &BucketBalance {
        match category {
            CreditCategory::Words => &self.words,
            CreditCategory::Books => &self.books,
            CreditCategory::Offers => &self.offers,
        }
    }

    pub fn bucket_mut(&mut self, category: CreditCategory) -> &mut BucketBalance {
        match category {
            CreditCategory::Words => &mut self.words,
            CreditCategory::Books => &mut self.books,
            CreditCategory::Offers => &mut self.offers,
        }
    }

    pub fn trial_active(&self, now: OffsetDateTime) -> bool {
        self.trial_expires_at.map(|t| now <= t).unwrap_or(false)
    }

    pub fn available(&self, category: CreditCategory, now: OffsetDateTime) -> i64 {
        self.bucket(category).available(self.trial_active(now))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategorySummary {
    pub available: i64,
    pub used: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditSummary {
    pub words: CategorySummary,
    pub books: CategorySummary,
    pub offers: CategorySummary,
    pub active_plan: Option<String>,
}
