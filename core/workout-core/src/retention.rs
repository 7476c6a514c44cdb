//! Tier-based data retention.
//!
//! Each subscription tier maps to retention ceilings in days (`-1` = unlimited).
//! [`RetentionEngine::apply_retention`] irreversibly deletes workouts and
//! personal records older than their ceiling. Downgrading a tier applies the
//! new policy immediately.
//!
//! | Tier      | Workouts | PRs       | Analytics | Cache |
//! |-----------|----------|-----------|-----------|-------|
//! | `free`    | 90       | 365       | 30        | 7     |
//! | `premium` | 730      | unlimited | 365       | 30    |
//! | `pro`     | unlimited| unlimited | unlimited | 90    |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{keys, load_history, load_ledger, Durability, KeyValueStore, KeyValueStoreExt};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Pro => "pro",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            "pro" => Ok(SubscriptionTier::Pro),
            other => Err(format!("Unknown subscription tier: {}", other)),
        }
    }
}

/// A retention ceiling. Serialized as a day count, `-1` for unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum RetentionDays {
    Days(u32),
    Unlimited,
}

impl From<i64> for RetentionDays {
    fn from(value: i64) -> Self {
        if value <= 0 {
            RetentionDays::Unlimited
        } else {
            RetentionDays::Days(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }
}

impl From<RetentionDays> for i64 {
    fn from(value: RetentionDays) -> Self {
        match value {
            RetentionDays::Days(days) => i64::from(days),
            RetentionDays::Unlimited => -1,
        }
    }
}

impl RetentionDays {
    /// Records dated strictly before the cutoff are beyond policy.
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RetentionDays::Days(days) => Duration::try_days(i64::from(days))
                .and_then(|span| now.checked_sub_signed(span)),
            RetentionDays::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub workout_history_days: RetentionDays,
    pub personal_records_days: RetentionDays,
    pub analytics_data_days: RetentionDays,
    pub cache_retention_days: RetentionDays,
}

pub fn policy_for(tier: SubscriptionTier) -> RetentionPolicy {
    use RetentionDays::{Days, Unlimited};
    match tier {
        SubscriptionTier::Free => RetentionPolicy {
            workout_history_days: Days(90),
            personal_records_days: Days(365),
            analytics_data_days: Days(30),
            cache_retention_days: Days(7),
        },
        SubscriptionTier::Premium => RetentionPolicy {
            workout_history_days: Days(730),
            personal_records_days: Unlimited,
            analytics_data_days: Days(365),
            cache_retention_days: Days(30),
        },
        SubscriptionTier::Pro => RetentionPolicy {
            workout_history_days: Unlimited,
            personal_records_days: Unlimited,
            analytics_data_days: Unlimited,
            cache_retention_days: Days(90),
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageBucket {
    pub total: usize,
    pub within_policy: usize,
    pub beyond_policy: usize,
    pub earliest: Option<DateTime<Utc>>,
}

impl UsageBucket {
    fn tally(dates: impl Iterator<Item = DateTime<Utc>>, cutoff: Option<DateTime<Utc>>) -> Self {
        let mut bucket = UsageBucket::default();
        for date in dates {
            bucket.total += 1;
            if cutoff.is_some_and(|c| date < c) {
                bucket.beyond_policy += 1;
            } else {
                bucket.within_policy += 1;
            }
            bucket.earliest = Some(bucket.earliest.map_or(date, |e| e.min(date)));
        }
        bucket
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionUsage {
    pub tier: SubscriptionTier,
    pub policy: RetentionPolicy,
    pub workouts: UsageBucket,
    pub personal_records: UsageBucket,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneCounts {
    pub total_before: usize,
    pub total_after: usize,
    pub deleted_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionReport {
    pub tier: SubscriptionTier,
    pub workouts: PruneCounts,
    pub personal_records: PruneCounts,
}

/// Enforces the ceilings of the stored subscription tier.
pub struct RetentionEngine {
    store: Arc<dyn KeyValueStore>,
}

impl RetentionEngine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored tier; free when none was ever recorded.
    pub fn current_tier(&self) -> SubscriptionTier {
        self.store.load_or_default(keys::SUBSCRIPTION_TIER)
    }

    /// Stored tier, failing when a record exists but cannot be decoded.
    fn stored_tier(&self) -> Result<SubscriptionTier> {
        match self.store.get_json(keys::SUBSCRIPTION_TIER) {
            Ok(tier) => Ok(tier.unwrap_or_default()),
            Err(err) => {
                tracing::warn!(error = %err, "Subscription tier unreadable; skipping retention");
                Err(err)
            }
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        policy_for(self.current_tier())
    }

    /// Records the tier. A downgrade applies the stricter policy right away.
    pub fn set_tier(&self, tier: SubscriptionTier) -> Result<Option<RetentionReport>> {
        let previous = self.current_tier();
        self.store
            .persist_json(keys::SUBSCRIPTION_TIER, &tier, Durability::Awaited)?;
        tracing::info!(from = %previous, to = %tier, "Subscription tier updated");

        if tier < previous {
            return self.apply_retention().map(Some);
        }
        Ok(None)
    }

    pub fn compute_usage(&self) -> RetentionUsage {
        let now = Utc::now();
        let tier = self.current_tier();
        let policy = policy_for(tier);

        let history = load_history(&*self.store);
        let ledger = load_ledger(&*self.store);
        RetentionUsage {
            tier,
            policy,
            workouts: UsageBucket::tally(
                history.iter().map(|s| s.started_at),
                policy.workout_history_days.cutoff(now),
            ),
            personal_records: UsageBucket::tally(
                ledger.iter().map(|r| r.achieved_at),
                policy.personal_records_days.cutoff(now),
            ),
        }
    }

    /// Deletes workouts and personal records older than their ceilings.
    ///
    /// Idempotent: a second call with no intervening writes deletes nothing.
    /// Nothing is deleted while the stored tier is unreadable.
    pub fn apply_retention(&self) -> Result<RetentionReport> {
        let now = Utc::now();
        let tier = self.stored_tier()?;
        let policy = policy_for(tier);

        let mut history = load_history(&*self.store);
        let workouts = prune(&mut history, policy.workout_history_days.cutoff(now), |s| {
            s.started_at
        });
        if workouts.deleted_count > 0 {
            self.store
                .persist_json(keys::SESSION_HISTORY, &history, Durability::Awaited)?;
        }

        let mut ledger = load_ledger(&*self.store);
        let personal_records = prune(
            &mut ledger,
            policy.personal_records_days.cutoff(now),
            |r| r.achieved_at,
        );
        if personal_records.deleted_count > 0 {
            self.store
                .persist_json(keys::PERSONAL_RECORDS, &ledger, Durability::Awaited)?;
        }

        tracing::info!(
            tier = %tier,
            workouts_deleted = workouts.deleted_count,
            records_deleted = personal_records.deleted_count,
            "Retention applied"
        );
        Ok(RetentionReport {
            tier,
            workouts,
            personal_records,
        })
    }
}

fn prune<T>(
    items: &mut Vec<T>,
    cutoff: Option<DateTime<Utc>>,
    date_of: impl Fn(&T) -> DateTime<Utc>,
) -> PruneCounts {
    let total_before = items.len();
    if let Some(cutoff) = cutoff {
        items.retain(|item| date_of(item) >= cutoff);
    }
    PruneCounts {
        total_before,
        total_after: items.len(),
        deleted_count: total_before - items.len(),
    }
}
