//! Billing-cycle bookkeeping. This module is the only writer of the
//! plan-allotment buckets; purchases and admin grants go through the other
//! buckets exclusively.

use time::{Duration, OffsetDateTime};

use crate::models::credit::{CreditAccount, CreditCategory};
use crate::models::plan::SubscriptionPlan;

/// Advances the account's `[cycle_start, cycle_end)` window until it covers
/// `now`, resetting per-cycle usage. Unused plan allotment carries into the
/// new cycle only when the plan allows rollover. Returns true when a
/// rollover happened.
pub fn roll_cycle_if_due(
    account: &mut CreditAccount,
    plan: &SubscriptionPlan,
    now: OffsetDateTime,
) -> bool {
    if account.active_plan_id.as_deref() != Some(plan.id.as_str()) {
        return false;
    }
    if now < account.cycle_end {
        return false;
    }

    let cycle = Duration::days(plan.cycle_days.max(1));
    let mut start = account.cycle_start;
    let mut end = account.cycle_end;
    while now >= end {
        start = end;
        end += cycle;
    }

    let allow_rollover = account.allow_rollover;
    for category in CreditCategory::ALL {
        let allotment = plan.allotment.get(category);
        let bucket = account.bucket_mut(category);
        let carry = if allow_rollover {
            (bucket.plan_total_this_cycle - bucket.used_this_cycle).max(0)
        } else {
            0
        };
        bucket.plan_total_this_cycle = allotment + carry;
        bucket.used_this_cycle = 0;
    }

    account.cycle_start = start;
    account.cycle_end = end;
    account.updated_at = now;
    true
}

/// Zeroes the trial buckets once the trial window has passed. Independent of
/// cycle boundaries. Returns true when anything was discarded.
pub fn expire_trial_if_due(account: &mut CreditAccount, now: OffsetDateTime) -> bool {
    let Some(expires_at) = account.trial_expires_at else {
        return false;
    };
    if now <= expires_at {
        return false;
    }

    let mut discarded = false;
    for category in CreditCategory::ALL {
        let bucket = account.bucket_mut(category);
        if bucket.remaining_trial != 0 {
            bucket.remaining_trial = 0;
            discarded = true;
        }
    }
    account.trial_expires_at = None;
    if discarded {
        account.updated_at = now;
    }
    discarded
}

/// Activation (first purchase or renewal): anchors the cycle at `now` and
/// installs the plan's allotments. Non-plan buckets are untouched.
pub fn activate_plan(account: &mut CreditAccount, plan: &SubscriptionPlan, now: OffsetDateTime) {
    account.active_plan_id = Some(plan.id.clone());
    account.allow_rollover = plan.allow_rollover;
    account.cycle_start = now;
    account.cycle_end = now + Duration::days(plan.cycle_days.max(1));

    for category in CreditCategory::ALL {
        let allotment = plan.allotment.get(category);
        let bucket = account.bucket_mut(category);
        bucket.plan_total_this_cycle = allotment;
        bucket.used_this_cycle = 0;
    }
    account.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{CategoryAllotment, SubscriptionPlan};
    use uuid::Uuid;

    fn plan(allow_rollover: bool) -> SubscriptionPlan {
        SubscriptionPlan {
            id: "test_plan".into(),
            name: "Test".into(),
            price: 10.0,
            cycle_days: 30,
            allotment: CategoryAllotment {
                words: 1_000,
                books: 2,
                offers: 1,
            },
            allow_rollover,
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn active_account(plan: &SubscriptionPlan) -> CreditAccount {
        let mut account = CreditAccount::new(Uuid::new_v4(), now());
        activate_plan(&mut account, plan, now());
        account
    }

    #[test]
    fn activation_installs_allotments_and_anchors_cycle() {
        let plan = plan(false);
        let account = active_account(&plan);

        assert_eq!(account.words.plan_total_this_cycle, 1_000);
        assert_eq!(account.books.plan_total_this_cycle, 2);
        assert_eq!(account.cycle_start, now());
        assert_eq!(account.cycle_end, now() + Duration::days(30));
    }

    #[test]
    fn rollover_disabled_discards_unused_allotment() {
        let plan = plan(false);
        let mut account = active_account(&plan);
        account.words.used_this_cycle = 400;
        account.words.remaining_addon = 7;

        let later = now() + Duration::days(31);
        assert!(roll_cycle_if_due(&mut account, &plan, later));

        assert_eq!(account.words.plan_total_this_cycle, 1_000);
        assert_eq!(account.words.used_this_cycle, 0);
        // unused 600 words are gone, and addon credits are untouched
        assert_eq!(account.words.remaining_addon, 7);
        assert_eq!(account.cycle_start, now() + Duration::days(30));
        assert_eq!(account.cycle_end, now() + Duration::days(60));
    }

    #[test]
    fn rollover_enabled_carries_unused_allotment() {
        let plan = plan(true);
        let mut account = active_account(&plan);
        account.words.used_this_cycle = 400;

        let later = now() + Duration::days(31);
        assert!(roll_cycle_if_due(&mut account, &plan, later));
        assert_eq!(account.words.plan_total_this_cycle, 1_600);
        assert_eq!(account.words.used_this_cycle, 0);
    }

    #[test]
    fn several_missed_cycles_advance_to_the_current_window() {
        let plan = plan(false);
        let mut account = active_account(&plan);

        let later = now() + Duration::days(95);
        assert!(roll_cycle_if_due(&mut account, &plan, later));
        assert_eq!(account.cycle_start, now() + Duration::days(90));
        assert_eq!(account.cycle_end, now() + Duration::days(120));
    }

    #[test]
    fn no_rollover_before_cycle_end() {
        let plan = plan(false);
        let mut account = active_account(&plan);
        account.words.used_this_cycle = 10;

        assert!(!roll_cycle_if_due(
            &mut account,
            &plan,
            now() + Duration::days(29)
        ));
        assert_eq!(account.words.used_this_cycle, 10);
    }

    #[test]
    fn trial_expiry_zeroes_trial_buckets_only() {
        let plan = plan(false);
        let mut account = active_account(&plan);
        account.words.remaining_trial = 300;
        account.offers.remaining_trial = 2;
        account.words.remaining_admin = 50;
        account.trial_expires_at = Some(now() + Duration::days(7));

        assert!(!expire_trial_if_due(&mut account, now() + Duration::days(6)));
        assert_eq!(account.words.remaining_trial, 300);

        assert!(expire_trial_if_due(&mut account, now() + Duration::days(8)));
        assert_eq!(account.words.remaining_trial, 0);
        assert_eq!(account.offers.remaining_trial, 0);
        assert_eq!(account.words.remaining_admin, 50);
        assert!(account.trial_expires_at.is_none());
    }
}
