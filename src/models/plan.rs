use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::models::credit::{CreditCategory, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Subscription,
    Addon,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Subscription => "subscription",
            PlanKind::Addon => "addon",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseEnumError> {
        match raw {
            "subscription" => Ok(PlanKind::Subscription),
            "addon" => Ok(PlanKind::Addon),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAllotment {
    pub words: i64,
    pub books: i64,
    pub offers: i64,
}

impl CategoryAllotment {
    pub fn get(&self, category: CreditCategory) -> i64 {
        match category {
            CreditCategory::Words => self.words,
            CreditCategory::Books => self.books,
            CreditCategory::Offers => self.offers,
        }
    }
}

/// Recurring plan definition. Prices are captured into the PaymentRecord at
/// checkout time; settlement never re-reads the catalog for money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub cycle_days: i64,
    pub allotment: CategoryAllotment,
    pub allow_rollover: bool,
}

/// One-time credit pack for a single category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonCreditPlan {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub category: CreditCategory,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy)]
pub enum PricedPlan<'a> {
    Subscription(&'a SubscriptionPlan),
    Addon(&'a AddonCreditPlan),
}

impl<'a> PricedPlan<'a> {
    pub fn id(&self) -> &str {
        match self {
            PricedPlan::Subscription(p) => &p.id,
            PricedPlan::Addon(p) => &p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PricedPlan::Subscription(p) => &p.name,
            PricedPlan::Addon(p) => &p.name,
        }
    }

    pub fn price(&self) -> f64 {
        match self {
            PricedPlan::Subscription(p) => p.price,
            PricedPlan::Addon(p) => p.price,
        }
    }

    pub fn kind(&self) -> PlanKind {
        match self {
            PricedPlan::Subscription(_) => PlanKind::Subscription,
            PricedPlan::Addon(_) => PlanKind::Addon,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    pub subscriptions: Vec<SubscriptionPlan>,
    pub addons: Vec<AddonCreditPlan>,
}

static BUILTIN_CATALOG: Lazy<PlanCatalog> = Lazy::new(|| PlanCatalog {
    subscriptions: vec![
        SubscriptionPlan {
            id: "starter_monthly".into(),
            name: "Starter".into(),
            price: 9.99,
            cycle_days: 30,
            allotment: CategoryAllotment {
                words: 15_000,
                books: 2,
                offers: 1,
            },
            allow_rollover: false,
        },
        SubscriptionPlan {
            id: "author_monthly".into(),
            name: "Author".into(),
            price: 29.99,
            cycle_days: 30,
            allotment: CategoryAllotment {
                words: 60_000,
                books: 10,
                offers: 5,
            },
            allow_rollover: true,
        },
    ],
    addons: vec![
        AddonCreditPlan {
            id: "words_10k".into(),
            name: "10k word pack".into(),
            price: 4.99,
            category: CreditCategory::Words,
            amount: 10_000,
        },
        AddonCreditPlan {
            id: "book_slot".into(),
            name: "Extra book project".into(),
            price: 2.99,
            category: CreditCategory::Books,
            amount: 1,
        },
        AddonCreditPlan {
            id: "offer_slot".into(),
            name: "Extra bonus offer".into(),
            price: 1.99,
            category: CreditCategory::Offers,
            amount: 1,
        },
    ],
});

impl PlanCatalog {
    pub fn builtin() -> &'static PlanCatalog {
        &BUILTIN_CATALOG
    }

    pub fn find(&self, plan_id: &str) -> Option<PricedPlan<'_>> {
        if let Some(sub) = self.subscriptions.iter().find(|p| p.id == plan_id) {
            return Some(PricedPlan::Subscription(sub));
        }
        self.addons
            .iter()
            .find(|p| p.id == plan_id)
            .map(PricedPlan::Addon)
    }

    pub fn find_subscription(&self, plan_id: &str) -> Option<&SubscriptionPlan> {
        self.subscriptions.iter().find(|p| p.id == plan_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_resolves_both_plan_kinds() {
        let catalog = PlanCatalog::builtin();

        let sub = catalog.find("starter_monthly").expect("starter plan");
        assert_eq!(sub.kind(), PlanKind::Subscription);
        assert_eq!(sub.price(), 9.99);

        let addon = catalog.find("words_10k").expect("word pack");
        assert_eq!(addon.kind(), PlanKind::Addon);
        match addon {
            PricedPlan::Addon(p) => {
                assert_eq!(p.category, CreditCategory::Words);
                assert_eq!(p.amount, 10_000);
            }
            _ => panic!("expected addon"),
        }
    }

    #[test]
    fn unknown_plan_id_resolves_to_none() {
        assert!(PlanCatalog::builtin().find("no_such_plan").is_none());
    }
}
