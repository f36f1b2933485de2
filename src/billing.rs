//! Subscription revenue for the admin dashboard.
//!
//! Amounts are in minor units (cents/pence) as the payment provider reports
//! them. The estimate normalizes every active subscription item to a monthly
//! figure and reports the total in major units.
//!
//! With no payment provider wired in, revenue comes from a JSON export of
//! subscriptions under the data directory, or failing that from each active
//! client's plan price.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use anyhow::Context;
use tracing::{debug, warn};

use crate::identity::{Plan, Role, SubscriptionStatus, UserProfile};
use crate::store::{ProfileStore, Project, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    /// Price per unit in minor units; `None` for metered or free prices.
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub interval: Option<BillingInterval>,
    #[serde(default)]
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    pub items: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueStats {
    /// Estimated monthly recurring revenue in major units.
    pub total_revenue: f64,
    pub active_subscribers: usize,
}

/// Monthly amount in minor units. Saturates instead of overflowing on
/// absurd provider data.
fn monthly_minor(item: &SubscriptionItem) -> i64 {
    let Some(amount) = item.unit_amount else { return 0; };
    let monthly = match item.interval {
        Some(BillingInterval::Year) => (amount as f64 / 12.0).round() as i64,
        Some(BillingInterval::Week) => amount.saturating_mul(4),
        _ => amount,
    };
    monthly.saturating_mul(i64::from(item.quantity.unwrap_or(1)))
}

pub fn estimate_monthly_revenue(subscriptions: &[Subscription]) -> RevenueStats {
    let active: Vec<&Subscription> = subscriptions
        .iter()
        .filter(|s| s.status == SubscriptionStatus::Active)
        .collect();
    let cents = active
        .iter()
        .flat_map(|s| s.items.iter())
        .map(monthly_minor)
        .fold(0i64, i64::saturating_add);
    RevenueStats { total_revenue: cents as f64 / 100.0, active_subscribers: active.len() }
}

/// Where subscriptions come from (the payment provider in production).
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>>;
}

#[derive(Clone, Default)]
pub struct MemorySubscriptionSource {
    subs: Arc<RwLock<Vec<Subscription>>>,
}

impl MemorySubscriptionSource {
    pub fn new(subs: Vec<Subscription>) -> Self {
        Self { subs: Arc::new(RwLock::new(subs)) }
    }

    pub fn push(&self, sub: Subscription) {
        self.subs.write().push(sub);
    }
}

#[async_trait]
impl SubscriptionSource for MemorySubscriptionSource {
    async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        Ok(self
            .subs
            .read()
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .cloned()
            .collect())
    }
}

/// List price per month, in minor units.
pub fn plan_monthly_minor(plan: Plan) -> i64 {
    match plan {
        Plan::Starter => 29_900,
        Plan::Growth => 59_900,
        Plan::Pro => 99_900,
    }
}

/// One monthly subscription per client profile at its plan's list price.
#[derive(Clone)]
pub struct PlanPriceSource {
    profiles: Arc<dyn ProfileStore>,
}

impl PlanPriceSource {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self { Self { profiles } }
}

#[async_trait]
impl SubscriptionSource for PlanPriceSource {
    async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        let profiles = self.profiles.list().await.context("While listing profiles for plan revenue")?;
        Ok(profiles
            .into_iter()
            .filter(|p| p.role == Role::Client && p.subscription_status == SubscriptionStatus::Active)
            .map(|p| Subscription {
                id: format!("plan-{}", p.id),
                status: SubscriptionStatus::Active,
                items: vec![SubscriptionItem {
                    unit_amount: Some(plan_monthly_minor(p.plan)),
                    interval: Some(BillingInterval::Month),
                    quantity: Some(1),
                }],
            })
            .collect())
    }
}

/// Subscriptions exported by the payment provider as a JSON array, re-read on
/// every request.
#[derive(Debug, Clone)]
pub struct JsonFileSubscriptionSource {
    path: PathBuf,
}

impl JsonFileSubscriptionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    pub fn path(&self) -> &std::path::Path { &self.path }
}

#[async_trait]
impl SubscriptionSource for JsonFileSubscriptionSource {
    async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("While reading subscriptions: {}", self.path.display()))?;
        let subs: Vec<Subscription> = serde_json::from_slice(&bytes)
            .with_context(|| format!("While parsing subscriptions: {}", self.path.display()))?;
        debug!(target: "billing", "loaded {} subscription(s) from {}", subs.len(), self.path.display());
        Ok(subs.into_iter().filter(|s| s.status == SubscriptionStatus::Active).collect())
    }
}

/// Revenue from `source`, or zeros when there is no source or it fails.
pub async fn revenue_from(source: Option<&dyn SubscriptionSource>) -> RevenueStats {
    let Some(source) = source else {
        warn!(target: "billing", "no subscription source configured; reporting zero revenue");
        return RevenueStats::default();
    };
    match source.active_subscriptions().await {
        Ok(subs) => estimate_monthly_revenue(&subs),
        Err(e) => {
            warn!(target: "billing", "subscription fetch failed: {:#}", e);
            RevenueStats::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminOverview {
    pub clients: usize,
    pub admins: usize,
    pub onboarding_pending: usize,
    pub active_projects: usize,
    /// Tickets still open or in progress.
    pub open_tickets: usize,
    pub revenue: RevenueStats,
}

impl AdminOverview {
    pub fn build(profiles: &[UserProfile], projects: &[Project], tickets: &[Ticket], revenue: RevenueStats) -> Self {
        let clients = profiles.iter().filter(|p| p.role == Role::Client).count();
        let pending = profiles.iter().filter(|p| p.role == Role::Client && !p.onboarding_complete).count();
        Self {
            clients,
            admins: profiles.len() - clients,
            onboarding_pending: pending,
            active_projects: projects.len(),
            open_tickets: tickets.iter().filter(|t| t.status.is_open()).count(),
            revenue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryProfileStore, ProjectStatus, TicketPriority, TicketStatus};

    fn item(amount: i64, interval: BillingInterval, qty: Option<u32>) -> SubscriptionItem {
        SubscriptionItem { unit_amount: Some(amount), interval: Some(interval), quantity: qty }
    }

    fn sub(id: &str, status: SubscriptionStatus, items: Vec<SubscriptionItem>) -> Subscription {
        Subscription { id: id.into(), status, items }
    }

    #[test]
    fn monthly_prices_sum_with_quantity() {
        let subs = vec![
            sub("s1", SubscriptionStatus::Active, vec![item(4900, BillingInterval::Month, None)]),
            sub("s2", SubscriptionStatus::Active, vec![item(9900, BillingInterval::Month, Some(2))]),
        ];
        let stats = estimate_monthly_revenue(&subs);
        assert_eq!(stats.active_subscribers, 2);
        assert!((stats.total_revenue - 247.0).abs() < 1e-9);
    }

    #[test]
    fn yearly_and_weekly_are_normalized() {
        // 100000 / 12 = 8333.33 -> 8333; 1000 * 4 = 4000
        let subs = vec![sub(
            "s1",
            SubscriptionStatus::Active,
            vec![item(100_000, BillingInterval::Year, None), item(1000, BillingInterval::Week, None)],
        )];
        let stats = estimate_monthly_revenue(&subs);
        assert!((stats.total_revenue - 123.33).abs() < 1e-9);
        assert_eq!(stats.active_subscribers, 1);
    }

    #[test]
    fn inactive_and_unpriced_items_are_ignored() {
        let subs = vec![
            sub("s1", SubscriptionStatus::Canceled, vec![item(4900, BillingInterval::Month, None)]),
            sub("s2", SubscriptionStatus::Active, vec![SubscriptionItem { unit_amount: None, interval: None, quantity: Some(3) }]),
        ];
        let stats = estimate_monthly_revenue(&subs);
        assert_eq!(stats.active_subscribers, 1);
        assert_eq!(stats.total_revenue, 0.0);
    }

    struct BrokenSource;

    #[async_trait]
    impl SubscriptionSource for BrokenSource {
        async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
            Err(anyhow::anyhow!("payments api unreachable"))
        }
    }

    #[tokio::test]
    async fn missing_or_failing_source_reports_zero() {
        assert_eq!(revenue_from(None).await, RevenueStats::default());
        assert_eq!(revenue_from(Some(&BrokenSource)).await, RevenueStats::default());
        let src = MemorySubscriptionSource::default();
        src.push(sub("s1", SubscriptionStatus::Active, vec![item(2500, BillingInterval::Month, None)]));
        src.push(sub("s2", SubscriptionStatus::PastDue, vec![item(2500, BillingInterval::Month, None)]));
        let stats = revenue_from(Some(&src)).await;
        assert_eq!(stats.active_subscribers, 1);
        assert!((stats.total_revenue - 25.0).abs() < 1e-9);
    }

    #[test]
    fn overview_counts_roles_and_pending() {
        let mut done = UserProfile::new("u1", "a@shop.test", "A", Role::Client);
        done.onboarding_complete = true;
        let pending = UserProfile::new("u2", "b@shop.test", "B", Role::Client);
        let admin = UserProfile::new("u3", "boss@agency.test", "Boss", Role::Admin);
        let o = AdminOverview::build(&[done, pending, admin], &[], &[], RevenueStats::default());
        assert_eq!((o.clients, o.admins, o.onboarding_pending), (2, 1, 1));
        assert_eq!((o.active_projects, o.open_tickets), (0, 0));
    }

    #[test]
    fn overview_counts_projects_and_open_tickets() {
        let now = chrono::Utc::now();
        let project = |id: &str, status| Project {
            id: id.into(),
            user_id: "u1".into(),
            name: "Website".into(),
            status,
            created_at: now,
            updated_at: now,
        };
        let ticket = |id: &str, status| Ticket {
            id: id.into(),
            user_id: "u1".into(),
            title: "Typo".into(),
            description: "About page".into(),
            status,
            priority: TicketPriority::Low,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let projects = [project("p1", ProjectStatus::Design), project("p2", ProjectStatus::Live)];
        let tickets = [
            ticket("t1", TicketStatus::Open),
            ticket("t2", TicketStatus::InProgress),
            ticket("t3", TicketStatus::AwaitingInfo),
            ticket("t4", TicketStatus::Completed),
        ];
        let o = AdminOverview::build(&[], &projects, &tickets, RevenueStats::default());
        assert_eq!(o.active_projects, 2);
        assert_eq!(o.open_tickets, 2);
    }

    #[test]
    fn huge_amounts_saturate() {
        let subs = vec![sub(
            "s1",
            SubscriptionStatus::Active,
            vec![item(i64::MAX / 2, BillingInterval::Week, Some(u32::MAX)), item(i64::MAX, BillingInterval::Month, None)],
        )];
        let stats = estimate_monthly_revenue(&subs);
        assert_eq!(stats.total_revenue, i64::MAX as f64 / 100.0);
    }

    #[tokio::test]
    async fn plan_prices_count_active_clients_only() {
        let store = Arc::new(MemoryProfileStore::new());
        let mut growth = UserProfile::new("u1", "a@shop.test", "A", Role::Client);
        growth.plan = Plan::Growth;
        growth.subscription_status = SubscriptionStatus::Active;
        let mut pro = UserProfile::new("u2", "b@shop.test", "B", Role::Client);
        pro.plan = Plan::Pro;
        pro.subscription_status = SubscriptionStatus::Active;
        let trial = UserProfile::new("u3", "c@shop.test", "C", Role::Client);
        let mut admin = UserProfile::new("u4", "boss@agency.test", "Boss", Role::Admin);
        admin.subscription_status = SubscriptionStatus::Active;
        for p in [growth, pro, trial, admin] {
            store.put(p).await.unwrap();
        }
        let src = PlanPriceSource::new(store);
        let stats = revenue_from(Some(&src)).await;
        assert_eq!(stats.active_subscribers, 2);
        assert!((stats.total_revenue - 1598.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn json_file_source_reads_export() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("subscriptions.json");
        let subs = vec![
            sub("s1", SubscriptionStatus::Active, vec![item(4900, BillingInterval::Month, None)]),
            sub("s2", SubscriptionStatus::Canceled, vec![item(4900, BillingInterval::Month, None)]),
        ];
        std::fs::write(&path, serde_json::to_vec(&subs).unwrap()).unwrap();
        let src = JsonFileSubscriptionSource::new(&path);
        let stats = revenue_from(Some(&src)).await;
        assert_eq!(stats.active_subscribers, 1);
        assert!((stats.total_revenue - 49.0).abs() < 1e-9);

        std::fs::write(&path, b"[{broken").unwrap();
        assert_eq!(revenue_from(Some(&src)).await, RevenueStats::default());
    }
}
