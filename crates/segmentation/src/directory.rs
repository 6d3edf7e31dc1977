//! The external source of customers, tags and groups.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use campaign_core::types::{Customer, CustomerId, GroupId};
use dashmap::DashMap;

/// Read access to the customer directory owned by the wider platform.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn get_customer(&self, id: CustomerId) -> anyhow::Result<Option<Customer>>;

    async fn list_customers(&self) -> anyhow::Result<Vec<Customer>>;

    async fn group_members(&self, group_id: GroupId) -> anyhow::Result<Vec<CustomerId>>;
}

/// In-memory directory for development and tests.
/// Production: replace with the platform's customer service.
#[derive(Default)]
pub struct InMemoryDirectory {
    customers: DashMap<CustomerId, Customer>,
    groups: DashMap<GroupId, BTreeSet<CustomerId>>,
    unavailable: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn remove(&self, id: CustomerId) {
        self.customers.remove(&id);
        for mut members in self.groups.iter_mut() {
            members.remove(&id);
        }
    }

    pub fn add_to_group(&self, group_id: GroupId, customer_id: CustomerId) {
        self.groups.entry(group_id).or_default().insert(customer_id);
    }

    /// Simulate an outage: every read fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("customer directory offline");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn get_customer(&self, id: CustomerId) -> anyhow::Result<Option<Customer>> {
        self.ensure_available()?;
        Ok(self.customers.get(&id).map(|c| c.clone()))
    }

    async fn list_customers(&self) -> anyhow::Result<Vec<Customer>> {
        self.ensure_available()?;
        let mut customers: Vec<Customer> = self.customers.iter().map(|c| c.clone()).collect();
        customers.sort_by_key(|c| c.id);
        Ok(customers)
    }

    async fn group_members(&self, group_id: GroupId) -> anyhow::Result<Vec<CustomerId>> {
        self.ensure_available()?;
        Ok(self
            .groups
            .get(&group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default())
    }
}
