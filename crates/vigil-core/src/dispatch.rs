//! Finite resource pools and the dispatch allocator.
//!
//! Each pool has a fixed total capacity and a map of outstanding
//! allocations. Available capacity is derived, never stored, so the
//! conservation law
//!
//! ```text
//! available + outstanding == total
//! ```
//!
//! holds by construction. [`DispatchAllocator::verify_conservation`] checks
//! it anyway after every tick.
//!
//! Allocation ids come from a single counter shared by every pool. Ids
//! below the counter have been issued, which is how a second release of
//! the same handle is recognised as a no-op rather than an error.

use std::collections::BTreeMap;

use vigil_types::{Allocation, AllocationHandle, AllocationId, ConsumerRef, EntityId, PoolId, PoolView};

use crate::config::ResourcePoolConfig;

/// Errors raised by allocation and release.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// The pool has no available capacity.
    #[error("no capacity left in pool {0}")]
    NoCapacity(PoolId),

    /// No pool with this id exists.
    #[error("unknown pool: {0}")]
    UnknownPool(PoolId),

    /// The allocation id was never issued.
    #[error("unknown allocation: {0}")]
    UnknownAllocation(AllocationId),
}

/// Result of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Capacity was returned to the pool.
    Released(Allocation),
    /// The allocation had already been released.
    AlreadyReleased,
}

/// Result of a conservation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationResult {
    /// Every pool balances.
    Balanced,
    /// A pool is out of balance.
    Violation {
        /// The offending pool.
        pool: PoolId,
        /// Its total capacity.
        total: u32,
        /// Reported available capacity.
        available: u32,
        /// Number of outstanding allocations.
        outstanding: usize,
    },
}

/// A finite, countable resource.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    id: PoolId,
    label: String,
    total: u32,
    mobilization_ticks: u64,
    dwell_ticks: Option<u64>,
    outstanding: BTreeMap<AllocationId, Allocation>,
}

impl ResourcePool {
    fn from_config(config: &ResourcePoolConfig) -> Self {
        Self {
            id: config.id.clone(),
            label: config.label.clone().unwrap_or_else(|| config.id.to_string()),
            total: config.capacity,
            mobilization_ticks: config.mobilization_ticks,
            dwell_ticks: config.dwell_ticks,
            outstanding: BTreeMap::new(),
        }
    }

    /// Pool id.
    pub const fn id(&self) -> &PoolId {
        &self.id
    }

    /// Capacity currently available.
    pub fn available(&self) -> u32 {
        let outstanding = u32::try_from(self.outstanding.len()).unwrap_or(u32::MAX);
        self.total.saturating_sub(outstanding)
    }

    /// Ticks between a dispatch and the unit starting to move.
    pub const fn mobilization_ticks(&self) -> u64 {
        self.mobilization_ticks
    }

    /// Ticks on scene before automatic release.
    pub const fn dwell_ticks(&self) -> Option<u64> {
        self.dwell_ticks
    }

    /// Outstanding allocations, oldest first.
    pub fn outstanding(&self) -> impl Iterator<Item = &Allocation> {
        self.outstanding.values()
    }

    fn view(&self) -> PoolView {
        PoolView {
            id: self.id.clone(),
            label: self.label.clone(),
            total: self.total,
            available: self.available(),
            allocations: self.outstanding.values().cloned().collect(),
        }
    }
}

/// Every resource pool plus the allocation id counter.
#[derive(Debug, Clone)]
pub struct DispatchAllocator {
    pools: Vec<ResourcePool>,
    next_id: AllocationId,
}

impl DispatchAllocator {
    /// Build the allocator from pool definitions.
    pub fn new(pools: &[ResourcePoolConfig]) -> Self {
        Self {
            pools: pools.iter().map(ResourcePool::from_config).collect(),
            next_id: AllocationId(1),
        }
    }

    /// Take one unit of capacity from `pool` for `consumer`.
    ///
    /// Never blocks and never falls back to another pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::UnknownPool`] or [`AllocationError::NoCapacity`].
    pub fn allocate(
        &mut self,
        pool: &PoolId,
        consumer: ConsumerRef,
        entity: Option<EntityId>,
        tick: u64,
    ) -> Result<AllocationHandle, AllocationError> {
        let id = self.next_id;
        let next = id.next().ok_or_else(|| AllocationError::NoCapacity(pool.clone()))?;
        let target = self
            .pools
            .iter_mut()
            .find(|p| p.id == *pool)
            .ok_or_else(|| AllocationError::UnknownPool(pool.clone()))?;
        if target.available() == 0 {
            return Err(AllocationError::NoCapacity(pool.clone()));
        }
        target.outstanding.insert(
            id,
            Allocation {
                id,
                pool: pool.clone(),
                consumer,
                entity,
                allocated_tick: tick,
            },
        );
        self.next_id = next;
        tracing::debug!(pool = %pool, allocation = %id, available = target.available(), "capacity allocated");
        Ok(AllocationHandle {
            pool: pool.clone(),
            id,
        })
    }

    /// Return an allocation's capacity to its pool. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::UnknownPool`] for an unknown pool and
    /// [`AllocationError::UnknownAllocation`] for an id that was never issued.
    pub fn release(&mut self, handle: &AllocationHandle) -> Result<ReleaseOutcome, AllocationError> {
        if handle.id >= self.next_id {
            return Err(AllocationError::UnknownAllocation(handle.id));
        }
        let pool = self
            .pools
            .iter_mut()
            .find(|p| p.id == handle.pool)
            .ok_or_else(|| AllocationError::UnknownPool(handle.pool.clone()))?;
        match pool.outstanding.remove(&handle.id) {
            Some(allocation) => {
                tracing::debug!(
                    pool = %handle.pool,
                    allocation = %handle.id,
                    available = pool.available(),
                    "capacity released"
                );
                Ok(ReleaseOutcome::Released(allocation))
            }
            None => Ok(ReleaseOutcome::AlreadyReleased),
        }
    }

    /// Whether `handle` names an allocation that is still outstanding.
    ///
    /// # Errors
    ///
    /// Same as [`DispatchAllocator::release`], without releasing anything.
    pub fn is_outstanding(&self, handle: &AllocationHandle) -> Result<bool, AllocationError> {
        if handle.id >= self.next_id {
            return Err(AllocationError::UnknownAllocation(handle.id));
        }
        let pool = self
            .pool(handle.pool.as_str())
            .ok_or_else(|| AllocationError::UnknownPool(handle.pool.clone()))?;
        Ok(pool.outstanding.contains_key(&handle.id))
    }

    /// Release an allocation by id alone, searching every pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::UnknownAllocation`] for an id that was never issued.
    pub fn release_id(&mut self, id: AllocationId) -> Result<ReleaseOutcome, AllocationError> {
        match self.allocation(id).map(|a| a.pool.clone()) {
            Some(pool) => self.release(&AllocationHandle { pool, id }),
            None if id < self.next_id => Ok(ReleaseOutcome::AlreadyReleased),
            None => Err(AllocationError::UnknownAllocation(id)),
        }
    }

    /// Look up an outstanding allocation.
    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.pools.iter().find_map(|p| p.outstanding.get(&id))
    }

    /// Look up a pool.
    pub fn pool(&self, id: &str) -> Option<&ResourcePool> {
        self.pools.iter().find(|p| p.id.as_str() == id)
    }

    /// Every outstanding allocation across all pools.
    pub fn outstanding(&self) -> impl Iterator<Item = &Allocation> {
        self.pools.iter().flat_map(ResourcePool::outstanding)
    }

    /// Views of every pool in configuration order.
    pub fn views(&self) -> Vec<PoolView> {
        self.pools.iter().map(ResourcePool::view).collect()
    }

    /// Check `available + outstanding == total` for every pool.
    pub fn verify_conservation(&self) -> ConservationResult {
        for pool in &self.pools {
            let available = pool.available();
            let outstanding = pool.outstanding.len();
            let balanced = usize::try_from(available)
                .ok()
                .and_then(|a| a.checked_add(outstanding))
                .zip(usize::try_from(pool.total).ok())
                .is_some_and(|(sum, total)| sum == total);
            if !balanced {
                return ConservationResult::Violation {
                    pool: pool.id.clone(),
                    total: pool.total,
                    available,
                    outstanding,
                };
            }
        }
        ConservationResult::Balanced
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn allocator(capacity: u32) -> DispatchAllocator {
        DispatchAllocator::new(&[ResourcePoolConfig::new("ambulances", capacity)])
    }

    fn consumer(n: u64) -> ConsumerRef {
        ConsumerRef::Alert(vigil_types::AlertId(n))
    }

    #[test]
    fn exhausting_a_pool_fails_then_recovers_after_release() {
        let mut pools = allocator(3);
        let pool = PoolId::from("ambulances");
        let handles: Vec<_> = (1..=3)
            .map(|n| pools.allocate(&pool, consumer(n), None, 1).unwrap())
            .collect();
        assert_eq!(
            pools.allocate(&pool, consumer(4), None, 1),
            Err(AllocationError::NoCapacity(pool.clone()))
        );
        let first = handles.first().unwrap();
        assert!(matches!(pools.release(first), Ok(ReleaseOutcome::Released(_))));
        assert!(pools.allocate(&pool, consumer(4), None, 2).is_ok());
        assert_eq!(pools.pool("ambulances").unwrap().available(), 0);
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut pools = allocator(1);
        let handle = pools
            .allocate(&PoolId::from("ambulances"), consumer(1), None, 1)
            .unwrap();
        assert_eq!(pools.is_outstanding(&handle), Ok(true));
        assert!(matches!(pools.release(&handle), Ok(ReleaseOutcome::Released(_))));
        assert_eq!(pools.is_outstanding(&handle), Ok(false));
        assert_eq!(pools.release(&handle), Ok(ReleaseOutcome::AlreadyReleased));
        assert_eq!(pools.pool("ambulances").unwrap().available(), 1);
    }

    #[test]
    fn never_issued_ids_are_errors() {
        let mut pools = allocator(1);
        let bogus = AllocationHandle {
            pool: PoolId::from("ambulances"),
            id: AllocationId(42),
        };
        assert_eq!(
            pools.release(&bogus),
            Err(AllocationError::UnknownAllocation(AllocationId(42)))
        );
        assert_eq!(
            pools.release_id(AllocationId(42)),
            Err(AllocationError::UnknownAllocation(AllocationId(42)))
        );
    }

    #[test]
    fn unknown_pool_never_substitutes() {
        let mut pools = allocator(3);
        assert_eq!(
            pools.allocate(&PoolId::from("helicopters"), consumer(1), None, 1),
            Err(AllocationError::UnknownPool(PoolId::from("helicopters")))
        );
    }

    #[test]
    fn random_sequences_conserve_capacity() {
        let mut rng = SmallRng::seed_from_u64(2024);
        let mut pools = DispatchAllocator::new(&[
            ResourcePoolConfig::new("a", 3),
            ResourcePoolConfig::new("b", 5),
        ]);
        let mut handles: Vec<AllocationHandle> = Vec::new();
        for step in 0..500_u64 {
            if rng.random_bool(0.5) {
                let pool = if rng.random_bool(0.5) { "a" } else { "b" };
                if let Ok(handle) = pools.allocate(&PoolId::from(pool), consumer(step), None, step) {
                    handles.push(handle);
                }
            } else if !handles.is_empty() {
                let index = rng.random_range(0..handles.len());
                let handle = handles.get(index).cloned().unwrap();
                pools.release(&handle).unwrap();
                if rng.random_bool(0.3) {
                    handles.swap_remove(index);
                }
            }
            assert_eq!(pools.verify_conservation(), ConservationResult::Balanced);
        }
    }

    #[test]
    fn views_report_outstanding_allocations() {
        let mut pools = allocator(2);
        pools
            .allocate(
                &PoolId::from("ambulances"),
                ConsumerRef::External("drill".to_owned()),
                Some(EntityId::from("amb-1")),
                4,
            )
            .unwrap();
        let views = pools.views();
        let view = views.first().unwrap();
        assert_eq!(view.label, "ambulances");
        assert_eq!(view.available, 1);
        assert_eq!(view.allocations.len(), 1);
        assert_eq!(view.allocations.first().unwrap().entity, Some(EntityId::from("amb-1")));
    }
}
