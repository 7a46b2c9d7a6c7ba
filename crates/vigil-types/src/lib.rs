//! Shared type definitions for the Vigil simulation engine.
//!
//! This crate is the contract between the engine and the dashboards that
//! consume it. Everything here is serializable and flows to `TypeScript`
//! via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Sequence ids, configured keys and run ids
//! - [`enums`] -- Severity, lifecycle statuses, comparators, flag states
//! - [`structs`] -- Positions, samples, alerts, allocations and the
//!   [`Snapshot`] published after every tick

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{
    ActivityKind, AlertStatus, Comparator, EntityStatus, FlagState, HistoryOrder, Severity,
};
pub use ids::{AlertId, AllocationId, EntityId, MetricId, PoolId, RunId};
pub use structs::{
    ActivityEntry, Alert, AlertOrigin, Allocation, AllocationHandle, ConsumerRef, EntityView,
    MAP_MAX, MAP_MIN, MetricView, PoolView, Position, Sample, Snapshot,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the dashboard.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::ids::AlertId::export_all();
        let _ = crate::ids::AllocationId::export_all();
        let _ = crate::ids::MetricId::export_all();
        let _ = crate::ids::EntityId::export_all();
        let _ = crate::ids::PoolId::export_all();
        let _ = crate::ids::RunId::export_all();

        let _ = crate::enums::Severity::export_all();
        let _ = crate::enums::AlertStatus::export_all();
        let _ = crate::enums::Comparator::export_all();
        let _ = crate::enums::EntityStatus::export_all();
        let _ = crate::enums::HistoryOrder::export_all();
        let _ = crate::enums::FlagState::export_all();
        let _ = crate::enums::ActivityKind::export_all();

        let _ = crate::structs::Position::export_all();
        let _ = crate::structs::MetricView::export_all();
        let _ = crate::structs::AlertOrigin::export_all();
        let _ = crate::structs::Alert::export_all();
        let _ = crate::structs::ConsumerRef::export_all();
        let _ = crate::structs::AllocationHandle::export_all();
        let _ = crate::structs::Allocation::export_all();
        let _ = crate::structs::PoolView::export_all();
        let _ = crate::structs::EntityView::export_all();
        let _ = crate::structs::ActivityEntry::export_all();
        let _ = crate::structs::Snapshot::export_all();
    }
}
