//! Type-safe identifier wrappers.
//!
//! Three families of identifiers exist in the engine:
//!
//! - **Sequence ids** ([`AlertId`], [`AllocationId`]) are allocated by the
//!   engine from monotonically increasing counters. They are plain numbers
//!   so that two runs with the same seed and command sequence produce
//!   byte-identical snapshots.
//! - **Configured keys** ([`MetricId`], [`EntityId`], [`PoolId`]) are the
//!   strings supplied in the engine configuration.
//! - **Run ids** ([`RunId`]) use UUID v7 and identify one scheduler run in
//!   logs and status reports. They never appear inside a snapshot.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around a `u64` sequence number.
macro_rules! define_seq_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub u64);

        impl $name {
            /// Return the id that follows this one, or `None` on overflow.
            pub const fn next(self) -> Option<Self> {
                match self.0.checked_add(1) {
                    Some(n) => Some(Self(n)),
                    None => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}-{:04}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

/// Generates a newtype wrapper around a configured string key.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a key from anything string-like.
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Borrow the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl core::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_seq_id! {
    /// Identifier of an alert or incident, unique for the engine's lifetime.
    AlertId, "ALR"
}

define_seq_id! {
    /// Identifier of a resource allocation, unique across all pools.
    AllocationId, "ALC"
}

define_key! {
    /// Configured identifier of a metric (e.g. `landfillCapacity`).
    MetricId
}

define_key! {
    /// Configured identifier of a simulated entity (e.g. `ambulance-2`).
    EntityId
}

define_key! {
    /// Configured identifier of a resource pool (e.g. `fire-engines`).
    PoolId
}

/// Identifier of a single scheduler run (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new run identifier using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
