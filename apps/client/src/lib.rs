//! Client side of the Chocoo API: a typed HTTP client, a stale-while-revalidate
//! snapshot cache and optimistic local state with rollback.

pub mod api;
pub mod bookings;
pub mod cache;
pub mod error;
pub mod optimistic;
pub mod snapshot;

pub use api::{ApiClient, CallerContext, ClientConfig};
pub use bookings::MyBookings;
pub use cache::{CachedRead, SwrCache, Ttl};
pub use error::ClientError;
pub use optimistic::OptimisticState;
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
