pub mod auth;
pub mod clock;
pub mod memory;
pub mod rollover;
pub mod session;
pub mod store;


pub use auth::{AuthProvider, SessionManager, StaticAuth};
pub use clock::{Clock, FixedClock, SystemClock};
pub use memory::MemoryStore;
pub use session::{AwardOutcome, StatsReconciler, StatsSession, StatsView};
pub use store::{AwardWrite, RolloverWrite, Snapshot, StatsStore, StoreError};
