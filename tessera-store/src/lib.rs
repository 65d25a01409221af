pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod events;
pub mod lock_repo;
pub mod memory;
pub mod session_repo;

pub use booking_repo::PgBookingStore;
pub use database::DbClient;
pub use events::KafkaTransport;
pub use lock_repo::PgLockStore;
pub use memory::MemoryStore;
pub use session_repo::PgSessionStore;
