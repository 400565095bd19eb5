pub mod gateway;
pub mod memory;
pub mod pool;
pub mod repos;

// Re-export commonly used items
pub use gateway::{
    NewCredential, NewUser, PgGateway, StoreError, StoreResult, StoredCredential, UserGateway,
    UserRecord, UserTx,
};
pub use memory::MemoryGateway;
pub use pool::{create_pool, run_migrations};
pub use repos::credential::CredentialRepo;
pub use repos::user::{UserRepo, UserRow};
