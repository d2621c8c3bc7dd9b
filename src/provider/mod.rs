pub mod locks;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use locks::ProviderLockTable;
pub use registry::ProviderRegistry;
pub use session::ProviderSession;
pub use supervisor::ProviderSupervisor;
