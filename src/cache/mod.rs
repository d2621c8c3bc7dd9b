pub mod state;

pub use state::{CachedSignalValue, DeviceState, StateCache};
