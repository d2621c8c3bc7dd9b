pub mod router;

pub use router::{CallRequest, CallResult, CallRouter};
