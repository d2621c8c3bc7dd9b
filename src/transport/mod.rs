pub mod frame;
pub mod proto;
