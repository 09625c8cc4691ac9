pub mod edata;
pub mod frame;

pub use edata::*;
pub use frame::*;
