pub mod store;

pub use store::{Group, OpenDenied, PositionStore};
