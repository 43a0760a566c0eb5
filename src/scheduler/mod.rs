pub mod filter;
pub mod store;

pub use filter::{Filter, FilterOperator, FilterValue};
pub use store::JobStore;
