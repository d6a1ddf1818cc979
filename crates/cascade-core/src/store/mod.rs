pub mod cascade_store;
pub mod claim;
pub mod work_store;

pub use cascade_store::CascadeStore;
pub use claim::ClaimManager;
pub use work_store::{ListWorkFilter, WorkStore};
