pub mod cascade;
pub mod work;

pub use cascade::*;
pub use work::*;
