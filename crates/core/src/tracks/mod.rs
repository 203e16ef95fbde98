pub mod catalog;
pub mod selector;

pub use catalog::*;
pub use selector::*;
