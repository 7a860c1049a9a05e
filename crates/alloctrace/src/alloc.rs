pub mod global;
pub mod typed;
