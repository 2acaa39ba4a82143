//! Data models for catalog entities

mod item;
mod outcome;
mod page;
mod user;

pub use item::*;
pub use outcome::*;
pub use page::*;
pub use user::*;
