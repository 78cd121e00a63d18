//! Entity models.
//!
//! Each model declares its table and field allow-lists; the mechanics come
//! from [`Repository`](crate::repository::Repository). Content is
//! multi-language, so every entity carries a localized-name pair: `name` in
//! the display language and `name_native` in the original script.

pub mod character;
pub mod episode;
pub mod item;

pub use character::Character;
pub use episode::Episode;
pub use item::Item;
