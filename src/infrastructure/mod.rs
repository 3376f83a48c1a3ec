pub mod cache;
pub mod entities;
pub mod publisher;
pub mod traits;
