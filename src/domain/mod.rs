pub mod content_id;
pub mod entities;
pub mod error;
pub mod region;
pub mod variants;
