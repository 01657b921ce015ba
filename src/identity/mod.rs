//! Identity directory collaborator.

pub mod directory;

pub use directory::{DirectoryFuture, IdentityDirectory, SqliteIdentityDirectory, UserProfile};
