//! Matchmaking: pairing searching users into rooms.

pub mod coordinator;

pub use coordinator::{MatchCoordinator, MatchSession, SessionPhase};
