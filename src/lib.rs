//! Activity scoring and progression engine for quizzes, typing drills and
//! puzzles.
//!
//! A typing attempt is measured live by [`typing::TypingTracker`], every
//! finished attempt is turned into an immutable [`models::ScoreRecord`] by
//! the [`normalizer`], persisted through a [`store::ScoreStore`], and later
//! folded into a [`models::LearnerProgressionSnapshot`] by [`progression`].
//! [`service::ProgressService`] ties the pieces together.

pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod mirror;
pub mod models;
pub mod normalizer;
pub mod progression;
pub mod report;
pub mod service;
pub mod store;
pub mod typing;

pub use error::{EngineError, EngineResult};
