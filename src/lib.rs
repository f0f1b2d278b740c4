//! Re-trigger TeamCity builds on the revision of an earlier build.
//!
//! [`TeamCityProvider::retrigger`] inspects the original build, optionally
//! waits for it to finish, and queues a new build carrying the same branch
//! and change.

pub mod auth;
pub mod error;
pub mod output;
pub mod providers;

pub use error::{CiRerunError, Result};
pub use providers::TeamCityProvider;
