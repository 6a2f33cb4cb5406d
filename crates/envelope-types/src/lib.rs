//! Shared types for the Envelope client core.
//!
//! - [`clock`]: injectable wall clock used for every expiry computation
//! - [`credential`]: the bearer credential and the backend grant it is derived from

pub mod clock;
pub mod credential;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use credential::{Credential, GrantUser, TokenGrant};
