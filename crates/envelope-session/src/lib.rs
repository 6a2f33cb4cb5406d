//! Authenticated session lifecycle for the Envelope client.
//!
//! [`SessionManager`] holds the bearer credential, decides whether it is still
//! usable, refreshes it (once, no matter how many callers ask), persists it
//! through a [`CredentialStore`] and tells subscribers about every change.
//!
//! # Example
//!
//! ```rust,ignore
//! use envelope_session::{MemoryCredentialStore, SessionManager};
//!
//! let session = SessionManager::new(Arc::new(MemoryCredentialStore::new()), backend);
//! let sub = session.on_session_change(|c| println!("signed in: {}", c.is_some()));
//! let credential = session.ensure_valid_credential().await?;
//! sub.unsubscribe();
//! ```

mod backend;
mod config;
mod error;
mod manager;
mod state;
mod store;
mod subscribers;

pub use backend::{AuthBackend, AuthBackendError, SharedAuthBackend};
pub use config::{
    DEFAULT_FALLBACK_LIFETIME, DEFAULT_REFRESH_LOOKAHEAD, DEFAULT_STORAGE_KEY, SessionConfig,
};
pub use error::{Result, SessionError, StoreError};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use state::{SessionInfo, SessionState};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, SharedCredentialStore};
pub use subscribers::{SessionHandler, Subscription};

pub use envelope_types::{Credential, TokenGrant};
