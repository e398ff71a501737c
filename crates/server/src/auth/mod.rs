//! Website accounts and sessions.

pub mod accounts;
pub mod extract;
pub mod sessions;

pub use accounts::{AccountError, AccountService};
pub use extract::{AuthContext, AuthMethod, CurrentUser};
pub use sessions::SessionStore;
