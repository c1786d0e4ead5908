//! trellis-auth: bearer tokens and roles on top of trellis repositories.
//!
//! [`Accounts`] registers users and logs them in, handing out a UUID access
//! token. [`Authenticator`] resolves a token back to its [`User`] while the
//! token is live in the [`TokenStore`], and [`authorize`] checks the fixed
//! [`Role`] hierarchy.

pub mod accounts;
pub mod authenticator;
pub mod roles;
pub mod token;
pub mod user;

pub use accounts::Accounts;
pub use authenticator::{authorize, require, Authenticator, PUBLIC_TOKEN};
pub use roles::Role;
pub use token::{Clock, ManualClock, MemoryTokenStore, SystemClock, TokenStore};
pub use user::User;
