//! Authentication core: tokens, refresh sessions, one-time codes and admin RBAC.
//!
//! Everything here is constructed explicitly around one [`crate::store::AuthStore`];
//! there is no global state. [`service::AuthService`] wires the pieces together
//! and is what the HTTP layer and the CLI hold on to.

pub mod config;
pub mod error;
pub mod otp;
pub mod password;
pub mod principal;
pub mod rbac;
pub mod service;
pub mod session;
pub mod token;
pub mod utils;

pub use config::{AuthConfig, ClassTtl, OtpPolicy};
pub use error::{AuthError, AuthResult, Resource};
pub use otp::{CodeSender, LogCodeSender, OtpPurpose, OtpVerifier};
pub use principal::{AuthenticatedPrincipal, Principal, PrincipalKind};
pub use rbac::Rbac;
pub use service::AuthService;
pub use session::{RefreshSessions, TokenPair};
pub use token::{Claims, TokenCodec, TokenError, TokenKind};
