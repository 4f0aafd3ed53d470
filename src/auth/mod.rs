//! Single sign-on engine.
//!
//! Turns an identity asserted by an authenticating reverse proxy into a local
//! login. The pieces, leaves first:
//!
//! - [`pattern`]: wildcard exclusion lists compiled to a single regex.
//! - [`identity`]: `user@REALM` / `DOMAIN\user` normalization.
//! - [`applicability`]: whether a request should be treated as SSO.
//! - [`SsoAuthenticator`]: ties the above to the injected collaborators.

pub mod applicability;
mod authenticator;
mod collaborators;
mod error;
pub mod identity;
pub mod pattern;
mod principal;
mod request;
mod session_store;

pub use applicability::{Applicability, BUILT_IN_EXCLUDED_PATHS, ExclusionReason};
pub use authenticator::{AuthenticationOutcome, Rejection, SsoAuthenticator};
pub use collaborators::{
    ConfigProvider, DiagnosticsSink, EstablishedSession, IdentityResolver, SessionEstablisher,
    SessionInspector, SsoConfig, SsoSnapshot, SwappableConfig, TracingDiagnostics,
};
pub use error::{ErrorResponse, GateError, ResolveError, SessionError, SessionResult};
pub use identity::{NormalizedIdentity, RawIdentity};
pub use pattern::{CompiledMatcher, PatternError};
pub use principal::{Principal, PrincipalId};
pub use request::{EntryPoint, RequestContext, RequestContextBuilder, SessionState, sso_header_value};
pub use session_store::{MemorySessionStore, SsoSession};
