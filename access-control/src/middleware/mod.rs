pub mod guard;
pub mod session;

pub use guard::{authorize, route_guard_middleware, RouteGuard};
pub use session::{
    extract_session_token, session_middleware, AuthenticatedPrincipal, CurrentPrincipal,
    SessionVerifier,
};
