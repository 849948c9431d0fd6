mod admin;
mod edge;
mod middleware;

pub use admin::{AdminState, build_admin_router};
pub use edge::{
    AuthenticatedUser, CacheDirectives, EdgeState, SessionTransition, build_edge_router,
    force_logout_layer, varnish_headers_layer,
};
pub use middleware::{REQUEST_ID_HEADER, RequestContext, log_responses, set_request_context};
