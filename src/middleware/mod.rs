//! Request pipeline hooks built on the cache engine.

mod response_cache;

pub use response_cache::{
    response_cache_layer, AuthenticatedPrincipal, RequestDescriptor, ResponseCache,
    ResponseDescriptor, DEFAULT_IDENTIFIER, MAX_BUFFERED_BODY,
};
