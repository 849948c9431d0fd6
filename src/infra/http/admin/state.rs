use std::sync::Arc;

use crate::application::invalidation::CacheInvalidator;

#[derive(Clone)]
pub struct AdminState {
    pub invalidator: Arc<CacheInvalidator>,
}
