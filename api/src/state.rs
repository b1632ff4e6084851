use std::sync::Arc;

use sqlx::PgPool;

use crate::correlator::ResponseCorrelator;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Single correlator for the whole process; the message route waits on
    /// it and the callback route completes it.
    pub correlator: Arc<ResponseCorrelator>,
    /// Externally reachable origin used to turn object paths into links.
    pub public_base_url: String,
}
