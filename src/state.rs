use crate::config::GraphConfig;
use crate::services::graphs::GraphJobService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: GraphConfig,
    pub graph_jobs: Arc<GraphJobService>,
}
