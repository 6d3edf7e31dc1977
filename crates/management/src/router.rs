//! Marketing API router. Mounts all campaign endpoints under /api/marketing.

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use campaign_drip::CampaignEngine;

use crate::handlers::{self, ManagementState};

/// Build the marketing router over a shared engine.
/// Returns a Router that should be merged into the main app.
pub fn marketing_router(engine: Arc<CampaignEngine>) -> Router {
    let state = ManagementState { engine };

    Router::new()
        // Campaigns
        .route("/api/marketing/campaigns", get(handlers::list_campaigns).post(handlers::create_campaign))
        .route("/api/marketing/campaigns/:id", get(handlers::get_campaign).patch(handlers::update_campaign).delete(handlers::delete_campaign))
        .route("/api/marketing/campaigns/:id/start", post(handlers::start_campaign))
        .route("/api/marketing/campaigns/:id/stop", post(handlers::stop_campaign))
        .route("/api/marketing/campaigns/:id/pause", post(handlers::pause_campaign))
        .route("/api/marketing/campaigns/:id/resume", post(handlers::resume_campaign))
        // Steps
        .route("/api/marketing/campaigns/:id/steps", get(handlers::list_steps).post(handlers::create_step))
        .route("/api/marketing/campaigns/:id/steps/batch", post(handlers::create_steps_batch))
        .route("/api/marketing/campaigns/:id/steps/:step_id", patch(handlers::update_step).delete(handlers::delete_step))
        // Executions
        .route("/api/marketing/campaigns/:id/executions", get(handlers::list_executions).post(handlers::create_execution))
        .route("/api/marketing/campaigns/:id/executions/:execution_id", patch(handlers::update_execution).delete(handlers::delete_execution))
        // Customers
        .route("/api/marketing/campaigns/:id/customers/progress", get(handlers::customer_progress))
        .route("/api/marketing/campaigns/:id/customers/:customer_id/pause", post(handlers::pause_customer))
        .route("/api/marketing/campaigns/:id/customers/:customer_id/resume", post(handlers::resume_customer))
        .with_state(state)
}
