//! OpenAPI documentation definition.

use fleetstat_core::model::{AggregateSnapshot, StatRecord};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_health,
        crate::handlers::handle_stats,
    ),
    components(schemas(AggregateSnapshot, StatRecord)),
    info(
        title = "fleetstat API",
        version = "1.0",
        description = "Aggregated per-worker stats of the fleet, refreshed periodically"
    )
)]
pub(crate) struct ApiDoc;
