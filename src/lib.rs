pub mod catalog;
pub mod config;
pub mod db;
pub mod description;
pub mod file_scanner;
pub mod format_registry;
pub mod handlers_entries;
pub mod handlers_health;
pub mod handlers_locations;
pub mod ingestion;
pub mod metadata_extractor;
pub mod raw_processor;
pub mod scheduler;
pub mod search_index;
pub mod warp_helpers;

use warp::Filter;

use catalog::Catalog;
use scheduler::PhotoScheduler;

/// Every HTTP route, with CORS, request logging and error mapping applied.
pub fn build_routes(
    catalog: Catalog,
    scheduler: PhotoScheduler,
) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
    handlers_health::build_health_routes(catalog.clone(), scheduler)
        .or(handlers_locations::build_location_routes(catalog.clone()))
        .or(handlers_entries::build_entry_routes(catalog))
        .with(warp_helpers::cors())
        .with(warp::log("curator"))
        .recover(warp_helpers::handle_rejection)
}
