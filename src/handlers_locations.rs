use serde::Deserialize;
use serde_json::json;
use warp::{Filter, Rejection, Reply};

use crate::catalog::Catalog;
use crate::warp_helpers::{reject_catalog_error, with_catalog};

#[derive(Debug, Deserialize)]
pub struct CreateLocationRequest {
    pub directory: String,
}

pub async fn list_locations(catalog: Catalog) -> Result<impl Reply, Rejection> {
    let locations = catalog
        .list_locations()
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&locations))
}

/// Registers the location and starts loading it in the background.
pub async fn create_location(
    request: CreateLocationRequest,
    catalog: Catalog,
) -> Result<impl Reply, Rejection> {
    let location = catalog
        .create_location(&request.directory)
        .await
        .map_err(reject_catalog_error)?;
    catalog.spawn_ingest(location.clone());

    Ok(warp::reply::with_status(
        warp::reply::json(&location),
        warp::http::StatusCode::CREATED,
    ))
}

pub async fn delete_location(id: i64, catalog: Catalog) -> Result<impl Reply, Rejection> {
    catalog
        .delete_location(id)
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub async fn ingest_location(id: i64, catalog: Catalog) -> Result<impl Reply, Rejection> {
    let location = catalog
        .get_location(id)
        .await
        .map_err(reject_catalog_error)?;
    catalog.spawn_ingest(location);

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "accepted": true })),
        warp::http::StatusCode::ACCEPTED,
    ))
}

pub fn build_location_routes(
    catalog: Catalog,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let list_route = warp::path("api")
        .and(warp::path("locations"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_catalog(catalog.clone()))
        .and_then(list_locations);

    let create_route = warp::path("api")
        .and(warp::path("locations"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_catalog(catalog.clone()))
        .and_then(create_location);

    let delete_route = warp::path("api")
        .and(warp::path("locations"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_catalog(catalog.clone()))
        .and_then(delete_location);

    let ingest_route = warp::path("api")
        .and(warp::path("locations"))
        .and(warp::path::param::<i64>())
        .and(warp::path("ingest"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_catalog(catalog))
        .and_then(ingest_location);

    list_route.or(create_route).or(delete_route).or(ingest_route)
}
