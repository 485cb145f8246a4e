use serde::Deserialize;
use serde_json::json;
use warp::{Filter, Rejection, Reply};

use crate::catalog::Catalog;
use crate::warp_helpers::{reject_catalog_error, with_catalog, ValidationError};

const DEFAULT_PAGE_SIZE: i64 = 50;
const DEFAULT_SEARCH_RESULTS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DescriptionRequest {
    pub text: String,
}

pub async fn list_entries(query: EntryQuery, catalog: Catalog) -> Result<impl Reply, Rejection> {
    let entries = catalog
        .list_entries(
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&entries))
}

pub async fn get_entry(id: i64, catalog: Catalog) -> Result<impl Reply, Rejection> {
    let entry = catalog.get_entry(id).await.map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&entry))
}

pub async fn get_entry_image(id: i64, catalog: Catalog) -> Result<impl Reply, Rejection> {
    let (bytes, content_type) = catalog
        .get_displayable_bytes(id)
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::with_header(bytes, "content-type", content_type))
}

pub async fn set_description(
    id: i64,
    request: DescriptionRequest,
    catalog: Catalog,
) -> Result<impl Reply, Rejection> {
    if request.text.trim().is_empty() {
        return Err(warp::reject::custom(ValidationError {
            message: "Description must not be empty".to_string(),
        }));
    }
    let entry = catalog
        .set_user_description(id, request.text.trim())
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&entry))
}

pub async fn list_descriptions(id: i64, catalog: Catalog) -> Result<impl Reply, Rejection> {
    let records = catalog
        .descriptions(id)
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&records))
}

pub async fn search(query: SearchQuery, catalog: Catalog) -> Result<impl Reply, Rejection> {
    let entries = catalog
        .search(&query.q, query.k.unwrap_or(DEFAULT_SEARCH_RESULTS))
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&entries))
}

pub async fn retry_failed(catalog: Catalog) -> Result<impl Reply, Rejection> {
    let reset = catalog
        .retry_failed_descriptions()
        .await
        .map_err(reject_catalog_error)?;
    Ok(warp::reply::json(&json!({ "reset": reset })))
}

pub fn build_entry_routes(
    catalog: Catalog,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let list_route = warp::path("api")
        .and(warp::path("entries"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<EntryQuery>())
        .and(with_catalog(catalog.clone()))
        .and_then(list_entries);

    let get_route = warp::path("api")
        .and(warp::path("entries"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_catalog(catalog.clone()))
        .and_then(get_entry);

    let image_route = warp::path("api")
        .and(warp::path("entries"))
        .and(warp::path::param::<i64>())
        .and(warp::path("image"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_catalog(catalog.clone()))
        .and_then(get_entry_image);

    let set_description_route = warp::path("api")
        .and(warp::path("entries"))
        .and(warp::path::param::<i64>())
        .and(warp::path("description"))
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::body::json())
        .and(with_catalog(catalog.clone()))
        .and_then(set_description);

    let descriptions_route = warp::path("api")
        .and(warp::path("entries"))
        .and(warp::path::param::<i64>())
        .and(warp::path("descriptions"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_catalog(catalog.clone()))
        .and_then(list_descriptions);

    let search_route = warp::path("api")
        .and(warp::path("search"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<SearchQuery>())
        .and(with_catalog(catalog.clone()))
        .and_then(search);

    let retry_route = warp::path("api")
        .and(warp::path("descriptions"))
        .and(warp::path("retry"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_catalog(catalog))
        .and_then(retry_failed);

    list_route
        .or(get_route)
        .or(image_route)
        .or(set_description_route)
        .or(descriptions_route)
        .or(search_route)
        .or(retry_route)
}
