use serde::Serialize;
use std::convert::Infallible;

use warp::{reject, Filter, Rejection, Reply};

use crate::catalog::{Catalog, CatalogError};
use crate::scheduler::PhotoScheduler;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct NotFoundError {
    pub message: String,
}

impl reject::Reject for NotFoundError {}

#[derive(Debug)]
pub struct ConflictError {
    pub message: String,
}

impl reject::Reject for ConflictError {}

#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
}

impl reject::Reject for ValidationError {}

#[derive(Debug)]
pub struct InternalError {
    pub message: String,
}

impl reject::Reject for InternalError {}

/// Maps a catalog failure onto the rejection carrying its HTTP status.
pub fn reject_catalog_error(e: CatalogError) -> Rejection {
    match e {
        CatalogError::NotFound { .. } => reject::custom(NotFoundError {
            message: e.to_string(),
        }),
        CatalogError::DuplicateLocation(_) => reject::custom(ConflictError {
            message: e.to_string(),
        }),
        CatalogError::DirectoryNotFound(_) => reject::custom(ValidationError {
            message: e.to_string(),
        }),
        other => {
            log::error!("Request failed: {}", other);
            reject::custom(InternalError {
                message: other.to_string(),
            })
        }
    }
}

pub fn with_catalog(
    catalog: Catalog,
) -> impl Filter<Extract = (Catalog,), Error = Infallible> + Clone {
    warp::any().map(move || catalog.clone())
}

pub fn with_scheduler(
    scheduler: PhotoScheduler,
) -> impl Filter<Extract = (PhotoScheduler,), Error = Infallible> + Clone {
    warp::any().map(move || scheduler.clone())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;
    let timestamp = chrono::Utc::now().to_rfc3339();

    if err.is_not_found() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(not_found) = err.find::<NotFoundError>() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = not_found.message.clone();
    } else if let Some(conflict) = err.find::<ConflictError>() {
        code = warp::http::StatusCode::CONFLICT;
        message = conflict.message.clone();
    } else if let Some(validation_error) = err.find::<ValidationError>() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = validation_error.message.clone();
    } else if let Some(internal) = err.find::<InternalError>() {
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = internal.message.clone();
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = "Invalid request body".to_string();
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = "Invalid query string".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = warp::http::StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    let error_response = ErrorResponse {
        error: message,
        code: code.as_u16(),
        timestamp,
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_response),
        code,
    ))
}

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
}
