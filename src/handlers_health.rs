use serde_json::json;
use std::convert::Infallible;
use warp::{reject, Filter, Rejection, Reply};

use crate::catalog::Catalog;
use crate::scheduler::PhotoScheduler;
use crate::warp_helpers::{with_catalog, with_scheduler, InternalError};

pub async fn health_check() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn ready_check(catalog: Catalog) -> Result<impl Reply, Rejection> {
    match catalog.pool().acquire().await {
        Ok(_) => Ok(warp::reply::json(&json!({
            "status": "ready",
            "database": "connected",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
        Err(e) => {
            log::error!("Database connection failed: {}", e);
            Err(reject::custom(InternalError {
                message: "Database connection failed".to_string(),
            }))
        }
    }
}

pub async fn scheduler_status(scheduler: PhotoScheduler) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "state": scheduler.status(),
        "last_completed": scheduler.last_completed().map(|t| t.to_rfc3339()),
    })))
}

/// Starts a cycle in the background. A cycle already in progress makes this a no-op.
pub async fn trigger_cycle(scheduler: PhotoScheduler) -> Result<impl Reply, Infallible> {
    tokio::spawn(async move {
        scheduler.run_cycle().await;
    });
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "accepted": true })),
        warp::http::StatusCode::ACCEPTED,
    ))
}

pub fn build_health_routes(
    catalog: Catalog,
    scheduler: PhotoScheduler,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path("health").and(warp::get()).and_then(health_check);

    let ready = warp::path("ready")
        .and(warp::get())
        .and(with_catalog(catalog))
        .and_then(ready_check);

    let status = warp::path("api")
        .and(warp::path("scheduler"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_scheduler(scheduler.clone()))
        .and_then(scheduler_status);

    let run = warp::path("api")
        .and(warp::path("scheduler"))
        .and(warp::path("run"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_scheduler(scheduler))
        .and_then(trigger_cycle);

    health.or(ready).or(status).or(run)
}
