use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

use super::monitor_websocket;
use crate::error::CoordinatorError;
use crate::monitor::{Coordinator, Proctor};

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub proctor_id: String,
}

/// Every monitor endpoint under `/monitor`
pub fn routes(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    monitor_health_check()
        .or(monitor_config_endpoint(coordinator.clone()))
        .or(rooms_endpoint(coordinator.clone()))
        .or(claim_endpoint(coordinator.clone()))
        .or(release_endpoint(coordinator.clone()))
        .or(participants_endpoint(coordinator.clone()))
        .or(monitor_websocket_route(coordinator))
}

pub fn monitor_health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "health")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Exam Room Coordinator",
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

pub fn monitor_config_endpoint(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "config")
        .and(warp::get())
        .and(with_coordinator(coordinator))
        .map(|coordinator: Arc<Coordinator>| {
            let config = coordinator.config();
            warp::reply::json(&serde_json::json!({
                "lead_time_minutes": config.lead_time.num_minutes(),
                "refresh_interval_secs": config.refresh_interval.as_secs(),
                "feed_timeout_secs": config.feed_timeout.as_secs(),
                "occupancy_lease_secs": config.occupancy_lease.map(|lease| lease.as_secs()),
                "default_room_id": config.default_room_id,
            }))
        })
}

pub fn rooms_endpoint(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "rooms")
        .and(warp::get())
        .and(with_coordinator(coordinator))
        .and_then(list_rooms)
}

pub fn claim_endpoint(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "rooms" / String / "claim")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_coordinator(coordinator))
        .and_then(claim_room)
}

pub fn release_endpoint(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "rooms" / String / "release")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_coordinator(coordinator))
        .and_then(release_room)
}

pub fn participants_endpoint(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "rooms" / String / "participants")
        .and(warp::get())
        .and(with_coordinator(coordinator))
        .and_then(room_participants)
}

/// Console WebSocket; the proctor identifies itself with `?id=..&name=..&role=..`
pub fn monitor_websocket_route(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "ws")
        .and(warp::ws())
        .and(warp::query::<Proctor>())
        .and(with_coordinator(coordinator))
        .map(|ws: warp::ws::Ws, proctor: Proctor, coordinator: Arc<Coordinator>| {
            ws.on_upgrade(move |websocket| {
                monitor_websocket::handle_monitor_websocket(websocket, coordinator, proctor)
            })
        })
}

async fn list_rooms(coordinator: Arc<Coordinator>) -> Result<Response, Infallible> {
    let listing = coordinator.list_rooms().await;
    Ok(warp::reply::json(&listing).into_response())
}

async fn claim_room(
    room_id: String,
    proctor: Proctor,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    match coordinator.claim(&room_id, &proctor).await {
        Ok((room, outcome)) => Ok(warp::reply::json(&serde_json::json!({
            "room": room,
            "outcome": outcome,
        }))
        .into_response()),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn release_room(
    room_id: String,
    request: ReleaseRequest,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    let released = coordinator.release(&room_id, &request.proctor_id).await;
    Ok(warp::reply::json(&serde_json::json!({
        "room_id": room_id,
        "released": released,
    }))
    .into_response())
}

async fn room_participants(
    room_id: String,
    coordinator: Arc<Coordinator>,
) -> Result<Response, Infallible> {
    match coordinator.project_room(&room_id).await {
        Ok(participants) => Ok(warp::reply::json(&serde_json::json!({
            "room_id": room_id,
            "participants": participants,
        }))
        .into_response()),
        Err(e) => Ok(error_reply(&e)),
    }
}

fn error_reply(err: &CoordinatorError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = serde_json::json!({ "error": err.to_string() });
    if let CoordinatorError::RoomLocked { held_by } = err {
        body["held_by"] = serde_json::Value::String(held_by.clone());
    }
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn with_coordinator(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = (Arc<Coordinator>,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}
