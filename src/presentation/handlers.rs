// HTTP request handlers
use crate::application::playback::PlaybackFrame;
use crate::application::view_state::ViewState;
use crate::domain::analytics::{ParkingSpaceState, ParkingSummary, TrafficSummary};
use crate::domain::traffic::TrafficData;
use crate::presentation::app_state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn traffic_summary(State(state): State<Arc<AppState>>) -> Json<ViewState<TrafficSummary>> {
    Json(state.dashboard.traffic_summary.state())
}

pub async fn traffic_trends(State(state): State<Arc<AppState>>) -> Json<ViewState<Vec<TrafficSummary>>> {
    Json(state.dashboard.traffic_trends.state())
}

pub async fn traffic_latest(State(state): State<Arc<AppState>>) -> Json<ViewState<TrafficData>> {
    Json(state.dashboard.traffic_latest.state())
}

pub async fn traffic_history(State(state): State<Arc<AppState>>) -> Json<ViewState<Vec<TrafficData>>> {
    Json(state.dashboard.traffic_history.state())
}

pub async fn parking_summary(State(state): State<Arc<AppState>>) -> Json<ViewState<ParkingSummary>> {
    Json(state.dashboard.parking_summary.state())
}

pub async fn parking_spaces(State(state): State<Arc<AppState>>) -> Json<ViewState<Vec<ParkingSpaceState>>> {
    Json(state.dashboard.parking_spaces.state())
}

/// Current playback frame
pub async fn playback_frame(State(state): State<Arc<AppState>>) -> Json<PlaybackFrame> {
    Json(state.dashboard.playback.frame())
}

/// Flip play/pause and return the resulting frame
pub async fn toggle_playback(State(state): State<Arc<AppState>>) -> Result<Json<PlaybackFrame>, StatusCode> {
    state
        .dashboard
        .playback
        .toggle()
        .await
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Stream playback frames as server-sent events
pub async fn stream_playback(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut frames = state.dashboard.playback.watch();

    let stream = async_stream::stream! {
        loop {
            let frame = frames.borrow_and_update().clone();
            match Event::default().event("frame").json_data(&frame) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(e) => tracing::error!("Failed to encode playback frame: {}", e),
            }
            if frames.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Re-fetch everything now
pub async fn refresh(State(state): State<Arc<AppState>>) -> StatusCode {
    state.dashboard.refresh_all();
    StatusCode::ACCEPTED
}
