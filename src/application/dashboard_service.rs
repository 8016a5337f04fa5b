// Dashboard service - owns every coordinator and the playback driver
use crate::application::backend_gateway::BackendGateway;
use crate::application::coordinator::Coordinator;
use crate::application::data_sources::{
    ParkingChunkSource, ParkingSpacesSource, ParkingSummarySource, TrafficDataSource,
    TrafficHistorySource, TrafficSummarySource, TrafficTrendsSource,
};
use crate::application::playback::PlaybackDriver;
use crate::domain::analytics::{ParkingSpaceState, ParkingSummary, TrafficSummary};
use crate::domain::parking::ParkingChunk;
use crate::domain::traffic::TrafficData;
use crate::infrastructure::config::{PlaybackSettings, RefreshSettings};
use std::sync::Arc;
use std::time::Duration;

pub struct DashboardService {
    pub traffic_summary: Coordinator<TrafficSummary>,
    pub parking_summary: Coordinator<ParkingSummary>,
    pub traffic_trends: Coordinator<Vec<TrafficSummary>>,
    pub parking_spaces: Coordinator<Vec<ParkingSpaceState>>,
    pub parking_chunk: Coordinator<ParkingChunk>,
    pub traffic_latest: Coordinator<TrafficData>,
    pub traffic_history: Coordinator<Vec<TrafficData>>,
    pub playback: PlaybackDriver,
}

impl DashboardService {
    /// Start every coordinator against `gateway`. Zero timer periods are rejected
    /// before anything is spawned.
    pub fn activate(
        gateway: Arc<dyn BackendGateway>,
        refresh: &RefreshSettings,
        playback: &PlaybackSettings,
    ) -> anyhow::Result<Self> {
        refresh.validate()?;
        playback.validate()?;

        let summary_every = Duration::from_secs(refresh.summary_secs);
        let trends_every = Duration::from_secs(refresh.trends_secs);
        let trend_window = match refresh.trend_window_hours {
            0 => None,
            hours => Some(chrono::Duration::hours(hours as i64)),
        };

        let parking_chunk = Coordinator::activate(ParkingChunkSource, gateway.clone());
        let playback = PlaybackDriver::spawn(
            parking_chunk.watch(),
            Duration::from_millis(playback.tick_millis),
        );

        Ok(Self {
            traffic_summary: Coordinator::activate(
                TrafficSummarySource { interval: summary_every },
                gateway.clone(),
            ),
            parking_summary: Coordinator::activate(
                ParkingSummarySource { interval: summary_every },
                gateway.clone(),
            ),
            traffic_trends: Coordinator::activate(
                TrafficTrendsSource {
                    interval: trends_every,
                    window: trend_window,
                },
                gateway.clone(),
            ),
            parking_spaces: Coordinator::activate(
                ParkingSpacesSource { interval: summary_every },
                gateway.clone(),
            ),
            parking_chunk,
            traffic_latest: Coordinator::activate(
                TrafficDataSource { interval: summary_every },
                gateway.clone(),
            ),
            traffic_history: Coordinator::activate(
                TrafficHistorySource {
                    interval: summary_every,
                    window: chrono::Duration::hours(24),
                },
                gateway,
            ),
            playback,
        })
    }

    /// Ask every coordinator for an immediate re-fetch
    pub fn refresh_all(&self) {
        self.traffic_summary.refresh();
        self.parking_summary.refresh();
        self.traffic_trends.refresh();
        self.parking_spaces.refresh();
        self.parking_chunk.refresh();
        self.traffic_latest.refresh();
        self.traffic_history.refresh();
    }

    /// Stop playback and release every timer and subscription
    pub async fn deactivate(&self) {
        self.playback.stop().await;
        self.traffic_summary.deactivate().await;
        self.parking_summary.deactivate().await;
        self.traffic_trends.deactivate().await;
        self.parking_spaces.deactivate().await;
        self.parking_chunk.deactivate().await;
        self.traffic_latest.deactivate().await;
        self.traffic_history.deactivate().await;
    }
}
