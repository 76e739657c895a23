//! One complete pass: authenticate, fetch, probe, record, render.
use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::chart::{TextChart, render_svg, render_text};
use crate::config::AppConfig;
use crate::dashboard::{DashboardClient, DashboardError, LoginCredentials, Session};
use crate::models::{Credential, Node};
use crate::probe::{Dialer, Latency, LatencyProbe};
use crate::report::render_status_table;
use crate::store::{Sample, StoreError, Tick, TimeSeries, TimeSeriesStore};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything one pass produced, ready to be written out.
#[derive(Debug)]
pub struct PassReport {
    pub tick: Tick,
    pub results: Vec<(Node, Latency)>,
    pub series: TimeSeries,
    pub chart: TextChart,
    pub svg: String,
    pub status_table: String,
}

pub struct Monitor<D> {
    dashboard: DashboardClient,
    login: Option<LoginCredentials>,
    token: Option<Credential>,
    probe: LatencyProbe<D>,
    store: TimeSeriesStore,
    probe_concurrency: usize,
    utc_offset: FixedOffset,
}

/// Latency per node name. On duplicate names the later node wins.
pub fn collect_sample(results: &[(Node, Latency)]) -> Sample {
    let sample: Sample = results
        .iter()
        .map(|(node, latency)| (node.name.clone(), latency.millis()))
        .collect();
    if sample.len() < results.len() {
        warn!(
            nodes = results.len(),
            distinct = sample.len(),
            "Duplicate node names; keeping the last measurement for each."
        );
    }
    sample
}

impl<D: Dialer> Monitor<D> {
    pub fn new(config: &AppConfig, dialer: D) -> Result<Self, MonitorError> {
        Ok(Self {
            dashboard: DashboardClient::new(&config.dashboard)?,
            login: config.dashboard.login.clone(),
            token: config.dashboard.token.clone(),
            probe: LatencyProbe::new(dialer, config.probe.clone()),
            store: TimeSeriesStore::new(&config.history),
            probe_concurrency: config.probe_concurrency,
            utc_offset: config.output.utc_offset,
        })
    }

    async fn open_session(&self) -> Result<Session, DashboardError> {
        match (&self.token, &self.login) {
            (Some(token), _) => Ok(self.dashboard.inject(token.clone())),
            (None, Some(login)) => self.dashboard.authenticate(login).await,
            (None, None) => Err(DashboardError::Auth(
                "no token or username/password configured".to_string(),
            )),
        }
    }

    /// Runs one pass at `now`. Dashboard failures abort before the history
    /// is touched; probe failures only mark their node unreachable.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<PassReport, MonitorError> {
        let mut session = self.open_session().await?;
        let nodes = self
            .dashboard
            .fetch_with_reauth(&mut session, self.login.as_ref())
            .await?;

        let results = self
            .probe
            .probe_fleet(&nodes, now.timestamp(), self.probe_concurrency)
            .await;

        let tick = Tick::from_datetime(&now.with_timezone(&self.utc_offset));
        let series = self.store.load().record(tick, collect_sample(&results));
        self.store.save(&series)?;

        let chart = render_text(&series);
        let svg = render_svg(&series);
        let status_table = render_status_table(&results, now, self.utc_offset);
        info!(tick = %tick, nodes = results.len(), ticks = series.len(), "Pass complete.");

        Ok(PassReport {
            tick,
            results,
            series,
            chart,
            svg,
            status_table,
        })
    }
}
