//! Insert statistics and metrics
//!
//! Counts how many navigation round trips each insertion needed and how much
//! time went into rebalancing. Figures are logged per insert at debug level,
//! summarized every [`SUMMARY_INTERVAL`] inserts, and mirrored into the
//! `metrics` facade.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::rebalance::RebalanceOutcome;

/// Inserts between summary log lines
pub const SUMMARY_INTERVAL: u64 = 100;

/// How an insert request was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertKind {
    Root,
    Leaf,
    Duplicate,
}

impl InsertKind {
    fn label(self) -> &'static str {
        match self {
            InsertKind::Root => "root",
            InsertKind::Leaf => "leaf",
            InsertKind::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InsertStats {
    inserts: u64,
    pending_interactions: u64,
    total_interactions: u64,
    rebuilds: u64,
    rebalance_time: Duration,
}

impl InsertStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request; everything but an insert is a navigation step
    pub fn record_request(&mut self, kind: &'static str) {
        metrics::counter!("mope_requests_total", "kind" => kind).increment(1);
        if kind != "insert" {
            self.pending_interactions += 1;
        }
    }

    pub fn record_insert(&mut self, kind: InsertKind, outcome: &RebalanceOutcome, tree_nodes: usize) {
        let interactions = std::mem::take(&mut self.pending_interactions);
        self.inserts += 1;
        self.total_interactions += interactions;
        self.rebuilds += u64::from(outcome.rebuilds);
        self.rebalance_time += outcome.elapsed;

        metrics::counter!("mope_inserts_total", "kind" => kind.label()).increment(1);
        metrics::counter!("mope_rebuilds_total").increment(u64::from(outcome.rebuilds));
        metrics::histogram!("mope_insert_interactions").record(interactions as f64);
        metrics::histogram!("mope_rebalance_seconds").record(outcome.elapsed.as_secs_f64());
        metrics::gauge!("mope_tree_nodes").set(tree_nodes as f64);

        tracing::debug!(
            kind = kind.label(),
            interactions,
            rebuilds = outcome.rebuilds,
            rebalance_us = outcome.elapsed.as_micros() as u64,
            "Insert applied"
        );

        if self.inserts % SUMMARY_INTERVAL == 0 {
            tracing::info!(
                inserts = self.inserts,
                avg_interactions = format!("{:.2}", self.average_interactions()),
                rebuilds = self.rebuilds,
                rebalance_ms = self.rebalance_time.as_millis() as u64,
                tree_nodes,
                "Insert progress"
            );
        }
    }

    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    pub fn total_interactions(&self) -> u64 {
        self.total_interactions
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn rebalance_time(&self) -> Duration {
        self.rebalance_time
    }

    pub fn average_interactions(&self) -> f64 {
        if self.inserts == 0 {
            return 0.0;
        }
        self.total_interactions as f64 / self.inserts as f64
    }
}

/// Serve Prometheus metrics over HTTP at `addr`; call from within the runtime
pub fn install_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
