use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and serve `/metrics` on `addr`.
    /// Must be called from inside a tokio runtime.
    pub fn install(addr: SocketAddr) -> Result<()> {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("prometheus: serving on {addr}"))?;
        crate::ingest::ensure_metrics_described();
        tracing::info!(%addr, "metrics exporter listening");
        Ok(())
    }

    /// Recorder without a listener; `render()` gives the exposition text.
    pub fn recorder() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        crate::ingest::ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
