// ------------------------------------------------------------
// Orchestrator error types
// ------------------------------------------------------------
//
// Construction errors are fatal to the construction attempt and are
// returned only after every partially built resource has been released.
// Collector runtime failures never appear here; they stay inside the
// collector's own execution.
//

use std::fmt;

use thiserror::Error;

/// Errors surfaced by the [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The resolver pool could not be built.
    #[error("unable to build the pool of resolvers: {0}")]
    ResolverPoolUnavailable(#[source] anyhow::Error),

    /// A graph backend could not be constructed.
    #[error("failed to create the {backend} graph: {source}")]
    BackendSetupFailed {
        backend: String,
        #[source]
        source: anyhow::Error,
    },

    /// A collector's `start()` failed; it was not registered.
    #[error("data source {name} failed to start: {source}")]
    SourceStartFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Registration attempted after shutdown.
    #[error("the orchestrator has already been shut down")]
    AlreadyShutdown,

    /// One or more resources failed to tear down cleanly.
    #[error("shutdown completed with errors: {0}")]
    Teardown(TeardownReport),
}

/// Which owned resource a teardown failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    DataSource,
    GraphBackend,
    ResolverPool,
    Watchdog,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::DataSource => "data source",
            ResourceKind::GraphBackend => "graph backend",
            ResourceKind::ResolverPool => "resolver pool",
            ResourceKind::Watchdog => "memory watchdog",
        };
        f.write_str(s)
    }
}

/// A single failed teardown step.
#[derive(Debug)]
pub struct TeardownFailure {
    pub kind: ResourceKind,
    pub name: String,
    pub error: anyhow::Error,
}

/// Every failure collected during a best-effort shutdown.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn record(&mut self, kind: ResourceKind, name: impl Into<String>, error: anyhow::Error) {
        let name = name.into();
        log::warn!("shutdown: {} {} failed to stop: {:#}", kind, name, error);
        self.failures.push(TeardownFailure { kind, name, error });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Ok when nothing failed, otherwise the aggregated error.
    pub fn into_result(self) -> Result<(), OrchestratorError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Teardown(self))
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} {}: {:#}", failure.kind, failure.name, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_ok() {
        assert!(TeardownReport::default().into_result().is_ok());
    }

    #[test]
    fn report_lists_every_failure() {
        let mut report = TeardownReport::default();
        report.record(ResourceKind::DataSource, "crtsh", anyhow::anyhow!("boom"));
        report.record(ResourceKind::GraphBackend, "local", anyhow::anyhow!("disk full"));
        assert_eq!(report.len(), 2);

        let err = report.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("data source crtsh: boom"));
        assert!(msg.contains("graph backend local: disk full"));
    }
}
