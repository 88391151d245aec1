// ------------------------------------------------------------
// Append-only registry of data sources
// ------------------------------------------------------------

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::sources::collector::Collector;

#[derive(Default)]
struct Inner {
    sources: Vec<Arc<dyn Collector>>,
    sealed: bool,
}

/// Lock-protected list of registered collectors, in insertion order.
///
/// Once sealed (at shutdown) no further appends are accepted; sealing
/// and appending take the same lock, so every admitted collector is part
/// of the list returned by [`Registry::seal`].
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `source`; returns it back if the registry is sealed.
    pub async fn push(&self, source: Arc<dyn Collector>) -> Result<(), Arc<dyn Collector>> {
        let mut inner = self.inner.lock().await;
        if inner.sealed {
            return Err(source);
        }

        inner.sources.push(source);
        Ok(())
    }

    /// Snapshot of every registered collector.
    pub async fn snapshot(&self) -> Vec<Arc<dyn Collector>> {
        self.inner.lock().await.sources.clone()
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .sources
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.sources.len()
    }

    #[cfg(test)]
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Refuses further appends and returns the final list.
    pub async fn seal(&self) -> Vec<Arc<dyn Collector>> {
        let mut inner = self.inner.lock().await;
        inner.sealed = true;
        inner.sources.clone()
    }

    #[cfg(test)]
    async fn is_sealed(&self) -> bool {
        self.inner.lock().await.sealed
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "sources",
                &self.inner.try_lock().map(|i| i.sources.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::get_source;

    #[tokio::test]
    async fn keeps_insertion_order() {
        let reg = Registry::new();
        assert!(reg.is_empty().await);

        for name in ["wayback", "crtsh", "rapiddns"] {
            assert!(reg.push(get_source(name).unwrap()).await.is_ok());
        }

        assert_eq!(reg.names().await, vec!["wayback", "crtsh", "rapiddns"]);
        assert_eq!(reg.snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn sealed_registry_rejects_appends() {
        let reg = Registry::new();
        assert!(reg.push(get_source("crtsh").unwrap()).await.is_ok());

        let last = reg.seal().await;
        assert_eq!(last.len(), 1);
        assert!(reg.is_sealed().await);

        let rejected = reg.push(get_source("wayback").unwrap()).await;
        assert_eq!(rejected.err().map(|s| s.name().to_string()).as_deref(), Some("wayback"));
        assert_eq!(reg.len().await, 1);
    }
}
