use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{spawn_blocking, JoinHandle};

use crate::schema::Finding;

use super::GraphBackend;

/// File name of the local store inside the output directory.
pub const LOCAL_GRAPH_FILE: &str = "graph.jsonl.gz";

/// Serialized lines buffered between `insert` and the writer thread.
const QUEUE_CAPACITY: usize = 10_000;

/// Embedded store: gzip-compressed JSON lines under the output directory.
///
/// Every session appends its own gzip member, so earlier runs stay
/// readable with a multi-member decoder.
///
/// Design:
/// - `insert` serializes and enqueues; file I/O happens on one blocking
///   writer thread
/// - `close` ends the queue, then waits for the writer to finish the
///   gzip member
/// - A write error stops the writer; later inserts and `close` report it
pub struct LocalGraph {
    path: PathBuf,
    queue: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    writer: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl LocalGraph {
    pub async fn open(dir: &Path) -> Result<Self> {
        let dir = dir.to_path_buf();
        let (path, file) = spawn_blocking(move || open_file(&dir))
            .await
            .context("local graph open task failed")??;

        log::info!("local graph opened at {}", path.display());

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer = spawn_blocking({
            let path = path.clone();
            move || write_loop(&path, file, rx)
        });

        Ok(Self {
            path,
            queue: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

#[async_trait::async_trait]
impl GraphBackend for LocalGraph {
    fn name(&self) -> &str {
        "local"
    }

    async fn insert(&self, finding: &Finding) -> Result<()> {
        let mut line = serde_json::to_vec(finding)?;
        line.push(b'\n');

        let tx = self
            .queue
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("local graph {} is closed", self.path.display()))?;

        tx.send(line)
            .await
            .map_err(|_| anyhow!("local graph writer for {} has stopped", self.path.display()))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the queue lets the writer drain and finish the file
        self.queue.lock().await.take();

        let Some(writer) = self.writer.lock().await.take() else {
            return Ok(());
        };

        writer
            .await
            .with_context(|| format!("local graph writer for {} panicked", self.path.display()))??;

        log::debug!("local graph {} closed", self.path.display());
        Ok(())
    }
}

fn open_file(dir: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let path = dir.join(LOCAL_GRAPH_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    Ok((path, file))
}

/// Runs on a blocking thread until every sender is gone.
fn write_loop(path: &Path, file: File, mut rx: mpsc::Receiver<Vec<u8>>) -> Result<()> {
    let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());

    while let Some(line) = rx.blocking_recv() {
        gz.write_all(&line)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let mut inner = gz
        .finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    inner.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::sync::Arc;

    use flate2::read::MultiGzDecoder;

    use crate::schema::Category;

    fn read_back(path: &Path) -> Vec<Finding> {
        let reader = BufReader::new(MultiGzDecoder::new(File::open(path).unwrap()));
        reader
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect()
    }

    fn finding(name: &str) -> Finding {
        Finding::new(name.into(), "example.com", "crtsh", Category::Cert)
    }

    #[tokio::test]
    async fn sessions_append() {
        let dir = tempfile::tempdir().unwrap();

        let g = LocalGraph::open(dir.path()).await.unwrap();
        g.insert(&finding("a.example.com")).await.unwrap();
        g.close().await.unwrap();

        let g = LocalGraph::open(dir.path()).await.unwrap();
        g.insert(&finding("b.example.com")).await.unwrap();
        g.close().await.unwrap();

        let names: Vec<_> = read_back(&dir.path().join(LOCAL_GRAPH_FILE))
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_inserts_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let g = Arc::new(LocalGraph::open(dir.path()).await.unwrap());

        let inserts: Vec<_> = (0..500)
            .map(|i| {
                let g = g.clone();
                tokio::spawn(async move { g.insert(&finding(&format!("h{i}.example.com"))).await })
            })
            .collect();
        for h in inserts {
            h.await.unwrap().unwrap();
        }

        g.close().await.unwrap();
        assert_eq!(read_back(&dir.path().join(LOCAL_GRAPH_FILE)).len(), 500);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let g = LocalGraph::open(dir.path()).await.unwrap();

        g.close().await.unwrap();
        g.close().await.unwrap();
        assert!(g.insert(&finding("a.example.com")).await.is_err());
    }

    #[tokio::test]
    async fn unusable_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        File::create(&blocker).unwrap();

        assert!(LocalGraph::open(&blocker.join("sub")).await.is_err());
    }
}
