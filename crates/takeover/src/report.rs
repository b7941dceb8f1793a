use crate::model::{JsonResult, ScanVerdict};
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

const REPORT_QUEUE_CAPACITY: usize = 256;

/// Receives verdicts as workers produce them.
#[async_trait]
pub trait VerdictSink: Send + Sync {
    async fn report(&self, verdict: ScanVerdict);
}

// region:        --- Reporter actor

/// Single writer for stdout and the output file. Workers only hold channel
/// senders, so file writes never interleave.
pub struct Reporter {
    tx: mpsc::Sender<ScanVerdict>,
    handle: JoinHandle<Result<()>>,
}

#[derive(Clone)]
struct ChannelSink {
    tx: mpsc::Sender<ScanVerdict>,
}

#[async_trait]
impl VerdictSink for ChannelSink {
    async fn report(&self, verdict: ScanVerdict) {
        if let Err(err) = self.tx.send(verdict).await {
            error!("{:12} - reporter closed, dropped {}", "REPORT", err.0.hostname);
        }
    }
}

impl Reporter {
    pub fn spawn(output: Option<PathBuf>) -> Result<Self> {
        let output = output.map(OutputFile::open).transpose()?;
        let (tx, rx) = mpsc::channel(REPORT_QUEUE_CAPACITY);
        let handle = tokio::spawn(write_loop(rx, output));
        Ok(Self { tx, handle })
    }

    pub fn sink(&self) -> Arc<dyn VerdictSink> {
        Arc::new(ChannelSink {
            tx: self.tx.clone(),
        })
    }

    /// Waits until every queued verdict is written. Sinks handed out by
    /// `sink` must be dropped first.
    pub async fn finish(self) -> Result<()> {
        drop(self.tx);
        self.handle.await?
    }
}

async fn write_loop(
    rx: mpsc::Receiver<ScanVerdict>,
    mut output: Option<OutputFile>,
) -> Result<()> {
    let mut stream = ReceiverStream::new(rx);
    let mut first_error = None;

    while let Some(verdict) = stream.next().await {
        print!("{}", colorize(&verdict));

        if let Some(file) = output.as_mut() {
            if let Err(err) = file.append(&verdict) {
                error!("{:12} - {:?}: {}", "WRITE FAILED", file.path(), err);
                first_error = Some(err);
                output = None;
            }
        }
    }

    info!("{:12} - reporter drained", "REPORT");
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn colorize(verdict: &ScanVerdict) -> String {
    let label = verdict.label();
    let color = if verdict.vulnerable { "32" } else { "31" };
    verdict
        .to_line()
        .replacen(&label, &format!("\u{1b}[{};1m{}\u{1b}[0m", color, label), 1)
}

// endregion:     --- Reporter actor

// region:        --- Output file

enum OutputFile {
    Text(PathBuf),
    Json {
        path: PathBuf,
        results: Vec<JsonResult>,
    },
}

impl OutputFile {
    fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }

        if !is_json(&path) {
            return Ok(Self::Text(path));
        }

        // keep results of earlier runs sharing the same file; anything that
        // is not a result array is refused rather than overwritten
        let results = match fs::read(&path) {
            Ok(content) if !content.is_empty() => serde_json::from_slice(&content)?,
            _ => Vec::new(),
        };
        Ok(Self::Json { path, results })
    }

    fn path(&self) -> &Path {
        match self {
            Self::Text(path) => path,
            Self::Json { path, .. } => path,
        }
    }

    fn append(&mut self, verdict: &ScanVerdict) -> Result<()> {
        match self {
            Self::Text(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(verdict.to_line().as_bytes())?;
            }
            Self::Json { path, results } => {
                results.push(JsonResult::from(verdict));
                let json = serde_json::to_string(results)?;
                fs::write(path, json)?;
            }
        }
        Ok(())
    }
}

pub fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

pub fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        Ok(false)
    } else {
        fs::create_dir_all(dir)?;
        Ok(true)
    }
}

// endregion:     --- Output file
