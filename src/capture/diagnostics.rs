//! Diagnostic stream scanner
//!
//! Reads a capture subprocess's diagnostic output line by line, classifies each
//! line and forwards it to a bounded queue for the readiness detector.
//!
//! Forwarding blocks while the queue is full. Once the consumer drops its end
//! the scanner stops forwarding but keeps reading (and logging) until the
//! stream closes, so the subprocess never stalls on a full pipe.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the classified-line queue
pub const DIAGNOSTIC_QUEUE_CAPACITY: usize = 10;

/// Phrases that mean the subprocess cannot start
const FATAL_PHRASES: &[&str] = &["Cannot open", "Could not initialize", "Permission denied"];

/// Phrase the transcoder prints once its streams are mapped
const SUCCESS_PHRASE: &str = "Stream mapping:";

/// How a diagnostic stream is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticMode {
    /// Classify lines and forward them to the readiness detector
    Structured,
    /// Log every line as-is, forward nothing
    PassThrough,
}

/// Classification of one diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Fatal,
    SuccessIndicator,
    Error,
    Warning,
    Info,
}

impl DiagnosticKind {
    /// Classify a line by case-sensitive keyword matching
    pub fn classify(line: &str) -> Self {
        if FATAL_PHRASES.iter().any(|phrase| line.contains(phrase)) {
            DiagnosticKind::Fatal
        } else if line.contains(SUCCESS_PHRASE) {
            DiagnosticKind::SuccessIndicator
        } else if line.contains("Error") || line.contains("error") {
            DiagnosticKind::Error
        } else if line.contains("Warning") || line.contains("warning") {
            DiagnosticKind::Warning
        } else {
            DiagnosticKind::Info
        }
    }
}

/// A classified diagnostic line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    pub line: String,
}

/// Line-by-line reader over a diagnostic stream.
///
/// Lines are split on raw `\n` bytes and decoded lossily, so a stray
/// non-UTF-8 byte never ends the scan.
pub struct DiagnosticScanner<R> {
    lines: Split<BufReader<R>>,
    label: String,
}

impl<R> DiagnosticScanner<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(reader).split(b'\n'),
            label: label.into(),
        }
    }

    /// Next raw line, or `None` at EOF or on a read error
    async fn next_line(&mut self) -> Option<String> {
        match self.lines.next_segment().await {
            Ok(Some(bytes)) => {
                let mut line = String::from_utf8_lossy(&bytes).into_owned();
                if line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("{}: failed to read diagnostic stream: {}", self.label, e);
                None
            }
        }
    }

    /// Next classified line, or `None` once the stream closes or fails
    pub async fn next_event(&mut self) -> Option<DiagnosticEvent> {
        let line = self.next_line().await?;
        let event = DiagnosticEvent {
            kind: DiagnosticKind::classify(&line),
            line,
        };
        self.log(&event);
        Some(event)
    }

    fn log(&self, event: &DiagnosticEvent) {
        let label = &self.label;
        let line = &event.line;
        match event.kind {
            DiagnosticKind::Fatal => tracing::error!("{} startup failure: {}", label, line),
            DiagnosticKind::Error => tracing::error!("{} error: {}", label, line),
            DiagnosticKind::Warning => tracing::warn!("{} warning: {}", label, line),
            DiagnosticKind::SuccessIndicator => {
                tracing::info!("{} successfully initialized streams", label)
            }
            DiagnosticKind::Info => tracing::debug!("{}: {}", label, line),
        }
    }

    /// Forward classified lines to `tx` until the stream closes.
    /// Returns the number of lines read.
    pub async fn run(mut self, tx: mpsc::Sender<DiagnosticEvent>) -> usize {
        let mut count = 0;
        let mut forwarding = true;

        while let Some(event) = self.next_event().await {
            count += 1;
            if forwarding && tx.send(event).await.is_err() {
                tracing::debug!("{}: diagnostic consumer gone, draining only", self.label);
                forwarding = false;
            }
        }

        tracing::debug!("{}: diagnostic stream closed after {} lines", self.label, count);
        count
    }

    /// Log every line without classification until the stream closes
    pub async fn pass_through(mut self) -> usize {
        let mut count = 0;
        while let Some(line) = self.next_line().await {
            count += 1;
            tracing::info!("{}: {}", self.label, line);
        }
        count
    }
}

/// Spawn a scanner task for `reader`.
///
/// In structured mode the returned receiver yields classified lines; in
/// pass-through mode no receiver is returned.
pub fn spawn_scanner<R>(
    reader: R,
    mode: DiagnosticMode,
    label: impl Into<String>,
) -> (JoinHandle<usize>, Option<mpsc::Receiver<DiagnosticEvent>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let scanner = DiagnosticScanner::new(reader, label);
    match mode {
        DiagnosticMode::Structured => {
            let (tx, rx) = mpsc::channel(DIAGNOSTIC_QUEUE_CAPACITY);
            (tokio::spawn(scanner.run(tx)), Some(rx))
        }
        DiagnosticMode::PassThrough => (tokio::spawn(scanner.pass_through()), None),
    }
}
