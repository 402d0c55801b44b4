//! Captured service output: `<state>/logs/<service>.log`.
//!
//! Every line is written as `<rfc3339> [stdout|stderr] <line>`. The previous
//! run's log is kept as `<service>.log.1`.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Shared writer for one service's log file.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
    file: Arc<Mutex<tokio::fs::File>>,
}

impl LogSink {
    /// Rotate any existing log to `.1` and open a fresh one.
    pub async fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::rename(&path, rotated(&path)).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_line(&self, stream: Stream, line: &str) -> io::Result<()> {
        let entry = format_line(stream, line);
        let mut file = self.file.lock().await;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }

    /// Copy `reader` into the log line by line until it closes.
    ///
    /// Bytes that are not UTF-8 are replaced rather than ending the capture,
    /// and the stream keeps being drained after a failed write so the child
    /// never blocks on a full pipe.
    pub fn pump<R>(&self, reader: R, stream: Stream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut writable = true;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if !writable {
                            continue;
                        }
                        let line = String::from_utf8_lossy(trim_newline(&buf));
                        if let Err(error) = sink.write_line(stream, &line).await {
                            warn!(file = %sink.path.display(), error = %error, "failed to write log line; discarding further output");
                            writable = false;
                        }
                    }
                    Err(error) => {
                        debug!(stream = stream.as_str(), error = %error, "output stream closed with error");
                        break;
                    }
                }
            }
        })
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `<rfc3339> [<stream>] <line>\n`.
pub fn format_line(stream: Stream, line: &str) -> String {
    format!(
        "{} [{}] {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        stream.as_str(),
        line
    )
}

fn rotated(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

/// Last `n` lines of a log file.
pub fn tail(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let file = fs::File::open(path)?;
    let mut lines = VecDeque::with_capacity(n.min(1024));
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        if lines.len() == n {
            lines.pop_front();
        }
        if n > 0 {
            lines.push_back(line);
        }
    }
    Ok(lines.into())
}

/// Whether any captured line contains `pattern`. Missing files never match.
pub fn contains(path: &Path, pattern: &str) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    io::BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .any(|line| message_of(&line).contains(pattern))
}

/// The captured text of a log line, without timestamp and stream prefix.
fn message_of(line: &str) -> &str {
    line.split_once("] ").map_or(line, |(_, message)| message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_line_has_timestamp_and_stream() {
        let line = format_line(Stream::Stderr, "boom");
        let (timestamp, rest) = line.split_once(' ').unwrap();

        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert_eq!(rest, "[stderr] boom\n");
    }

    #[tokio::test]
    async fn sink_rotates_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("server.log");

        let first = LogSink::create(&path).await.unwrap();
        first.write_line(Stream::Stdout, "first run").await.unwrap();
        let second = LogSink::create(&path).await.unwrap();
        second.write_line(Stream::Stdout, "second run").await.unwrap();

        assert!(contains(&path, "second run"));
        assert!(!contains(&path, "first run"));
        assert!(contains(&rotated(&path), "first run"));
    }

    #[tokio::test]
    async fn pump_copies_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.log");
        let sink = LogSink::create(&path).await.unwrap();

        let input: &'static [u8] = b"loading\nworker ready\n";
        sink.pump(input, Stream::Stdout).await.unwrap();

        let lines = tail(&path, 10).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("[stdout] worker ready"));
        assert!(contains(&path, "worker ready"));
    }

    #[tokio::test]
    async fn pump_keeps_capturing_after_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.log");
        let sink = LogSink::create(&path).await.unwrap();

        let input: &'static [u8] = b"loading\n\xff\xfe binary\nworker ready\r\n";
        sink.pump(input, Stream::Stdout).await.unwrap();

        let lines = tail(&path, 10).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("[stdout] \u{fffd}\u{fffd} binary"));
        assert!(lines[2].ends_with("[stdout] worker ready"));
        assert!(contains(&path, "worker ready"));
    }

    #[tokio::test]
    async fn pump_keeps_last_line_without_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let sink = LogSink::create(&path).await.unwrap();

        let input: &'static [u8] = b"listening";
        sink.pump(input, Stream::Stderr).await.unwrap();

        assert_eq!(tail(&path, 1).unwrap().len(), 1);
        assert!(contains(&path, "listening"));
    }

    #[test]
    fn pattern_does_not_match_timestamp_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        fs::write(&path, "2026-10-19T10:00:00.000Z [stdout] hello\n").unwrap();

        assert!(!contains(&path, "stdout"));
        assert!(contains(&path, "hello"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        fs::write(&path, "a\nb\nc\nd\n").unwrap();

        assert_eq!(tail(&path, 2).unwrap(), vec!["c", "d"]);
        assert!(tail(&path, 0).unwrap().is_empty());
    }
}
