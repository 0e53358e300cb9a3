//! Common test utilities for updatekit integration tests
//!
//! HTTP fixtures for the download scenarios and helpers for running the
//! binary against an isolated data directory.

// Not every test file uses every helper
#![allow(dead_code)]

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use updatekit::core::Result as UpdateResult;
use updatekit::install::JobLauncher;
use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-looking payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Start offset of a `Range: bytes=N-` request header.
pub fn range_start(request: &Request) -> Option<u64> {
    let value = request.headers.get("range")?.to_str().ok()?;
    value.strip_prefix("bytes=")?.strip_suffix('-')?.parse().ok()
}

/// Serves `body`, answering range requests with 206 and `Content-Range`.
pub struct RangeResponder {
    pub body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len() as u64;
        match range_start(request) {
            Some(start) if start < total => ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes {}-{}/{}", start, total - 1, total))
                .set_body_bytes(self.body[start as usize..].to_vec()),
            Some(_) => ResponseTemplate::new(416).insert_header("Content-Range", format!("bytes */{total}")),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Serves the whole of `body` with 200 whatever the request asks for.
pub struct IgnoresRange {
    pub body: Vec<u8>,
}

impl Respond for IgnoresRange {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(self.body.clone())
    }
}

/// A raw HTTP server that honors `Range` and can misbehave on purpose.
///
/// `connections` counts accepted requests; `ranges` records the offset each
/// request asked for.
pub struct RawServer {
    pub url: String,
    pub connections: Arc<AtomicUsize>,
    pub ranges: Arc<std::sync::Mutex<Vec<Option<u64>>>>,
}

impl RawServer {
    /// The first response dies after `cut_at` bytes; later ones complete.
    pub async fn flaky(body: Vec<u8>, cut_at: usize) -> Result<Self> {
        Self::start(body, Some(cut_at), None).await
    }

    /// Every response is written in 64 KiB pieces with `pace` between them.
    pub async fn throttled(body: Vec<u8>, pace: Duration) -> Result<Self> {
        Self::start(body, None, Some(pace)).await
    }

    async fn start(body: Vec<u8>, cut_first: Option<usize>, pace: Option<Duration>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let ranges = Arc::new(std::sync::Mutex::new(Vec::new()));
        let body = Arc::new(body);

        let served = connections.clone();
        let seen = ranges.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let nth = served.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let Ok(head) = read_head(&mut socket).await else {
                        return;
                    };
                    let start = parse_range(&head);
                    seen.lock().unwrap().push(start);

                    let total = body.len();
                    let from = start.map_or(0, |s| s as usize).min(total);
                    let header = match start {
                        Some(_) => format!(
                            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                            total - from,
                            from,
                            total.saturating_sub(1),
                            total
                        ),
                        None => format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"),
                    };
                    if socket.write_all(header.as_bytes()).await.is_err() {
                        return;
                    }

                    let end = match cut_first {
                        Some(cut) if nth == 0 => cut.min(total).max(from),
                        _ => total,
                    };
                    for piece in body[from..end].chunks(64 * 1024) {
                        if socket.write_all(piece).await.is_err() {
                            return;
                        }
                        if let Some(pace) = pace {
                            tokio::time::sleep(pace).await;
                        }
                    }
                    let _ = socket.flush().await;
                    // Dropping the socket ends a cut response early.
                });
            }
        });

        Ok(Self {
            url: format!("http://{addr}/app"),
            connections,
            ranges,
        })
    }
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_range(head: &str) -> Option<u64> {
    head.lines()
        .find_map(|line| line.strip_prefix("range: ").or_else(|| line.strip_prefix("Range: ")))
        .and_then(|v| v.trim().strip_prefix("bytes="))
        .and_then(|v| v.strip_suffix('-'))
        .and_then(|v| v.parse().ok())
}

/// A port with nothing listening on it.
pub async fn refused_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}/app"))
}

/// Launcher that records scripts instead of running them.
#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: std::sync::Mutex<Vec<PathBuf>>,
}

impl JobLauncher for RecordingLauncher {
    fn launch(&self, script: &Path, _elevated: bool) -> UpdateResult<()> {
        self.launched.lock().unwrap().push(script.to_path_buf());
        Ok(())
    }
}

/// Isolated data directory for running the binary.
pub struct TestEnv {
    pub temp: TempDir,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: TempDir::new()?,
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    /// Run `updatekit` with this environment's data directory.
    pub fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run_with_manifest(args, None)
    }

    pub fn run_with_manifest(&self, args: &[&str], manifest_url: Option<&str>) -> Result<CommandOutput> {
        let mut command = Command::new(env!("CARGO_BIN_EXE_updatekit"));
        command
            .args(args)
            .env("UPDATEKIT_DATA_DIR", self.data_dir())
            .env("UPDATEKIT_NO_PROGRESS", "1")
            .env("NO_COLOR", "1")
            .env_remove("UPDATEKIT_MANIFEST_URL")
            .env_remove("RUST_LOG");
        if let Some(url) = manifest_url {
            command.env("UPDATEKIT_MANIFEST_URL", url);
        }
        let output = command.output().context("Failed to run updatekit")?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Command output helper
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Assert the command succeeded
    pub fn assert_success(&self) -> &Self {
        assert!(
            self.success,
            "Command failed with code {:?}\nStderr: {}",
            self.code, self.stderr
        );
        self
    }

    /// Assert the command failed
    pub fn assert_failure(&self) -> &Self {
        assert!(!self.success, "Command unexpectedly succeeded\nStdout: {}", self.stdout);
        self
    }

    /// Assert stdout contains the given text
    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Expected stdout to contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    /// Assert stderr contains the given text
    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Expected stderr to contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }
}
