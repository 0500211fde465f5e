//! yt-dlp backed downloader

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::fetcher::{Downloader, FetchError, FetchOutput, FetchRequest};

/// Output template inside the job directory
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Keep failure reasons readable when the tool dumps a lot of stderr
const MAX_STDERR_BYTES: usize = 2048;

/// Runs an external yt-dlp compatible program once per attempt.
///
/// `extra_args` go first, so the generated `-f`/`-o` options take precedence.
/// The child is killed if the future is dropped.
#[derive(Debug, Clone)]
pub struct CommandDownloader {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl CommandDownloader {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args,
            timeout,
        }
    }

    fn command(&self, request: &FetchRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("-f")
            .arg(&request.format)
            .arg("-o")
            .arg(request.target_dir.join(OUTPUT_TEMPLATE))
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--")
            .arg(&request.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutput, FetchError> {
        debug!(
            job_id = %request.job_id,
            program = %self.program,
            url = %request.url,
            "Spawning downloader"
        );

        let output = tokio::time::timeout(self.timeout, self.command(&request).output())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(FetchError::ProcessFailed {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or(FetchError::NoOutput)?;

        let size = tokio::fs::metadata(&path).await?.len();

        Ok(FetchOutput {
            path,
            metadata: serde_json::json!({
                "downloader": self.name(),
                "format": request.format,
                "size": size,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX_STDERR_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_STDERR_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
