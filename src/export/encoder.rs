use crate::db::models::{ExportParams, OutputFormat, Resolution};
use crate::error::Error;
use anyhow::Result;
use log::{debug, warn};
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Letterbox filter for a fixed output size
pub fn scale_filter(resolution: Resolution) -> Option<String> {
    match resolution {
        Resolution::Original => None,
        Resolution::Fixed { width, height } => Some(format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = width,
            h = height
        )),
    }
}

/// Full ffmpeg argument list for one export
pub fn encoder_args(manifest: &Path, params: &ExportParams, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y", "-f", "concat", "-safe", "0", "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(manifest.to_string_lossy().into_owned());
    args.extend(["-fps_mode".to_string(), "vfr".to_string()]);

    if let Some(filter) = scale_filter(params.resolution) {
        args.push("-vf".to_string());
        args.push(filter);
    }

    let crf = params.crf.to_string();
    let codec: Vec<&str> = match params.format {
        OutputFormat::Webm => vec![
            "-c:v", "libvpx-vp9", "-crf", &crf, "-b:v", "0", "-an", "-f", "webm",
        ],
        OutputFormat::Mp4 => vec![
            "-c:v", "libx264", "-crf", &crf, "-preset", "medium", "-pix_fmt", "yuv420p", "-an",
            "-movflags", "+faststart", "-f", "mp4",
        ],
    };
    args.extend(codec.into_iter().map(str::to_string));

    args.extend(["-progress", "pipe:1", "-nostats"].map(str::to_string));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// `frame=N` from the `-progress` key/value stream
pub fn parse_frame_count(line: &str) -> Option<i32> {
    let value = line.trim().strip_prefix("frame=")?;
    value.trim().parse().ok()
}

/// Keeps the last `limit` characters of a line stream
#[derive(Debug)]
pub struct DiagnosticTail {
    limit: usize,
    lines: VecDeque<String>,
    chars: usize,
}

impl DiagnosticTail {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            lines: VecDeque::new(),
            chars: 0,
        }
    }

    pub fn push(&mut self, line: &str) {
        let count = line.chars().count() + 1;
        self.lines.push_back(line.to_string());
        self.chars += count;

        while self.chars > self.limit {
            let Some(front) = self.lines.front() else {
                break;
            };
            let front_chars = front.chars().count() + 1;
            if self.chars - front_chars < self.limit {
                break;
            }
            self.chars -= front_chars;
            self.lines.pop_front();
        }
    }

    /// Joined text, cut to at most `limit` characters from the end
    pub fn into_string(self) -> String {
        let text = Vec::from(self.lines).join("\n");
        let text = text.trim();
        let skip = text.chars().count().saturating_sub(self.limit);
        text.chars().skip(skip).collect()
    }
}

/// How the encoder process ended
#[derive(Debug)]
pub struct EncodeOutcome {
    pub status: ExitStatus,
    pub diagnostics: String,
}

/// A running encoder. Its diagnostic stream is drained on a separate task
/// while the caller reads progress, so neither pipe can fill up and stall
/// the child.
pub struct RunningEncoder {
    child: Child,
    progress: Lines<BufReader<ChildStdout>>,
    diagnostics: JoinHandle<String>,
}

impl RunningEncoder {
    pub fn spawn(program: &Path, args: &[String], tail_chars: usize) -> Result<Self> {
        debug!("Starting encoder: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Export(format!(
                    "Failed to start encoder {}: {}",
                    program.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Export("Failed to capture encoder stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Export("Failed to capture encoder stderr".to_string()))?;

        Ok(Self {
            child,
            progress: BufReader::new(stdout).lines(),
            diagnostics: tokio::spawn(drain_diagnostics(stderr, tail_chars)),
        })
    }

    /// Next reported frame count; `None` once the progress stream closes
    pub async fn next_frame_count(&mut self) -> Result<Option<i32>> {
        while let Some(line) = self.progress.next_line().await? {
            if let Some(count) = parse_frame_count(&line) {
                return Ok(Some(count));
            }
        }
        Ok(None)
    }

    /// Wait for exit and collect the diagnostic tail
    pub async fn finish(mut self) -> Result<EncodeOutcome> {
        // Keep draining stdout in case the caller stopped early
        while self.progress.next_line().await?.is_some() {}

        let status = self.child.wait().await?;
        let diagnostics = match self.diagnostics.await {
            Ok(text) => text,
            Err(e) => {
                warn!("Encoder diagnostic reader failed: {}", e);
                String::new()
            }
        };
        Ok(EncodeOutcome {
            status,
            diagnostics,
        })
    }
}

async fn drain_diagnostics(stderr: ChildStderr, tail_chars: usize) -> String {
    let mut tail = DiagnosticTail::new(tail_chars);
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tail.push(&line),
            Ok(None) => break,
            Err(e) => {
                tail.push(&format!("<failed to read encoder diagnostics: {}>", e));
                break;
            }
        }
    }
    tail.into_string()
}
