//! FFmpeg command builder and supervised runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, FfmpegProgress};

/// Number of diagnostic stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path or printf-style pattern
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Read a numbered image sequence starting at `start_number`.
    pub fn image_sequence(self, fps: u32, start_number: u64) -> Self {
        self.input_arg("-framerate")
            .input_arg(fps.to_string())
            .input_arg("-start_number")
            .input_arg(start_number.to_string())
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds.max(0.0)))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Drop audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostats".to_string());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// How a supervised process ended before its exit status was mapped.
enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(u64),
    Cancelled,
}

/// Runner for FFmpeg commands with progress tracking, timeout and cancellation.
///
/// The child runs in its own process group so a kill reaches any helper
/// processes it started.
#[derive(Default)]
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: FnMut(FfmpegProgress) + Send + 'static,
    {
        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        let ffmpeg = check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut command = Command::new(ffmpeg);
        command.args(&args);
        self.supervise(command, progress_callback).await
    }

    /// Spawn `command`, stream its stderr, wait for exit and map the result.
    pub(crate) async fn supervise<F>(&self, mut command: Command, mut progress_callback: F) -> MediaResult<()>
    where
        F: FnMut(FfmpegProgress) + Send + 'static,
    {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        let reader_handle = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current) {
                    progress_callback(progress);
                } else if !is_progress_field(&line) && !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }

            tail.into_iter().collect::<Vec<_>>()
        });

        let outcome = self.wait_for_completion(&mut child).await;

        if !matches!(outcome, Outcome::Exited(_)) {
            terminate(&mut child).await;
        }

        let tail = reader_handle.await.unwrap_or_default();

        match outcome {
            Outcome::TimedOut(secs) => Err(MediaError::Timeout(secs)),
            Outcome::Cancelled => Err(MediaError::Cancelled),
            Outcome::Exited(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    let detail = tail.last().cloned().unwrap_or_default();
                    let message = match status.code() {
                        Some(code) if detail.is_empty() => format!("FFmpeg exited with code {}", code),
                        Some(code) => format!("FFmpeg exited with code {}: {}", code, detail),
                        None => format!("FFmpeg terminated by signal: {}", detail),
                    };
                    Err(MediaError::ffmpeg_failed(
                        message,
                        Some(tail.join("\n")),
                        status.code(),
                    ))
                }
            }
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> Outcome {
        let timeout_secs = self.timeout_secs;
        let timeout = async move {
            match timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        let cancelled = wait_cancelled(self.cancel_rx.clone());

        tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = timeout => {
                let secs = timeout_secs.unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, killing process group", secs);
                Outcome::TimedOut(secs)
            }
            _ = cancelled => {
                info!("FFmpeg cancelled, killing process group");
                Outcome::Cancelled
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Resolve when the flag flips to `true`; never resolves if the sender is gone.
async fn wait_cancelled(cancel_rx: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = cancel_rx {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Kill the child's whole process group, then reap the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("kill after group termination failed: {}", e);
    }
}

/// `key=value` lines of the progress block that are not snapshot boundaries.
fn is_progress_field(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, _)) => {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        None => false,
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("frames/frame_%06d.png", "out.mp4")
            .image_sequence(30, 1)
            .video_codec("libx264")
            .crf(23)
            .pixel_format("yuv420p");

        let args = cmd.build_args();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let framerate_pos = args.iter().position(|a| a == "-framerate").unwrap();
        assert!(framerate_pos < input_pos);
        assert!(args.contains(&"-start_number".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
        assert_eq!(&args[0], "-y");
    }

    #[test]
    fn test_seek_is_input_arg() {
        let args = FfmpegCommand::new("in.mp4", "out.jpg")
            .seek(12.5)
            .single_frame()
            .build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "12.500");
    }

    #[test]
    fn test_is_progress_field() {
        assert!(is_progress_field("out_time_us=100"));
        assert!(is_progress_field("stream_0_0_q=28.0"));
        assert!(!is_progress_field("frames/frame_000001.png: No such file or directory"));
        assert!(!is_progress_field("[image2 @ 0x5] Could find no file with path"));
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let (_tx, rx) = watch::channel(true);
        let runner = FfmpegRunner::new().with_cancel(rx);
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        assert!(matches!(runner.run(&cmd).await, Err(MediaError::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_maps_exit_code_and_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo 'frame=3' >&2; echo 'progress=continue' >&2; echo 'input missing' >&2; exit 3"]);

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let result = FfmpegRunner::new()
            .supervise(command, move |p| sink.lock().unwrap().push(p.frame))
            .await;

        match result {
            Err(MediaError::FfmpegFailed { message, stderr, exit_code }) => {
                assert_eq!(exit_code, Some(3));
                assert!(message.contains("input missing"));
                assert_eq!(stderr.as_deref(), Some("input missing"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(*ticks.lock().unwrap(), vec![3]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_timeout_kills_process_group() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 30 & sleep 30; wait"]);

        let started = std::time::Instant::now();
        let result = FfmpegRunner::new().with_timeout(1).supervise(command, |_| {}).await;

        assert!(matches!(result, Err(MediaError::Timeout(1))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_cancel() {
        let (tx, rx) = watch::channel(false);
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 30"]);

        let runner = FfmpegRunner::new().with_cancel(rx);
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
            tx
        });

        let result = runner.supervise(command, |_| {}).await;
        assert!(matches!(result, Err(MediaError::Cancelled)));
        let _tx = cancel.await.unwrap();
    }
}
