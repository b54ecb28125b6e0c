use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use crate::{
    capabilities::video::decode_frame,
    errors::{PipelineError, Result},
};
use async_trait::async_trait;
use image::RgbImage;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::watch,
};
use tracing::{debug, error, info, warn};

const SINK_EXIT_GRACE: Duration = Duration::from_secs(2);

#[async_trait]
pub trait FrameSource: Send {
    /// `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Continue,
    Cancelled,
}

#[async_trait]
pub trait DisplaySink: Send {
    async fn show(&mut self, frame: &[u8]) -> Result<SinkStatus>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    type Source: FrameSource;
    type Sink: DisplaySink;

    async fn open(&self, path: &Path) -> Result<(Self::Source, Self::Sink)>;

    /// A bare window for raw frames of the given size.
    async fn open_display(&self, width: u32, height: u32) -> Result<Self::Sink>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished { frames: usize },
    Cancelled { frames: usize },
}

pub struct Player<B> {
    backend: B,
    frame_wait: Duration,
}

impl<B: PlaybackBackend> Player<B> {
    pub fn new(backend: B, frame_wait: Duration) -> Self {
        Self {
            backend,
            frame_wait,
        }
    }

    pub async fn play(
        &self,
        path: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PlaybackOutcome> {
        if !path.exists() {
            error!(target: "player", path = %path.display(), "video not found");
            return Err(PipelineError::VideoNotFound(path.to_path_buf()));
        }

        let (mut source, mut sink) = self.backend.open(path).await.inspect_err(|err| {
            error!(target: "player", path = %path.display(), error = %err, "cannot open video");
        })?;

        info!(target: "player", path = %path.display(), "playing video");
        let result = self.stream(&mut source, &mut sink, &mut cancel).await;

        if let Err(err) = sink.close().await {
            warn!(target: "player", error = %err, "display sink did not close cleanly");
        }

        match &result {
            Ok(PlaybackOutcome::Finished { frames }) => {
                info!(target: "player", frames, "playback finished");
            }
            Ok(PlaybackOutcome::Cancelled { frames }) => {
                info!(target: "player", frames, "playback cancelled by user");
            }
            Err(err) => {
                error!(target: "player", error = %err, "playback failed");
            }
        }

        result
    }

    /// Shows each still for `hold`, in order. Images that cannot be decoded
    /// are skipped; closing a window moves on to the next image.
    pub async fn preview(
        &self,
        images: &[PathBuf],
        hold: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PlaybackOutcome> {
        let mut shown = 0;

        for path in images {
            if *cancel.borrow_and_update() {
                return Ok(PlaybackOutcome::Cancelled { frames: shown });
            }

            let frame = match decode_still(path).await {
                Ok(frame) => frame,
                Err(err) => {
                    error!(
                        target: "player",
                        path = %path.display(),
                        error = %err,
                        "unable to open image"
                    );
                    continue;
                }
            };

            info!(target: "player", path = %path.display(), "opening image");
            let (width, height) = frame.dimensions();
            let mut sink = self.backend.open_display(width, height).await?;

            let status = sink.show(frame.as_raw()).await;
            let interrupted = match status {
                Ok(SinkStatus::Continue) => {
                    tokio::select! {
                        _ = tokio::time::sleep(hold) => false,
                        _ = cancel_requested(&mut cancel) => true,
                    }
                }
                Ok(SinkStatus::Cancelled) => false,
                Err(err) => {
                    let _ = sink.close().await;
                    return Err(err);
                }
            };

            if let Err(err) = sink.close().await {
                warn!(target: "player", error = %err, "preview window did not close cleanly");
            }
            shown += 1;

            if interrupted {
                return Ok(PlaybackOutcome::Cancelled { frames: shown });
            }
        }

        Ok(PlaybackOutcome::Finished { frames: shown })
    }

    async fn stream(
        &self,
        source: &mut B::Source,
        sink: &mut B::Sink,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<PlaybackOutcome> {
        let mut frames = 0;

        loop {
            if *cancel.borrow_and_update() {
                return Ok(PlaybackOutcome::Cancelled { frames });
            }

            let Some(frame) = source.next_frame().await? else {
                return Ok(PlaybackOutcome::Finished { frames });
            };

            if sink.show(&frame).await? == SinkStatus::Cancelled {
                return Ok(PlaybackOutcome::Cancelled { frames });
            }
            frames += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.frame_wait) => {}
                _ = cancel_requested(cancel) => {
                    return Ok(PlaybackOutcome::Cancelled { frames });
                }
            }
        }
    }
}

/// Resolves once the flag flips to `true`; never resolves if the sender is gone.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Decodes with ffmpeg and displays through an ffplay window. Escape in the
/// window ends ffplay, which closes its stdin and reads as a cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegPlayback {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    ffplay: PathBuf,
    window_title: String,
}

impl FfmpegPlayback {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        ffplay: impl Into<PathBuf>,
        window_title: impl Into<String>,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            ffplay: ffplay.into(),
            window_title: window_title.into(),
        }
    }

    fn spawn_display(&self, width: u32, height: u32) -> std::result::Result<FfplaySink, String> {
        let mut display = Command::new(&self.ffplay)
            .args(["-loglevel", "error", "-autoexit", "-fflags", "nobuffer"])
            .arg("-window_title")
            .arg(&self.window_title)
            .args(["-f", "rawvideo", "-pixel_format", "rgb24", "-video_size"])
            .arg(format!("{width}x{height}"))
            .args(["-i", "pipe:0"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| format!("failed to start ffplay: {err}"))?;
        let stdin = display
            .stdin
            .take()
            .ok_or_else(|| "ffplay stdin unavailable".to_string())?;

        Ok(FfplaySink {
            display,
            stdin: Some(stdin),
        })
    }

    async fn stream_size(&self, path: &Path) -> Result<(u32, u32)> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|err| stream_error(path, format!("failed to run ffprobe: {err}")))?;

        if !output.status.success() {
            return Err(stream_error(
                path,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_dimensions(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| stream_error(path, "no video stream found".to_string()))
    }
}

#[async_trait]
impl PlaybackBackend for FfmpegPlayback {
    type Source = FfmpegFrameSource;
    type Sink = FfplaySink;

    async fn open(&self, path: &Path) -> Result<(Self::Source, Self::Sink)> {
        let (width, height) = self.stream_size(path).await?;
        debug!(target: "player", width, height, "read video stream size");

        let mut decoder = Command::new(&self.ffmpeg)
            .args(["-loglevel", "error", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| stream_error(path, format!("failed to start ffmpeg: {err}")))?;
        let stdout = decoder
            .stdout
            .take()
            .ok_or_else(|| stream_error(path, "ffmpeg stdout unavailable".to_string()))?;

        let sink = self
            .spawn_display(width, height)
            .map_err(|reason| stream_error(path, reason))?;

        let frame_len = width as usize * height as usize * 3;
        Ok((
            FfmpegFrameSource {
                _decoder: decoder,
                stdout,
                frame_len,
            },
            sink,
        ))
    }

    async fn open_display(&self, width: u32, height: u32) -> Result<Self::Sink> {
        self.spawn_display(width, height)
            .map_err(|reason| PipelineError::other(format!("cannot open display: {reason}")))
    }
}

pub struct FfmpegFrameSource {
    _decoder: Child,
    stdout: ChildStdout,
    frame_len: usize,
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut frame = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut frame).await {
            Ok(_) => Ok(Some(frame)),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct FfplaySink {
    display: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl DisplaySink for FfplaySink {
    async fn show(&mut self, frame: &[u8]) -> Result<SinkStatus> {
        if self.display.try_wait()?.is_some() {
            return Ok(SinkStatus::Cancelled);
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(SinkStatus::Cancelled);
        };
        match stdin.write_all(frame).await {
            Ok(()) => Ok(SinkStatus::Continue),
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(SinkStatus::Cancelled),
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        drop(self.stdin.take());
        match tokio::time::timeout(SINK_EXIT_GRACE, self.display.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                self.display.kill().await?;
            }
        }
        Ok(())
    }
}

async fn decode_still(path: &Path) -> Result<RgbImage> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || decode_frame(&path))
        .await
        .map_err(|err| PipelineError::other(format!("image decode task failed: {err}")))?
}

fn stream_error(path: &Path, reason: String) -> PipelineError {
    PipelineError::VideoStream {
        path: path.to_path_buf(),
        reason,
    }
}

fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (width, height) = line.split_once('x')?;
    let width = width.trim().parse().ok().filter(|w| *w > 0)?;
    let height = height.trim().parse().ok().filter(|h| *h > 0)?;
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;
    use tempfile::TempDir;
    use tokio::time::Instant;

    struct VecSource(VecDeque<Vec<u8>>);

    #[async_trait]
    impl FrameSource for VecSource {
        async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.0.pop_front())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        shown: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
        cancel_after: Option<usize>,
    }

    #[async_trait]
    impl DisplaySink for RecordingSink {
        async fn show(&mut self, frame: &[u8]) -> Result<SinkStatus> {
            let mut shown = self.shown.lock().unwrap();
            if Some(shown.len()) == self.cancel_after {
                return Ok(SinkStatus::Cancelled);
            }
            shown.push(frame[0]);
            Ok(SinkStatus::Continue)
        }

        async fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    struct FakeBackend {
        frames: usize,
        sink: RecordingSink,
        fail_open: bool,
        displays: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    #[async_trait]
    impl PlaybackBackend for FakeBackend {
        type Source = VecSource;
        type Sink = RecordingSink;

        async fn open(&self, path: &Path) -> Result<(Self::Source, Self::Sink)> {
            if self.fail_open {
                return Err(stream_error(path, "not a video".to_string()));
            }
            let frames = (0..self.frames).map(|i| vec![i as u8; 3]).collect();
            Ok((VecSource(frames), self.sink.clone()))
        }

        async fn open_display(&self, width: u32, height: u32) -> Result<Self::Sink> {
            self.displays.lock().unwrap().push((width, height));
            Ok(self.sink.clone())
        }
    }

    fn video_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("fox.mp4");
        std::fs::write(&path, b"video").unwrap();
        path
    }

    fn backend(frames: usize, cancel_after: Option<usize>) -> FakeBackend {
        FakeBackend {
            frames,
            sink: RecordingSink {
                cancel_after,
                ..RecordingSink::default()
            },
            fail_open: false,
            displays: Arc::default(),
        }
    }

    /// PNG stills under `.jpg` names, one shade per image.
    fn stills(dir: &TempDir, shades: &[u8]) -> Vec<PathBuf> {
        shades
            .iter()
            .enumerate()
            .map(|(i, shade)| {
                let path = dir.path().join(format!("fox_v{}.jpg", i + 1));
                image::RgbImage::from_pixel(4, 3, image::Rgb([*shade; 3]))
                    .save_with_format(&path, image::ImageFormat::Png)
                    .unwrap();
                path
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn streams_every_frame_at_fixed_pace() {
        let dir = TempDir::new().unwrap();
        let backend = backend(5, None);
        let sink = backend.sink.clone();
        let player = Player::new(backend, Duration::from_millis(30));
        let (_tx, rx) = watch::channel(false);

        let started = Instant::now();
        let outcome = player.play(&video_file(&dir), rx).await.unwrap();

        assert_eq!(outcome, PlaybackOutcome::Finished { frames: 5 });
        assert_eq!(*sink.shown.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(*sink.closed.lock().unwrap());
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn sink_cancellation_stops_playback() {
        let dir = TempDir::new().unwrap();
        let backend = backend(10, Some(3));
        let sink = backend.sink.clone();
        let player = Player::new(backend, Duration::from_millis(30));
        let (_tx, rx) = watch::channel(false);

        let outcome = player.play(&video_file(&dir), rx).await.unwrap();

        assert_eq!(outcome, PlaybackOutcome::Cancelled { frames: 3 });
        assert!(*sink.closed.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_signal_interrupts_pacing_wait() {
        let dir = TempDir::new().unwrap();
        let player = Player::new(backend(100, None), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let path = video_file(&dir);
        let playback = tokio::spawn(async move { player.play(&path, rx).await });
        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.send(true).unwrap();

        let outcome = playback.await.unwrap().unwrap();
        assert_eq!(outcome, PlaybackOutcome::Cancelled { frames: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_cancel_sender_does_not_stop_playback() {
        let dir = TempDir::new().unwrap();
        let player = Player::new(backend(3, None), Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let outcome = player.play(&video_file(&dir), rx).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Finished { frames: 3 });
    }

    #[tokio::test]
    async fn missing_video_fails_fast() {
        let dir = TempDir::new().unwrap();
        let player = Player::new(backend(1, None), Duration::from_millis(1));
        let (_tx, rx) = watch::channel(false);

        let result = player.play(&dir.path().join("absent.mp4"), rx).await;
        assert!(matches!(result, Err(PipelineError::VideoNotFound(_))));
    }

    #[tokio::test]
    async fn unopenable_video_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut backend = backend(1, None);
        backend.fail_open = true;
        let player = Player::new(backend, Duration::from_millis(1));
        let (_tx, rx) = watch::channel(false);

        let result = player.play(&video_file(&dir), rx).await;
        assert!(matches!(result, Err(PipelineError::VideoStream { .. })));
    }

    #[test]
    fn stream_size_output_parsing() {
        assert_eq!(parse_dimensions("1024x768\n"), Some((1024, 768)));
        assert_eq!(parse_dimensions("\n 640x480 \n"), Some((640, 480)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("0x480"), None);
        assert_eq!(parse_dimensions("N/A"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn preview_holds_each_image_in_order() {
        let dir = TempDir::new().unwrap();
        let backend = backend(0, None);
        let sink = backend.sink.clone();
        let displays = Arc::clone(&backend.displays);
        let player = Player::new(backend, Duration::from_millis(30));
        let (_tx, rx) = watch::channel(false);
        let images = stills(&dir, &[10, 20, 30]);

        let started = Instant::now();
        let outcome = player
            .preview(&images, Duration::from_secs(1), rx)
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Finished { frames: 3 });
        assert_eq!(*sink.shown.lock().unwrap(), vec![10, 20, 30]);
        assert_eq!(*displays.lock().unwrap(), vec![(4, 3); 3]);
        assert!(*sink.closed.lock().unwrap());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn preview_skips_unreadable_images() {
        let dir = TempDir::new().unwrap();
        let backend = backend(0, None);
        let displays = Arc::clone(&backend.displays);
        let player = Player::new(backend, Duration::from_millis(30));
        let (_tx, rx) = watch::channel(false);
        let mut images = stills(&dir, &[10, 30]);
        let garbage = dir.path().join("fox_v9.jpg");
        std::fs::write(&garbage, b"not an image").unwrap();
        images.insert(1, garbage);
        images.push(dir.path().join("fox_v10.jpg"));

        let outcome = player
            .preview(&images, Duration::from_millis(500), rx)
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Finished { frames: 2 });
        assert_eq!(displays.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_preview_window_moves_on_without_waiting() {
        let dir = TempDir::new().unwrap();
        let player = Player::new(backend(0, Some(0)), Duration::from_millis(30));
        let (_tx, rx) = watch::channel(false);
        let images = stills(&dir, &[10, 20]);

        let started = Instant::now();
        let outcome = player
            .preview(&images, Duration::from_secs(5), rx)
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Finished { frames: 2 });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_signal_interrupts_preview() {
        let dir = TempDir::new().unwrap();
        let player = Player::new(backend(0, None), Duration::from_millis(30));
        let (tx, rx) = watch::channel(false);
        let images = stills(&dir, &[10, 20, 30]);

        let preview =
            tokio::spawn(async move { player.preview(&images, Duration::from_secs(60), rx).await });
        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.send(true).unwrap();

        let outcome = preview.await.unwrap().unwrap();
        assert_eq!(outcome, PlaybackOutcome::Cancelled { frames: 2 });
    }
}
