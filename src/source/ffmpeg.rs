//! Video decoding through an `ffmpeg` subprocess on a background thread.

use super::{FrameSource, Readiness, ReadinessTracker, VideoSource};
use crate::error::SourceError;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Pause between attempts when ffprobe/ffmpeg cannot be started.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Decoded frames buffered ahead of playback.
const FRAME_QUEUE: usize = 5;

enum DecodeEvent {
    Frame(VideoFrame),
    Failed(String),
    Ended,
}

/// Stream properties reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Probe {
    width: u32,
    height: u32,
    fps: f32,
}

/// Stop flag and running ffmpeg child, shared with the decode thread.
#[derive(Debug, Default)]
struct DecoderControl {
    stop: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl DecoderControl {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Stops the decode thread, killing ffmpeg even if it is blocked on input.
    fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(child) = self.lock().as_mut() {
            debug!("Killing ffmpeg (pid {})", child.id());
            let _ = child.kill();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps media time to wall-clock time, with pause support.
#[derive(Debug, Default)]
struct PlaybackClock {
    origin: Option<Instant>,
    paused_at: Option<Instant>,
}

impl PlaybackClock {
    /// Anchors the clock so that `media_time` plays at `now`.
    fn start(&mut self, now: Instant, media_time: Duration) {
        self.origin = Some(now.checked_sub(media_time).unwrap_or(now));
        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
    }

    fn position(&self, now: Instant) -> Duration {
        let Some(origin) = self.origin else {
            return Duration::ZERO;
        };
        let at = self.paused_at.unwrap_or(now);
        at.saturating_duration_since(origin)
    }

    fn pause(&mut self, now: Instant) {
        self.paused_at.get_or_insert(now);
    }

    fn resume(&mut self, now: Instant) {
        if let (Some(paused_at), Some(origin)) = (self.paused_at.take(), self.origin) {
            self.origin = Some(origin + now.saturating_duration_since(paused_at));
        }
    }
}

/// A looping video decoded by ffmpeg and paced against a playback clock.
pub struct FfmpegSource {
    events: Receiver<DecodeEvent>,
    current: Option<VideoFrame>,
    next: Option<VideoFrame>,
    tracker: ReadinessTracker,
    clock: PlaybackClock,
    paused: bool,
    resume_requested: bool,
    ended: bool,
    disconnected: bool,
    control: Arc<DecoderControl>,
}

impl FfmpegSource {
    /// Starts decoding `source` in the background. Returns immediately.
    pub fn spawn(source: &VideoSource) -> Result<Self, SourceError> {
        let input = source.locator.to_input();
        let network = source.locator.is_network();
        let looping = source.looping;
        info!("Opening video via ffmpeg: {}", source.locator);
        if !source.muted {
            debug!("Audio output is not supported; playing {} without sound", source.locator);
        }

        let (tx, rx) = mpsc::sync_channel(FRAME_QUEUE);
        let decoder = Self::with_events(rx, source);
        let control = decoder.control.clone();

        thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || decode_loop(input, network, looping, tx, control))
            .map_err(|e| SourceError::Unavailable(format!("failed to start decode thread: {}", e)))?;

        Ok(decoder)
    }

    fn with_events(events: Receiver<DecodeEvent>, source: &VideoSource) -> Self {
        let mut clock = PlaybackClock::default();
        if !source.autoplay {
            info!("Autoplay blocked, waiting for interaction to start playback");
            clock.pause(Instant::now());
        }
        Self {
            events,
            current: None,
            next: None,
            tracker: ReadinessTracker::new(source.grace),
            clock,
            paused: !source.autoplay,
            resume_requested: false,
            ended: false,
            disconnected: false,
            control: Arc::new(DecoderControl::default()),
        }
    }

    fn present(&mut self, frame: VideoFrame) {
        self.tracker.on_frame();
        self.current = Some(frame);
    }

    fn current_time(&self) -> Option<Duration> {
        self.current.as_ref().map(media_time)
    }

    /// Pulls every frame that is due by `now`, keeping the first future one aside.
    fn drain(&mut self, now: Instant) {
        loop {
            let frame = match self.next.take() {
                Some(frame) => frame,
                None => match self.events.try_recv() {
                    Ok(DecodeEvent::Frame(frame)) => frame,
                    Ok(DecodeEvent::Failed(message)) => {
                        self.tracker.on_failure(now, message);
                        continue;
                    }
                    Ok(DecodeEvent::Ended) => {
                        info!("Video ended, holding last frame");
                        self.ended = true;
                        continue;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !self.ended && !self.disconnected {
                            self.tracker.on_failure(now, "decoder stopped unexpectedly");
                            self.disconnected = true;
                        }
                        break;
                    }
                },
            };

            let ts = media_time(&frame);
            if self.current.is_none() {
                self.clock.start(now, ts);
                self.present(frame);
                continue;
            }
            if self.paused {
                self.next = Some(frame);
                break;
            }
            if self.current_time().is_some_and(|prev| ts < prev) {
                debug!("Video loop wrapped");
                self.clock.start(now, ts);
                self.present(frame);
                continue;
            }
            if ts <= self.clock.position(now) {
                self.present(frame);
            } else {
                self.next = Some(frame);
                break;
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn poll(&mut self, now: Instant) -> Readiness {
        if self.resume_requested {
            self.resume_requested = false;
            if self.paused {
                info!("Playback resumed");
                self.paused = false;
                self.clock.resume(now);
            }
        }
        self.drain(now);
        self.tracker.status(now)
    }

    fn current_frame(&self) -> Option<&VideoFrame> {
        self.current.as_ref()
    }

    fn resume(&mut self) {
        self.resume_requested = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.control.shutdown();
    }
}

fn media_time(frame: &VideoFrame) -> Duration {
    Duration::from_micros(frame.timestamp_us.unwrap_or(0))
}

/// Sends an event; `false` means the source was dropped.
fn report(tx: &SyncSender<DecodeEvent>, event: DecodeEvent) -> bool {
    tx.send(event).is_ok()
}

fn wait_for_retry(control: &DecoderControl) {
    if !control.stopped() {
        thread::sleep(RETRY_DELAY);
    }
}

/// Background decode loop. ffmpeg loops the input itself; if it still reaches
/// the end of stream while looping, it is restarted.
fn decode_loop(input: String, network: bool, looping: bool, tx: SyncSender<DecodeEvent>, control: Arc<DecoderControl>) {
    let mut known: Option<Probe> = None;
    loop {
        if control.stopped() {
            return;
        }

        let probe = match known.take().map_or_else(|| probe(&input), Ok) {
            Ok(probe) => probe,
            Err(e) => {
                if !report(&tx, DecodeEvent::Failed(e.to_string())) {
                    return;
                }
                wait_for_retry(&control);
                continue;
            }
        };
        info!("Video: {}x{} @ {:.1} fps", probe.width, probe.height, probe.fps);

        let mut command = Command::new("ffmpeg");
        command.args(ffmpeg_args(&input, network, looping));
        match run_decoder(command, probe, &tx, &control) {
            Ok(RunEnd::Eof) if !looping => {
                let _ = tx.send(DecodeEvent::Ended);
                return;
            }
            Ok(RunEnd::Eof) => {
                info!("Video loop restarting");
                known = Some(probe);
            }
            Ok(RunEnd::Stopped) => return,
            Err(e) => {
                if !report(&tx, DecodeEvent::Failed(e.to_string())) {
                    return;
                }
                wait_for_retry(&control);
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum RunEnd {
    Eof,
    Stopped,
}

fn ffmpeg_args(input: &str, network: bool, looping: bool) -> Vec<String> {
    let mut args: Vec<&str> = vec!["-hide_banner", "-loglevel", "error"];
    if looping {
        args.extend_from_slice(&["-stream_loop", "-1"]);
    }
    if network {
        args.extend_from_slice(&[
            "-reconnect", "1",
            "-reconnect_streamed", "1",
            "-reconnect_delay_max", "5",
            "-thread_queue_size", "512",
        ]);
    }
    args.extend_from_slice(&[
        "-i", input,
        "-an",
        "-f", "image2pipe",
        "-pix_fmt", "rgba",
        "-vcodec", "rawvideo",
        "-",
    ]);
    args.into_iter().map(String::from).collect()
}

/// Runs one decoder process, forwarding frames until EOF or shutdown.
///
/// A process that closes its output but exits with a failure status was cut
/// off mid-stream and is reported as an error.
fn run_decoder(
    mut command: Command,
    probe: Probe,
    tx: &SyncSender<DecodeEvent>,
    control: &DecoderControl,
) -> Result<RunEnd> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn ffmpeg: {}", e))?;

    if let Some(mut stderr) = child.stderr.take() {
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while let Ok(n) = stderr.read(&mut buf) {
                if n == 0 {
                    break;
                }
                for line in String::from_utf8_lossy(&buf[..n]).lines() {
                    error!("ffmpeg: {}", line);
                }
            }
        });
    }

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(anyhow!("ffmpeg stdout unavailable"));
    };
    *control.lock() = Some(child);

    let frame_size = (probe.width as usize) * (probe.height as usize) * 4;
    let frame_us = if probe.fps > 0.0 { 1_000_000.0 / probe.fps as f64 } else { 1_000_000.0 / 30.0 };
    let mut buffer = vec![0u8; frame_size];
    let mut frame_count: u64 = 0;

    let outcome = loop {
        if control.stopped() {
            break Ok(RunEnd::Stopped);
        }

        if let Err(e) = stdout.read_exact(&mut buffer) {
            if control.stopped() {
                break Ok(RunEnd::Stopped);
            }
            if e.kind() == std::io::ErrorKind::UnexpectedEof && frame_count > 0 {
                break Ok(RunEnd::Eof);
            }
            break Err(anyhow!("ffmpeg produced no decodable frame: {}", e));
        }

        let mut frame = VideoFrame::from_data(probe.width, probe.height, PixelFormat::Rgba, buffer.clone());
        frame.timestamp_us = Some((frame_count as f64 * frame_us) as u64);
        frame_count += 1;

        if tx.send(DecodeEvent::Frame(frame)).is_err() {
            break Ok(RunEnd::Stopped);
        }
    };

    let child = control.lock().take();
    let status = child.and_then(|mut child| {
        if !matches!(outcome, Ok(RunEnd::Eof)) {
            let _ = child.kill();
        }
        child.wait().ok()
    });

    match (outcome, status) {
        (Ok(RunEnd::Eof), Some(status)) if !status.success() => {
            Err(anyhow!("ffmpeg exited with {} after {} frames", status, frame_count))
        }
        (outcome, _) => outcome,
    }
}

fn probe(input: &str) -> Result<Probe> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate",
            "-of", "csv=p=0",
            input,
        ])
        .output()
        .map_err(|e| anyhow!("Failed to run ffprobe: {}", e))?;

    if !output.status.success() {
        return Err(anyhow!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
    }
    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe(stdout: &str) -> Result<Probe> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("ffprobe found no video stream"))?;
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        return Err(anyhow!("Invalid ffprobe output: {}", line));
    }

    let width: u32 = parts[0].parse()?;
    let height: u32 = parts[1].parse()?;
    if width == 0 || height == 0 {
        return Err(anyhow!("Video stream has no picture: {}x{}", width, height));
    }
    Ok(Probe {
        width,
        height,
        fps: parse_fps(parts[2]),
    })
}

fn parse_fps(s: &str) -> f32 {
    if let Some((num, den)) = s.split_once('/') {
        let n: f32 = num.parse().unwrap_or(0.0);
        let d: f32 = den.parse().unwrap_or(1.0);
        if d == 0.0 { 0.0 } else { n / d }
    } else {
        s.parse().unwrap_or(30.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(ms: u64, shade: u8) -> DecodeEvent {
        let mut frame = VideoFrame::solid(4, 4, [shade, shade, shade]);
        frame.timestamp_us = Some(ms * 1000);
        DecodeEvent::Frame(frame)
    }

    fn shown(source: &FfmpegSource) -> Option<u8> {
        source.current_frame().map(|f| f.data[0])
    }

    fn source(autoplay: bool) -> (SyncSender<DecodeEvent>, FfmpegSource) {
        let (tx, rx) = mpsc::sync_channel(16);
        let mut settings = VideoSource::new("reel.mp4").unwrap();
        settings.autoplay = autoplay;
        (tx, FfmpegSource::with_events(rx, &settings))
    }

    #[test]
    fn frames_are_paced_by_timestamp() {
        let (tx, mut src) = source(true);
        let t0 = Instant::now();
        assert_eq!(src.poll(t0), Readiness::Pending);

        for (ms, shade) in [(0, 10), (40, 20), (80, 30)] {
            tx.send(frame_at(ms, shade)).unwrap();
        }
        assert_eq!(src.poll(t0), Readiness::Ready);
        assert_eq!(shown(&src), Some(10));

        src.poll(t0 + Duration::from_millis(50));
        assert_eq!(shown(&src), Some(20));

        src.poll(t0 + Duration::from_millis(200));
        assert_eq!(shown(&src), Some(30));
    }

    #[test]
    fn loop_restart_rebases_clock() {
        let (tx, mut src) = source(true);
        let t0 = Instant::now();
        tx.send(frame_at(0, 10)).unwrap();
        tx.send(frame_at(40, 20)).unwrap();
        src.poll(t0);
        src.poll(t0 + Duration::from_millis(40));
        assert_eq!(shown(&src), Some(20));

        tx.send(frame_at(0, 50)).unwrap();
        tx.send(frame_at(40, 60)).unwrap();
        src.poll(t0 + Duration::from_millis(45));
        assert_eq!(shown(&src), Some(50));
        src.poll(t0 + Duration::from_millis(90));
        assert_eq!(shown(&src), Some(60));
    }

    #[test]
    fn blocked_autoplay_shows_first_frame_and_waits() {
        let (tx, mut src) = source(false);
        let t0 = Instant::now();
        tx.send(frame_at(0, 10)).unwrap();
        tx.send(frame_at(40, 20)).unwrap();

        assert_eq!(src.poll(t0), Readiness::Ready);
        assert!(src.is_paused());
        src.poll(t0 + Duration::from_secs(1));
        assert_eq!(shown(&src), Some(10));

        src.resume();
        let t1 = t0 + Duration::from_secs(2);
        src.poll(t1);
        assert!(!src.is_paused());
        src.poll(t1 + Duration::from_millis(40));
        assert_eq!(shown(&src), Some(20));
    }

    #[test]
    fn decode_failure_recovers_within_grace() {
        let (tx, mut src) = source(true);
        let t0 = Instant::now();
        tx.send(DecodeEvent::Failed("connection reset".into())).unwrap();
        assert_eq!(src.poll(t0), Readiness::Pending);

        tx.send(frame_at(0, 10)).unwrap();
        assert_eq!(src.poll(t0 + Duration::from_secs(1)), Readiness::Ready);
        assert_eq!(src.poll(t0 + Duration::from_secs(5)), Readiness::Ready);
    }

    #[test]
    fn persistent_failure_becomes_unavailable() {
        let (tx, mut src) = source(true);
        let t0 = Instant::now();
        tx.send(DecodeEvent::Failed("ffprobe failed: 404".into())).unwrap();
        src.poll(t0);
        assert!(matches!(
            src.poll(t0 + Duration::from_millis(3000)),
            Readiness::Unavailable(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn decoder_exit_without_end_is_a_failure() {
        let (tx, mut src) = source(true);
        let t0 = Instant::now();
        tx.send(frame_at(0, 10)).unwrap();
        drop(tx);
        assert_eq!(src.poll(t0), Readiness::Ready);
        assert!(matches!(src.poll(t0 + Duration::from_secs(4)), Readiness::Unavailable(_)));
    }

    #[test]
    fn ended_stream_holds_last_frame() {
        let (tx, mut src) = source(true);
        let t0 = Instant::now();
        tx.send(frame_at(0, 10)).unwrap();
        tx.send(DecodeEvent::Ended).unwrap();
        drop(tx);
        src.poll(t0);
        assert_eq!(src.poll(t0 + Duration::from_secs(10)), Readiness::Ready);
        assert_eq!(shown(&src), Some(10));
    }

    #[test]
    fn probe_output_is_parsed() {
        let probe = parse_probe("1920,1080,30000/1001\n").unwrap();
        assert_eq!((probe.width, probe.height), (1920, 1080));
        assert!((probe.fps - 29.97).abs() < 0.01);
        assert!(parse_probe("").is_err());
        assert!(parse_probe("0,0,25/1").is_err());
    }

    #[test]
    fn fps_parsing_tolerates_odd_values() {
        assert_eq!(parse_fps("25/1"), 25.0);
        assert_eq!(parse_fps("0/0"), 0.0);
        assert_eq!(parse_fps("24"), 24.0);
        assert_eq!(parse_fps("N/A"), 0.0);
    }

    #[test]
    fn network_inputs_reconnect_and_drop_audio() {
        let args = ffmpeg_args("https://cdn.example.com/reel.mp4", true, true);
        assert!(args.iter().any(|a| a == "-reconnect"));
        assert!(args.iter().any(|a| a == "-an"));
        assert!(!ffmpeg_args("reel.mp4", false, true).iter().any(|a| a == "-reconnect"));
    }

    #[test]
    fn looping_inputs_loop_inside_ffmpeg() {
        let args = ffmpeg_args("reel.mp4", false, true);
        let flag = args.iter().position(|a| a == "-stream_loop").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[flag + 1], "-1");
        assert!(flag < input);
        assert!(!ffmpeg_args("reel.mp4", false, false).iter().any(|a| a == "-stream_loop"));
    }

    #[cfg(unix)]
    mod decoder_process {
        use super::*;

        const TINY: Probe = Probe { width: 4, height: 4, fps: 25.0 };

        /// One 4x4 RGBA frame is 64 bytes.
        fn shell(script: &str) -> Command {
            let mut command = Command::new("sh");
            command.args(["-c", script]);
            command
        }

        #[test]
        fn clean_exit_is_end_of_stream() {
            let (tx, rx) = mpsc::sync_channel(16);
            let control = DecoderControl::default();
            let end = run_decoder(shell("head -c 128 /dev/zero"), TINY, &tx, &control).unwrap();
            assert_eq!(end, RunEnd::Eof);
            assert_eq!(rx.try_iter().count(), 2);
        }

        #[test]
        fn failed_exit_after_frames_is_an_error() {
            let (tx, rx) = mpsc::sync_channel(16);
            let control = DecoderControl::default();
            let err = run_decoder(shell("head -c 64 /dev/zero; exit 1"), TINY, &tx, &control).unwrap_err();
            assert!(err.to_string().contains("after 1 frames"), "{}", err);
            assert_eq!(rx.try_iter().count(), 1);
        }

        #[test]
        fn shutdown_kills_a_stalled_decoder() {
            let (tx, rx) = mpsc::sync_channel(16);
            let control = Arc::new(DecoderControl::default());
            let worker = {
                let control = control.clone();
                thread::spawn(move || run_decoder(shell("head -c 64 /dev/zero; exec sleep 30"), TINY, &tx, &control))
            };

            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
            let start = Instant::now();
            control.shutdown();
            let end = worker.join().unwrap().unwrap();
            assert_eq!(end, RunEnd::Stopped);
            assert!(start.elapsed() < Duration::from_secs(5));
            assert!(control.lock().is_none());
        }
    }
}
