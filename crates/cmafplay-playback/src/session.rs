//! A playback session: one manifest, one cancellation token, one owner for
//! every piece of per-load state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cmafplay_media::{Demuxer, Fallback};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::audio_decoder::AudioDecoder;
use crate::audio_renderer::{AudioOutput, AudioRenderer};
use crate::clock::{SystemTimeSource, TimeSource};
use crate::decoder::DecodeService;
use crate::fetch::Fetcher;
use crate::manifest::{load_manifest, Manifest};
use crate::sync::DEFAULT_SYNC_THRESHOLD;
use crate::video_decoder::VideoDecoder;
use crate::video_renderer::{FrameSink, VideoRenderer, VideoStats};
use crate::{Error, Result};

/// Tunables for a [`PlaybackSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Master-playlist nesting allowed before giving up.
    pub max_variant_depth: usize,
    /// Pass manifest segment durations to the demuxer to rebuild timestamps.
    pub reconstruct_timestamps: bool,
    /// Render loop period.
    pub refresh_interval: Duration,
    /// How long queued output may keep playing once decoding is done.
    pub drain_timeout: Duration,
    /// Lateness after which a video frame following the audio clock is dropped.
    pub sync_threshold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_variant_depth: 4,
            reconstruct_timestamps: false,
            refresh_interval: Duration::from_millis(16),
            drain_timeout: Duration::from_secs(10),
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
        }
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub segments_total: usize,
    pub segments_decoded: usize,
    pub segments_skipped: usize,
    pub video_samples: u64,
    pub audio_samples: u64,
    /// Out-of-range samples the demuxer skipped.
    pub samples_dropped: u64,
    pub decode_errors: u64,
    /// Distinct recovery paths taken while parsing.
    pub fallbacks: Vec<Fallback>,
    pub frames_rendered: u64,
    /// Frames released unseen: too late, or still queued at the drain deadline.
    pub frames_dropped: u64,
    pub audio_buffers_scheduled: u64,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "segments: {} total, {} decoded, {} skipped",
            self.segments_total, self.segments_decoded, self.segments_skipped
        )?;
        writeln!(
            f,
            "samples:  {} video, {} audio, {} dropped",
            self.video_samples, self.audio_samples, self.samples_dropped
        )?;
        writeln!(
            f,
            "output:   {} frames rendered, {} frames dropped, {} audio buffers",
            self.frames_rendered, self.frames_dropped, self.audio_buffers_scheduled
        )?;
        write!(f, "errors:   {} decode", self.decode_errors)?;
        for fallback in &self.fallbacks {
            write!(f, "\nfallback: {:?}", fallback)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RenderStats {
    video: VideoStats,
    audio_scheduled: u64,
}

/// Plays one stream from manifest to renderer.
///
/// Segments are fetched, demuxed and submitted one at a time. Decoded output
/// flows through queues into a render loop on its own task.
pub struct PlaybackSession<S> {
    fetcher: Arc<dyn Fetcher>,
    service: Arc<dyn DecodeService>,
    sink: S,
    audio_output: Option<Box<dyn AudioOutput>>,
    time: Arc<dyn TimeSource>,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl<S: FrameSink + 'static> PlaybackSession<S> {
    pub fn new(fetcher: Arc<dyn Fetcher>, service: Arc<dyn DecodeService>, sink: S) -> Self {
        Self {
            fetcher,
            service,
            sink,
            audio_output: None,
            time: Arc::new(SystemTimeSource::new()),
            config: SessionConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Play audio as well, when the stream has an audio track.
    pub fn with_audio_output(mut self, output: impl AudioOutput + 'static) -> Self {
        self.audio_output = Some(Box::new(output));
        self
    }

    /// Builder: set the time source for the video clock.
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: use an existing cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts this session when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session to completion.
    ///
    /// Returns [`Error::Cancelled`] if the token fires; every other error is
    /// fatal to the session and carries a user-facing message.
    pub async fn play(self, url: &Url) -> Result<SessionReport> {
        let Self {
            fetcher,
            service,
            sink,
            audio_output,
            time,
            config,
            cancel,
        } = self;

        if !service.is_supported() {
            return Err(Error::unsupported("platform video decoding is not available"));
        }

        tracing::info!(%url, "loading manifest");
        let manifest = load_manifest(fetcher.as_ref(), url, config.max_variant_depth, &cancel).await?;
        if manifest.segments.is_empty() {
            return Err(Error::manifest("no segments"));
        }
        let init_url = manifest.init_segment.clone().ok_or(Error::MissingInitSegment)?;

        let init = fetcher.fetch(&init_url, &cancel).await?;
        let mut demuxer = Demuxer::new();
        let tracks = demuxer.parse_init(&init)?;
        let video_track = tracks.video.ok_or(Error::NoUsableTrack)?;

        let mut report = SessionReport {
            segments_total: manifest.segments.len(),
            fallbacks: tracks.fallbacks,
            ..Default::default()
        };
        let decode_errors = Arc::new(AtomicU64::new(0));

        let video_renderer =
            VideoRenderer::new(sink, Arc::clone(&time)).with_late_threshold(config.sync_threshold);
        let frames = video_renderer.queue();
        let mut video_decoder = VideoDecoder::new(
            Arc::clone(&service),
            move |frame| frames.push(frame),
            error_counter("video", &decode_errors),
        );
        if !video_decoder.configure(&video_track).await {
            return Err(Error::DecoderConfig(format!(
                "{} {}x{}",
                video_track.codec, video_track.coded_width, video_track.coded_height
            )));
        }
        let mut audio = None;
        if let (Some(track), Some(output)) = (tracks.audio, audio_output) {
            let renderer = AudioRenderer::new(output);
            let buffers = renderer.queue();
            let mut decoder = AudioDecoder::new(
                Arc::clone(&service),
                move |data| buffers.push(data),
                error_counter("audio", &decode_errors),
            );
            if decoder.configure(&track).await {
                audio = Some((decoder, renderer));
            } else {
                tracing::warn!(codec = %track.codec, "audio track rejected, playing video only");
            }
        }
        let (mut audio_decoder, audio_renderer) = match audio {
            Some((decoder, renderer)) => (Some(decoder), Some(renderer)),
            None => (None, None),
        };

        let finished = CancellationToken::new();
        let halt = cancel.child_token();
        let render = spawn_render_loop(
            video_renderer,
            audio_renderer,
            config.refresh_interval,
            finished.clone(),
            halt.clone(),
        );

        let mut feed = Feed {
            fetcher: fetcher.as_ref(),
            demuxer: &mut demuxer,
            video: &mut video_decoder,
            audio: audio_decoder.as_mut(),
            report: &mut report,
            reconstruct_timestamps: config.reconstruct_timestamps,
            cancel: &cancel,
        };
        let fed = feed.run(&manifest).await;

        if let Err(err) = fed {
            video_decoder.close();
            if let Some(decoder) = audio_decoder.as_mut() {
                decoder.close();
            }
            halt.cancel();
            let _ = render.await;
            return Err(err);
        }

        video_decoder.flush().await;
        video_decoder.close();
        if let Some(decoder) = audio_decoder.as_mut() {
            decoder.flush().await;
            decoder.close();
        }

        finished.cancel();
        let stats = drain(render, config.drain_timeout, &halt).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        report.decode_errors = decode_errors.load(Ordering::Relaxed);
        report.frames_rendered = stats.video.rendered;
        report.frames_dropped = stats.video.dropped + stats.video.discarded;
        report.audio_buffers_scheduled = stats.audio_scheduled;

        tracing::info!(
            segments = report.segments_decoded,
            skipped = report.segments_skipped,
            frames = report.frames_rendered,
            dropped = report.frames_dropped,
            "playback finished"
        );
        Ok(report)
    }
}

fn error_counter(track: &'static str, counter: &Arc<AtomicU64>) -> impl Fn(Error) + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |err| {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(track, error = %err, "decode error");
    }
}

/// The sequential fetch, demux and submit loop.
struct Feed<'a> {
    fetcher: &'a dyn Fetcher,
    demuxer: &'a mut Demuxer,
    video: &'a mut VideoDecoder,
    audio: Option<&'a mut AudioDecoder>,
    report: &'a mut SessionReport,
    reconstruct_timestamps: bool,
    cancel: &'a CancellationToken,
}

impl Feed<'_> {
    async fn run(&mut self, manifest: &Manifest) -> Result<()> {
        for (index, segment) in manifest.segments.iter().enumerate() {
            check(self.cancel)?;

            let data = match self.fetcher.fetch(&segment.url, self.cancel).await {
                Ok(data) => data,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::warn!(segment = index, url = %segment.url, error = %err, "skipping segment");
                    self.report.segments_skipped += 1;
                    continue;
                }
            };
            check(self.cancel)?;

            let hint = segment.duration.filter(|_| self.reconstruct_timestamps);
            let demuxed = match self.demuxer.parse_media(&data, hint) {
                Ok(demuxed) => demuxed,
                Err(err) => {
                    tracing::warn!(segment = index, url = %segment.url, error = %err, "skipping unparseable segment");
                    self.report.segments_skipped += 1;
                    continue;
                }
            };

            tracing::debug!(
                segment = index,
                bytes = data.len(),
                video = demuxed.video.len(),
                audio = demuxed.audio.len(),
                dropped = demuxed.dropped,
                "segment demuxed"
            );
            for fallback in demuxed.fallbacks {
                if !self.report.fallbacks.contains(&fallback) {
                    self.report.fallbacks.push(fallback);
                }
            }
            self.report.samples_dropped += demuxed.dropped as u64;

            for sample in &demuxed.video {
                check(self.cancel)?;
                self.video.decode(sample);
                self.report.video_samples += 1;
            }
            if let Some(audio) = self.audio.as_deref_mut() {
                for sample in &demuxed.audio {
                    check(self.cancel)?;
                    audio.decode(sample);
                    self.report.audio_samples += 1;
                }
            }

            self.report.segments_decoded += 1;
        }
        Ok(())
    }
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn spawn_render_loop<S: FrameSink + 'static>(
    mut video: VideoRenderer<S>,
    mut audio: Option<AudioRenderer<Box<dyn AudioOutput>>>,
    interval: Duration,
    finished: CancellationToken,
    halt: CancellationToken,
) -> JoinHandle<RenderStats> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        if let Some(audio) = audio.as_mut() {
            audio.start();
        }

        loop {
            tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Some(audio) = audio.as_mut() {
                audio.tick();
                if !video.is_external_clock() {
                    if let Some((clock, base)) = audio.media_clock() {
                        video.set_clock(clock, base);
                    }
                }
            }
            video.tick();

            let audio_idle = audio.as_ref().map_or(true, |a| a.is_drained());
            if finished.is_cancelled() && video.queued() == 0 && audio_idle {
                break;
            }
        }

        video.clear();
        let mut stats = RenderStats {
            video: video.stats(),
            audio_scheduled: 0,
        };
        if let Some(audio) = audio.as_mut() {
            stats.audio_scheduled = audio.scheduled();
            audio.clear();
        }
        stats
    })
}

/// Wait for the render loop to play out, halting it after `timeout`.
async fn drain(mut render: JoinHandle<RenderStats>, timeout: Duration, halt: &CancellationToken) -> RenderStats {
    let joined = match tokio::time::timeout(timeout, &mut render).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::debug!(?timeout, "drain timeout, discarding queued output");
            halt.cancel();
            render.await
        }
    };
    joined.unwrap_or_else(|e| {
        tracing::warn!("Render loop failed: {}", e);
        RenderStats::default()
    })
}
