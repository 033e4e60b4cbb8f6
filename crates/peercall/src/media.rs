//! Media tracks, streams and the capture/render collaborators
//!
//! Capture and rendering live outside this crate. A [`MediaSource`] hands out
//! a [`MediaStream`] of tracks, and a [`MediaSink`] renders one stream per
//! slot (local preview, remote video). Tracks carry identity, a stopped flag
//! and a feed of encoded samples: the capture side pushes Opus or VP8 frames
//! with [`MediaTrack::push_sample`] and the transport sends them.

use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Samples a slow transport may fall behind by before frames are skipped
const SAMPLE_BUFFER: usize = 64;

/// Opus frame encoding 20 ms of silence
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// VP8 key frame header for a 2x2 picture
const VP8_KEY_FRAME: [u8; 10] = [0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x02, 0x00, 0x02, 0x00];

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone or remote audio
    Audio,
    /// Camera, screen share or remote video
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One encoded frame (Opus for audio, VP8 for video)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    /// Encoded payload
    pub data: Vec<u8>,
    /// Playout duration
    pub duration: Duration,
}

/// Handle to one audio or video track
///
/// Clones share the stopped flag and the sample feed, so stopping any clone
/// stops the track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    stopped: Arc<AtomicBool>,
    samples: broadcast::Sender<MediaSample>,
}

impl MediaTrack {
    /// Create a live track with a random id
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, label)
    }

    /// Create a live track with a known id
    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        let (samples, _) = broadcast::channel(SAMPLE_BUFFER);
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            stopped: Arc::new(AtomicBool::new(false)),
            samples,
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Human readable label (device or source name)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop the track
    ///
    /// Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            debug!(track = %self.id, kind = %self.kind, "Track stopped");
        }
        first
    }

    /// Check if the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Hand an encoded sample to whoever sends this track
    ///
    /// Returns `false` once the track is stopped. Samples pushed while
    /// nobody is subscribed are dropped.
    pub fn push_sample(&self, sample: MediaSample) -> bool {
        if self.is_stopped() {
            return false;
        }
        let _ = self.samples.send(sample);
        true
    }

    /// Receive the samples pushed from now on
    ///
    /// The receiver ends once every clone of the track has been dropped.
    pub fn subscribe_samples(&self) -> broadcast::Receiver<MediaSample> {
        self.samples.subscribe()
    }
}

/// Ordered group of tracks shown in one sink
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::with_tracks(Vec::new())
    }

    /// Create a stream from tracks
    pub fn with_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tracks in insertion order
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Add a track unless one with the same id is already present
    pub fn add_track(&mut self, track: MediaTrack) {
        if self.tracks.iter().all(|t| t.id() != track.id()) {
            self.tracks.push(track);
        }
    }

    /// Check if the stream has a track of `kind`
    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }

    /// Check if the stream has no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track; returns how many were stopped by this call
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }

    /// Check if every track is stopped
    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(MediaTrack::is_stopped)
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture collaborator
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Camera and microphone
    async fn user_media(&self) -> Result<MediaStream>;

    /// Screen share, used when camera/microphone are unavailable
    async fn display_media(&self) -> Result<MediaStream>;
}

/// Acquire the local stream: camera/microphone first, then screen share
///
/// # Errors
///
/// Returns `MediaAccess` when both sources fail.
///
/// # Example
///
/// ```
/// use peercall::media::{acquire_local_stream, StaticMediaSource};
/// # tokio_test::block_on(async {
/// let source = StaticMediaSource::new().deny_user_media();
/// let stream = acquire_local_stream(&source).await.unwrap();
/// assert_eq!(stream.tracks().len(), 1);
/// # });
/// ```
pub async fn acquire_local_stream(source: &dyn MediaSource) -> Result<MediaStream> {
    let user_err = match source.user_media().await {
        Ok(stream) => {
            info!(tracks = stream.tracks().len(), "Using camera and microphone");
            return Ok(stream);
        }
        Err(e) => e,
    };
    warn!(error = %user_err, "Camera/microphone unavailable, trying screen share");

    match source.display_media().await {
        Ok(stream) => {
            info!(tracks = stream.tracks().len(), "Using screen share");
            Ok(stream)
        }
        Err(display_err) => Err(Error::MediaAccess(format!(
            "user media: {}; display media: {}",
            user_err, display_err
        ))),
    }
}

/// Rendering collaborator for one slot
pub trait MediaSink: Send + Sync {
    /// Show `stream`, replacing whatever was shown
    fn attach(&self, stream: &MediaStream);

    /// Stop showing anything; detaching an empty sink is a no-op
    fn detach(&self);
}

/// Source that hands out synthetic tracks
///
/// Either capture path can be denied to reproduce permission failures. With
/// [`StaticMediaSource::with_synthetic_samples`] every track is fed silent
/// Opus or blank VP8 frames until it is stopped.
#[derive(Debug, Clone)]
pub struct StaticMediaSource {
    allow_user_media: bool,
    allow_display_media: bool,
    synthetic_samples: bool,
}

impl StaticMediaSource {
    /// Source where both capture paths succeed
    pub fn new() -> Self {
        Self {
            allow_user_media: true,
            allow_display_media: true,
            synthetic_samples: false,
        }
    }

    /// Feed placeholder frames into every track handed out
    pub fn with_synthetic_samples(mut self) -> Self {
        self.synthetic_samples = true;
        self
    }

    fn finish(&self, stream: MediaStream) -> MediaStream {
        if self.synthetic_samples {
            for track in stream.tracks() {
                spawn_synthetic_feed(track.clone());
            }
        }
        stream
    }

    /// Deny camera/microphone access
    pub fn deny_user_media(mut self) -> Self {
        self.allow_user_media = false;
        self
    }

    /// Deny screen share access
    pub fn deny_display_media(mut self) -> Self {
        self.allow_display_media = false;
        self
    }
}

impl Default for StaticMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn user_media(&self) -> Result<MediaStream> {
        if !self.allow_user_media {
            return Err(Error::MediaAccess("camera/microphone permission denied".to_string()));
        }
        Ok(self.finish(MediaStream::with_tracks(vec![
            MediaTrack::new(TrackKind::Audio, "synthetic microphone"),
            MediaTrack::new(TrackKind::Video, "synthetic camera"),
        ])))
    }

    async fn display_media(&self) -> Result<MediaStream> {
        if !self.allow_display_media {
            return Err(Error::MediaAccess("screen share permission denied".to_string()));
        }
        Ok(self.finish(MediaStream::with_tracks(vec![MediaTrack::new(
            TrackKind::Video,
            "synthetic screen",
        )])))
    }
}

/// Push a placeholder frame per frame interval until `track` stops
fn spawn_synthetic_feed(track: MediaTrack) {
    let (payload, interval) = match track.kind() {
        TrackKind::Audio => (OPUS_SILENCE_FRAME.to_vec(), Duration::from_millis(20)),
        TrackKind::Video => (VP8_KEY_FRAME.to_vec(), Duration::from_millis(33)),
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let sample = MediaSample {
                data: payload.clone(),
                duration: interval,
            };
            if !track.push_sample(sample) {
                debug!(track = %track.id(), "Synthetic feed stopped");
                break;
            }
        }
    });
}

/// Sink that logs what it would render
#[derive(Debug)]
pub struct LogSink {
    slot: &'static str,
    current: Mutex<Option<String>>,
}

impl LogSink {
    /// Create a sink for the named slot
    pub fn new(slot: &'static str) -> Self {
        Self {
            slot,
            current: Mutex::new(None),
        }
    }

    /// Id of the stream currently attached
    pub fn current(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }
}

impl MediaSink for LogSink {
    fn attach(&self, stream: &MediaStream) {
        info!(
            slot = self.slot,
            stream = %stream.id(),
            tracks = stream.tracks().len(),
            "Rendering stream"
        );
        if let Ok(mut current) = self.current.lock() {
            *current = Some(stream.id().to_string());
        }
    }

    fn detach(&self) {
        if let Ok(mut current) = self.current.lock() {
            if current.take().is_some() {
                info!(slot = self.slot, "Sink detached");
            }
        }
    }
}
