//! Spoken playback of tutor turns.
//!
//! Speech arrives from the gateway as raw mono PCM (16-bit little-endian at
//! [`SPEECH_SAMPLE_RATE`]). [`SpeechPlayer`] keeps an independent
//! idle → fetching → playing → idle state per tutor turn, with a single
//! output device shared by all turns: starting a clip stops whatever was
//! playing, and every playback reports its end through a callback so its
//! turn returns to idle however it stopped.

use crate::gateway::{GatewayError, TutorGateway};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamBuilder, Sink};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("speech synthesis failed: {0}")]
    Synthesis(#[from] GatewayError),

    #[error("PCM payload has an odd byte count ({0})")]
    OddLength(usize),

    #[error("speech payload is empty")]
    Empty,

    #[error("audio output failed: {0}")]
    Device(String),
}

/// Decoded mono 16-bit speech.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcmClip {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmClip {
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self, AudioError> {
        if bytes.is_empty() {
            return Err(AudioError::Empty);
        }
        if bytes.len() % 2 != 0 {
            return Err(AudioError::OddLength(bytes.len()));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Samples normalized to `[-1.0, 1.0)`.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&sample| f32::from(sample) / 32768.0)
            .collect()
    }

    fn to_samples_buffer(&self) -> SamplesBuffer {
        SamplesBuffer::new(1, self.sample_rate, self.to_f32())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Fetching,
    Playing,
}

/// Callback an output fires exactly once when a playback ends, whether it ran
/// to completion or was stopped.
pub type PlaybackEnded = Box<dyn FnOnce() + Send + 'static>;

/// The single playback device the process holds.
pub trait AudioOutput: Send + Sync {
    fn start(
        &self,
        clip: PcmClip,
        on_end: PlaybackEnded,
    ) -> Result<Box<dyn ActivePlayback>, AudioError>;
}

pub trait ActivePlayback: Send {
    /// Stops playback. The `on_end` callback still fires.
    fn stop(self: Box<Self>);
}

#[derive(Default)]
struct PlayerInner {
    states: HashMap<usize, PlaybackState>,
    /// Turn index and playback id currently holding the device.
    playing: Option<(usize, u64)>,
    handle: Option<Box<dyn ActivePlayback>>,
    next_id: u64,
}

impl PlayerInner {
    fn set(&mut self, turn: usize, state: PlaybackState) {
        if state == PlaybackState::Idle {
            self.states.remove(&turn);
        } else {
            self.states.insert(turn, state);
        }
    }
}

/// Per-turn speech playback controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SpeechPlayer {
    gateway: Arc<dyn TutorGateway>,
    output: Arc<dyn AudioOutput>,
    inner: Arc<Mutex<PlayerInner>>,
}

impl SpeechPlayer {
    pub fn new(gateway: Arc<dyn TutorGateway>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            gateway,
            output,
            inner: Arc::new(Mutex::new(PlayerInner::default())),
        }
    }

    pub fn state(&self, turn: usize) -> PlaybackState {
        lock(&self.inner)
            .states
            .get(&turn)
            .copied()
            .unwrap_or_default()
    }

    /// The speaker button of tutor turn `turn`.
    ///
    /// Idle turns fetch and play `text`; a playing turn is stopped; a turn
    /// that is still fetching ignores the press. Returns the state the turn
    /// settled in once this call finished. On error the turn is idle again.
    pub async fn press(&self, turn: usize, text: &str) -> Result<PlaybackState, AudioError> {
        let id = {
            let mut inner = lock(&self.inner);
            match inner.states.get(&turn).copied().unwrap_or_default() {
                PlaybackState::Fetching => return Ok(PlaybackState::Fetching),
                PlaybackState::Playing => {
                    drop(inner);
                    self.stop_turn(turn);
                    return Ok(PlaybackState::Idle);
                }
                PlaybackState::Idle => {}
            }
            inner.set(turn, PlaybackState::Fetching);
            inner.next_id += 1;
            inner.next_id
        };

        let clip = match self.fetch(text).await {
            Ok(clip) => clip,
            Err(err) => {
                tracing::warn!(turn, error = %err, "speech generation failed");
                lock(&self.inner).set(turn, PlaybackState::Idle);
                return Err(err);
            }
        };

        let previous = {
            let mut inner = lock(&self.inner);
            if inner.states.get(&turn) != Some(&PlaybackState::Fetching) {
                tracing::debug!(turn, "speech arrived after playback was cancelled");
                return Ok(PlaybackState::Idle);
            }
            if let Some((previous_turn, _)) = inner.playing {
                inner.set(previous_turn, PlaybackState::Idle);
            }
            inner.set(turn, PlaybackState::Playing);
            inner.playing = Some((turn, id));
            inner.handle.take()
        };
        if let Some(previous) = previous {
            previous.stop();
        }

        let on_end = ended_callback(Arc::downgrade(&self.inner), turn, id);
        match self.output.start(clip, on_end) {
            Ok(handle) => {
                let orphan = {
                    let mut inner = lock(&self.inner);
                    if inner.playing == Some((turn, id)) {
                        inner.handle = Some(handle);
                        None
                    } else {
                        Some(handle)
                    }
                };
                // Stopped or replaced while the output was starting.
                if let Some(orphan) = orphan {
                    orphan.stop();
                }
                tracing::debug!(turn, id, "speech playback started");
                Ok(self.state(turn))
            }
            Err(err) => {
                tracing::warn!(turn, error = %err, "audio output refused the clip");
                let mut inner = lock(&self.inner);
                if inner.playing == Some((turn, id)) {
                    inner.playing = None;
                }
                inner.set(turn, PlaybackState::Idle);
                Err(err)
            }
        }
    }

    async fn fetch(&self, text: &str) -> Result<PcmClip, AudioError> {
        let bytes = self.gateway.synthesize_speech(text).await?;
        PcmClip::from_le_bytes(&bytes, SPEECH_SAMPLE_RATE)
    }

    /// Marks `turn` idle at once; the output's end callback arrives later
    /// and finds nothing left to reset.
    fn stop_turn(&self, turn: usize) {
        let handle = {
            let mut inner = lock(&self.inner);
            inner.set(turn, PlaybackState::Idle);
            match inner.playing {
                Some((playing, _)) if playing == turn => {
                    inner.playing = None;
                    inner.handle.take()
                }
                _ => None,
            }
        };
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Stops the current playback and abandons every fetch in progress.
    pub fn stop_all(&self) {
        let handle = {
            let mut inner = lock(&self.inner);
            inner.states.clear();
            inner.playing = None;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            handle.stop();
        }
    }
}

fn ended_callback(inner: Weak<Mutex<PlayerInner>>, turn: usize, id: u64) -> PlaybackEnded {
    Box::new(move || {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let finished = {
            let mut inner = lock(&inner);
            let finished = match inner.playing {
                Some((playing_turn, playing_id)) if playing_turn == turn && playing_id != id => {
                    // A newer playback of the same turn owns the state.
                    return;
                }
                Some((_, playing_id)) if playing_id == id => {
                    inner.playing = None;
                    inner.handle.take()
                }
                _ => None,
            };
            if inner.states.get(&turn) == Some(&PlaybackState::Playing) {
                inner.set(turn, PlaybackState::Idle);
            }
            finished
        };
        // Dropped outside the lock; a handle's drop may run arbitrary code.
        drop(finished);
        tracing::debug!(turn, id, "speech playback ended");
    })
}

fn lock(inner: &Mutex<PlayerInner>) -> MutexGuard<'_, PlayerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================
// Sound Device
// ============================================

const DEVICE_GONE: &str = "audio device thread stopped";

struct PlayRequest {
    clip: PcmClip,
    reply: std_mpsc::Sender<Arc<Sink>>,
}

/// The default sound device.
///
/// The rodio output stream is opened once and owned by a dedicated thread
/// for the life of the output; every clip plays through a fresh `Sink` on
/// its mixer.
pub struct RodioOutput {
    requests: std_mpsc::Sender<PlayRequest>,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self, AudioError> {
        let (requests, incoming) = std_mpsc::channel::<PlayRequest>();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        thread::Builder::new()
            .name("speech-device".into())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(AudioError::Device(err.to_string())));
                        return;
                    }
                };
                for PlayRequest { clip, reply } in incoming {
                    let sink = Sink::connect_new(stream.mixer());
                    sink.append(clip.to_samples_buffer());
                    let _ = reply.send(Arc::new(sink));
                }
                tracing::debug!("speech device closed");
            })
            .map_err(|err| AudioError::Device(err.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::Device(DEVICE_GONE.to_string()))??;
        tracing::info!("opened default audio output");
        Ok(Self { requests })
    }
}

impl AudioOutput for RodioOutput {
    fn start(
        &self,
        clip: PcmClip,
        on_end: PlaybackEnded,
    ) -> Result<Box<dyn ActivePlayback>, AudioError> {
        let (reply, sink_rx) = std_mpsc::channel();
        self.requests
            .send(PlayRequest { clip, reply })
            .map_err(|_| AudioError::Device(DEVICE_GONE.to_string()))?;
        let sink = sink_rx
            .recv()
            .map_err(|_| AudioError::Device(DEVICE_GONE.to_string()))?;

        let watched = sink.clone();
        thread::Builder::new()
            .name("speech-playback".into())
            .spawn(move || {
                watched.sleep_until_end();
                on_end();
            })
            .map_err(|err| AudioError::Device(err.to_string()))?;

        Ok(Box::new(SinkPlayback { sink }))
    }
}

struct SinkPlayback {
    sink: Arc<Sink>,
}

impl ActivePlayback for SinkPlayback {
    fn stop(self: Box<Self>) {
        self.sink.stop();
    }
}

// ============================================
// WAV Files
// ============================================

/// Output for hosts without a sound device: renders each clip to a WAV file
/// and holds the device for the clip's duration.
pub struct WavFileOutput {
    dir: PathBuf,
    counter: AtomicU64,
}

impl WavFileOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AudioOutput for WavFileOutput {
    fn start(
        &self,
        clip: PcmClip,
        on_end: PlaybackEnded,
    ) -> Result<Box<dyn ActivePlayback>, AudioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| AudioError::Device(err.to_string()))?;

        std::fs::create_dir_all(&self.dir).map_err(|err| AudioError::Device(err.to_string()))?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self.dir.join(format!("speech-{n}.wav"));
        rodio::output_to_wav(&mut clip.to_samples_buffer(), &path)
            .map_err(|err| AudioError::Device(err.to_string()))?;
        tracing::info!(path = %path.display(), "speech written");

        let (stop_tx, stop_rx) = oneshot::channel();
        let duration = clip.duration();
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = stop_rx => {}
            }
            on_end();
        });

        Ok(Box::new(WavPlayback {
            stop_tx: Some(stop_tx),
        }))
    }
}

struct WavPlayback {
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ActivePlayback for WavPlayback {
    fn stop(mut self: Box<Self>) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayResult;
    use crate::types::{ChatTurn, ReasoningMode};
    use async_trait::async_trait;

    struct SpeechGateway {
        audio: GatewayResult<Vec<u8>>,
    }

    #[async_trait]
    impl TutorGateway for SpeechGateway {
        async fn generate_tutor_reply(
            &self,
            _prompt: &str,
            _history: &[ChatTurn],
            _mode: ReasoningMode,
        ) -> GatewayResult<String> {
            Ok(String::new())
        }

        async fn synthesize_speech(&self, _text: &str) -> GatewayResult<Vec<u8>> {
            self.audio.clone()
        }
    }

    type Slot = Arc<Mutex<Option<PlaybackEnded>>>;

    /// Holds every playback until the test finishes or stops it.
    #[derive(Default)]
    struct ManualOutput {
        started: Mutex<Vec<Slot>>,
    }

    impl ManualOutput {
        fn finish(&self, index: usize) {
            let slot = self.started.lock().unwrap()[index].clone();
            let on_end = slot.lock().unwrap().take();
            if let Some(on_end) = on_end {
                on_end();
            }
        }

        fn starts(&self) -> usize {
            self.started.lock().unwrap().len()
        }
    }

    struct ManualPlayback {
        slot: Slot,
    }

    impl ActivePlayback for ManualPlayback {
        fn stop(self: Box<Self>) {
            let on_end = self.slot.lock().unwrap().take();
            if let Some(on_end) = on_end {
                on_end();
            }
        }
    }

    impl AudioOutput for ManualOutput {
        fn start(
            &self,
            _clip: PcmClip,
            on_end: PlaybackEnded,
        ) -> Result<Box<dyn ActivePlayback>, AudioError> {
            let slot: Slot = Arc::new(Mutex::new(Some(on_end)));
            self.started.lock().unwrap().push(slot.clone());
            Ok(Box::new(ManualPlayback { slot }))
        }
    }

    fn player(audio: GatewayResult<Vec<u8>>) -> (SpeechPlayer, Arc<ManualOutput>) {
        let output = Arc::new(ManualOutput::default());
        let player = SpeechPlayer::new(Arc::new(SpeechGateway { audio }), output.clone());
        (player, output)
    }

    #[test]
    fn pcm_decoding() {
        let clip = PcmClip::from_le_bytes(&[0x00, 0x80, 0xff, 0x7f], SPEECH_SAMPLE_RATE).unwrap();
        assert_eq!(clip.samples(), &[i16::MIN, i16::MAX]);
        assert_eq!(clip.to_f32()[0], -1.0);
        assert!(matches!(
            PcmClip::from_le_bytes(&[1, 2, 3], SPEECH_SAMPLE_RATE),
            Err(AudioError::OddLength(3))
        ));
        assert!(matches!(
            PcmClip::from_le_bytes(&[], SPEECH_SAMPLE_RATE),
            Err(AudioError::Empty)
        ));
    }

    #[test]
    fn clip_duration() {
        let clip = PcmClip::from_le_bytes(&vec![0u8; 48_000], SPEECH_SAMPLE_RATE).unwrap();
        assert_eq!(clip.duration(), Duration::from_secs(1));
        assert_eq!(clip.sample_rate(), 24_000);
    }

    #[tokio::test]
    async fn press_plays_then_stops() {
        let (player, _output) = player(Ok(vec![0, 0, 1, 0]));
        assert_eq!(player.press(1, "hi").await.unwrap(), PlaybackState::Playing);
        assert_eq!(player.state(1), PlaybackState::Playing);

        assert_eq!(player.press(1, "hi").await.unwrap(), PlaybackState::Idle);
        assert_eq!(player.state(1), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn starting_another_turn_resets_the_previous_one() {
        let (player, output) = player(Ok(vec![0, 0]));
        player.press(1, "first").await.unwrap();
        player.press(3, "second").await.unwrap();

        assert_eq!(output.starts(), 2);
        assert_eq!(player.state(1), PlaybackState::Idle);
        assert_eq!(player.state(3), PlaybackState::Playing);

        player.stop_all();
        assert_eq!(player.state(3), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn synthesis_failure_returns_to_idle() {
        let (player, output) = player(Err(GatewayError::Unavailable("503".into())));
        let err = player.press(1, "x").await.unwrap_err();
        assert!(matches!(err, AudioError::Synthesis(_)));
        assert_eq!(player.state(1), PlaybackState::Idle);
        assert_eq!(output.starts(), 0);
    }

    #[tokio::test]
    async fn undecodable_audio_returns_to_idle() {
        let (player, _output) = player(Ok(vec![1, 2, 3]));
        assert!(matches!(
            player.press(2, "x").await,
            Err(AudioError::OddLength(3))
        ));
        assert_eq!(player.state(2), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn natural_end_returns_to_idle() {
        let (player, output) = player(Ok(vec![0, 0]));
        player.press(0, "x").await.unwrap();
        output.finish(0);
        assert_eq!(player.state(0), PlaybackState::Idle);

        // The turn can be played again afterwards.
        assert_eq!(player.press(0, "x").await.unwrap(), PlaybackState::Playing);
        assert_eq!(output.starts(), 2);
    }

    #[tokio::test]
    async fn stale_end_does_not_reset_a_replay() {
        let (player, output) = player(Ok(vec![0, 0]));
        player.press(0, "x").await.unwrap();
        player.press(0, "x").await.unwrap();
        player.press(0, "x").await.unwrap();
        assert_eq!(player.state(0), PlaybackState::Playing);

        // First playback was stopped already; its slot is empty.
        output.finish(0);
        assert_eq!(player.state(0), PlaybackState::Playing);
        output.finish(1);
        assert_eq!(player.state(0), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn stop_reports_idle_before_the_output_confirms() {
        let dir = tempfile::tempdir().unwrap();
        let player = SpeechPlayer::new(
            Arc::new(SpeechGateway {
                audio: Ok(vec![0u8; 48_000]),
            }),
            Arc::new(WavFileOutput::new(dir.path())),
        );

        assert_eq!(player.press(1, "x").await.unwrap(), PlaybackState::Playing);
        // The file output confirms the stop from a spawned task, later.
        assert_eq!(player.press(1, "x").await.unwrap(), PlaybackState::Idle);
        assert_eq!(player.state(1), PlaybackState::Idle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(player.state(1), PlaybackState::Idle);
        assert_eq!(player.press(1, "x").await.unwrap(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn wav_output_ends_on_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let output = WavFileOutput::new(dir.path());
        let (tx, rx) = oneshot::channel();
        let clip = PcmClip::from_le_bytes(&[0, 0, 0, 0], SPEECH_SAMPLE_RATE).unwrap();
        let _handle = output
            .start(
                clip,
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(dir.path().join("speech-1.wav").exists());
    }
}
