//! Audio output using cpal.
//!
//! [`CpalDevice`] is the production [`AudioDevice`]. Sources are downloaded
//! whole with reqwest, then handed to a dedicated output thread that:
//! - Decodes with symphonia
//! - Feeds decoded chunks to the cpal callback over a bounded channel
//! - Applies volume in the callback
//! - Reports position, end of stream and output loss as [`DeviceEvent`]s

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::decoder::{AudioDecoder, DecodedChunk};
use super::traits::{AudioDevice, DeviceError, DeviceEvent};

/// How often position updates are sent while playing.
const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// Idle wait between housekeeping ticks.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Chunks buffered between the decoder and the callback.
const CHUNK_BUFFER: usize = 8;

/// State shared with the real-time callback.
#[derive(Debug, Default)]
struct OutputShared {
    volume: f32,
    playing: bool,
    position: Duration,
}

enum OutputCommand {
    Load {
        generation: u64,
        bytes: Vec<u8>,
        extension: Option<String>,
        reply: oneshot::Sender<Result<f64, DeviceError>>,
    },
    Play,
    Pause,
    Stop,
    Seek(f64),
    Shutdown,
}

/// System audio output.
///
/// Every `load` call takes a new generation. A load whose download finishes
/// after a later `load` was issued is dropped without touching the current
/// source.
pub struct CpalDevice {
    commands: Sender<OutputCommand>,
    shared: Arc<RwLock<OutputShared>>,
    generation: Arc<AtomicU64>,
    http: reqwest::Client,
    thread: Option<JoinHandle<()>>,
}

impl CpalDevice {
    /// Open the output device and start the output thread.
    ///
    /// Returns the device and the stream of events it emits.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<DeviceEvent>), DeviceError> {
        let shared = Arc::new(RwLock::new(OutputShared {
            volume: 1.0,
            ..Default::default()
        }));
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = bounded(1);
        let generation = Arc::new(AtomicU64::new(0));

        let thread_shared = Arc::clone(&shared);
        let thread_generation = Arc::clone(&generation);
        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let device = match select_device() {
                    Ok(device) => {
                        let _ = ready_tx.send(Ok(()));
                        device
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                OutputThread::new(device, thread_shared, thread_generation, event_tx)
                    .run(command_rx);
            })
            .map_err(|e| DeviceError::Output(e.to_string()))?;

        ready_rx.recv().map_err(|_| DeviceError::Closed)??;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeviceError::Output(e.to_string()))?;

        Ok((
            Self {
                commands: command_tx,
                shared,
                generation,
                http,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    fn send(&self, command: OutputCommand) -> Result<(), DeviceError> {
        self.commands.send(command).map_err(|_| DeviceError::Closed)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DeviceError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeviceError::Load(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DeviceError::Load(e.to_string()))?;
        debug!(target: "player", size = bytes.len(), "Downloaded source");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AudioDevice for CpalDevice {
    async fn load(&self, url: &str) -> Result<f64, DeviceError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = self.download(url).await?;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "player", url, "Dropping superseded download");
            return Err(DeviceError::Superseded);
        }
        let (reply, response) = oneshot::channel();
        self.send(OutputCommand::Load {
            generation,
            bytes,
            extension: extension_of(url),
            reply,
        })?;
        response.await.map_err(|_| DeviceError::Closed)?
    }

    async fn play(&self) -> Result<(), DeviceError> {
        self.send(OutputCommand::Play)
    }

    fn pause(&self) {
        let _ = self.send(OutputCommand::Pause);
    }

    fn stop(&self) {
        let _ = self.send(OutputCommand::Stop);
    }

    fn seek(&self, seconds: f64) {
        let _ = self.send(OutputCommand::Seek(seconds));
    }

    fn set_volume(&self, volume: f64) {
        self.shared.write().volume = volume.clamp(0.0, 1.0) as f32;
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        let _ = self.commands.send(OutputCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Whether a load of `generation` is still the most recent one.
fn is_latest_load(generation: u64, latest: &AtomicU64) -> bool {
    latest.load(Ordering::SeqCst) == generation
}

/// File extension of a URL path, used as a probe hint.
fn extension_of(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5).then(|| ext.to_ascii_lowercase())
}

/// Prefer headphones, then the default output.
fn select_device() -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    let devices: Vec<Device> = host
        .output_devices()
        .map_err(|e| DeviceError::Output(e.to_string()))?
        .collect();

    let headphone_keywords = ["headphone", "headset", "earphone", "airpod", "buds"];
    for device in &devices {
        if let Ok(name) = device.name() {
            let lower = name.to_lowercase();
            if headphone_keywords.iter().any(|k| lower.contains(k)) {
                info!(target: "player", "Selected headphones: {}", name);
                return Ok(device.clone());
            }
        }
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| DeviceError::Output("no output device found".to_string()))?;
    info!(
        target: "player",
        "Using audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

/// A loaded source and the stream playing it.
struct Source {
    decoder: AudioDecoder,
    _stream: Stream,
    chunks: Sender<DecodedChunk>,
    /// Receiver side kept to flush buffered audio on seek
    buffered: Receiver<DecodedChunk>,
    /// Chunk that didn't fit in the buffer yet
    pending: Option<DecodedChunk>,
    finished: bool,
    ended_sent: bool,
}

impl Source {
    fn flush(&mut self) {
        self.pending = None;
        while self.buffered.try_recv().is_ok() {}
    }
}

struct OutputThread {
    device: Device,
    shared: Arc<RwLock<OutputShared>>,
    /// Generation of the most recent `load` call
    latest: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    source: Option<Source>,
    last_update: Instant,
}

impl OutputThread {
    fn new(
        device: Device,
        shared: Arc<RwLock<OutputShared>>,
        latest: Arc<AtomicU64>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Self {
        Self {
            device,
            shared,
            latest,
            events,
            source: None,
            last_update: Instant::now(),
        }
    }

    fn run(mut self, commands: Receiver<OutputCommand>) {
        loop {
            // Poll while decoding, otherwise wait
            let command = if self.is_decoding() {
                match commands.try_recv() {
                    Ok(cmd) => Some(cmd),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match commands.recv_timeout(IDLE_POLL) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            if let Some(cmd) = command {
                if !self.handle_command(cmd) {
                    break;
                }
                continue;
            }

            self.tick();
        }
        debug!(target: "player", "Audio output thread stopped");
    }

    fn is_playing(&self) -> bool {
        self.shared.read().playing
    }

    fn is_decoding(&self) -> bool {
        self.is_playing() && self.source.as_ref().is_some_and(|s| !s.finished)
    }

    /// Returns false on shutdown.
    fn handle_command(&mut self, cmd: OutputCommand) -> bool {
        match cmd {
            OutputCommand::Load {
                generation,
                bytes,
                extension,
                reply,
            } => {
                if !is_latest_load(generation, &self.latest) {
                    let _ = reply.send(Err(DeviceError::Superseded));
                    return true;
                }
                self.unload();
                let result = self.open(bytes, extension.as_deref());
                let _ = reply.send(result);
            }
            OutputCommand::Play => {
                if self.source.is_some() {
                    self.shared.write().playing = true;
                }
            }
            OutputCommand::Pause => {
                self.shared.write().playing = false;
            }
            OutputCommand::Stop => self.unload(),
            OutputCommand::Seek(seconds) => {
                if let Some(source) = self.source.as_mut() {
                    source.flush();
                    match source.decoder.seek(seconds) {
                        Ok(()) => {
                            source.finished = false;
                            source.ended_sent = false;
                            self.shared.write().position = Duration::from_secs_f64(seconds.max(0.0));
                        }
                        Err(e) => warn!(target: "player", "Seek failed: {}", e),
                    }
                }
            }
            OutputCommand::Shutdown => return false,
        }
        true
    }

    fn unload(&mut self) {
        self.source = None;
        let mut shared = self.shared.write();
        shared.playing = false;
        shared.position = Duration::ZERO;
    }

    /// Decode the header and start a silent stream at the source's format.
    fn open(&mut self, bytes: Vec<u8>, extension: Option<&str>) -> Result<f64, DeviceError> {
        let decoder = AudioDecoder::from_bytes(bytes, extension)?;
        let config = StreamConfig {
            channels: decoder.channels(),
            sample_rate: cpal::SampleRate(decoder.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };
        debug!(
            target: "player",
            "Audio format: {}Hz, {} channels",
            decoder.sample_rate(),
            decoder.channels()
        );

        let format = self
            .device
            .default_output_config()
            .map_err(|e| DeviceError::Output(e.to_string()))?
            .sample_format();

        let (chunk_tx, chunk_rx) = bounded::<DecodedChunk>(CHUNK_BUFFER);
        let stream = match format {
            SampleFormat::F32 => self.build_stream::<f32>(&config, chunk_rx.clone()),
            SampleFormat::I16 => self.build_stream::<i16>(&config, chunk_rx.clone()),
            other => {
                return Err(DeviceError::Output(format!(
                    "unsupported sample format: {:?}",
                    other
                )));
            }
        }?;
        stream
            .play()
            .map_err(|e| DeviceError::Output(e.to_string()))?;

        let duration = decoder.duration().as_secs_f64();
        self.source = Some(Source {
            decoder,
            _stream: stream,
            chunks: chunk_tx,
            buffered: chunk_rx,
            pending: None,
            finished: false,
            ended_sent: false,
        });
        Ok(duration)
    }

    fn build_stream<T>(
        &self,
        config: &StreamConfig,
        chunks: Receiver<DecodedChunk>,
    ) -> Result<Stream, DeviceError>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let shared = Arc::clone(&self.shared);
        let error_shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let mut current: Option<(DecodedChunk, usize)> = None;

        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let (volume, playing) = {
                        let s = shared.read();
                        (s.volume, s.playing)
                    };
                    if !playing {
                        fill_silence(data);
                        return;
                    }
                    if let Some(position) = fill(data, &mut current, &chunks, volume) {
                        shared.write().position = position;
                    }
                },
                move |err| {
                    error!(target: "player", "Audio stream error: {}", err);
                    let was_playing = std::mem::replace(&mut error_shared.write().playing, false);
                    if was_playing {
                        let _ = events.send(DeviceEvent::Paused);
                    }
                },
                None,
            )
            .map_err(|e| DeviceError::Output(e.to_string()))
    }

    /// Keep the chunk buffer topped up and report progress.
    fn tick(&mut self) {
        let playing = self.is_playing();
        let Some(source) = self.source.as_mut() else {
            return;
        };

        if playing && !source.finished {
            let chunk = match source.pending.take() {
                Some(chunk) => Some(chunk),
                None => match source.decoder.decode_next() {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(target: "player", "Decode error: {}", e);
                        None
                    }
                },
            };
            match chunk {
                Some(chunk) => {
                    if let Err(e) = source.chunks.send_timeout(chunk, IDLE_POLL) {
                        // Callback stalled; retry on the next tick
                        source.pending = Some(e.into_inner());
                    }
                }
                None => source.finished = true,
            }
        }

        if playing && source.finished && !source.ended_sent && source.buffered.is_empty() {
            source.ended_sent = true;
            self.shared.write().playing = false;
            info!(target: "player", "Playback finished");
            let _ = self.events.send(DeviceEvent::Ended);
            return;
        }

        if playing && self.last_update.elapsed() >= TIME_UPDATE_INTERVAL {
            self.last_update = Instant::now();
            let position = self.shared.read().position.as_secs_f64();
            let _ = self.events.send(DeviceEvent::TimeUpdate(position));
        }
    }
}

fn fill_silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0f32);
    }
}

/// Copy buffered audio into `data` at `volume`, padding underruns with
/// silence. Returns the timestamp of the last chunk started, if any.
fn fill<T: cpal::SizedSample + cpal::FromSample<f32>>(
    data: &mut [T],
    current: &mut Option<(DecodedChunk, usize)>,
    chunks: &Receiver<DecodedChunk>,
    volume: f32,
) -> Option<Duration> {
    let mut position = None;
    let mut out = 0;

    while out < data.len() {
        if current.is_none() {
            match chunks.try_recv() {
                Ok(chunk) => {
                    position = Some(chunk.timestamp);
                    *current = Some((chunk, 0));
                }
                Err(_) => {
                    fill_silence(&mut data[out..]);
                    break;
                }
            }
        }

        if let Some((chunk, offset)) = current.as_mut() {
            let to_copy = (chunk.samples.len() - *offset).min(data.len() - out);
            for i in 0..to_copy {
                data[out + i] = T::from_sample(chunk.samples[*offset + i] * volume);
            }
            *offset += to_copy;
            out += to_copy;
            if *offset >= chunk.samples.len() {
                *current = None;
            }
        }
    }

    position
}
