//! cpal-backed microphone and speaker.
//!
//! cpal streams are not `Send` on every host, so each device parks its
//! stream on a dedicated thread and drives it over a command channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig};

use super::capture::{CaptureDevice, SampleCallback};
use super::pcm::{f32_to_pcm16, pcm16_to_f32, resample_linear};
use super::playback::PlaybackSink;
use crate::error::{ParleyError, Result};

enum Command {
    Play,
    Pause,
    Shutdown,
}

struct StreamThread {
    commands: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn a thread that builds a stream with `build` and serves commands until shutdown.
    fn spawn<B>(name: &str, build: B) -> Result<Self>
    where
        B: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                        return;
                    }
                };
                while let Ok(command) = commands_rx.recv() {
                    let outcome = match command {
                        Command::Play => stream.play().map_err(|error| error.to_string()),
                        Command::Pause => stream.pause().map_err(|error| error.to_string()),
                        Command::Shutdown => break,
                    };
                    if let Err(error) = outcome {
                        tracing::warn!(error = %error, "audio stream command failed");
                    }
                }
            })?;

        let ready = ready_rx.recv().map_err(|_| {
            ParleyError::DeviceUnavailable("audio stream thread exited during setup".into())
        })?;
        ready?;
        Ok(Self {
            commands: commands_tx,
            handle: Some(handle),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ParleyError::Audio("audio stream thread is gone".into()))
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pick a config at `sample_rate` if the device supports it, else its default.
fn select_config<I>(
    supported: I,
    fallback: SupportedStreamConfig,
    sample_rate: u32,
) -> SupportedStreamConfig
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let mut candidates: Vec<_> = supported
        .filter(|range| {
            range.min_sample_rate().0 <= sample_rate && sample_rate <= range.max_sample_rate().0
        })
        .collect();
    candidates.sort_by_key(|range| range.channels());
    candidates
        .into_iter()
        .next()
        .map(|range| range.with_sample_rate(SampleRate(sample_rate)))
        .unwrap_or(fallback)
}

fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Default system microphone.
#[derive(Default)]
pub struct CpalMicrophone {
    stream: Option<StreamThread>,
    callback: Arc<Mutex<Option<SampleCallback>>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureDevice for CpalMicrophone {
    fn acquire(&mut self, sample_rate: u32) -> Result<()> {
        let callback = Arc::clone(&self.callback);
        let stream = StreamThread::spawn("parley-capture", move || {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or_else(|| {
                ParleyError::DeviceUnavailable("no default input device".into())
            })?;
            let fallback = device
                .default_input_config()
                .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            let ranges = device
                .supported_input_configs()
                .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            let supported = select_config(ranges, fallback, sample_rate);
            let format = supported.sample_format();
            let config: StreamConfig = supported.config();
            let channels = config.channels as usize;
            let device_rate = config.sample_rate.0;

            let deliver = move |mono: Vec<f32>| {
                let pcm = resample_linear(&f32_to_pcm16(&mono), device_rate, sample_rate);
                if let Ok(mut guard) = callback.lock() {
                    if let Some(on_samples) = guard.as_mut() {
                        on_samples(&pcm);
                    }
                }
            };
            let on_error = |error: cpal::StreamError| {
                tracing::warn!(error = %error, "audio capture error")
            };

            let stream = match format {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _| deliver(downmix(data, channels)),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _| deliver(downmix(&pcm16_to_f32(data), channels)),
                    on_error,
                    None,
                ),
                SampleFormat::U16 => device.build_input_stream(
                    &config,
                    move |data: &[u16], _| {
                        let converted: Vec<f32> = data
                            .iter()
                            .map(|sample| (*sample as f32 / u16::MAX as f32) * 2.0 - 1.0)
                            .collect();
                        deliver(downmix(&converted, channels))
                    },
                    on_error,
                    None,
                ),
                other => {
                    return Err(ParleyError::DeviceUnavailable(format!(
                        "unsupported input sample format: {other:?}"
                    )))
                }
            }
            .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            Ok(stream)
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn start_stream(&mut self, on_samples: SampleCallback) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| ParleyError::InvalidState("microphone not acquired".into()))?;
        if let Ok(mut guard) = self.callback.lock() {
            *guard = Some(on_samples);
        }
        stream.send(Command::Play)
    }

    fn stop_stream(&mut self) -> Result<()> {
        if let Ok(mut guard) = self.callback.lock() {
            guard.take();
        }
        match &self.stream {
            Some(stream) => stream.send(Command::Pause),
            None => Ok(()),
        }
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
        }
        Ok(())
    }
}

#[derive(Default)]
struct OutputQueue {
    samples: VecDeque<i16>,
    played: u64,
}

/// Default system speaker.
#[derive(Default)]
pub struct CpalSpeaker {
    stream: Option<StreamThread>,
    queue: Arc<Mutex<OutputQueue>>,
    sample_rate: u32,
    device_rate: Arc<AtomicU64>,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackSink for CpalSpeaker {
    fn open(&mut self, sample_rate: u32) -> Result<()> {
        self.sample_rate = sample_rate;
        let queue = Arc::clone(&self.queue);
        let device_rate = Arc::clone(&self.device_rate);
        let stream = StreamThread::spawn("parley-playback", move || {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or_else(|| {
                ParleyError::DeviceUnavailable("no default output device".into())
            })?;
            let fallback = device
                .default_output_config()
                .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            let ranges = device
                .supported_output_configs()
                .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            let supported = select_config(ranges, fallback, sample_rate);
            let format = supported.sample_format();
            let config: StreamConfig = supported.config();
            let channels = config.channels as usize;
            device_rate.store(config.sample_rate.0 as u64, Ordering::SeqCst);

            let next_frame = move || -> f32 {
                let Ok(mut guard) = queue.lock() else {
                    return 0.0;
                };
                match guard.samples.pop_front() {
                    Some(sample) => {
                        guard.played += 1;
                        sample as f32 / 32_768.0
                    }
                    None => 0.0,
                }
            };
            let on_error = |error: cpal::StreamError| {
                tracing::warn!(error = %error, "audio playback error")
            };

            let stream = match format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        for frame in data.chunks_mut(channels) {
                            let value = next_frame();
                            frame.iter_mut().for_each(|slot| *slot = value);
                        }
                    },
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        for frame in data.chunks_mut(channels) {
                            let value = (next_frame() * 32_767.0) as i16;
                            frame.iter_mut().for_each(|slot| *slot = value);
                        }
                    },
                    on_error,
                    None,
                ),
                other => {
                    return Err(ParleyError::DeviceUnavailable(format!(
                        "unsupported output sample format: {other:?}"
                    )))
                }
            }
            .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            stream
                .play()
                .map_err(|error| ParleyError::DeviceUnavailable(error.to_string()))?;
            Ok(stream)
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, _item_id: &str, samples: &[i16]) -> Result<()> {
        let device_rate = self.device_rate.load(Ordering::SeqCst) as u32;
        let converted = resample_linear(samples, self.sample_rate, device_rate.max(1));
        let mut guard = self
            .queue
            .lock()
            .map_err(|_| ParleyError::Audio("playback queue poisoned".into()))?;
        guard.samples.extend(converted);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut guard = self
            .queue
            .lock()
            .map_err(|_| ParleyError::Audio("playback queue poisoned".into()))?;
        guard.samples.clear();
        Ok(())
    }

    fn position(&self) -> u64 {
        let device_rate = self.device_rate.load(Ordering::SeqCst);
        let played = self.queue.lock().map(|guard| guard.played).unwrap_or(0);
        if device_rate == 0 {
            return played;
        }
        played * self.sample_rate as u64 / device_rate
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
        }
    }
}
