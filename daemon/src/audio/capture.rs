use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange,
};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::manager::CaptureConfig;
use super::pcm::AutoGain;
use super::AudioFrame;
use crate::error::AudioError;

/// A source of microphone audio. Implementations push mono f32 frames into
/// the sender handed to [`Microphone::open`] until [`Microphone::close`].
pub trait Microphone: Send {
    fn open(
        &mut self,
        config: &CaptureConfig,
        audio_tx: broadcast::Sender<AudioFrame>,
    ) -> Result<(), AudioError>;

    /// Stops all underlying tracks. Must be safe to call when not open.
    fn close(&mut self);
}

/// Microphone capture through the host's default audio backend.
pub struct AudioCapture {
    stream: Option<Box<Stream>>,
    audio_tx: Arc<Mutex<Option<broadcast::Sender<AudioFrame>>>>,
    is_running: Arc<Mutex<bool>>,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self {
            stream: None,
            audio_tx: Arc::new(Mutex::new(None)),
            is_running: Arc::new(Mutex::new(false)),
        }
    }

    fn find_device(name: &str) -> Result<Device, AudioError> {
        let host = cpal::default_host();

        if name.is_empty() || name == "default" {
            return host.default_input_device().ok_or_else(|| {
                AudioError::DeviceUnavailable("No default input device found".to_string())
            });
        }

        let devices = host.input_devices().map_err(|e| classify(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }

        Err(AudioError::DeviceUnavailable(format!(
            "Input device '{}' not found",
            name
        )))
    }

    fn stream_config(
        device: &Device,
        config: &CaptureConfig,
    ) -> Result<SupportedStreamConfig, AudioError> {
        let supported_configs = device
            .supported_input_configs()
            .map_err(|e| classify(e.to_string()))?;
        pick_stream_config(supported_configs, config)
    }

    fn process_audio_chunk(
        data: &[f32],
        agc: &mut Option<AutoGain>,
        gain: f32,
        audio_tx: &Arc<Mutex<Option<broadcast::Sender<AudioFrame>>>>,
        is_running: &Arc<Mutex<bool>>,
    ) {
        if !is_running.try_lock().map(|g| *g).unwrap_or(false) {
            return;
        }

        let mut frame = data.to_vec();
        match agc {
            Some(agc) => agc.process(&mut frame),
            None if gain != 1.0 => {
                for sample in frame.iter_mut() {
                    *sample = (*sample * gain).clamp(-1.0, 1.0);
                }
            }
            None => {}
        }

        if let Ok(tx) = audio_tx.try_lock() {
            if let Some(sender) = tx.as_ref() {
                // No receivers is normal between start/stop cycles.
                let _ = sender.send(frame);
            }
        }
    }
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Microphone for AudioCapture {
    fn open(
        &mut self,
        config: &CaptureConfig,
        audio_tx: broadcast::Sender<AudioFrame>,
    ) -> Result<(), AudioError> {
        if self.stream.is_some() {
            self.close();
        }

        let device = Self::find_device(&config.device)?;
        if let Ok(name) = device.name() {
            tracing::info!("Using input device: {}", name);
        }

        tracing::info!(
            "Configuring audio stream: {}Hz, {} channel(s)",
            config.sample_rate,
            config.channels
        );
        if config.echo_cancellation || config.noise_suppression {
            tracing::debug!(
                "Echo cancellation and noise suppression are left to the audio server"
            );
        }

        let supported = Self::stream_config(&device, config)?;
        let sample_format = supported.sample_format();
        let final_config: StreamConfig = supported.into();

        *self.audio_tx.lock().map_err(poisoned)? = Some(audio_tx);
        *self.is_running.lock().map_err(poisoned)? = true;

        let audio_tx = Arc::clone(&self.audio_tx);
        let is_running = Arc::clone(&self.is_running);
        let gain = config.gain;
        let mut agc = config.auto_gain.then(|| AutoGain::new(gain));

        let error_callback = |err| {
            tracing::error!("Audio stream error: {}", err);
        };

        let built = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &final_config,
                move |data: &[f32], _: &_| {
                    Self::process_audio_chunk(data, &mut agc, gain, &audio_tx, &is_running);
                },
                error_callback,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &final_config,
                move |data: &[i16], _: &_| {
                    let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    Self::process_audio_chunk(&converted, &mut agc, gain, &audio_tx, &is_running);
                },
                error_callback,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &final_config,
                move |data: &[u16], _: &_| {
                    let converted: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    Self::process_audio_chunk(&converted, &mut agc, gain, &audio_tx, &is_running);
                },
                error_callback,
                None,
            ),
            format => {
                return Err(AudioError::DeviceUnavailable(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        };

        let stream = match built {
            Ok(stream) => stream,
            Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                return Err(AudioError::DeviceUnavailable(
                    "Input device disappeared while opening the stream".to_string(),
                ));
            }
            Err(e) => return Err(classify(e.to_string())),
        };

        stream.play().map_err(|e| classify(e.to_string()))?;
        self.stream = Some(Box::new(stream));

        tracing::info!("Audio capture started");
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut running) = self.is_running.lock() {
            *running = false;
        }
        let had_stream = self.stream.take().is_some();
        if let Ok(mut tx) = self.audio_tx.lock() {
            *tx = None;
        }

        if had_stream {
            tracing::info!("Audio capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}

// cpal streams are only touched from the owning task.
unsafe impl Send for AudioCapture {}

/// Maps backend error text onto the permission/device split. Backends report
/// denied access (EACCES/EPERM, macOS TCC) only through their description.
fn classify(description: String) -> AudioError {
    let lower = description.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not permitted")
        || lower.contains("eacces")
        || lower.contains("eperm")
    {
        AudioError::PermissionDenied(description)
    } else {
        AudioError::DeviceUnavailable(description)
    }
}

/// First range with the requested channel count and rate in a sample
/// format the stream callbacks convert. The device is opened in exactly that
/// layout; nothing is downmixed or resampled afterwards.
fn pick_stream_config<I>(supported: I, config: &CaptureConfig) -> Result<SupportedStreamConfig, AudioError>
where
    I: IntoIterator<Item = SupportedStreamConfigRange>,
{
    for range in supported {
        tracing::debug!("Supported config: {:?}", range);
        let convertible = matches!(
            range.sample_format(),
            SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
        );
        if convertible
            && range.channels() == config.channels
            && range.min_sample_rate().0 <= config.sample_rate
            && range.max_sample_rate().0 >= config.sample_rate
        {
            return Ok(range.with_sample_rate(cpal::SampleRate(config.sample_rate)));
        }
    }

    Err(AudioError::DeviceUnavailable(format!(
        "No input configuration supports {}Hz, {} channel(s)",
        config.sample_rate, config.channels
    )))
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AudioError {
    AudioError::DeviceUnavailable("Audio capture state poisoned".to_string())
}
