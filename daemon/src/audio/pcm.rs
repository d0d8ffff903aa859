use std::io::Cursor;

use super::SAMPLE_RATE;

/// Converts f32 samples to signed 16-bit PCM. Samples are scaled by 32768
/// and clamped to [-32768, 32767].
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Encodes mono samples as a 16-bit WAV file in memory.
pub fn encode_wav(samples: &[f32]) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in to_pcm16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub fn duration_ms(sample_count: usize) -> u32 {
    ((sample_count as u64 * 1000) / SAMPLE_RATE as u64) as u32
}

/// Peak-following gain control for microphones without hardware AGC.
pub struct AutoGain {
    gain: f32,
    fixed_gain: f32,
}

impl AutoGain {
    const TARGET_PEAK: f32 = 0.5;
    const MAX_GAIN: f32 = 8.0;
    const NOISE_FLOOR: f32 = 0.002;
    const SMOOTHING: f32 = 0.05;

    pub fn new(fixed_gain: f32) -> Self {
        Self {
            gain: 1.0,
            fixed_gain,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        let peak = samples
            .iter()
            .map(|s| (s * self.fixed_gain).abs())
            .fold(0.0f32, f32::max);

        // Below the floor we would only amplify noise.
        if peak > Self::NOISE_FLOOR {
            let desired = (Self::TARGET_PEAK / peak).min(Self::MAX_GAIN);
            self.gain += (desired - self.gain) * Self::SMOOTHING;
        }

        let total = self.gain * self.fixed_gain;
        for sample in samples.iter_mut() {
            *sample = (*sample * total).clamp(-1.0, 1.0);
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}
