use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BuildStreamError, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};

use super::{CaptureBackend, CaptureConstraints, CaptureStream, ChainInput};
use crate::{CaptureError, Result};

/// Microphone capture through the default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    /// Input device to open; the host default when `None`.
    pub device: Option<String>,
}

impl CpalBackend {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }

    fn find_device(&self) -> std::result::Result<Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device {
            Some(wanted) => host
                .input_devices()
                .map_err(|err| CaptureError::DeviceUnavailable(err.to_string()))?
                .find(|device| device.name().map(|name| &name == wanted).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no input device named `{wanted}`"))),
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string())),
        }
    }
}

impl CaptureBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(
        &mut self,
        constraints: &CaptureConstraints,
        input: ChainInput,
    ) -> std::result::Result<Box<dyn CaptureStream>, CaptureError> {
        let device = self.find_device()?;
        let supported = device
            .default_input_config()
            .map_err(|err| CaptureError::DeviceUnavailable(err.to_string()))?;

        // cpal exposes no processing switches; whatever the OS applies stays on.
        tracing::debug!(?constraints, device = ?device.name().ok(), "opening cpal input");

        let channels = usize::from(supported.channels());
        let sample_rate = supported.sample_rate().0;
        let config = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, input, channels),
            SampleFormat::F64 => build_stream::<f64>(&device, &config, input, channels),
            SampleFormat::I8 => build_stream::<i8>(&device, &config, input, channels),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, input, channels),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, input, channels),
            SampleFormat::U8 => build_stream::<u8>(&device, &config, input, channels),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, input, channels),
            SampleFormat::U32 => build_stream::<u32>(&device, &config, input, channels),
            other => {
                return Err(CaptureError::Construction(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|err| CaptureError::Construction(err.to_string()))?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            sample_rate,
        }))
    }
}

/// Input stream for any sample type cpal can convert to `f32`. The scratch
/// buffer is reused across callbacks.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    input: ChainInput,
    channels: usize,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            convert_into(data, &mut scratch);
            input.process_interleaved(&scratch, channels);
        },
        |err: cpal::StreamError| tracing::warn!(%err, "capture stream error"),
        None,
    )
}

fn convert_into<T>(data: &[T], out: &mut Vec<f32>)
where
    T: Sample,
    f32: FromSample<T>,
{
    out.clear();
    out.extend(data.iter().map(|sample| sample.to_sample::<f32>()));
}

fn map_build_error(err: BuildStreamError) -> CaptureError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device disappeared".to_string())
        }
        other => CaptureError::Construction(other.to_string()),
    }
}

struct CpalStream {
    stream: Option<Stream>,
    sample_rate: u32,
}

impl CaptureStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            paused.map_err(|err| crate::MicVizError::msg(err.to_string()))?;
        }
        Ok(())
    }
}

/// Names of the input devices the default host can see.
pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| CaptureError::DeviceUnavailable(err.to_string()))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_formats_stay_in_unit_range() {
        let mut out = Vec::new();
        convert_into(&[i16::MIN, 0, i16::MAX], &mut out);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert!(out[2] <= 1.0 && out[2] > 0.999);

        convert_into(&[u16::MIN, 32_768u16], &mut out);
        assert_eq!(out, [-1.0, 0.0]);
    }
}
