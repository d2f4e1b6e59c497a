//! CPAL audio output sink

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig};
use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, RingBuffer};
use tracing::{error, info};

use super::RingSink;
use crate::error::AudioDeviceError;
use crate::node::{AudioNode, ProcessContext};

/// A sink that outputs audio to a CPAL device.
///
/// The stream lives on its own thread and drains a ring that this node
/// fills; the graph owner paces `process()` a few blocks ahead of playback.
pub struct CpalSink {
    ring: RingSink,
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open a stream on `device` and return the sink feeding it.
    pub fn new(
        device: &cpal::Device,
        config: &SupportedStreamConfig,
    ) -> Result<Self, AudioDeviceError> {
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();
        let sample_rate = stream_config.sample_rate.0;

        // ~100ms of audio absorbs scheduling jitter on the control thread.
        let buffer_samples = ((sample_rate as f32 * 0.1) as usize) * channels;
        let buffer_size = buffer_samples.next_power_of_two().max(8192);
        let (producer, consumer) = RingBuffer::<f32>::new(buffer_size);

        let samples_consumed = Arc::new(AtomicUsize::new(0));
        let had_underrun = Arc::new(AtomicBool::new(false));

        // cpal streams are not Send on every platform, so the stream is
        // built and kept on the thread that owns it.
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let device = device.clone();
        let consumed = samples_consumed.clone();
        let underrun = had_underrun.clone();
        std::thread::Builder::new()
            .name("kilobeat-audio".into())
            .spawn(move || {
                let stream = match build_stream(
                    &device,
                    sample_format,
                    &stream_config,
                    consumer,
                    consumed,
                    underrun,
                ) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(err.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                loop {
                    std::thread::park();
                }
            })
            .map_err(AudioDeviceError::Thread)?;

        ready_rx.recv().map_err(|_| AudioDeviceError::StreamGone)??;
        info!(sample_rate, channels, ?sample_format, "audio stream started");

        Ok(Self {
            ring: RingSink::new(producer, channels),
            samples_consumed,
            had_underrun,
        })
    }

    /// Samples the device has played so far
    #[inline]
    pub fn samples_consumed(&self) -> usize {
        self.samples_consumed.load(Ordering::Relaxed)
    }

    /// Free space in the ring, in samples
    #[inline]
    pub fn buffer_available(&self) -> usize {
        self.ring.available()
    }

    /// Check and clear the underrun flag
    pub fn check_underrun(&self) -> bool {
        self.had_underrun.swap(false, Ordering::Relaxed)
    }
}

fn fill<T>(
    data: &mut [T],
    consumer: &mut Consumer<f32>,
    convert: impl Fn(f32) -> T,
    samples_consumed: &AtomicUsize,
    had_underrun: &AtomicBool,
) {
    let mut underrun = false;
    for sample in data.iter_mut() {
        let s = consumer.pop().unwrap_or_else(|_| {
            underrun = true;
            0.0
        });
        *sample = convert(s);
    }
    if underrun {
        had_underrun.store(true, Ordering::Relaxed);
    }
    samples_consumed.fetch_add(data.len(), Ordering::Relaxed);
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioDeviceError> {
    let on_error = |err: cpal::StreamError| error!(%err, "audio stream error");
    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| {
                fill(data, &mut consumer, |s| s, &samples_consumed, &had_underrun)
            },
            on_error,
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _| {
                fill(
                    data,
                    &mut consumer,
                    |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16,
                    &samples_consumed,
                    &had_underrun,
                )
            },
            on_error,
            None,
        )?,
        SampleFormat::U16 => device.build_output_stream(
            stream_config,
            move |data: &mut [u16], _| {
                fill(
                    data,
                    &mut consumer,
                    |s| ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16,
                    &samples_consumed,
                    &had_underrun,
                )
            },
            on_error,
            None,
        )?,
        other => return Err(AudioDeviceError::UnsupportedFormat(format!("{other:?}"))),
    };
    Ok(stream)
}

impl AudioNode for CpalSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        if let Some(input) = inputs.first() {
            self.ring.write(input.buffers());
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        0
    }
}
