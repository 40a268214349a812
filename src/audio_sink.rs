//! Sound-card sink: I/Q as stereo float through a lock-free ring buffer.
//!
//! The cpal stream is owned by a dedicated thread so the sink itself can
//! move between threads; the engine side only touches the ring producer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use crate::sample::Sample;
use crate::sink::{SampleSink, SinkError, SinkFormat};

const MIN_RING_CAPACITY: usize = 8192;
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MeterSnapshot {
    pub rms: f32,
    pub peak: f32,
    pub xrun_count: u32,
}

struct MeterState {
    rms: AtomicU32,
    peak: AtomicU32,
}

impl MeterState {
    fn new() -> Self {
        MeterState {
            rms: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }
}

fn f32_to_u32(v: f32) -> u32 {
    v.to_bits()
}

fn u32_to_f32(v: u32) -> f32 {
    f32::from_bits(v)
}

pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();
    for device in host.output_devices()? {
        if let Ok(name) = device.name() {
            devices.push(name);
        }
    }
    devices.sort();
    Ok(devices)
}

fn find_device_by_name(devices: Vec<cpal::Device>, name: &str) -> Option<cpal::Device> {
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<cpal::SupportedStreamConfig, String> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?
        .collect::<Vec<_>>();

    for cfg in configs {
        if cfg.sample_format() != cpal::SampleFormat::F32 {
            continue;
        }
        let min = cfg.min_sample_rate().0;
        let max = cfg.max_sample_rate().0;
        if min <= sample_rate && max >= sample_rate {
            return Ok(cfg.with_sample_rate(cpal::SampleRate(sample_rate)));
        }
    }

    Err(format!("device does not support {} Hz float32", sample_rate))
}

struct StreamWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

pub struct AudioDeviceSink {
    device_name: Option<String>,
    producer: Option<HeapProducer<Sample>>,
    worker: Option<StreamWorker>,
    xrun_count: Arc<AtomicU32>,
    meter: Arc<MeterState>,
}

impl AudioDeviceSink {
    /// `device_name` of `None` selects the host default output device.
    pub fn new(device_name: Option<String>) -> Self {
        AudioDeviceSink {
            device_name,
            producer: None,
            worker: None,
            xrun_count: Arc::new(AtomicU32::new(0)),
            meter: Arc::new(MeterState::new()),
        }
    }

    pub fn meter_snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            rms: u32_to_f32(self.meter.rms.load(Ordering::Relaxed)),
            peak: u32_to_f32(self.meter.peak.load(Ordering::Relaxed)),
            xrun_count: self.xrun_count.load(Ordering::Relaxed),
        }
    }

    fn spawn_stream_thread(
        &self,
        sample_rate: u32,
        mut consumer: HeapConsumer<Sample>,
        stop: Arc<AtomicBool>,
        ready: channel::Sender<Result<(), String>>,
    ) -> JoinHandle<()> {
        let device_name = self.device_name.clone();
        let xrun_count = Arc::clone(&self.xrun_count);
        let meter = Arc::clone(&self.meter);

        std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match device_name {
                Some(ref name) => {
                    let devices = match host.output_devices() {
                        Ok(devices) => devices.collect::<Vec<_>>(),
                        Err(e) => {
                            let _ = ready.send(Err(e.to_string()));
                            return;
                        }
                    };
                    match find_device_by_name(devices, name) {
                        Some(device) => device,
                        None => {
                            let _ = ready.send(Err(format!("output device not found: {}", name)));
                            return;
                        }
                    }
                }
                None => match host.default_output_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready.send(Err("no default output device".to_string()));
                        return;
                    }
                },
            };

            let supported = match pick_config(&device, sample_rate) {
                Ok(cfg) => cfg,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            let config: cpal::StreamConfig = supported.into();
            let channels = config.channels as usize;

            let err_fn = |err| log::error!("output stream error: {}", err);
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let mut index = 0;
                    let mut sum_sq = 0.0f32;
                    let mut peak = 0.0f32;
                    let mut frames = 0u32;
                    while index + channels <= data.len() {
                        let sample = match consumer.pop() {
                            Some(sample) => sample,
                            None => {
                                xrun_count.fetch_add(1, Ordering::Relaxed);
                                Sample::zero()
                            }
                        };
                        data[index] = sample.i;
                        if channels > 1 {
                            data[index + 1] = sample.q;
                        }
                        for ch in 2..channels {
                            data[index + ch] = 0.0;
                        }
                        let mag = sample.magnitude();
                        sum_sq += mag * mag;
                        if mag > peak {
                            peak = mag;
                        }
                        frames += 1;
                        index += channels;
                    }
                    if frames > 0 {
                        let rms = (sum_sq / frames as f32).sqrt();
                        meter.rms.store(f32_to_u32(rms), Ordering::Relaxed);
                        meter.peak.store(f32_to_u32(peak), Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
            let _ = ready.send(Ok(()));

            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        })
    }
}

impl SampleSink for AudioDeviceSink {
    fn open(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
        self.close();

        let sample_rate = u32::try_from(format.sample_rate)
            .map_err(|_| SinkError::OpenFailed("sample rate out of range".to_string()))?;
        let capacity = (sample_rate as usize / 4).max(MIN_RING_CAPACITY);
        let ring = HeapRb::<Sample>::new(capacity);
        let (producer, consumer) = ring.split();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = channel::bounded(1);
        let thread = self.spawn_stream_thread(sample_rate, consumer, Arc::clone(&stop), ready_tx);

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                log::info!("audio sink open at {} Hz", sample_rate);
                self.producer = Some(producer);
                self.worker = Some(StreamWorker {
                    stop,
                    thread: Some(thread),
                });
                self.xrun_count.store(0, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(SinkError::OpenFailed(message))
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                let _ = thread.join();
                Err(SinkError::OpenFailed("audio stream startup timed out".to_string()))
            }
        }
    }

    fn write(&mut self, block: &[Sample]) -> Result<(), SinkError> {
        let producer = self.producer.as_mut().ok_or(SinkError::Closed)?;

        for &sample in block {
            let mut pending = sample;
            let stall_start = Instant::now();
            // Backpressure from the callback paces the engine in real time.
            while let Err(rejected) = producer.push(pending) {
                pending = rejected;
                if stall_start.elapsed() > WRITE_STALL_TIMEOUT {
                    return Err(SinkError::WriteFailed(
                        "output stream stalled".to_string(),
                    ));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.producer = None;
        if let Some(mut worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
            log::info!(
                "audio sink closed, {} xruns",
                self.xrun_count.load(Ordering::Relaxed)
            );
        }
    }
}

impl Drop for AudioDeviceSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // Environment-dependent; just exercise the listing path.
        if let Ok(devices) = list_output_devices() {
            println!("found {} output devices", devices.len());
            for device in &devices {
                println!("  - {}", device);
            }
        }
    }

    #[test]
    fn test_write_before_open_fails() {
        let mut sink = AudioDeviceSink::new(None);
        assert!(matches!(
            sink.write(&[Sample::zero()]),
            Err(SinkError::Closed)
        ));
    }
}
