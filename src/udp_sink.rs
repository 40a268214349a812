//! Network sink streaming interleaved 16-bit I/Q datagrams to a remote
//! daemon, paced to the effective sample rate.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crate::sample::Sample;
use crate::sink::{SampleSink, SinkError, SinkFormat};

/// Samples per datagram; 512 I/Q pairs keep datagrams at 2048 bytes.
const SAMPLES_PER_DATAGRAM: usize = 512;

/// Pacing slack before the sender sleeps, in samples.
const BURST_SAMPLES: u64 = SAMPLES_PER_DATAGRAM as u64;

pub struct UdpSink {
    target: String,
    socket: Option<UdpSocket>,
    sample_rate: u64,
    clock: Option<Instant>,
    sent_samples: u64,
    datagram: Vec<u8>,
}

impl UdpSink {
    pub fn new<S: Into<String>>(target: S) -> Self {
        UdpSink {
            target: target.into(),
            socket: None,
            sample_rate: 0,
            clock: None,
            sent_samples: 0,
            datagram: Vec::with_capacity(SAMPLES_PER_DATAGRAM * 4),
        }
    }

    fn throttle(&mut self) {
        let Some(clock) = self.clock else {
            self.clock = Some(Instant::now());
            return;
        };
        let due = (clock.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
        if self.sent_samples > due + BURST_SAMPLES {
            let ahead = self.sent_samples - due;
            let sleep_secs = ahead as f64 / self.sample_rate as f64;
            std::thread::sleep(Duration::from_secs_f64(sleep_secs));
        }
    }
}

impl SampleSink for UdpSink {
    fn open(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
        self.close();

        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|e| SinkError::OpenFailed(e.to_string()))?;
        socket
            .connect(&self.target)
            .map_err(|e| SinkError::OpenFailed(format!("{}: {}", self.target, e)))?;
        log::info!(
            "udp sink open: {} at {} Hz",
            self.target,
            format.sample_rate
        );

        self.socket = Some(socket);
        self.sample_rate = format.sample_rate.max(1);
        self.clock = None;
        self.sent_samples = 0;
        Ok(())
    }

    fn write(&mut self, block: &[Sample]) -> Result<(), SinkError> {
        if self.socket.is_none() {
            return Err(SinkError::Closed);
        }
        self.throttle();

        for chunk in block.chunks(SAMPLES_PER_DATAGRAM) {
            self.datagram.clear();
            for sample in chunk {
                let (i, q) = sample.to_i16_pair();
                self.datagram.extend_from_slice(&i.to_le_bytes());
                self.datagram.extend_from_slice(&q.to_le_bytes());
            }
            let socket = self.socket.as_ref().ok_or(SinkError::Closed)?;
            socket
                .send(&self.datagram)
                .map_err(|e| SinkError::WriteFailed(e.to_string()))?;
        }

        self.sent_samples += block.len() as u64;
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            log::info!("udp sink closed after {} samples", self.sent_samples);
        }
        self.clock = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_before_open_fails() {
        let mut sink = UdpSink::new("127.0.0.1:9999");
        assert!(matches!(
            sink.write(&[Sample::zero()]),
            Err(SinkError::Closed)
        ));
    }

    #[test]
    fn test_open_bad_target_fails() {
        let mut sink = UdpSink::new("not-a-real-host-name:1");
        let format = SinkFormat {
            sample_rate: 48_000,
            center_frequency: 0,
        };
        assert!(matches!(
            sink.open(&format),
            Err(SinkError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_datagrams_carry_i16_iq_pairs() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let mut sink = UdpSink::new(target);
        let format = SinkFormat {
            sample_rate: 1_000_000,
            center_frequency: 435_000_000,
        };
        sink.open(&format).unwrap();

        let block: Vec<Sample> = (0..1000).map(|n| {
            let value = (n % 100) as f32 / 100.0;
            Sample::new(value, -value)
        }).collect();
        sink.write(&block).unwrap();
        sink.close();

        let mut buf = [0u8; 4096];
        let mut received = 0usize;
        let mut first_datagram = Vec::new();
        while received < block.len() * 4 {
            let len = receiver.recv(&mut buf).unwrap();
            if first_datagram.is_empty() {
                first_datagram = buf[..len].to_vec();
            }
            received += len;
        }
        assert_eq!(received, block.len() * 4);

        // Sample 1 of the stream is (0.01, -0.01).
        let i = i16::from_le_bytes([first_datagram[4], first_datagram[5]]);
        let q = i16::from_le_bytes([first_datagram[6], first_datagram[7]]);
        let decoded = Sample::from_i16_pair(i, q);
        assert!((decoded.i - 0.01).abs() < 1e-3);
        assert!((decoded.q + 0.01).abs() < 1e-3);
    }
}
