use std::env;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use pulse_sdr_sink::audio_sink::{list_output_devices, AudioDeviceSink};
use pulse_sdr_sink::engine::{DeviceSinkEngine, State};
use pulse_sdr_sink::message::{Message, Waker};
use pulse_sdr_sink::settings::SinkSettings;
use pulse_sdr_sink::sink::{SampleSink, WavFileSink};
use pulse_sdr_sink::source::{SampleSource, ToneSource, WavBasebandSource};
use pulse_sdr_sink::udp_sink::UdpSink;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STATUS_TICKS: u32 = 5;
const TIMING_TICKS: u32 = 16;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return Ok(());
    }

    let mut sink_kind = "wav".to_string();
    let mut out = "iq.wav".to_string();
    let mut host = "127.0.0.1".to_string();
    let mut port = 9090u16;
    let mut device = None;
    let mut freq = None;
    let mut rate = None;
    let mut interp = None;
    let mut tone = 1000.0f32;
    let mut level = 0.5f32;
    let mut wav_in = None;
    let mut loop_in = false;
    let mut duration = 5.0f32;
    let mut settings_path = None;
    let mut save_settings_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sink" => {
                i += 1;
                sink_kind = args.get(i).cloned().ok_or_else(|| anyhow!("missing sink kind"))?;
            }
            "--out" => {
                i += 1;
                out = args.get(i).cloned().ok_or_else(|| anyhow!("missing output path"))?;
            }
            "--host" => {
                i += 1;
                host = args.get(i).cloned().ok_or_else(|| anyhow!("missing host"))?;
            }
            "--port" => {
                i += 1;
                port = args.get(i).ok_or_else(|| anyhow!("missing port"))?.parse::<u16>()?;
            }
            "--device" => {
                i += 1;
                device = args.get(i).cloned();
            }
            "--freq" => {
                i += 1;
                freq = Some(args.get(i).ok_or_else(|| anyhow!("missing frequency"))?.parse::<u64>()?);
            }
            "--rate" => {
                i += 1;
                rate = Some(args.get(i).ok_or_else(|| anyhow!("missing sample rate"))?.parse::<u32>()?);
            }
            "--interp" => {
                i += 1;
                interp = Some(args.get(i).ok_or_else(|| anyhow!("missing interpolation"))?.parse::<u32>()?);
            }
            "--tone" => {
                i += 1;
                tone = args.get(i).ok_or_else(|| anyhow!("missing tone frequency"))?.parse::<f32>()?;
            }
            "--level" => {
                i += 1;
                level = args.get(i).ok_or_else(|| anyhow!("missing level"))?.parse::<f32>()?;
            }
            "--wav-in" => {
                i += 1;
                wav_in = args.get(i).cloned();
            }
            "--loop-in" => {
                loop_in = true;
            }
            "--duration" => {
                i += 1;
                duration = args.get(i).ok_or_else(|| anyhow!("missing duration"))?.parse::<f32>()?;
            }
            "--settings" => {
                i += 1;
                settings_path = args.get(i).cloned();
            }
            "--save-settings" => {
                i += 1;
                save_settings_path = args.get(i).cloned();
            }
            "--list-devices" => {
                for name in list_output_devices()? {
                    println!("{}", name);
                }
                return Ok(());
            }
            other => {
                return Err(anyhow!("unknown arg: {}", other));
            }
        }
        i += 1;
    }

    let mut settings = SinkSettings::default();
    if let Some(ref path) = settings_path {
        let blob = fs::read(path)?;
        if settings.deserialize(&blob).is_err() {
            eprintln!("settings file {} is unreadable, using defaults", path);
            settings.reset_to_defaults();
        }
    }
    if let Some(freq) = freq {
        settings.center_frequency = freq;
    }
    if let Some(rate) = rate {
        settings.sample_rate = rate;
    }
    if let Some(interp) = interp {
        settings.log2_interp = interp;
    }
    if !settings.is_valid() {
        return Err(anyhow!(
            "invalid settings: rate {} Hz, interpolation 2^{}",
            settings.sample_rate,
            settings.log2_interp
        ));
    }
    if let Some(ref path) = save_settings_path {
        fs::write(path, settings.serialize())?;
        println!("settings saved to {}", path);
    }

    let source: Box<dyn SampleSource> = match wav_in {
        Some(ref path) => Box::new(WavBasebandSource::new(path, loop_in)?),
        None => Box::new(ToneSource::new(tone, settings.sample_rate, level)),
    };

    let sink: Box<dyn SampleSink> = match sink_kind.as_str() {
        "wav" => Box::new(WavFileSink::new(&out)),
        "udp" => Box::new(UdpSink::new(format!("{}:{}", host, port))),
        "audio" => Box::new(AudioDeviceSink::new(device)),
        other => return Err(anyhow!("unknown sink kind: {}", other)),
    };

    let mut engine = DeviceSinkEngine::new(source, sink);
    let input = engine.input_message_queue();
    let output = engine.output_message_queue();

    let waker = Arc::new(Waker::new());
    let wake = Arc::clone(&waker);
    output.set_notifier(move || wake.wake());

    engine.start()?;
    input.push(Message::ConfigureSink(settings.clone()));

    if !engine.start_generation() {
        return Err(anyhow!(
            "start failed: {}",
            engine.error_message().unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    println!(
        "transmitting: center {} Hz, rate {} Hz, interpolation x{} ({} Hz out), sink {}",
        settings.center_frequency,
        settings.sample_rate,
        1u32 << settings.log2_interp,
        settings.effective_sample_rate(),
        sink_kind
    );

    let effective_rate = settings.effective_sample_rate();
    let started = Instant::now();
    let mut last_state = engine.state();
    let mut tick = 0u32;

    while started.elapsed().as_secs_f32() < duration {
        waker.wait_timeout(POLL_INTERVAL);
        tick += 1;

        if tick % STATUS_TICKS == 0 {
            let state = engine.state();
            if state != last_state {
                println!("engine state: {}", state);
                last_state = state;
            }
            if state == State::Error {
                let message = engine.error_message().unwrap_or_else(|| "unknown error".to_string());
                engine.stop_generation();
                return Err(anyhow!("stream fault: {}", message));
            }
        }
        if tick % TIMING_TICKS == 0 {
            input.push(Message::RequestStreamTiming);
        }

        while let Some(msg) = output.pop() {
            match msg {
                Message::ReportStreamTiming(count) => {
                    let t_sec = count / effective_rate.max(1);
                    let t_msec = (count * 1000 / effective_rate.max(1)) % 1000;
                    println!("stream time {}.{:03} s ({} samples)", t_sec, t_msec, count);
                }
                Message::ReportState { state, message } => match message {
                    Some(message) => println!("engine reported {}: {}", state, message),
                    None => println!("engine reported {}", state),
                },
                Message::ConfigureSink(_) | Message::RequestStreamTiming => {}
            }
        }
    }

    engine.stop_generation();
    println!("stopped");
    Ok(())
}

fn print_usage() {
    eprintln!(
        "Usage: pulse-sdr-sink-cli [--sink wav|udp|audio] [--out iq.wav] [--host h --port p] \
         [--device name] [--freq hz] [--rate hz] [--interp n] [--tone hz] [--level x] \
         [--wav-in file.wav] [--loop-in] [--duration secs] [--settings file] \
         [--save-settings file] [--list-devices]"
    );
}
