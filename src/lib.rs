//! Device sink streaming engine for a software-defined-radio transmit path.
//!
//! A `DeviceSinkEngine` owns the live sample pipeline (baseband source,
//! interpolation stage, sink collaborator) on its own thread. Controllers
//! push `ConfigureSink` and `RequestStreamTiming` messages into the input
//! queue and drain stream-timing and state reports from the output queue;
//! start/stop and status reads are synchronous.

pub mod audio_sink;
pub mod engine;
pub mod interp;
pub mod message;
pub mod sample;
pub mod settings;
pub mod sink;
pub mod source;
pub mod udp_sink;
