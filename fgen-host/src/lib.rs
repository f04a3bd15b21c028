//! Drive a bench function generator over a VISA style instrument bus and
//! play melodies on it.
//!
//! A resource string becomes a [`Device`](resource::Device), a device is
//! opened into an [`InstrumentConnection`](connection::InstrumentConnection),
//! and a [`FunctionGenerator`](generator::FunctionGenerator) takes that
//! connection over to configure the instrument and play tones.

pub mod config;
pub mod connection;
pub mod error;
pub mod generator;
pub mod io;
pub mod melody;
pub mod midi;
pub mod resource;
pub mod sim;
pub mod transport;

pub use fgen_proto::{GeneratorSettings, ScpiCommand};
