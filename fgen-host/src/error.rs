#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("could not parse {field} `{value}` in resource `{resource}`")]
    Parse {
        resource: String,
        field: &'static str,
        value: String,
    },

    #[error("resource `{resource}` has no {field}")]
    MissingField {
        resource: String,
        field: &'static str,
    },

    #[error("resource `{resource}` has {tokens} `::` separated tokens, expected 5 or 6")]
    InvalidFormat { resource: String, tokens: usize },

    #[error("resource `{0}` is not a USB resource")]
    NotUsb(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[cfg(feature = "usbtmc")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("resource `{0}` was not found")]
    ResourceNotFound(String),

    #[error("resource `{0}` is not supported by this resource manager")]
    Unsupported(String),

    #[error("timed out waiting for a response from `{0}`")]
    Timeout(String),

    #[error("malformed response from `{resource}`: {reason}")]
    MalformedResponse { resource: String, reason: String },

    #[error("instrument error: {0}")]
    Instrument(String),
}

#[derive(thiserror::Error, Debug)]
#[error("device discovery failed: {0}")]
pub struct DiscoveryError(#[from] pub TransportError);

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("instrument is not connected")]
    NotConnected,

    #[error("the resource manager for `{0}` has already been released")]
    Released(String),

    #[error("device `{resource}` cannot be opened: {source}")]
    InvalidDevice {
        resource: String,
        #[source]
        source: ResourceError,
    },

    #[error("could not open `{resource}`: {source}")]
    Open {
        resource: String,
        #[source]
        source: TransportError,
    },

    #[error("communication with `{resource}` failed: {source}")]
    Communication {
        resource: String,
        #[source]
        source: TransportError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum GeneratorError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("instrument reported `{response}` after {expected} Hz was written")]
    FrequencyReadback { expected: u32, response: String },

    #[error("invalid tone duration {0}s")]
    InvalidDuration(f64),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MelodyError {
    #[error("expected `TOKEN:DURATION`, found `{0}`")]
    MissingSeparator(String),

    #[error("invalid duration `{0}`")]
    InvalidDuration(String),

    #[error("unknown note `{0}`")]
    UnknownNote(String),

    #[error("invalid octave in note `{0}`")]
    InvalidOctave(String),
}
