use std::fmt;

#[derive(Debug)]
pub enum WatermarkError {
    CapabilityMissing(String),
    Drawing(String),
    Encoding(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl WatermarkError {
    /// Stable short name used on the worker wire and in trace events.
    pub fn kind(&self) -> &'static str {
        match self {
            WatermarkError::CapabilityMissing(_) => "capability",
            WatermarkError::Drawing(_) => "drawing",
            WatermarkError::Encoding(_) => "encoding",
            WatermarkError::InvalidConfiguration(_) => "configuration",
            WatermarkError::Io(_) => "io",
        }
    }
}

impl fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkError::CapabilityMissing(message) => {
                write!(f, "capability missing: {}", message)
            }
            WatermarkError::Drawing(message) => write!(f, "drawing failed: {}", message),
            WatermarkError::Encoding(message) => write!(f, "encoding failed: {}", message),
            WatermarkError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            WatermarkError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for WatermarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatermarkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WatermarkError {
    fn from(value: std::io::Error) -> Self {
        WatermarkError::Io(value)
    }
}
