//! INDI error types
//!
//! Provides structured error types for INDI operations.

use std::time::Duration;

/// INDI client errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndiError {
    /// Message addressed a device that is not in the registry
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Property name empty, unknown, or its definition malformed
    #[error("Invalid property: {device}.{property}")]
    PropertyInvalid { device: String, property: String },
    /// Definition for a property that already exists
    #[error("Duplicated property: {device}.{property}")]
    PropertyDuplicated { device: String, property: String },
    /// Malformed or unroutable top-level element
    #[error("Dispatch error: {0}")]
    DispatchError(String),
    /// Unsupported number format or sexagesimal base
    #[error("Invalid number format: {0}")]
    InvalidFormat(String),
    /// Element name not present in the vector
    #[error("Element not found: {device}.{property}.{element}")]
    ElementNotFound {
        device: String,
        property: String,
        element: String,
    },
    /// Attempted to write to a read-only property
    #[error("Permission denied: {device}.{property} is read-only")]
    PermissionDenied { device: String, property: String },
    /// XML parse error
    #[error("XML parse error: {0}")]
    ParseError(String),
    /// Connection to INDI server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Connection timeout with context
    #[error("Connection timeout: failed to connect to {host}:{port} after {duration:?}")]
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },
    /// Socket error on an established connection
    #[error("I/O error: {0}")]
    Io(String),
    /// Send channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    /// Not connected to server
    #[error("Not connected to INDI server")]
    NotConnected,
}

impl IndiError {
    pub(crate) fn property_invalid(device: &str, property: &str) -> Self {
        IndiError::PropertyInvalid {
            device: device.to_string(),
            property: property.to_string(),
        }
    }
}

impl From<std::io::Error> for IndiError {
    fn from(err: std::io::Error) -> Self {
        IndiError::Io(err.to_string())
    }
}

impl From<IndiError> for String {
    fn from(err: IndiError) -> String {
        err.to_string()
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndiError::DeviceNotFound("CCD Simulator".to_string());
        assert_eq!(err.to_string(), "Device not found: CCD Simulator");

        let err = IndiError::property_invalid("Telescope", "EQUATORIAL_EOD_COORD");
        assert_eq!(
            err.to_string(),
            "Invalid property: Telescope.EQUATORIAL_EOD_COORD"
        );

        let err = IndiError::ElementNotFound {
            device: "Focuser".to_string(),
            property: "ABS_FOCUS_POSITION".to_string(),
            element: "FOCUS_ABSOLUTE_POSITION".to_string(),
        };
        assert!(err.to_string().contains("Focuser.ABS_FOCUS_POSITION"));
    }

    #[test]
    fn test_error_to_string_conversion() {
        let err = IndiError::NotConnected;
        let s: String = err.into();
        assert_eq!(s, "Not connected to INDI server");
    }

    #[test]
    fn test_connection_timeout_display() {
        let err = IndiError::ConnectionTimeout {
            host: "192.168.1.100".to_string(),
            port: 7624,
            duration: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("192.168.1.100"));
        assert!(msg.contains("7624"));
        assert!(msg.contains("2s"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: IndiError = io.into();
        assert!(matches!(err, IndiError::Io(ref m) if m.contains("reset by peer")));
    }
}
