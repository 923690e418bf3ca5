//! INDI XML Protocol definitions

/// INDI protocol version
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Default INDI server port
pub const INDI_DEFAULT_PORT: u16 = 7624;

/// Default connect timeout in milliseconds
pub const INDI_CONNECTION_TIMEOUT_MS: u64 = 2000;

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Driver description text vector
    pub const DRIVER_INFO: &str = "DRIVER_INFO";
    pub const DRIVER_INTERFACE: &str = "DRIVER_INTERFACE";
}
