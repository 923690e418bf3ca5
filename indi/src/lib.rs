//! INDI Protocol Client
//!
//! Implements the client side of the INDI instrument-control protocol used
//! by astronomical device drivers.
//!
//! ## Features
//!
//! - Incremental XML stream parsing that survives arbitrary read boundaries
//! - Typed device/property model (text, number, switch, light, BLOB vectors)
//! - Sexagesimal number formatting and parsing
//! - Outbound property updates and base64 BLOB uploads
//! - Per-device and per-property BLOB handling modes
//! - Mediator hooks and a broadcast event stream for device lifecycle events
//! - Robust error handling with IndiError types

mod client;
mod command;
mod config;
mod connection;
mod dispatch;
mod encoder;
mod error;
mod mediator;
mod property;
mod protocol;
mod sexagesimal;
mod xml;

pub use client::IndiClient;
pub use command::Command;
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionEvent, IndiSender};
pub use dispatch::Dispatcher;
pub use encoder::{
    blob_xml, enable_blob_xml, get_properties_xml, new_element_xml, new_vector_xml, BlobModes,
};
pub use error::{IndiError, IndiResult};
pub use mediator::{EventMediator, IndiEvent, LogMediator, Mediator};
pub use property::{
    driver_interface, BlobElement, BlobMode, BlobVector, Device, IndiPermission,
    IndiPropertyState, IndiPropertyType, LightElement, LightVector, NumberElement, NumberVector,
    PropertyVector, SwitchElement, SwitchRule, SwitchState, SwitchVector, TextElement,
    TextVector, VectorHeader,
};
pub use protocol::{
    standard_properties, INDI_CONNECTION_TIMEOUT_MS, INDI_DEFAULT_PORT, INDI_PROTOCOL_VERSION,
};
pub use sexagesimal::{fs_sexa, number_format, scan_sexa};
pub use xml::{StreamParser, XmlElement};
