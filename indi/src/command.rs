//! Top-level INDI message kinds
//!
//! Every complete element read from the server is classified into a
//! [`Command`] before it touches the device registry. The set is closed:
//! a tag that is not part of the protocol is rejected here.

use crate::error::{IndiError, IndiResult};
use crate::property::IndiPropertyType;
use crate::xml::XmlElement;

/// A classified inbound message, borrowing the element it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command<'a> {
    /// `def*Vector`: define a new property
    Define(IndiPropertyType, &'a XmlElement),
    /// `set*Vector`: update an existing property
    Set(IndiPropertyType, &'a XmlElement),
    /// `delProperty`: remove a property or a whole device
    Delete(&'a XmlElement),
    /// `message`: device or server notice
    Message(&'a XmlElement),
    /// Client-to-server shapes (`getProperties`, `new*Vector`, `enableBLOB`)
    Outbound(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(element: &'a XmlElement) -> IndiResult<Self> {
        let tag = element.tag.as_str();
        match tag {
            "message" => return Ok(Command::Message(element)),
            "delProperty" => return Ok(Command::Delete(element)),
            "getProperties" | "enableBLOB" => return Ok(Command::Outbound(tag)),
            _ => {}
        }

        if let Some(kind) = tag.strip_prefix("def").and_then(IndiPropertyType::from_vector_tag) {
            return Ok(Command::Define(kind, element));
        }
        if let Some(kind) = tag.strip_prefix("set").and_then(IndiPropertyType::from_vector_tag) {
            return Ok(Command::Set(kind, element));
        }
        if tag.starts_with("new") {
            return Ok(Command::Outbound(tag));
        }

        Err(IndiError::DispatchError(format!("unknown tag <{}>", tag)))
    }

    /// Device attribute of the message, if any
    pub fn device(&self) -> Option<&'a str> {
        match *self {
            Command::Define(_, e) | Command::Set(_, e) | Command::Delete(e) | Command::Message(e) => {
                e.attr_nonempty("device")
            }
            Command::Outbound(_) => None,
        }
    }
}
