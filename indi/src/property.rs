//! INDI property data model
//!
//! Devices own property vectors, vectors own their elements. Each vector
//! variant is its own struct; [`PropertyVector`] unifies them. A vector's
//! element set is fixed when it is defined.

use crate::error::{IndiError, IndiResult};
use crate::protocol::standard_properties::{DRIVER_INFO, DRIVER_INTERFACE};
use crate::sexagesimal::number_format;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// INDI property state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndiPropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl IndiPropertyState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Idle" => Some(Self::Idle),
            "Ok" => Some(Self::Ok),
            "Busy" => Some(Self::Busy),
            "Alert" => Some(Self::Alert),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ok => "Ok",
            Self::Busy => "Busy",
            Self::Alert => "Alert",
        }
    }
}

/// INDI property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndiPermission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl IndiPermission {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ro" => Some(Self::ReadOnly),
            "wo" => Some(Self::WriteOnly),
            "rw" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::WriteOnly => "wo",
            Self::ReadWrite => "rw",
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Selection rule for switch vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SwitchRule {
    #[default]
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OneOfMany" => Some(Self::OneOfMany),
            "AtMostOne" => Some(Self::AtMostOne),
            "AnyOfMany" => Some(Self::AnyOfMany),
            _ => None,
        }
    }
}

/// Switch element state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SwitchState {
    #[default]
    Off,
    On,
}

impl SwitchState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "On" => Some(Self::On),
            "Off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "On",
            Self::Off => "Off",
        }
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Per device/property BLOB delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlobMode {
    /// No BLOBs on this connection
    Never,
    /// BLOBs intermixed with other traffic
    #[default]
    Also,
    /// BLOBs only
    Only,
}

impl BlobMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Never" => Some(Self::Never),
            "Also" => Some(Self::Also),
            "Only" => Some(Self::Only),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::Also => "Also",
            Self::Only => "Only",
        }
    }
}

/// INDI property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndiPropertyType {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl IndiPropertyType {
    /// Tag fragment shared by `def*Vector`, `set*Vector` and `new*Vector`
    pub fn vector_tag(&self) -> &'static str {
        match self {
            Self::Text => "TextVector",
            Self::Number => "NumberVector",
            Self::Switch => "SwitchVector",
            Self::Light => "LightVector",
            Self::Blob => "BLOBVector",
        }
    }

    /// Tag of a member inside a `def*Vector`
    pub fn def_element_tag(&self) -> &'static str {
        match self {
            Self::Text => "defText",
            Self::Number => "defNumber",
            Self::Switch => "defSwitch",
            Self::Light => "defLight",
            Self::Blob => "defBLOB",
        }
    }

    /// Tag of a member inside a `set*Vector` or `new*Vector`
    pub fn one_element_tag(&self) -> &'static str {
        match self {
            Self::Text => "oneText",
            Self::Number => "oneNumber",
            Self::Switch => "oneSwitch",
            Self::Light => "oneLight",
            Self::Blob => "oneBLOB",
        }
    }

    pub fn from_vector_tag(tag: &str) -> Option<Self> {
        match tag {
            "TextVector" => Some(Self::Text),
            "NumberVector" => Some(Self::Number),
            "SwitchVector" => Some(Self::Switch),
            "LightVector" => Some(Self::Light),
            "BLOBVector" => Some(Self::Blob),
            _ => None,
        }
    }
}

/// Driver interface bits published in `DRIVER_INFO.DRIVER_INTERFACE`
pub mod driver_interface {
    pub const GENERAL: u32 = 0;
    pub const TELESCOPE: u32 = 1 << 0;
    pub const CCD: u32 = 1 << 1;
    pub const GUIDER: u32 = 1 << 2;
    pub const FOCUSER: u32 = 1 << 3;
    pub const FILTER: u32 = 1 << 4;
    pub const DOME: u32 = 1 << 5;
    pub const GPS: u32 = 1 << 6;
    pub const WEATHER: u32 = 1 << 7;
    pub const AO: u32 = 1 << 8;
    pub const DUSTCAP: u32 = 1 << 9;
    pub const LIGHTBOX: u32 = 1 << 10;
    pub const DETECTOR: u32 = 1 << 11;
    pub const AUX: u32 = 1 << 15;
    pub const ALL: u32 = 0xFFFF;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextElement {
    pub name: String,
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberElement {
    pub name: String,
    pub label: String,
    /// printf-style format, `m` conversion for sexagesimal
    pub format: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
}

impl NumberElement {
    /// Value rendered through the element's format string
    pub fn formatted(&self) -> IndiResult<String> {
        number_format(&self.format, self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchElement {
    pub name: String,
    pub label: String,
    pub state: SwitchState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightElement {
    pub name: String,
    pub label: String,
    pub state: IndiPropertyState,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobElement {
    pub name: String,
    pub label: String,
    /// File-extension-like tag such as `.fits` or `.fits.z`
    pub format: String,
    pub data: Vec<u8>,
    /// Payload length after base64 decoding, before any inflation
    pub bloblen: usize,
    /// Size announced by the server, or the inflated length of `.z` data
    pub size: usize,
}

impl BlobElement {
    /// True when the format marks a payload sent zlib-compressed. Received
    /// data is already inflated; `bloblen` keeps the compressed length.
    pub fn is_compressed(&self) -> bool {
        self.format.ends_with(".z")
    }
}

/// Attributes shared by every vector variant
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHeader {
    /// Owning device, by name
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub perm: IndiPermission,
    pub timeout: Option<f64>,
    pub state: IndiPropertyState,
    pub timestamp: Option<String>,
}

macro_rules! vector_struct {
    ($name:ident, $element:ty) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub header: VectorHeader,
            pub elements: IndexMap<String, $element>,
        }

        impl $name {
            pub fn new(header: VectorHeader) -> Self {
                Self {
                    header,
                    elements: IndexMap::new(),
                }
            }

            pub fn find(&self, name: &str) -> Option<&$element> {
                self.elements.get(name)
            }

            pub fn find_mut(&mut self, name: &str) -> Option<&mut $element> {
                self.elements.get_mut(name)
            }
        }
    };
}

vector_struct!(TextVector, TextElement);
vector_struct!(NumberVector, NumberElement);
vector_struct!(LightVector, LightElement);
vector_struct!(BlobVector, BlobElement);

/// Switch vector; `rule` governs how many members may be On
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchVector {
    pub header: VectorHeader,
    pub rule: SwitchRule,
    pub elements: IndexMap<String, SwitchElement>,
}

impl SwitchVector {
    pub fn new(header: VectorHeader, rule: SwitchRule) -> Self {
        Self {
            header,
            rule,
            elements: IndexMap::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&SwitchElement> {
        self.elements.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut SwitchElement> {
        self.elements.get_mut(name)
    }

    /// First member that is On
    pub fn find_on_switch(&self) -> Option<&SwitchElement> {
        self.elements.values().find(|s| s.state == SwitchState::On)
    }

    /// Position of the first member that is On, -1 if none
    pub fn find_on_switch_index(&self) -> i32 {
        self.elements
            .values()
            .position(|s| s.state == SwitchState::On)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    /// Turn every member Off
    pub fn reset(&mut self) {
        for s in self.elements.values_mut() {
            s.state = SwitchState::Off;
        }
    }
}

/// A property vector of any variant
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyVector {
    Text(TextVector),
    Number(NumberVector),
    Switch(SwitchVector),
    Light(LightVector),
    Blob(BlobVector),
}

impl PropertyVector {
    pub fn header(&self) -> &VectorHeader {
        match self {
            Self::Text(v) => &v.header,
            Self::Number(v) => &v.header,
            Self::Switch(v) => &v.header,
            Self::Light(v) => &v.header,
            Self::Blob(v) => &v.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut VectorHeader {
        match self {
            Self::Text(v) => &mut v.header,
            Self::Number(v) => &mut v.header,
            Self::Switch(v) => &mut v.header,
            Self::Light(v) => &mut v.header,
            Self::Blob(v) => &mut v.header,
        }
    }

    pub fn property_type(&self) -> IndiPropertyType {
        match self {
            Self::Text(_) => IndiPropertyType::Text,
            Self::Number(_) => IndiPropertyType::Number,
            Self::Switch(_) => IndiPropertyType::Switch,
            Self::Light(_) => IndiPropertyType::Light,
            Self::Blob(_) => IndiPropertyType::Blob,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn device(&self) -> &str {
        &self.header().device
    }

    pub fn state(&self) -> IndiPropertyState {
        self.header().state
    }

    pub fn permission(&self) -> IndiPermission {
        self.header().perm
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(v) => v.elements.len(),
            Self::Number(v) => v.elements.len(),
            Self::Switch(v) => v.elements.len(),
            Self::Light(v) => v.elements.len(),
            Self::Blob(v) => v.elements.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element names in definition order
    pub fn element_names(&self) -> Vec<&str> {
        match self {
            Self::Text(v) => v.elements.keys().map(String::as_str).collect(),
            Self::Number(v) => v.elements.keys().map(String::as_str).collect(),
            Self::Switch(v) => v.elements.keys().map(String::as_str).collect(),
            Self::Light(v) => v.elements.keys().map(String::as_str).collect(),
            Self::Blob(v) => v.elements.keys().map(String::as_str).collect(),
        }
    }

    pub fn has_element(&self, name: &str) -> bool {
        match self {
            Self::Text(v) => v.elements.contains_key(name),
            Self::Number(v) => v.elements.contains_key(name),
            Self::Switch(v) => v.elements.contains_key(name),
            Self::Light(v) => v.elements.contains_key(name),
            Self::Blob(v) => v.elements.contains_key(name),
        }
    }

    /// Wire text of one element's value, numbers through their format
    pub fn element_value(&self, name: &str) -> IndiResult<String> {
        let missing = || IndiError::ElementNotFound {
            device: self.device().to_string(),
            property: self.name().to_string(),
            element: name.to_string(),
        };
        match self {
            Self::Text(v) => v.find(name).map(|e| e.text.clone()).ok_or_else(missing),
            Self::Number(v) => v.find(name).ok_or_else(missing)?.formatted(),
            Self::Switch(v) => v
                .find(name)
                .map(|e| e.state.as_str().to_string())
                .ok_or_else(missing),
            Self::Light(v) => v
                .find(name)
                .map(|e| e.state.as_str().to_string())
                .ok_or_else(missing),
            Self::Blob(v) => v
                .find(name)
                .map(|e| e.format.clone())
                .ok_or_else(missing),
        }
    }

    pub fn as_text(&self) -> Option<&TextVector> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&NumberVector> {
        match self {
            Self::Number(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<&SwitchVector> {
        match self {
            Self::Switch(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<&LightVector> {
        match self {
            Self::Light(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobVector> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextVector> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_number_mut(&mut self) -> Option<&mut NumberVector> {
        match self {
            Self::Number(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_switch_mut(&mut self) -> Option<&mut SwitchVector> {
        match self {
            Self::Switch(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob_mut(&mut self) -> Option<&mut BlobVector> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}: {}, device: {}>",
            self.property_type().vector_tag(),
            self.name(),
            self.device()
        )
    }
}

/// An INDI device and its properties
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    properties: IndexMap<String, PropertyVector>,
    messages: Vec<String>,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: IndexMap::new(),
            messages: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyVector> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyVector> {
        self.properties.get_mut(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyVector> {
        self.properties.values()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn number(&self, name: &str) -> Option<&NumberVector> {
        self.property(name).and_then(PropertyVector::as_number)
    }

    pub fn text(&self, name: &str) -> Option<&TextVector> {
        self.property(name).and_then(PropertyVector::as_text)
    }

    pub fn switch(&self, name: &str) -> Option<&SwitchVector> {
        self.property(name).and_then(PropertyVector::as_switch)
    }

    pub fn light(&self, name: &str) -> Option<&LightVector> {
        self.property(name).and_then(PropertyVector::as_light)
    }

    pub fn blob(&self, name: &str) -> Option<&BlobVector> {
        self.property(name).and_then(PropertyVector::as_blob)
    }

    /// State of a property, Idle when unknown
    pub fn property_state(&self, name: &str) -> IndiPropertyState {
        self.property(name)
            .map(PropertyVector::state)
            .unwrap_or_default()
    }

    /// Permission of a property, read-only when unknown
    pub fn property_permission(&self, name: &str) -> IndiPermission {
        self.property(name)
            .map(PropertyVector::permission)
            .unwrap_or(IndiPermission::ReadOnly)
    }

    pub(crate) fn insert_property(&mut self, vector: PropertyVector) -> IndiResult<()> {
        let name = vector.name().to_string();
        if self.properties.contains_key(&name) {
            return Err(IndiError::PropertyDuplicated {
                device: self.name.clone(),
                property: name,
            });
        }
        self.properties.insert(name, vector);
        Ok(())
    }

    pub(crate) fn remove_property(&mut self, name: &str) -> IndiResult<PropertyVector> {
        self.properties
            .shift_remove(name)
            .ok_or_else(|| IndiError::property_invalid(&self.name, name))
    }

    /// Driver interface bitmask from `DRIVER_INFO`, if published
    pub fn driver_interface(&self) -> Option<u32> {
        self.text(DRIVER_INFO)?
            .find(DRIVER_INTERFACE)?
            .text
            .trim()
            .parse()
            .ok()
    }

    pub(crate) fn push_message(&mut self, entry: String) -> usize {
        self.messages.push(entry);
        self.messages.len() - 1
    }

    /// Logged message by index; negative indices count from the end.
    /// Out-of-range indices give an empty string.
    pub fn message_queue(&self, index: isize) -> &str {
        let len = self.messages.len() as isize;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return "";
        }
        &self.messages[idx as usize]
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}
