//! Outbound INDI message serialization

use crate::error::{IndiError, IndiResult};
use crate::property::{BlobMode, BlobVector, PropertyVector};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use quick_xml::escape::escape;
use std::collections::HashMap;
use std::fmt::Write as _;

fn open_new_vector(out: &mut String, vector: &PropertyVector) {
    let _ = writeln!(
        out,
        "<new{} device=\"{}\" name=\"{}\">",
        vector.property_type().vector_tag(),
        escape(vector.device()),
        escape(vector.name())
    );
}

fn close_new_vector(out: &mut String, vector: &PropertyVector) {
    let _ = write!(out, "</new{}>", vector.property_type().vector_tag());
}

fn one_element(out: &mut String, vector: &PropertyVector, element: &str) -> IndiResult<()> {
    let tag = vector.property_type().one_element_tag();
    let value = vector.element_value(element)?;
    let _ = writeln!(
        out,
        "  <{tag} name=\"{}\">{}</{tag}>",
        escape(element),
        escape(&value)
    );
    Ok(())
}

/// `new*Vector` carrying every element of `vector` with its current value.
/// BLOB vectors are framed with their encoded payloads.
pub fn new_vector_xml(vector: &PropertyVector) -> IndiResult<String> {
    if let PropertyVector::Blob(blob) = vector {
        return Ok(blob_xml(blob));
    }
    let mut out = String::new();
    open_new_vector(&mut out, vector);
    for name in vector.element_names() {
        one_element(&mut out, vector, name)?;
    }
    close_new_vector(&mut out, vector);
    Ok(out)
}

/// `new*Vector` carrying a single element
pub fn new_element_xml(vector: &PropertyVector, element: &str) -> IndiResult<String> {
    if !vector.has_element(element) {
        return Err(IndiError::ElementNotFound {
            device: vector.device().to_string(),
            property: vector.name().to_string(),
            element: element.to_string(),
        });
    }
    if let PropertyVector::Blob(blob) = vector {
        let mut single = BlobVector::new(blob.header.clone());
        if let Some(b) = blob.find(element) {
            single.elements.insert(element.to_string(), b.clone());
        }
        return Ok(blob_xml(&single));
    }
    let mut out = String::new();
    open_new_vector(&mut out, vector);
    one_element(&mut out, vector, element)?;
    close_new_vector(&mut out, vector);
    Ok(out)
}

/// `newBLOBVector` with one base64 encoded `oneBLOB` per element
pub fn blob_xml(vector: &BlobVector) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<newBLOBVector device=\"{}\" name=\"{}\" timestamp=\"{}\">",
        escape(&vector.header.device),
        escape(&vector.header.name),
        timestamp
    );
    for blob in vector.elements.values() {
        let encoded = BASE64.encode(&blob.data);
        let _ = writeln!(
            out,
            "  <oneBLOB name=\"{}\" size=\"{}\" enclen=\"{}\" format=\"{}\">",
            escape(&blob.name),
            blob.data.len(),
            encoded.len(),
            escape(&blob.format)
        );
        out.push_str(&encoded);
        out.push_str("\n  </oneBLOB>\n");
    }
    out.push_str("</newBLOBVector>");
    out
}

/// `enableBLOB` for a device, or one property of it
pub fn enable_blob_xml(mode: BlobMode, device: &str, property: Option<&str>) -> String {
    match property {
        Some(property) => format!(
            "<enableBLOB device=\"{}\" name=\"{}\">{}</enableBLOB>",
            escape(device),
            escape(property),
            mode.as_str()
        ),
        None => format!(
            "<enableBLOB device=\"{}\">{}</enableBLOB>",
            escape(device),
            mode.as_str()
        ),
    }
}

/// `getProperties` handshake, optionally scoped to a device or property
pub fn get_properties_xml(version: &str, device: Option<&str>, property: Option<&str>) -> String {
    let mut out = format!("<getProperties version=\"{}\"", escape(version));
    if let Some(device) = device {
        let _ = write!(out, " device=\"{}\"", escape(device));
        if let Some(property) = property {
            let _ = write!(out, " name=\"{}\"", escape(property));
        }
    }
    out.push_str("/>");
    out
}

/// BLOB handling overrides keyed by device and optional property
#[derive(Debug, Default, Clone)]
pub struct BlobModes {
    modes: HashMap<(String, Option<String>), BlobMode>,
}

impl BlobModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most specific stored override: property first, then device-wide
    fn find(&self, device: &str, property: Option<&str>) -> Option<BlobMode> {
        if let Some(property) = property {
            let key = (device.to_string(), Some(property.to_string()));
            if let Some(mode) = self.modes.get(&key) {
                return Some(*mode);
            }
        }
        self.modes.get(&(device.to_string(), None)).copied()
    }

    /// Effective mode, `Also` when nothing is stored
    pub fn get(&self, device: &str, property: Option<&str>) -> BlobMode {
        let property = property.filter(|p| !p.is_empty());
        self.find(device, property).unwrap_or_default()
    }

    /// Store `mode` and return the `enableBLOB` command to send, or `None`
    /// when it matches the current override.
    pub fn set(&mut self, mode: BlobMode, device: &str, property: Option<&str>) -> Option<String> {
        if device.is_empty() {
            return None;
        }
        let property = property.filter(|p| !p.is_empty());
        if self.find(device, property) == Some(mode) {
            return None;
        }
        self.modes
            .insert((device.to_string(), property.map(str::to_string)), mode);
        Some(enable_blob_xml(mode, device, property))
    }

    pub fn clear(&mut self) {
        self.modes.clear();
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{
        BlobElement, IndiPermission, IndiPropertyState, NumberElement, NumberVector,
        SwitchElement, SwitchRule, SwitchState, SwitchVector, TextElement, TextVector,
        VectorHeader,
    };
    use crate::xml::XmlElement;

    fn header(device: &str, name: &str) -> VectorHeader {
        VectorHeader {
            device: device.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            group: "Main Control".to_string(),
            perm: IndiPermission::ReadWrite,
            timeout: Some(60.0),
            state: IndiPropertyState::Idle,
            timestamp: None,
        }
    }

    fn coord() -> PropertyVector {
        let mut v = NumberVector::new(header("Telescope", "EQUATORIAL_EOD_COORD"));
        for (name, value) in [("RA", 12.5), ("DEC", -45.25)] {
            v.elements.insert(
                name.to_string(),
                NumberElement {
                    name: name.to_string(),
                    label: name.to_string(),
                    format: "%10.6m".to_string(),
                    min: -90.0,
                    max: 90.0,
                    step: 0.0,
                    value,
                },
            );
        }
        PropertyVector::Number(v)
    }

    #[test]
    fn test_new_number_vector() {
        let xml = new_vector_xml(&coord()).unwrap();
        let e = XmlElement::parse(xml.as_bytes()).unwrap();
        assert_eq!(e.tag, "newNumberVector");
        assert_eq!(e.attr("device"), Some("Telescope"));
        assert_eq!(e.attr("name"), Some("EQUATORIAL_EOD_COORD"));
        let values: Vec<(&str, &str)> = e
            .children_named("oneNumber")
            .map(|c| (c.attr("name").unwrap(), c.text.as_str()))
            .collect();
        assert_eq!(values, vec![("RA", "12:30:00"), ("DEC", "-45:15:00")]);
    }

    #[test]
    fn test_new_single_element() {
        let xml = new_element_xml(&coord(), "DEC").unwrap();
        let e = XmlElement::parse(xml.as_bytes()).unwrap();
        assert_eq!(e.children.len(), 1);
        assert_eq!(e.children[0].attr("name"), Some("DEC"));

        let err = new_element_xml(&coord(), "ALT").unwrap_err();
        assert!(matches!(err, IndiError::ElementNotFound { .. }));
    }

    #[test]
    fn test_new_switch_and_text_vectors_escape() {
        let mut sw = SwitchVector::new(header("CCD Simulator", "CONNECTION"), SwitchRule::OneOfMany);
        for (name, state) in [("CONNECT", SwitchState::On), ("DISCONNECT", SwitchState::Off)] {
            sw.elements.insert(
                name.to_string(),
                SwitchElement {
                    name: name.to_string(),
                    label: name.to_string(),
                    state,
                },
            );
        }
        let xml = new_vector_xml(&PropertyVector::Switch(sw)).unwrap();
        assert!(xml.starts_with("<newSwitchVector device=\"CCD Simulator\" name=\"CONNECTION\">"));
        assert!(xml.contains("<oneSwitch name=\"CONNECT\">On</oneSwitch>"));
        assert!(xml.contains("<oneSwitch name=\"DISCONNECT\">Off</oneSwitch>"));
        assert!(xml.ends_with("</newSwitchVector>"));

        let mut text = TextVector::new(header("Focuser", "DEVICE_PORT"));
        text.elements.insert(
            "PORT".to_string(),
            TextElement {
                name: "PORT".to_string(),
                label: "Port".to_string(),
                text: "<usb & \"serial\">".to_string(),
            },
        );
        let xml = new_vector_xml(&PropertyVector::Text(text)).unwrap();
        let e = XmlElement::parse(xml.as_bytes()).unwrap();
        assert_eq!(e.children[0].text, "<usb & \"serial\">");
    }

    #[test]
    fn test_blob_framing() {
        let mut v = BlobVector::new(header("CCD Simulator", "CCD1"));
        v.elements.insert(
            "CCD1".to_string(),
            BlobElement {
                name: "CCD1".to_string(),
                label: "Image".to_string(),
                format: ".fits".to_string(),
                data: b"hello world".to_vec(),
                ..Default::default()
            },
        );
        let xml = blob_xml(&v);
        let e = XmlElement::parse(xml.as_bytes()).unwrap();
        assert_eq!(e.tag, "newBLOBVector");
        assert!(e.attr("timestamp").is_some());
        let one = &e.children[0];
        assert_eq!(one.tag, "oneBLOB");
        assert_eq!(one.attr("size"), Some("11"));
        assert_eq!(one.attr("enclen"), Some("16"));
        assert_eq!(one.attr("format"), Some(".fits"));
        assert_eq!(one.text.trim(), "aGVsbG8gd29ybGQ=");

        assert_eq!(new_vector_xml(&PropertyVector::Blob(v.clone())).unwrap().len(), xml.len());
    }

    #[test]
    fn test_enable_blob_and_get_properties() {
        assert_eq!(
            enable_blob_xml(BlobMode::Only, "CCD Simulator", Some("CCD1")),
            "<enableBLOB device=\"CCD Simulator\" name=\"CCD1\">Only</enableBLOB>"
        );
        assert_eq!(
            enable_blob_xml(BlobMode::Never, "CCD Simulator", None),
            "<enableBLOB device=\"CCD Simulator\">Never</enableBLOB>"
        );
        assert_eq!(
            get_properties_xml("1.7", None, None),
            "<getProperties version=\"1.7\"/>"
        );
        assert_eq!(
            get_properties_xml("1.7", Some("Telescope"), None),
            "<getProperties version=\"1.7\" device=\"Telescope\"/>"
        );
    }

    #[test]
    fn test_blob_mode_lookup() {
        let mut modes = BlobModes::new();
        assert_eq!(modes.get("CCD Simulator", Some("CCD1")), BlobMode::Also);

        assert!(modes.set(BlobMode::Only, "CCD Simulator", Some("CCD1")).is_some());
        assert_eq!(modes.get("CCD Simulator", Some("CCD1")), BlobMode::Only);
        assert_eq!(modes.get("CCD Simulator", Some("CCD2")), BlobMode::Also);
        assert_eq!(modes.get("CCD Simulator", None), BlobMode::Also);

        assert!(modes.set(BlobMode::Never, "CCD Simulator", None).is_some());
        assert_eq!(modes.get("CCD Simulator", Some("CCD2")), BlobMode::Never);
        assert_eq!(modes.get("CCD Simulator", Some("CCD1")), BlobMode::Only);
    }

    #[test]
    fn test_blob_mode_set_is_idempotent() {
        let mut modes = BlobModes::new();
        let first = modes.set(BlobMode::Only, "CCD Simulator", Some("CCD1"));
        assert_eq!(
            first.as_deref(),
            Some("<enableBLOB device=\"CCD Simulator\" name=\"CCD1\">Only</enableBLOB>")
        );
        assert_eq!(modes.set(BlobMode::Only, "CCD Simulator", Some("CCD1")), None);
        assert_eq!(modes.len(), 1);

        // a device-wide override already covering the property is not resent
        modes.set(BlobMode::Never, "Guider", None);
        assert_eq!(modes.set(BlobMode::Never, "Guider", Some("CCD1")), None);
        assert!(modes.set(BlobMode::Also, "", None).is_none());
    }

    #[test]
    fn test_composite_key_has_no_collisions() {
        let mut modes = BlobModes::new();
        modes.set(BlobMode::Only, "CCD", Some("1CCD"));
        modes.set(BlobMode::Never, "CCD1", Some("CCD"));
        assert_eq!(modes.get("CCD", Some("1CCD")), BlobMode::Only);
        assert_eq!(modes.get("CCD1", Some("CCD")), BlobMode::Never);
        assert_eq!(modes.get("CCD1", None), BlobMode::Also);
    }
}
