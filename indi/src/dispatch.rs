//! Applies inbound INDI messages to the device registry

use crate::command::Command;
use crate::error::{IndiError, IndiResult};
use crate::mediator::Mediator;
use crate::property::{
    BlobElement, BlobVector, Device, IndiPermission, IndiPropertyState, IndiPropertyType,
    LightElement, LightVector, NumberElement, NumberVector, PropertyVector, SwitchElement,
    SwitchRule, SwitchState, SwitchVector, TextElement, TextVector, VectorHeader,
};
use crate::sexagesimal::scan_sexa;
use crate::xml::XmlElement;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::ZlibDecoder;
use indexmap::IndexMap;
use std::io::Read;
use std::sync::Arc;

/// Device registry plus the routing of each top-level message
pub struct Dispatcher {
    devices: IndexMap<String, Device>,
    mediator: Arc<dyn Mediator>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(mediator: Arc<dyn Mediator>) -> Self {
        Self {
            devices: IndexMap::new(),
            mediator,
        }
    }

    pub fn mediator(&self) -> &Arc<dyn Mediator> {
        &self.mediator
    }

    pub fn set_mediator(&mut self, mediator: Arc<dyn Mediator>) {
        self.mediator = mediator;
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    /// Devices in the order they were first defined
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Forget every device, telling the mediator about each one
    pub fn clear(&mut self) {
        for (_, device) in self.devices.drain(..) {
            self.mediator.remove_device(&device);
        }
    }

    /// Route one complete top-level element
    pub fn dispatch(&mut self, element: &XmlElement) -> IndiResult<()> {
        match Command::parse(element)? {
            Command::Define(kind, e) => self.define(kind, e),
            Command::Set(kind, e) => self.update(kind, e),
            Command::Delete(e) => self.delete(e),
            Command::Message(e) => {
                self.message(e);
                Ok(())
            }
            Command::Outbound(tag) => {
                tracing::debug!("Ignoring client-side <{}> received from server", tag);
                Ok(())
            }
        }
    }

    fn define(&mut self, kind: IndiPropertyType, e: &XmlElement) -> IndiResult<()> {
        let device_name = required_device(e)?;
        let name = e.attr("name").unwrap_or_default();
        if name.is_empty() {
            tracing::error!("Empty property name in <{}> for {}", e.tag, device_name);
            return Err(IndiError::property_invalid(device_name, name));
        }
        if self
            .devices
            .get(device_name)
            .is_some_and(|d| d.has_property(name))
        {
            tracing::error!("Duplicated property {} in device {}", name, device_name);
            return Err(IndiError::PropertyDuplicated {
                device: device_name.to_string(),
                property: name.to_string(),
            });
        }

        let vector = build_vector(kind, device_name, name, e)?;

        let is_new = !self.devices.contains_key(device_name);
        let device = self
            .devices
            .entry(device_name.to_string())
            .or_insert_with(|| Device::new(device_name));
        if is_new {
            self.mediator.new_device(device);
        }
        device.insert_property(vector)?;
        if let Some(property) = device.property(name) {
            self.mediator.new_property(property);
        }
        Ok(())
    }

    fn update(&mut self, kind: IndiPropertyType, e: &XmlElement) -> IndiResult<()> {
        let device_name = required_device(e)?;
        let name = e.attr("name").unwrap_or_default();
        let mediator = self.mediator.as_ref();
        let device = self
            .devices
            .get_mut(device_name)
            .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
        if name.is_empty() || !device.has_property(name) {
            tracing::error!("No property {} in device {}", name, device_name);
            return Err(IndiError::property_invalid(device_name, name));
        }

        log_device_message(mediator, device, e);

        let vector = device
            .property_mut(name)
            .ok_or_else(|| IndiError::property_invalid(device_name, name))?;
        if vector.property_type() != kind {
            return Err(IndiError::DispatchError(format!(
                "<{}> does not match {} {}.{}",
                e.tag,
                vector.property_type().vector_tag(),
                device_name,
                name
            )));
        }

        update_header(vector.header_mut(), kind, e);
        let tag = kind.one_element_tag();
        match &mut *vector {
            PropertyVector::Text(v) => {
                for_each_member(&mut v.elements, e, tag, |text, m| {
                    text.text = m.text.trim().to_string();
                });
            }
            PropertyVector::Number(v) => {
                for_each_member(&mut v.elements, e, tag, update_number);
            }
            PropertyVector::Switch(v) => {
                for_each_member(&mut v.elements, e, tag, |switch, m| {
                    match SwitchState::parse(m.text.trim()) {
                        Some(state) => switch.state = state,
                        None => tracing::warn!("Bad switch state '{}' for {}", m.text, switch.name),
                    }
                });
            }
            PropertyVector::Light(v) => {
                for_each_member(&mut v.elements, e, tag, |light, m| {
                    match IndiPropertyState::parse(m.text.trim()) {
                        Some(state) => light.state = state,
                        None => tracing::warn!("Bad light state '{}' for {}", m.text, light.name),
                    }
                });
            }
            PropertyVector::Blob(v) => {
                let BlobVector { header, elements } = v;
                let header: &VectorHeader = header;
                for_each_member(elements, e, tag, |blob, m| {
                    update_blob(mediator, header, blob, m)
                });
            }
        }

        match &*vector {
            PropertyVector::Text(v) => mediator.new_text(v),
            PropertyVector::Number(v) => mediator.new_number(v),
            PropertyVector::Switch(v) => mediator.new_switch(v),
            PropertyVector::Light(v) => mediator.new_light(v),
            PropertyVector::Blob(_) => {}
        }
        Ok(())
    }

    fn delete(&mut self, e: &XmlElement) -> IndiResult<()> {
        let device_name = e.attr_nonempty("device").unwrap_or_default();
        let Some(device) = self.devices.get_mut(device_name) else {
            tracing::info!("delProperty: device '{}' not found", device_name);
            return Err(IndiError::DeviceNotFound(device_name.to_string()));
        };
        log_device_message(self.mediator.as_ref(), device, e);

        match e.attr("name") {
            Some(name) => {
                let removed = device.remove_property(name).map_err(|err| {
                    tracing::info!("Cannot delete property {}.{}", device_name, name);
                    err
                })?;
                self.mediator.remove_property(&removed);
                Ok(())
            }
            None => {
                let removed = self
                    .devices
                    .shift_remove(device_name)
                    .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
                tracing::info!("Deleting device {}", device_name);
                self.mediator.remove_device(&removed);
                Ok(())
            }
        }
    }

    fn message(&mut self, e: &XmlElement) {
        if let Some(device) = e
            .attr_nonempty("device")
            .and_then(|d| self.devices.get_mut(d))
        {
            log_device_message(self.mediator.as_ref(), device, e);
            return;
        }
        let Some(text) = e.attr_nonempty("message") else {
            return;
        };
        let entry = format!("{}: {}", timestamp_or_now(e), text);
        self.mediator.new_universal_message(&entry);
    }
}

fn required_device(e: &XmlElement) -> IndiResult<&str> {
    e.attr_nonempty("device")
        .ok_or_else(|| IndiError::DispatchError(format!("<{}> without device", e.tag)))
}

/// Server timestamp, or the local wall clock when the server sent none
fn timestamp_or_now(e: &XmlElement) -> String {
    e.attr_nonempty("timestamp")
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Append a `message` attribute to the device log
fn log_device_message(mediator: &dyn Mediator, device: &mut Device, e: &XmlElement) {
    let Some(text) = e.attr_nonempty("message") else {
        return;
    };
    let index = device.push_message(format!("{}: {}", timestamp_or_now(e), text));
    mediator.new_message(device, index);
}

fn member_name_label(m: &XmlElement) -> (String, String) {
    let name = m.attr("name").unwrap_or_default().to_string();
    let label = m.attr_nonempty("label").unwrap_or(&name).to_string();
    (name, label)
}

fn scan_attr(m: &XmlElement, attr: &str) -> Option<f64> {
    m.attr_nonempty(attr).and_then(|v| scan_sexa(v.trim()))
}

fn build_vector(
    kind: IndiPropertyType,
    device: &str,
    name: &str,
    e: &XmlElement,
) -> IndiResult<PropertyVector> {
    let perm = match kind {
        IndiPropertyType::Light => IndiPermission::ReadOnly,
        _ => e
            .attr("perm")
            .and_then(IndiPermission::parse)
            .ok_or_else(|| {
                tracing::error!("Bad perm {:?} for {}.{}", e.attr("perm"), device, name);
                IndiError::property_invalid(device, name)
            })?,
    };
    let state = e
        .attr("state")
        .and_then(IndiPropertyState::parse)
        .ok_or_else(|| {
            tracing::error!("Bad state {:?} for {}.{}", e.attr("state"), device, name);
            IndiError::property_invalid(device, name)
        })?;

    let header = VectorHeader {
        device: device.to_string(),
        name: name.to_string(),
        label: e.attr_nonempty("label").unwrap_or(name).to_string(),
        group: e.attr("group").unwrap_or_default().to_string(),
        perm,
        timeout: e.attr("timeout").and_then(|t| t.trim().parse().ok()),
        state,
        timestamp: e.attr_nonempty("timestamp").map(str::to_string),
    };

    let members: Vec<&XmlElement> = e
        .children_named(kind.def_element_tag())
        .filter(|m| {
            let named = m.attr_nonempty("name").is_some();
            if !named {
                tracing::warn!("Property {}.{} has a member without name", device, name);
            }
            named
        })
        .collect();

    let vector = match kind {
        IndiPropertyType::Text => {
            let mut v = TextVector::new(header);
            for m in members {
                let (name, label) = member_name_label(m);
                let text = m.text.trim().to_string();
                v.elements.insert(name.clone(), TextElement { name, label, text });
            }
            PropertyVector::Text(v)
        }
        IndiPropertyType::Number => {
            let mut v = NumberVector::new(header);
            for m in members {
                let (name, label) = member_name_label(m);
                let value = scan_sexa(m.text.trim()).unwrap_or_else(|| {
                    tracing::warn!("Unparsable value '{}' for number {}", m.text.trim(), name);
                    0.0
                });
                let element = NumberElement {
                    format: m.attr("format").map(str::trim).unwrap_or("%g").to_string(),
                    min: scan_attr(m, "min").unwrap_or(0.0),
                    max: scan_attr(m, "max").unwrap_or(0.0),
                    step: scan_attr(m, "step").unwrap_or(0.0),
                    value,
                    name: name.clone(),
                    label,
                };
                v.elements.insert(name, element);
            }
            PropertyVector::Number(v)
        }
        IndiPropertyType::Switch => {
            let rule = e
                .attr("rule")
                .and_then(SwitchRule::parse)
                .unwrap_or_default();
            let mut v = SwitchVector::new(header, rule);
            for m in members {
                let (name, label) = member_name_label(m);
                let state = SwitchState::parse(m.text.trim()).unwrap_or_default();
                v.elements
                    .insert(name.clone(), SwitchElement { name, label, state });
            }
            PropertyVector::Switch(v)
        }
        IndiPropertyType::Light => {
            let mut v = LightVector::new(header);
            for m in members {
                let (name, label) = member_name_label(m);
                let state = IndiPropertyState::parse(m.text.trim()).unwrap_or_default();
                v.elements
                    .insert(name.clone(), LightElement { name, label, state });
            }
            PropertyVector::Light(v)
        }
        IndiPropertyType::Blob => {
            let mut v = BlobVector::new(header);
            for m in members {
                let (name, label) = member_name_label(m);
                let element = BlobElement {
                    name: name.clone(),
                    label,
                    format: m.attr("format").unwrap_or_default().to_string(),
                    ..Default::default()
                };
                v.elements.insert(name, element);
            }
            PropertyVector::Blob(v)
        }
    };

    if vector.is_empty() {
        tracing::warn!("New property with no valid members: {}.{}", device, name);
        return Err(IndiError::property_invalid(device, name));
    }
    Ok(vector)
}

fn update_header(header: &mut VectorHeader, kind: IndiPropertyType, e: &XmlElement) {
    if let Some(state) = e.attr_nonempty("state") {
        match IndiPropertyState::parse(state) {
            Some(state) => header.state = state,
            None => tracing::warn!("Bad state '{}' for {}.{}", state, header.device, header.name),
        }
    }
    if let Some(timeout) = e.attr_nonempty("timeout").and_then(|t| t.trim().parse().ok()) {
        header.timeout = Some(timeout);
    }
    if let Some(timestamp) = e.attr_nonempty("timestamp") {
        header.timestamp = Some(timestamp.to_string());
    }
    if kind != IndiPropertyType::Light {
        if let Some(perm) = e.attr_nonempty("perm").and_then(IndiPermission::parse) {
            header.perm = perm;
        }
    }
}

/// Apply each named member of an update; unknown names are skipped
fn for_each_member<T>(
    elements: &mut IndexMap<String, T>,
    e: &XmlElement,
    tag: &str,
    mut apply: impl FnMut(&mut T, &XmlElement),
) {
    let property = e.attr("name").unwrap_or_default();
    for member in e.children_named(tag) {
        let Some(name) = member.attr_nonempty("name") else {
            tracing::error!("Member without name in update of {}", property);
            continue;
        };
        match elements.get_mut(name) {
            Some(element) => apply(element, member),
            None => tracing::warn!("Cannot set undefined element {} for prop {}", name, property),
        }
    }
}

fn update_number(number: &mut NumberElement, m: &XmlElement) {
    if let Some(min) = scan_attr(m, "min") {
        number.min = min;
    }
    if let Some(max) = scan_attr(m, "max") {
        number.max = max;
    }
    match scan_sexa(m.text.trim()) {
        Some(value) => number.value = value,
        None => tracing::warn!("Unparsable value '{}' for number {}", m.text.trim(), number.name),
    }
}

fn update_blob(mediator: &dyn Mediator, header: &VectorHeader, blob: &mut BlobElement, m: &XmlElement) {
    let (Some(format), Some(size)) = (m.attr_nonempty("format"), m.attr_nonempty("size")) else {
        tracing::warn!("Cannot parse blob for {} in {}", blob.name, header.name);
        return;
    };
    let Ok(size) = size.trim().parse::<usize>() else {
        tracing::warn!("Cannot parse blob size for {} in {}", blob.name, header.name);
        return;
    };
    blob.format = format.to_string();
    blob.size = size;

    if size == 0 {
        blob.data.clear();
        blob.bloblen = 0;
        mediator.new_blob(header, blob);
        return;
    }

    let encoded: Vec<u8> = m
        .text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match BASE64.decode(&encoded) {
        Ok(data) => {
            blob.bloblen = data.len();
            if blob.is_compressed() {
                match inflate(&data) {
                    Ok(raw) => {
                        blob.size = raw.len();
                        blob.data = raw;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Unable to decompress {} in {}: {}",
                            blob.name,
                            header.name,
                            e
                        );
                        return;
                    }
                }
            } else {
                blob.data = data;
            }
            mediator.new_blob(header, blob);
        }
        Err(e) => tracing::warn!(
            "Unable to base64 decode {} in {}: {}",
            blob.name,
            header.name,
            e
        ),
    }
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut raw)?;
    Ok(raw)
}
