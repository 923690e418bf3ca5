//! Notification hooks for the owner of an [`IndiClient`](crate::IndiClient)

use crate::error::IndiError;
use crate::property::{
    BlobElement, Device, IndiPropertyType, LightVector, NumberVector, PropertyVector,
    SwitchVector, TextVector, VectorHeader,
};
use tokio::sync::broadcast;

/// Receives device and property lifecycle events.
///
/// Every method has an empty default so implementors only override what
/// they care about. Methods are called from whichever task feeds the
/// client, after the registry has been updated.
pub trait Mediator: Send + Sync {
    fn new_device(&self, _device: &Device) {}
    fn remove_device(&self, _device: &Device) {}
    fn new_property(&self, _property: &PropertyVector) {}
    fn remove_property(&self, _property: &PropertyVector) {}
    fn new_text(&self, _vector: &TextVector) {}
    fn new_number(&self, _vector: &NumberVector) {}
    fn new_switch(&self, _vector: &SwitchVector) {}
    fn new_light(&self, _vector: &LightVector) {}
    /// One call per `oneBLOB` received, including zero-size notifications
    fn new_blob(&self, _vector: &VectorHeader, _blob: &BlobElement) {}
    /// `index` addresses the entry in [`Device::message_queue`]
    fn new_message(&self, _device: &Device, _index: usize) {}
    /// Server notice not tied to a known device
    fn new_universal_message(&self, _message: &str) {}
    fn server_connected(&self) {}
    /// `error` is `None` for a disconnect requested by the client
    fn server_disconnected(&self, _error: Option<&IndiError>) {}
}

/// Default mediator: writes events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMediator;

impl Mediator for LogMediator {
    fn new_device(&self, device: &Device) {
        tracing::info!("INDI device defined: {}", device.name);
    }

    fn remove_device(&self, device: &Device) {
        tracing::info!("INDI device removed: {}", device.name);
    }

    fn new_property(&self, property: &PropertyVector) {
        tracing::debug!("INDI property defined: {}", property);
    }

    fn remove_property(&self, property: &PropertyVector) {
        tracing::debug!("INDI property deleted: {}", property);
    }

    fn new_blob(&self, vector: &VectorHeader, blob: &BlobElement) {
        tracing::info!(
            "BLOB received: {}.{}.{} ({} bytes, format {})",
            vector.device,
            vector.name,
            blob.name,
            blob.bloblen,
            blob.format
        );
    }

    fn new_message(&self, device: &Device, index: usize) {
        tracing::info!("[{}] {}", device.name, device.message_queue(index as isize));
    }

    fn new_universal_message(&self, message: &str) {
        tracing::info!("INDI server: {}", message);
    }

    fn server_connected(&self) {
        tracing::info!("Connected to INDI server");
    }

    fn server_disconnected(&self, error: Option<&IndiError>) {
        match error {
            Some(e) => tracing::warn!("Lost connection to INDI server: {}", e),
            None => tracing::info!("Disconnected from INDI server"),
        }
    }
}

/// INDI client event
#[derive(Debug, Clone, PartialEq)]
pub enum IndiEvent {
    /// Device defined
    DeviceDefined(String),
    /// Device removed
    DeviceRemoved(String),
    /// Property defined
    PropertyDefined {
        device: String,
        property: String,
        kind: IndiPropertyType,
    },
    /// Property values updated by the server
    PropertyUpdated {
        device: String,
        property: String,
        kind: IndiPropertyType,
    },
    /// Property deleted
    PropertyDeleted { device: String, property: String },
    /// BLOB received with format information
    BlobReceived {
        device: String,
        property: String,
        element: String,
        data: Vec<u8>,
        format: String,
        size: usize,
    },
    /// Message text; `device` is `None` for server-wide notices
    Message {
        device: Option<String>,
        text: String,
    },
    /// Connection state changed
    ConnectionStateChanged(bool),
    /// Connection lost, with the reason
    Error(String),
}

/// Mediator that republishes every notification as an [`IndiEvent`]
#[derive(Debug, Clone)]
pub struct EventMediator {
    event_tx: broadcast::Sender<IndiEvent>,
}

impl Default for EventMediator {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventMediator {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndiEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: IndiEvent) {
        // no receivers is fine
        let _ = self.event_tx.send(event);
    }

    fn updated(&self, header: &VectorHeader, kind: IndiPropertyType) {
        self.emit(IndiEvent::PropertyUpdated {
            device: header.device.clone(),
            property: header.name.clone(),
            kind,
        });
    }
}

impl Mediator for EventMediator {
    fn new_device(&self, device: &Device) {
        self.emit(IndiEvent::DeviceDefined(device.name.clone()));
    }

    fn remove_device(&self, device: &Device) {
        self.emit(IndiEvent::DeviceRemoved(device.name.clone()));
    }

    fn new_property(&self, property: &PropertyVector) {
        self.emit(IndiEvent::PropertyDefined {
            device: property.device().to_string(),
            property: property.name().to_string(),
            kind: property.property_type(),
        });
    }

    fn remove_property(&self, property: &PropertyVector) {
        self.emit(IndiEvent::PropertyDeleted {
            device: property.device().to_string(),
            property: property.name().to_string(),
        });
    }

    fn new_text(&self, vector: &TextVector) {
        self.updated(&vector.header, IndiPropertyType::Text);
    }

    fn new_number(&self, vector: &NumberVector) {
        self.updated(&vector.header, IndiPropertyType::Number);
    }

    fn new_switch(&self, vector: &SwitchVector) {
        self.updated(&vector.header, IndiPropertyType::Switch);
    }

    fn new_light(&self, vector: &LightVector) {
        self.updated(&vector.header, IndiPropertyType::Light);
    }

    fn new_blob(&self, vector: &VectorHeader, blob: &BlobElement) {
        self.emit(IndiEvent::BlobReceived {
            device: vector.device.clone(),
            property: vector.name.clone(),
            element: blob.name.clone(),
            data: blob.data.clone(),
            format: blob.format.clone(),
            size: blob.size,
        });
    }

    fn new_message(&self, device: &Device, index: usize) {
        self.emit(IndiEvent::Message {
            device: Some(device.name.clone()),
            text: device.message_queue(index as isize).to_string(),
        });
    }

    fn new_universal_message(&self, message: &str) {
        self.emit(IndiEvent::Message {
            device: None,
            text: message.to_string(),
        });
    }

    fn server_connected(&self) {
        self.emit(IndiEvent::ConnectionStateChanged(true));
    }

    fn server_disconnected(&self, error: Option<&IndiError>) {
        if let Some(e) = error {
            self.emit(IndiEvent::Error(e.to_string()));
        }
        self.emit(IndiEvent::ConnectionStateChanged(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{IndiPermission, IndiPropertyState};

    fn header() -> VectorHeader {
        VectorHeader {
            device: "CCD Simulator".to_string(),
            name: "CCD1".to_string(),
            label: "Image".to_string(),
            group: "Image Info".to_string(),
            perm: IndiPermission::ReadOnly,
            timeout: None,
            state: IndiPropertyState::Ok,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_event_mediator_publishes() {
        let mediator = EventMediator::default();
        let mut rx = mediator.subscribe();

        mediator.new_device(&Device::new("CCD Simulator"));
        let blob = BlobElement {
            name: "CCD1".to_string(),
            format: ".fits".to_string(),
            data: vec![1, 2, 3],
            bloblen: 3,
            size: 3,
            ..Default::default()
        };
        mediator.new_blob(&header(), &blob);
        mediator.server_disconnected(Some(&IndiError::NotConnected));

        assert_eq!(
            rx.recv().await.unwrap(),
            IndiEvent::DeviceDefined("CCD Simulator".to_string())
        );
        match rx.recv().await.unwrap() {
            IndiEvent::BlobReceived {
                device,
                element,
                data,
                format,
                ..
            } => {
                assert_eq!(device, "CCD Simulator");
                assert_eq!(element, "CCD1");
                assert_eq!(data, vec![1, 2, 3]);
                assert_eq!(format, ".fits");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), IndiEvent::Error(_)));
        assert_eq!(
            rx.recv().await.unwrap(),
            IndiEvent::ConnectionStateChanged(false)
        );
    }

    #[test]
    fn test_event_mediator_without_subscribers() {
        let mediator = EventMediator::new(4);
        mediator.new_universal_message("hello");
    }

    #[test]
    fn test_device_message_event_text() {
        let mediator = EventMediator::default();
        let mut rx = mediator.subscribe();
        let mut device = Device::new("Dome Simulator");
        let index = device.push_message("2024-01-01T00:00:00: Shutter open".to_string());
        mediator.new_message(&device, index);
        assert_eq!(
            rx.try_recv().unwrap(),
            IndiEvent::Message {
                device: Some("Dome Simulator".to_string()),
                text: "2024-01-01T00:00:00: Shutter open".to_string(),
            }
        );
    }
}
