//! INDI client
//!
//! [`IndiClient`] ties the pieces together: bytes from the [`Connection`]
//! go through the [`StreamParser`] into the [`Dispatcher`], and outbound
//! commands are encoded and queued on the connection's writer task.
//!
//! The client itself is a plain state machine. Drive it with
//! [`IndiClient::run`] or [`IndiClient::handle_ready_read`], or feed bytes
//! directly with [`IndiClient::feed`]. Share it between tasks behind a lock,
//! or take an [`IndiSender`] before starting the read loop to send commands
//! while it runs.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent, IndiSender};
use crate::dispatch::Dispatcher;
use crate::encoder::{self, BlobModes};
use crate::error::{IndiError, IndiResult};
use crate::mediator::{LogMediator, Mediator};
use crate::property::{
    driver_interface, BlobMode, BlobVector, Device, IndiPermission, PropertyVector, SwitchRule,
    SwitchState,
};
use crate::protocol::standard_properties::{CONNECT, CONNECTION, DISCONNECT};
use crate::xml::StreamParser;
use std::sync::Arc;

/// INDI protocol client for one server endpoint
pub struct IndiClient {
    config: ClientConfig,
    parser: StreamParser,
    dispatcher: Dispatcher,
    blob_modes: BlobModes,
    connection: Option<Connection>,
}

impl std::fmt::Debug for IndiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndiClient")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl IndiClient {
    /// Create a new INDI client that logs events
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self::with_config(ClientConfig::new(host, port), Arc::new(LogMediator))
    }

    /// Create a new INDI client with custom configuration and mediator
    pub fn with_config(config: ClientConfig, mediator: Arc<dyn Mediator>) -> Self {
        Self {
            config,
            parser: StreamParser::new(),
            dispatcher: Dispatcher::new(mediator),
            blob_modes: BlobModes::new(),
            connection: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Change the server endpoint. Refused while connected.
    pub fn set_server(&mut self, host: &str, port: u16) -> bool {
        if self.is_connected() {
            tracing::warn!(
                "Cannot change INDI server to {}:{} while connected to {}",
                host,
                port,
                self.config.address()
            );
            return false;
        }
        self.config.host = host.to_string();
        self.config.port = port;
        true
    }

    pub fn set_mediator(&mut self, mediator: Arc<dyn Mediator>) {
        self.dispatcher.set_mediator(mediator);
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect to the INDI server and request all properties
    pub async fn connect(&mut self) -> IndiResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let connection = match Connection::open(&self.config).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("INDI connect to {} failed: {}", self.config.address(), e);
                self.reset();
                self.dispatcher.mediator().server_disconnected(Some(&e));
                return Err(e);
            }
        };
        self.attach(connection);

        let handshake = encoder::get_properties_xml(&self.config.protocol_version, None, None);
        if let Err(e) = self.send_command(handshake).await {
            self.handle_error(e.clone());
            return Err(e);
        }
        self.dispatcher.mediator().server_connected();
        Ok(())
    }

    /// Use an already established connection
    pub(crate) fn attach(&mut self, connection: Connection) {
        self.parser.clear();
        self.connection = Some(connection);
    }

    /// Close the connection and forget every device
    pub async fn disconnect(&mut self) -> IndiResult<()> {
        if !self.is_connected() {
            return Ok(());
        }
        tracing::info!("Disconnecting from INDI server {}", self.config.address());
        self.reset();
        self.dispatcher.mediator().server_disconnected(None);
        Ok(())
    }

    /// Connection-level failure: drop the socket and all state, then tell
    /// the mediator. Ignored when already disconnected.
    pub fn handle_error(&mut self, error: IndiError) {
        if !self.is_connected() {
            return;
        }
        tracing::warn!("INDI client connection fault, error: {}", error);
        self.reset();
        self.dispatcher.mediator().server_disconnected(Some(&error));
    }

    fn reset(&mut self) {
        self.connection = None;
        self.parser.clear();
        self.dispatcher.clear();
        self.blob_modes.clear();
    }

    /// Parse and dispatch received bytes. Returns the number of messages
    /// applied; malformed or unroutable messages are logged and dropped.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let mut applied = 0;
        for element in self.parser.feed(data) {
            match self.dispatcher.dispatch(&element) {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!("Problem dispatching <{}>: {}", element.tag, e),
            }
        }
        applied
    }

    /// Wait for the next read from the socket and process it
    pub async fn handle_ready_read(&mut self) -> IndiResult<usize> {
        let connection = self.connection.as_mut().ok_or(IndiError::NotConnected)?;
        match connection.next_event().await {
            Some(ConnectionEvent::Data(data)) => Ok(self.feed(&data)),
            Some(ConnectionEvent::Closed(error)) => {
                self.handle_error(error.clone());
                Err(error)
            }
            None => {
                let error = IndiError::ConnectionFailed("reader task stopped".to_string());
                self.handle_error(error.clone());
                Err(error)
            }
        }
    }

    /// Process reads until the connection ends; returns the reason
    pub async fn run(&mut self) -> IndiResult<()> {
        loop {
            self.handle_ready_read().await?;
        }
    }

    /// Handle for sending while another task drives the read loop.
    /// `None` while disconnected.
    pub fn sender(&self) -> Option<IndiSender> {
        self.connection.as_ref().map(|c| c.sender().clone())
    }

    fn writer(&self) -> IndiResult<&IndiSender> {
        self.connection
            .as_ref()
            .map(Connection::sender)
            .ok_or(IndiError::NotConnected)
    }

    /// Send a raw INDI command
    pub async fn send_command(&self, command: String) -> IndiResult<()> {
        self.writer()?.send_command(command).await
    }

    /// Send every element of `vector` with its current value
    pub async fn send_new_property(&self, vector: &PropertyVector) -> IndiResult<()> {
        self.writer()?.send_new_property(vector).await
    }

    /// Send a single element of `vector`
    pub async fn send_new_element(&self, vector: &PropertyVector, element: &str) -> IndiResult<()> {
        self.writer()?.send_new_element(vector, element).await
    }

    /// Upload the payloads of a BLOB vector
    pub async fn send_blob(&self, vector: &BlobVector) -> IndiResult<()> {
        self.writer()?.send_blob(vector).await
    }

    /// Ask the server for properties, of one device or of all
    pub async fn watch_device(&self, device: Option<&str>) -> IndiResult<()> {
        let command = encoder::get_properties_xml(&self.config.protocol_version, device, None);
        self.send_command(command).await
    }

    /// Set the BLOB handling mode for a device or one of its properties.
    /// Nothing is sent when the mode is already in effect.
    pub async fn set_blob_mode(
        &mut self,
        mode: BlobMode,
        device: &str,
        property: Option<&str>,
    ) -> IndiResult<()> {
        if !self.is_connected() {
            return Err(IndiError::NotConnected);
        }
        match self.blob_modes.set(mode, device, property) {
            Some(command) => self.send_command(command).await,
            None => Ok(()),
        }
    }

    pub fn get_blob_mode(&self, device: &str, property: Option<&str>) -> BlobMode {
        self.blob_modes.get(device, property)
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.dispatcher.device(name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.dispatcher.device_mut(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.dispatcher.devices()
    }

    /// Devices whose driver interface matches any bit of `interface_mask`.
    /// `driver_interface::GENERAL` selects every device.
    pub fn get_devices(&self, interface_mask: u32) -> Vec<&Device> {
        self.devices()
            .filter(|d| {
                interface_mask == driver_interface::GENERAL
                    || d.driver_interface().is_some_and(|i| i & interface_mask != 0)
            })
            .collect()
    }

    /// Request the driver to connect its hardware
    pub async fn connect_device(&self, device: &str) -> IndiResult<bool> {
        self.request_device_connection(device, CONNECT).await
    }

    /// Request the driver to disconnect its hardware
    pub async fn disconnect_device(&self, device: &str) -> IndiResult<bool> {
        self.request_device_connection(device, DISCONNECT).await
    }

    /// Send the CONNECTION switch with `target` On. The local copy is left
    /// for the server to update.
    async fn request_device_connection(&self, device: &str, target: &str) -> IndiResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        let Some(connection) = self.device(device).and_then(|d| d.switch(CONNECTION)) else {
            tracing::warn!("Device {} has no {} property", device, CONNECTION);
            return Ok(false);
        };
        match connection.find(target) {
            None => return Ok(false),
            Some(s) if s.state == SwitchState::On => return Ok(false),
            Some(_) => {}
        }

        let mut request = connection.clone();
        request.reset();
        if let Some(s) = request.find_mut(target) {
            s.state = SwitchState::On;
        }
        self.send_new_property(&PropertyVector::Switch(request))
            .await?;
        Ok(true)
    }

    fn writable_property_mut(
        &mut self,
        device: &str,
        property: &str,
    ) -> IndiResult<&mut PropertyVector> {
        if !self.is_connected() {
            return Err(IndiError::NotConnected);
        }
        let vector = self
            .dispatcher
            .device_mut(device)
            .ok_or_else(|| IndiError::DeviceNotFound(device.to_string()))?
            .property_mut(property)
            .ok_or_else(|| IndiError::property_invalid(device, property))?;
        check_write_permission(vector)?;
        Ok(vector)
    }

    fn element_not_found(device: &str, property: &str, element: &str) -> IndiError {
        IndiError::ElementNotFound {
            device: device.to_string(),
            property: property.to_string(),
            element: element.to_string(),
        }
    }

    /// Set a text element locally and send the whole vector
    pub async fn send_new_text(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        text: &str,
    ) -> IndiResult<()> {
        let vector = self.writable_property_mut(device, property)?;
        vector
            .as_text_mut()
            .ok_or_else(|| IndiError::property_invalid(device, property))?
            .find_mut(element)
            .ok_or_else(|| Self::element_not_found(device, property, element))?
            .text = text.to_string();
        let snapshot = vector.clone();
        self.send_new_property(&snapshot).await
    }

    /// Set a number element locally and send the whole vector
    pub async fn send_new_number(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        value: f64,
    ) -> IndiResult<()> {
        let vector = self.writable_property_mut(device, property)?;
        vector
            .as_number_mut()
            .ok_or_else(|| IndiError::property_invalid(device, property))?
            .find_mut(element)
            .ok_or_else(|| Self::element_not_found(device, property, element))?
            .value = value;
        let snapshot = vector.clone();
        self.send_new_property(&snapshot).await
    }

    /// Set a switch element locally and send the whole vector. Turning a
    /// member On in an exclusive vector turns the others Off first.
    pub async fn send_new_switch(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        state: SwitchState,
    ) -> IndiResult<()> {
        let vector = self.writable_property_mut(device, property)?;
        let switch = vector
            .as_switch_mut()
            .ok_or_else(|| IndiError::property_invalid(device, property))?;
        if switch.find(element).is_none() {
            return Err(Self::element_not_found(device, property, element));
        }
        if state == SwitchState::On && switch.rule != SwitchRule::AnyOfMany {
            switch.reset();
        }
        if let Some(s) = switch.find_mut(element) {
            s.state = state;
        }
        let snapshot = vector.clone();
        self.send_new_property(&snapshot).await
    }
}

/// Check property permission before write
fn check_write_permission(vector: &PropertyVector) -> IndiResult<()> {
    match vector.permission() {
        IndiPermission::ReadOnly => Err(IndiError::PermissionDenied {
            device: vector.device().to_string(),
            property: vector.name().to_string(),
        }),
        IndiPermission::WriteOnly | IndiPermission::ReadWrite => Ok(()),
    }
}

impl IndiSender {
    /// Send every element of `vector` with its current value
    pub async fn send_new_property(&self, vector: &PropertyVector) -> IndiResult<()> {
        check_write_permission(vector)?;
        let command = encoder::new_vector_xml(vector)?;
        self.send_command(command).await
    }

    /// Send a single element of `vector`
    pub async fn send_new_element(&self, vector: &PropertyVector, element: &str) -> IndiResult<()> {
        check_write_permission(vector)?;
        let command = encoder::new_element_xml(vector, element)?;
        self.send_command(command).await
    }

    /// Upload the payloads of a BLOB vector
    pub async fn send_blob(&self, vector: &BlobVector) -> IndiResult<()> {
        if vector.header.perm == IndiPermission::ReadOnly {
            return Err(IndiError::PermissionDenied {
                device: vector.header.device.clone(),
                property: vector.header.name.clone(),
            });
        }
        self.send_command(encoder::blob_xml(vector)).await
    }
}
