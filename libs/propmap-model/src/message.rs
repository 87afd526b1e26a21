//! Parsed device messages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Raw or canonical property payload
pub type PropertyMap = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ReportProperty,
    ReadPropertyReply,
    WritePropertyReply,
    Event,
    Online,
    Offline,
    #[serde(other)]
    Other,
}

impl MessageType {
    /// Message kinds whose properties go through mapping
    pub fn carries_mapped_properties(&self) -> bool {
        matches!(self, Self::ReportProperty | Self::ReadPropertyReply)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMessage {
    pub message_type: MessageType,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl DeviceMessage {
    pub fn new(message_type: MessageType, device_id: impl Into<String>) -> Self {
        Self {
            message_type,
            device_id: device_id.into(),
            message_id: None,
            timestamp: 0,
            properties: PropertyMap::new(),
        }
    }

    pub fn report_property(device_id: impl Into<String>, properties: PropertyMap) -> Self {
        Self {
            properties,
            ..Self::new(MessageType::ReportProperty, device_id)
        }
    }

    pub fn read_property_reply(device_id: impl Into<String>, properties: PropertyMap) -> Self {
        Self {
            properties,
            ..Self::new(MessageType::ReadPropertyReply, device_id)
        }
    }
}
