//! Standard message and service kinds shipped with every broker.

use serde::{Deserialize, Serialize};

use super::{Message, MessageKind, Service};

/// `std_msgs/String`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringMsg {
    pub data: String,
}

impl Message for StringMsg {
    const KIND: MessageKind = MessageKind::new("std_msgs/String");
}

impl From<&str> for StringMsg {
    fn from(data: &str) -> Self {
        Self {
            data: data.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bool {
    pub data: bool,
}

impl Message for Bool {
    const KIND: MessageKind = MessageKind::new("std_msgs/Bool");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Int32 {
    pub data: i32,
}

impl Message for Int32 {
    const KIND: MessageKind = MessageKind::new("std_msgs/Int32");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Float64 {
    pub data: f64,
}

impl Message for Float64 {
    const KIND: MessageKind = MessageKind::new("std_msgs/Float64");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

impl Message for Empty {
    const KIND: MessageKind = MessageKind::new("std_msgs/Empty");
}

// ============================================================================
// std_srvs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {}

impl Message for TriggerRequest {
    const KIND: MessageKind = MessageKind::new("std_srvs/TriggerRequest");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
}

impl Message for TriggerResponse {
    const KIND: MessageKind = MessageKind::new("std_srvs/TriggerResponse");
}

/// `std_srvs/Trigger`: no input, reports success and a message.
pub struct Trigger;

impl Service for Trigger {
    const TYPE: &'static str = "std_srvs/Trigger";
    type Request = TriggerRequest;
    type Response = TriggerResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetBoolRequest {
    pub data: bool,
}

impl Message for SetBoolRequest {
    const KIND: MessageKind = MessageKind::new("std_srvs/SetBoolRequest");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetBoolResponse {
    pub success: bool,
    pub message: String,
}

impl Message for SetBoolResponse {
    const KIND: MessageKind = MessageKind::new("std_srvs/SetBoolResponse");
}

pub struct SetBool;

impl Service for SetBool {
    const TYPE: &'static str = "std_srvs/SetBool";
    type Request = SetBoolRequest;
    type Response = SetBoolResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyRequest {}

impl Message for EmptyRequest {
    const KIND: MessageKind = MessageKind::new("std_srvs/EmptyRequest");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResponse {}

impl Message for EmptyResponse {
    const KIND: MessageKind = MessageKind::new("std_srvs/EmptyResponse");
}

pub struct EmptySrv;

impl Service for EmptySrv {
    const TYPE: &'static str = "std_srvs/Empty";
    type Request = EmptyRequest;
    type Response = EmptyResponse;
}
