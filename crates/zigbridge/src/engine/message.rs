//! Inputs of the engine loop.
//!
//! Everything that touches bridge state goes through one channel so that
//! messages, timers and operator commands are handled strictly one at a
//! time:
//! - `Input::Mqtt`: a message from the transport
//! - `Input::Timer`: a scheduled timer firing
//! - `Input::Command`: an operator request, answered over a oneshot

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::bridge::BridgeSummary;
use crate::bridge::Timer;
use crate::error::BridgeError;
use crate::mqtt::MqttMessage;
use crate::registry::DeviceId;
use crate::registry::DeviceRecord;
use crate::registry::LocationId;

pub type InputSender = mpsc::Sender<Input>;
pub type InputReceiver = mpsc::Receiver<Input>;

pub type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum Input {
    Mqtt(MqttMessage),
    Timer(Timer),
    Command(Command),
}

/// Operator requests.
#[derive(Debug)]
pub enum Command {
    AllowJoining {
        limit_to_one: bool,
        device: Option<DeviceId>,
        reply: Reply<Result<(), BridgeError>>,
    },
    BlockJoining {
        reply: Reply<()>,
    },
    Discover {
        device: DeviceId,
        reply: Reply<Result<(), BridgeError>>,
    },
    AddPlaceholder {
        friendly_name: String,
        location: Option<LocationId>,
        reply: Reply<Result<DeviceId, BridgeError>>,
    },
    RenameDevice {
        friendly_name: String,
        new_name: String,
        reply: Reply<bool>,
    },
    RemoveDevice {
        friendly_name: String,
        reply: Reply<()>,
    },
    RequestDeviceList {
        reply: Reply<()>,
    },
    Devices {
        reply: Reply<Vec<DeviceRecord>>,
    },
    Summary {
        reply: Reply<BridgeSummary>,
    },
}
