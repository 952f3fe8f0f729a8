use serde::Serialize;
use tracing::info;

use super::outbox::Outbox;
use super::timer::Timer;
use super::timer::TimerKind;
use super::timer::TimerSlot;
use crate::error::BridgeError;
use crate::registry::DeviceId;

/// Hardware join window as last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "device")]
pub enum JoinWindow {
    Closed,
    OpenUnlimited,
    OpenSingle(DeviceId),
}

/// Result of a completed pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingCompletion {
    /// The device the session was opened for, if any.
    pub pending: Option<DeviceId>,
    /// Whether the window was closed because the session allowed one device.
    pub blocked: bool,
}

/// Single-slot pairing guard.
///
/// At most one device can be pending at a time. Closing the window does
/// not end the session; only a completed or abandoned pairing does.
#[derive(Debug)]
pub struct JoinWindowController {
    outbox: Outbox,
    window: JoinWindow,
    pending: Option<DeviceId>,
    limit_to_one: bool,
    timeout: TimerSlot,
}

impl JoinWindowController {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            window: JoinWindow::Closed,
            pending: None,
            limit_to_one: false,
            timeout: TimerSlot::new(TimerKind::PairingTimeout),
        }
    }

    pub fn window(&self) -> JoinWindow {
        self.window
    }

    pub fn pending(&self) -> Option<DeviceId> {
        self.pending
    }

    /// Open the join window.
    ///
    /// Fails with [`BridgeError::Conflict`] if a session is pending for a
    /// different device. Asking again for the pending device refreshes it.
    pub fn allow_joining(
        &mut self,
        limit_to_one: bool,
        device: Option<DeviceId>,
    ) -> Result<(), BridgeError> {
        if let Some(pending) = self.pending {
            if device != Some(pending) {
                return Err(BridgeError::Conflict(format!(
                    "already pairing device {}",
                    pending
                )));
            }
        }

        self.limit_to_one = limit_to_one;
        self.pending = device;
        self.window = match (limit_to_one, device) {
            (true, Some(device)) => JoinWindow::OpenSingle(device),
            _ => JoinWindow::OpenUnlimited,
        };
        info!("Opening join window ({:?})", self.window);
        self.outbox.permit_join(true);
        Ok(())
    }

    pub fn block_joining(&mut self) {
        info!("Closing join window");
        self.window = JoinWindow::Closed;
        self.outbox.permit_join(false);
    }

    /// A device finished its interview. Ends the session, closing the
    /// window when it was limited to one device.
    pub fn complete_pairing(&mut self) -> PairingCompletion {
        let pending = self.pending.take();
        self.timeout.disarm();
        let blocked = std::mem::replace(&mut self.limit_to_one, false);
        if blocked {
            self.block_joining();
        }
        PairingCompletion { pending, blocked }
    }

    /// Arm the timeout that abandons the current session.
    pub(crate) fn arm_timeout(&mut self) -> Timer {
        self.timeout.arm()
    }

    pub(crate) fn timeout_armed(&self) -> bool {
        self.timeout.is_armed()
    }

    /// Consume a timeout expiry: close the window and drop the session.
    /// Returns false for a stale expiry.
    pub fn timeout_elapsed(&mut self, timer: Timer) -> bool {
        if !self.timeout.fire(timer) {
            return false;
        }
        if let Some(device) = self.pending.take() {
            info!("Pairing session for device {} timed out", device);
        }
        self.limit_to_one = false;
        self.block_joining();
        true
    }
}
