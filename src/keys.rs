//! Keyboard capture using evdev.
//!
//! Monitors all keyboard devices and forwards key-down events into the
//! session's event channel. Releases and auto-repeats are dropped here;
//! the input router decides what a key means.

use evdev::{Device, EventType, InputEventKind, Key};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::EngineEvent;

pub struct KeyboardListener {
    tx: mpsc::Sender<EngineEvent>,
}

impl KeyboardListener {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Find all keyboard input devices.
    pub fn find_keyboards() -> Vec<Device> {
        let mut keyboards = Vec::new();

        for (_path, device) in evdev::enumerate() {
            if let Some(keys) = device.supported_keys() {
                if keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER) {
                    info!(
                        "Found keyboard: {} at {:?}",
                        device.name().unwrap_or("unknown"),
                        device.physical_path()
                    );
                    keyboards.push(device);
                }
            }
        }

        keyboards
    }

    /// Forward key-down events from one device until it disconnects or the
    /// session stops listening.
    async fn monitor_device(device: Device, tx: mpsc::Sender<EngineEvent>) {
        let name = device.name().unwrap_or("unknown").to_string();
        debug!("Monitoring {name}");

        let mut events = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot create event stream for {name}: {e}");
                return;
            }
        };

        loop {
            match events.next_event().await {
                Ok(event) => {
                    if event.event_type() != EventType::KEY {
                        continue;
                    }

                    let key = match event.kind() {
                        InputEventKind::Key(k) => k,
                        _ => continue,
                    };

                    // 0 = release, 1 = press, 2 = repeat; presses only
                    if event.value() != 1 {
                        continue;
                    }

                    if tx.send(EngineEvent::Key(key)).await.is_err() {
                        debug!("Session gone, detaching from {name}");
                        return;
                    }
                }
                Err(e) => {
                    warn!("Device {name} disconnected: {e}");
                    return;
                }
            }
        }
    }

    /// Start monitoring all keyboards. Runs until every device disconnects
    /// or the session's event channel closes.
    pub async fn run(self) {
        let keyboards = Self::find_keyboards();
        if keyboards.is_empty() {
            warn!(
                "No keyboards found; keyboard shortcuts disabled. \
                 Make sure you're in the 'input' group: sudo usermod -aG input $USER"
            );
            return;
        }

        info!("Monitoring {} keyboard(s)", keyboards.len());

        let mut handles = Vec::new();
        for device in keyboards {
            handles.push(tokio::spawn(Self::monitor_device(device, self.tx.clone())));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
