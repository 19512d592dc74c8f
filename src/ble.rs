use anyhow::{anyhow, Context, Result};
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

use crate::registers::{Handle, HandleMap, Register, POWERPAL_SERVICE_UUID};
use crate::session::{Action, Event, GattStatus, Session};

/// Get the default Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Bluetooth adapter found"))
}

/// Scan for the meter by advertised name or address substring.
pub async fn find_meter(adapter: &Adapter, target: &str, scan_secs: u64) -> Result<Peripheral> {
    adapter
        .start_scan(ScanFilter::default())
        .await
        .context("Failed to start BLE scan")?;
    tokio::time::sleep(Duration::from_secs(scan_secs)).await;

    let peripherals = adapter.peripherals().await?;
    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let address = peripheral.address().to_string();
            if name.contains(target) || address.contains(target) {
                adapter.stop_scan().await?;
                info!("Found {} ({})", name, address);
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err(anyhow!("No device matching {:?} found", target))
}

/// Run one connection: connect, discover, authenticate, then forward
/// notifications until the link drops. Returns when the peripheral is no
/// longer connected; the caller feeds the disconnect into the session and
/// decides whether to rescan.
pub async fn run_connection(peripheral: &Peripheral, session: &mut Session) -> Result<()> {
    peripheral.connect().await.context("Failed to connect")?;
    let mut queue = VecDeque::new();
    queue.push_back(Event::Connected);

    peripheral
        .discover_services()
        .await
        .context("Service discovery failed")?;
    let has_service = peripheral
        .services()
        .iter()
        .any(|s| s.uuid == POWERPAL_SERVICE_UUID);
    let (handles, characteristics) = resolve_handles(peripheral);
    if !has_service || handles.handle(Register::PairingCode).is_none() {
        peripheral.disconnect().await.ok();
        return Err(anyhow!("No Powerpal service or pairing code characteristic found"));
    }
    queue.push_back(Event::DiscoveryComplete { handles });
    // Bonding is handled by the OS stack underneath btleplug, so pairing is
    // reported established as soon as discovery settles.
    queue.push_back(Event::PairingComplete { success: true });
    drain(&mut queue, session, peripheral, &characteristics).await;

    let mut notifications = peripheral
        .notifications()
        .await
        .context("Failed to open notification stream")?;
    while let Some(notification) = notifications.next().await {
        match handle_for_uuid(&characteristics, notification.uuid) {
            Some(handle) => {
                queue.push_back(Event::Notify {
                    handle,
                    data: notification.value,
                });
                drain(&mut queue, session, peripheral, &characteristics).await;
            }
            None => debug!("Notification from unknown characteristic {}", notification.uuid),
        }
        if !peripheral.is_connected().await.unwrap_or(false) {
            break;
        }
    }
    Ok(())
}

/// Assign a fresh handle to every characteristic that maps to a known
/// register. Handles are connection-local; a reconnect starts over.
fn resolve_handles(peripheral: &Peripheral) -> (HandleMap, HashMap<Handle, Characteristic>) {
    let mut handles = HandleMap::default();
    let mut by_handle = HashMap::new();
    let mut next: Handle = 1;
    for characteristic in peripheral.characteristics() {
        if let Some(register) = Register::from_uuid(characteristic.uuid) {
            debug!("{:?} resolved to handle {}", register, next);
            check_capabilities(register, &characteristic);
            handles.insert(register, next);
            by_handle.insert(next, characteristic);
            next += 1;
        }
    }
    (handles, by_handle)
}

/// The firmware decides what it allows; a mismatch with the expected
/// capability set usually means a firmware revision this monitor has not
/// seen, so flag it rather than fail.
fn check_capabilities(register: Register, characteristic: &Characteristic) {
    let properties = characteristic.properties;
    if register.readable() && !properties.contains(CharPropFlags::READ) {
        warn!("{:?} does not advertise read support", register);
    }
    if register.writable() && !properties.contains(CharPropFlags::WRITE) {
        warn!("{:?} does not advertise write support", register);
    }
    if register.notifiable() && !properties.contains(CharPropFlags::NOTIFY) {
        warn!("{:?} does not advertise notify support", register);
    }
}

fn handle_for_uuid(characteristics: &HashMap<Handle, Characteristic>, uuid: Uuid) -> Option<Handle> {
    characteristics
        .iter()
        .find(|(_, c)| c.uuid == uuid)
        .map(|(handle, _)| *handle)
}

/// Pump queued events through the session, submitting each returned action
/// and queueing its completion, until the machine settles.
async fn drain(
    queue: &mut VecDeque<Event>,
    session: &mut Session,
    peripheral: &Peripheral,
    characteristics: &HashMap<Handle, Characteristic>,
) {
    while let Some(event) = queue.pop_front() {
        for action in session.handle_event(event) {
            if let Some(completion) = submit(peripheral, characteristics, action).await {
                queue.push_back(completion);
            }
        }
    }
}

/// Submit one register I/O. Submission failures are logged and surfaced to
/// the session as failed completions; there is no retry.
async fn submit(
    peripheral: &Peripheral,
    characteristics: &HashMap<Handle, Characteristic>,
    action: Action,
) -> Option<Event> {
    match action {
        Action::Read(handle) => {
            let characteristic = characteristics.get(&handle)?;
            match peripheral.read(characteristic).await {
                Ok(data) => Some(Event::ReadComplete {
                    handle,
                    status: GattStatus::Ok,
                    data,
                }),
                Err(e) => {
                    warn!("Error reading handle {}: {}", handle, e);
                    Some(Event::ReadComplete {
                        handle,
                        status: GattStatus::Failed,
                        data: Vec::new(),
                    })
                }
            }
        }
        Action::Write { handle, data } => {
            let characteristic = characteristics.get(&handle)?;
            match peripheral
                .write(characteristic, &data, WriteType::WithResponse)
                .await
            {
                Ok(()) => Some(Event::WriteComplete {
                    handle,
                    status: GattStatus::Ok,
                }),
                Err(e) => {
                    warn!("Error writing handle {}: {}", handle, e);
                    Some(Event::WriteComplete {
                        handle,
                        status: GattStatus::Failed,
                    })
                }
            }
        }
        Action::RegisterNotify(handle) => {
            let characteristic = characteristics.get(&handle)?;
            if let Err(e) = peripheral.subscribe(characteristic).await {
                warn!("Error subscribing to handle {}: {}", handle, e);
            }
            None
        }
    }
}
