// ── Configuration entity tree ──
//
// The authoritative Stream → IoCard → Interface → Device hierarchy.
// Structural mutation is synchronous and immediately visible to observers
// through a watch channel; nothing here talks to the device. Persistence is
// the caller's job via the edit-session protocol in `console.rs`.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::CoreError;
use crate::model::{
    CalculatorConfig, Device, DeviceConfig, DeviceType, HartAddressing, HartVariableType,
    Interface, InterfaceConfig, InterfaceType, Stream,
};

// ── Device id derivation ─────────────────────────────────────────────

/// Protocol-specific parameters for adding a device. Only HART interfaces
/// require anything here.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewDeviceParams {
    pub polling_address: Option<u8>,
    pub variable_type: Option<HartVariableType>,
}

/// Derive the id a new device on `interface` would get.
///
/// Policy, by interface type:
/// - single-device interfaces (digital input, temperature input): the device
///   id is the interface id;
/// - HART: `{interface_id}T{ordinal}{variable_code}{polling_address:02}`,
///   e.g. `HI1T1P04`; polling address and variable type are required, never
///   defaulted;
/// - everything else (Modbus, analog input): `{interface_id}D{n}` with `n`
///   one past the existing device count.
pub fn derive_device_id(
    interface: &Interface,
    params: &NewDeviceParams,
) -> Result<String, CoreError> {
    match interface.config.interface_type() {
        InterfaceType::DigitalInput | InterfaceType::TemperatureInput => Ok(interface.id.clone()),
        InterfaceType::Hart => {
            let polling_address = params
                .polling_address
                .ok_or_else(|| CoreError::validation("polling_address", "required for HART devices"))?;
            let variable_type = params
                .variable_type
                .ok_or_else(|| CoreError::validation("variable_type", "required for HART devices"))?;
            let ordinal = interface.devices.len() + 1;
            Ok(format!(
                "{}T{}{}{:02}",
                interface.id,
                ordinal,
                variable_type.code(),
                polling_address
            ))
        }
        InterfaceType::Modbus | InterfaceType::AnalogInput => {
            Ok(format!("{}D{}", interface.id, interface.devices.len() + 1))
        }
    }
}

/// Which device types an interface may host, as a pure function of the
/// interface id prefix. Used to filter the type choices offered before a
/// device config is even opened.
pub fn eligible_device_types(interface_id: &str) -> &'static [DeviceType] {
    match InterfaceType::from_interface_id(interface_id) {
        Some(InterfaceType::TemperatureInput) => &[DeviceType::Temperature],
        Some(InterfaceType::DigitalInput) => &[DeviceType::Volume],
        Some(InterfaceType::Hart) => &[
            DeviceType::Temperature,
            DeviceType::Pressure,
            DeviceType::FlowRate,
        ],
        Some(InterfaceType::AnalogInput) => &[DeviceType::Temperature, DeviceType::Pressure],
        Some(InterfaceType::Modbus) => &[
            DeviceType::Temperature,
            DeviceType::Pressure,
            DeviceType::Volume,
            DeviceType::FlowRate,
            DeviceType::GasComponents,
        ],
        None => &[],
    }
}

// ── EntityTree ───────────────────────────────────────────────────────

/// Shared, observable owner of the configuration hierarchy.
///
/// Reads return cloned values; every mutation publishes a fresh snapshot
/// through the watch channel.
pub struct EntityTree {
    streams: Mutex<Vec<Stream>>,
    snapshot_tx: watch::Sender<Arc<Vec<Stream>>>,
}

impl EntityTree {
    /// Build the tree from the fixed stream list known at startup.
    pub fn new(streams: Vec<Stream>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(streams.clone()));
        Self {
            streams: Mutex::new(streams),
            snapshot_tx,
        }
    }

    /// Current state of the whole hierarchy.
    pub fn snapshot(&self) -> Arc<Vec<Stream>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Observe mutations. Each structural or config change publishes a new
    /// snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Stream>>> {
        self.snapshot_tx.subscribe()
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn stream(&self, stream_id: &str) -> Result<Stream, CoreError> {
        self.read(|streams| find_stream(streams, stream_id).cloned())
    }

    pub fn interface(&self, stream_id: &str, interface_id: &str) -> Result<Interface, CoreError> {
        self.read(|streams| {
            let stream = find_stream(streams, stream_id)?;
            find_interface(stream, interface_id).cloned()
        })
    }

    pub fn device(
        &self,
        stream_id: &str,
        interface_id: &str,
        device_id: &str,
    ) -> Result<Device, CoreError> {
        self.read(|streams| {
            let stream = find_stream(streams, stream_id)?;
            let interface = find_interface(stream, interface_id)?;
            interface
                .devices
                .iter()
                .find(|d| d.id == device_id)
                .cloned()
                .ok_or_else(|| CoreError::DeviceNotFound(device_id.into()))
        })
    }

    // ── Structural mutation ──────────────────────────────────────────

    /// Add an interface to an I/O card. The id is generated from the type
    /// prefix and a per-stream ordinal (`MB1`, `MB2`, `HI1`, ...).
    pub fn add_interface(
        &self,
        stream_id: &str,
        io_card_id: &str,
        config: InterfaceConfig,
    ) -> Result<Interface, CoreError> {
        self.mutate(|streams| {
            let stream = find_stream_mut(streams, stream_id)?;

            let prefix = config.interface_type().id_prefix();
            let ordinal = stream
                .io_cards
                .iter()
                .flat_map(|c| &c.interfaces)
                .filter(|i| i.id.starts_with(prefix))
                .count()
                + 1;

            let card = stream
                .io_cards
                .iter_mut()
                .find(|c| c.id == io_card_id)
                .ok_or_else(|| CoreError::IoCardNotFound(io_card_id.into()))?;

            let interface = Interface {
                id: format!("{prefix}{ordinal}"),
                config,
                devices: Vec::new(),
            };
            card.interfaces.push(interface.clone());
            Ok(interface)
        })
    }

    /// Derive an id and add a device in one step. Enforces type
    /// eligibility, single-device occupancy, and HART addressing rules.
    pub fn create_device(
        &self,
        stream_id: &str,
        interface_id: &str,
        config: DeviceConfig,
        params: NewDeviceParams,
    ) -> Result<Device, CoreError> {
        self.mutate(|streams| {
            let stream = find_stream_mut(streams, stream_id)?;
            let interface = find_interface_mut(stream, interface_id)?;
            let device = build_device(interface, config, params)?;
            interface.devices.push(device.clone());
            Ok(device)
        })
    }

    /// Insert an already-built device (id included), checking the same
    /// structural rules. Used when the id was derived up front so the save
    /// command could carry it.
    pub fn add_device(
        &self,
        stream_id: &str,
        interface_id: &str,
        device: Device,
    ) -> Result<(), CoreError> {
        self.mutate(|streams| {
            let stream = find_stream_mut(streams, stream_id)?;
            let interface = find_interface_mut(stream, interface_id)?;
            check_hosting_rules(interface, device.config.device_type())?;
            if interface.devices.iter().any(|d| d.id == device.id) {
                return Err(CoreError::DuplicateDevice(device.id));
            }
            interface.devices.push(device);
            Ok(())
        })
    }

    pub fn remove_device(
        &self,
        stream_id: &str,
        interface_id: &str,
        device_id: &str,
    ) -> Result<(), CoreError> {
        self.mutate(|streams| {
            let stream = find_stream_mut(streams, stream_id)?;
            let interface = find_interface_mut(stream, interface_id)?;
            let before = interface.devices.len();
            interface.devices.retain(|d| d.id != device_id);
            if interface.devices.len() == before {
                return Err(CoreError::DeviceNotFound(device_id.into()));
            }
            Ok(())
        })
    }

    // ── Config replacement (commit targets) ──────────────────────────

    pub fn replace_calculator(
        &self,
        stream_id: &str,
        calculator: CalculatorConfig,
    ) -> Result<(), CoreError> {
        self.mutate(|streams| {
            find_stream_mut(streams, stream_id)?.calculator = calculator;
            Ok(())
        })
    }

    pub fn replace_interface_config(
        &self,
        stream_id: &str,
        interface_id: &str,
        config: InterfaceConfig,
    ) -> Result<(), CoreError> {
        self.mutate(|streams| {
            let stream = find_stream_mut(streams, stream_id)?;
            find_interface_mut(stream, interface_id)?.config = config;
            Ok(())
        })
    }

    pub fn replace_device_config(
        &self,
        stream_id: &str,
        interface_id: &str,
        device_id: &str,
        config: DeviceConfig,
    ) -> Result<(), CoreError> {
        self.mutate(|streams| {
            let stream = find_stream_mut(streams, stream_id)?;
            let interface = find_interface_mut(stream, interface_id)?;
            let device = interface
                .devices
                .iter_mut()
                .find(|d| d.id == device_id)
                .ok_or_else(|| CoreError::DeviceNotFound(device_id.into()))?;
            device.config = config;
            Ok(())
        })
    }

    /// Replace the whole hierarchy from a device state snapshot.
    pub fn replace_all(&self, streams: Vec<Stream>) {
        let mut guard = self.lock();
        *guard = streams;
        self.snapshot_tx.send_replace(Arc::new(guard.clone()));
    }

    // ── Internals ────────────────────────────────────────────────────

    fn read<R>(
        &self,
        f: impl FnOnce(&[Stream]) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        f(&self.lock())
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Vec<Stream>) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let mut guard = self.lock();
        let result = f(&mut guard)?;
        // send_replace: the stored snapshot must advance even when nobody
        // subscribed, since `snapshot()` reads the watch value.
        self.snapshot_tx.send_replace(Arc::new(guard.clone()));
        Ok(result)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Stream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Lookup helpers ───────────────────────────────────────────────────

fn find_stream<'a>(streams: &'a [Stream], id: &str) -> Result<&'a Stream, CoreError> {
    streams
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| CoreError::StreamNotFound(id.into()))
}

fn find_stream_mut<'a>(streams: &'a mut [Stream], id: &str) -> Result<&'a mut Stream, CoreError> {
    streams
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| CoreError::StreamNotFound(id.into()))
}

fn find_interface<'a>(stream: &'a Stream, id: &str) -> Result<&'a Interface, CoreError> {
    stream
        .io_cards
        .iter()
        .flat_map(|c| &c.interfaces)
        .find(|i| i.id == id)
        .ok_or_else(|| CoreError::InterfaceNotFound(id.into()))
}

fn find_interface_mut<'a>(stream: &'a mut Stream, id: &str) -> Result<&'a mut Interface, CoreError> {
    stream
        .io_cards
        .iter_mut()
        .flat_map(|c| &mut c.interfaces)
        .find(|i| i.id == id)
        .ok_or_else(|| CoreError::InterfaceNotFound(id.into()))
}

/// Eligibility + occupancy checks shared by both insertion paths.
fn check_hosting_rules(interface: &Interface, device_type: DeviceType) -> Result<(), CoreError> {
    if !eligible_device_types(&interface.id).contains(&device_type) {
        return Err(CoreError::IneligibleDevice {
            interface_id: interface.id.clone(),
            device_type,
        });
    }
    if interface.config.interface_type().is_single_device() && !interface.devices.is_empty() {
        return Err(CoreError::InterfaceOccupied(interface.id.clone()));
    }
    Ok(())
}

/// Validate hosting rules, derive the id, and assemble the device value.
pub(crate) fn build_device(
    interface: &Interface,
    config: DeviceConfig,
    params: NewDeviceParams,
) -> Result<Device, CoreError> {
    check_hosting_rules(interface, config.device_type())?;
    let id = derive_device_id(interface, &params)?;
    if interface.devices.iter().any(|d| d.id == id) {
        return Err(CoreError::DuplicateDevice(id));
    }

    let hart = match interface.config.interface_type() {
        InterfaceType::Hart => match (params.polling_address, params.variable_type) {
            (Some(polling_address), Some(variable_type)) => Some(HartAddressing {
                polling_address,
                variable_type,
            }),
            // derive_device_id already rejected this
            _ => None,
        },
        _ => None,
    };

    Ok(Device { id, config, hart })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InterfaceConfig, InterfaceType, IoCard};
    use pretty_assertions::assert_eq;

    fn temperature_config(tag: &str) -> DeviceConfig {
        DeviceConfig::Temperature {
            tag: tag.into(),
            low_limit: -20.0,
            high_limit: 60.0,
            substitute_value: None,
        }
    }

    fn volume_config(tag: &str) -> DeviceConfig {
        DeviceConfig::Volume {
            tag: tag.into(),
            pulse_value: 0.1,
            meter_factor: 1.0,
        }
    }

    /// One stream `S1` with card `C1` hosting a Modbus, a HART, a
    /// temperature-input, and a digital-input interface.
    fn test_tree() -> EntityTree {
        let mut stream = Stream::new("S1", "Export gas");
        let mut card = IoCard::new("C1");
        for t in [
            InterfaceType::Modbus,
            InterfaceType::Hart,
            InterfaceType::TemperatureInput,
            InterfaceType::DigitalInput,
        ] {
            card.interfaces.push(Interface {
                id: format!("{}1", t.id_prefix()),
                config: InterfaceConfig::default_for(t),
                devices: Vec::new(),
            });
        }
        stream.io_cards.push(card);
        EntityTree::new(vec![stream])
    }

    // ── Id derivation ────────────────────────────────────────────────

    #[test]
    fn modbus_ids_use_one_based_device_count() {
        let tree = test_tree();
        for expected in ["MB1D1", "MB1D2", "MB1D3"] {
            let device = tree
                .create_device("S1", "MB1", temperature_config("TT"), NewDeviceParams::default())
                .expect("modbus device");
            assert_eq!(device.id, expected);
        }
    }

    #[test]
    fn hart_ids_encode_ordinal_variable_and_polling_address() {
        let tree = test_tree();

        let first = tree
            .create_device(
                "S1",
                "HI1",
                DeviceConfig::Pressure {
                    tag: "PT-101".into(),
                    low_limit: 0.0,
                    high_limit: 100.0,
                    substitute_value: None,
                },
                NewDeviceParams {
                    polling_address: Some(4),
                    variable_type: Some(HartVariableType::Pressure),
                },
            )
            .expect("first hart device");
        assert_eq!(first.id, "HI1T1P04");

        let second = tree
            .create_device(
                "S1",
                "HI1",
                temperature_config("TT-102"),
                NewDeviceParams {
                    polling_address: Some(7),
                    variable_type: Some(HartVariableType::Temperature),
                },
            )
            .expect("second hart device");
        assert_eq!(second.id, "HI1T2T07");
    }

    #[test]
    fn hart_add_without_addressing_is_rejected_before_id_generation() {
        let tree = test_tree();

        let missing_address = tree.create_device(
            "S1",
            "HI1",
            temperature_config("TT"),
            NewDeviceParams {
                polling_address: None,
                variable_type: Some(HartVariableType::Temperature),
            },
        );
        assert!(matches!(
            missing_address,
            Err(CoreError::Validation { ref field, .. }) if field == "polling_address"
        ));

        let missing_variable = tree.create_device(
            "S1",
            "HI1",
            temperature_config("TT"),
            NewDeviceParams {
                polling_address: Some(4),
                variable_type: None,
            },
        );
        assert!(matches!(
            missing_variable,
            Err(CoreError::Validation { ref field, .. }) if field == "variable_type"
        ));

        // Neither failed add left anything behind.
        assert!(tree.interface("S1", "HI1").expect("interface").devices.is_empty());
    }

    #[test]
    fn single_device_interface_reuses_interface_id_and_fills_up() {
        let tree = test_tree();

        let device = tree
            .create_device("S1", "TI1", temperature_config("TT-201"), NewDeviceParams::default())
            .expect("rtd device");
        assert_eq!(device.id, "TI1");

        let second = tree.create_device(
            "S1",
            "TI1",
            temperature_config("TT-202"),
            NewDeviceParams::default(),
        );
        assert!(matches!(second, Err(CoreError::InterfaceOccupied(_))));
    }

    // ── Eligibility ──────────────────────────────────────────────────

    #[test]
    fn eligibility_is_a_pure_function_of_the_id_prefix() {
        assert_eq!(eligible_device_types("TI3"), &[DeviceType::Temperature]);
        assert_eq!(eligible_device_types("DI1"), &[DeviceType::Volume]);
        assert!(eligible_device_types("MB2").contains(&DeviceType::GasComponents));
        assert!(!eligible_device_types("HI1").contains(&DeviceType::Volume));
        assert!(eligible_device_types("ZZ9").is_empty());
    }

    #[test]
    fn ineligible_device_type_is_refused() {
        let tree = test_tree();
        let result = tree.create_device(
            "S1",
            "DI1",
            temperature_config("TT"),
            NewDeviceParams::default(),
        );
        assert!(matches!(
            result,
            Err(CoreError::IneligibleDevice { ref interface_id, .. }) if interface_id == "DI1"
        ));

        let volume = tree
            .create_device("S1", "DI1", volume_config("FQ-301"), NewDeviceParams::default())
            .expect("volume device on digital input");
        assert_eq!(volume.id, "DI1");
    }

    // ── Structural operations ────────────────────────────────────────

    #[test]
    fn interface_ids_count_per_type_within_the_stream() {
        let tree = test_tree();

        let mb = tree
            .add_interface("S1", "C1", InterfaceConfig::default_for(InterfaceType::Modbus))
            .expect("second modbus interface");
        assert_eq!(mb.id, "MB2");

        let hart = tree
            .add_interface("S1", "C1", InterfaceConfig::default_for(InterfaceType::Hart))
            .expect("second hart interface");
        assert_eq!(hart.id, "HI2");
    }

    #[test]
    fn remove_device_deletes_exactly_the_target() {
        let tree = test_tree();
        tree.create_device("S1", "MB1", temperature_config("A"), NewDeviceParams::default())
            .expect("first");
        tree.create_device("S1", "MB1", temperature_config("B"), NewDeviceParams::default())
            .expect("second");

        tree.remove_device("S1", "MB1", "MB1D1").expect("remove");

        let interface = tree.interface("S1", "MB1").expect("interface");
        assert_eq!(interface.devices.len(), 1);
        assert_eq!(interface.devices[0].id, "MB1D2");

        assert!(matches!(
            tree.remove_device("S1", "MB1", "MB1D1"),
            Err(CoreError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn mutations_publish_snapshots() {
        let tree = test_tree();
        let mut rx = tree.subscribe();

        tree.create_device("S1", "MB1", temperature_config("TT"), NewDeviceParams::default())
            .expect("create");

        let snapshot = rx.borrow_and_update().clone();
        let devices = &snapshot[0].io_cards[0]
            .interfaces
            .iter()
            .find(|i| i.id == "MB1")
            .expect("MB1")
            .devices;
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn snapshot_advances_without_any_subscriber() {
        let tree = test_tree();

        tree.create_device("S1", "MB1", temperature_config("TT"), NewDeviceParams::default())
            .expect("create");

        // Nobody ever called subscribe(); the stored snapshot must still
        // reflect the committed mutation.
        let snapshot = tree.snapshot();
        let devices = &snapshot[0].io_cards[0]
            .interfaces
            .iter()
            .find(|i| i.id == "MB1")
            .expect("MB1")
            .devices;
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn failed_mutations_do_not_publish() {
        let tree = test_tree();
        let mut rx = tree.subscribe();
        rx.borrow_and_update();

        let _ = tree.create_device(
            "S1",
            "DI1",
            temperature_config("TT"),
            NewDeviceParams::default(),
        );
        assert!(!rx.has_changed().expect("sender alive"));
    }
}
