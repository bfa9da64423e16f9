use gattlink::gatt::{AttributeHandle, CccdValue, DescriptorHandle, Phy, PhyMask, PhyOptions};
use gattlink::uuid::CLIENT_CHARACTERISTIC_CONFIG;
use gattlink::{
    BdAddr, Characteristic, CharacteristicProperties, ControllerConfig, Descriptor, EventSink,
    GattController, GattEvent, GattStatus, Service, Submission, Transport, TransportError,
    TransportEvent, Uuid, WriteMode,
};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const UART_SERVICE: Uuid = Uuid::from_u16(0xFFE0);
const UART_DATA: Uuid = Uuid::from_u16(0xFFE1);
const UART_DATA_HANDLE: AttributeHandle = AttributeHandle(0x0010);
const UART_CCCD_HANDLE: DescriptorHandle = DescriptorHandle(0x0011);

/// An in-process peripheral with one read/write/notify characteristic
#[derive(Default)]
struct SimulatedPeripheral {
    sink: Mutex<Option<EventSink>>,
    values: Mutex<HashMap<AttributeHandle, Vec<u8>>>,
    notifying: Mutex<bool>,
    connected: Mutex<bool>,
}

impl SimulatedPeripheral {
    fn attach(&self, sink: EventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn post(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.post(event);
        }
    }

    fn linked(&self) -> Submission {
        if *self.connected.lock().unwrap() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Transport for SimulatedPeripheral {
    fn start_scan(&self) -> Submission {
        self.post(TransportEvent::ScanResult {
            address: BdAddr::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]),
            rssi: -58,
            advertising_data: vec![
                0x02, 0x01, 0x06, // flags
                0x06, 0x09, b'S', b'i', b'm', b'L', b'E', // name
                0x03, 0x03, 0xE0, 0xFF, // 16-bit services
            ],
        });
        Ok(())
    }

    fn stop_scan(&self) {}

    fn connect(&self, _address: BdAddr) -> Submission {
        *self.connected.lock().unwrap() = true;
        self.post(TransportEvent::LinkUp);
        Ok(())
    }

    fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
        *self.notifying.lock().unwrap() = false;
    }

    fn discover_services(&self) -> Submission {
        self.linked()?;
        self.post(TransportEvent::ServicesDiscovered {
            services: vec![Service {
                uuid: UART_SERVICE,
                is_primary: true,
                characteristics: vec![Characteristic {
                    uuid: UART_DATA,
                    handle: UART_DATA_HANDLE,
                    properties: CharacteristicProperties::READ
                        | CharacteristicProperties::WRITE
                        | CharacteristicProperties::NOTIFY,
                    descriptors: vec![Descriptor {
                        uuid: CLIENT_CHARACTERISTIC_CONFIG,
                        handle: UART_CCCD_HANDLE,
                    }],
                }],
            }],
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn read_characteristic(&self, handle: AttributeHandle) -> Submission {
        self.linked()?;
        let value = self
            .values
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .unwrap_or_default();
        self.post(TransportEvent::CharacteristicRead {
            handle,
            value,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        handle: AttributeHandle,
        value: &[u8],
        _mode: WriteMode,
    ) -> Submission {
        self.linked()?;
        self.values
            .lock()
            .unwrap()
            .entry(handle)
            .or_default()
            .extend_from_slice(value);
        self.post(TransportEvent::CharacteristicWrite {
            handle,
            status: GattStatus::SUCCESS,
        });
        // Echo each fragment back while notifications are on
        if *self.notifying.lock().unwrap() {
            self.post(TransportEvent::Notification {
                handle,
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    fn read_descriptor(&self, handle: DescriptorHandle) -> Submission {
        self.linked()?;
        let value = if *self.notifying.lock().unwrap() {
            CccdValue::Notify
        } else {
            CccdValue::Disabled
        };
        self.post(TransportEvent::DescriptorRead {
            handle,
            value: value.to_bytes(),
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn write_descriptor(&self, handle: DescriptorHandle, value: &[u8]) -> Submission {
        self.linked()?;
        *self.notifying.lock().unwrap() = CccdValue::parse(value) == Some(CccdValue::Notify);
        self.post(TransportEvent::DescriptorWrite {
            handle,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn request_mtu(&self, mtu: u16) -> Submission {
        self.linked()?;
        self.post(TransportEvent::MtuChanged {
            mtu: mtu.min(64),
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn set_preferred_phy(&self, _tx: PhyMask, _rx: PhyMask, _options: PhyOptions) -> Submission {
        self.linked()?;
        self.post(TransportEvent::PhyUpdated {
            tx: Phy::Le2M,
            rx: Phy::Le2M,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn read_phy(&self) -> Submission {
        self.linked()?;
        self.post(TransportEvent::PhyRead {
            tx: Phy::Le2M,
            rx: Phy::Le2M,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn read_remote_rssi(&self) -> Submission {
        self.linked()?;
        self.post(TransportEvent::RemoteRssi {
            rssi: -55,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .format_timestamp_millis()
        .init();

    let peripheral = Arc::new(SimulatedPeripheral::default());
    let (tx, events) = mpsc::channel();

    let config = ControllerConfig::default().with_requested_mtu(247);
    let controller = GattController::new(peripheral.clone(), tx, config)?;
    peripheral.attach(controller.event_sink());

    println!("Scanning...");
    controller.start_scan()?;

    loop {
        let event = match events.recv_timeout(Duration::from_secs(2)) {
            Ok(event) => event,
            Err(_) => break,
        };

        match event {
            GattEvent::ScanResult(record) => {
                println!(
                    "Device found: {} (RSSI: {}) name={:?} services={:?}",
                    record.address,
                    record.rssi,
                    record.name,
                    record
                        .service_uuids
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                );
                controller.stop_scan();
                println!("Connecting to {}...", record.address);
                controller.connect(record.address)?;
            }
            GattEvent::Connected { address } => println!("Connected to {}", address),
            GattEvent::ServicesDiscovered(Ok(services)) => {
                for service in &services {
                    println!("Service {}", service.uuid);
                    for characteristic in &service.characteristics {
                        println!(
                            "  Characteristic {} handle {} properties {:?}",
                            characteristic.uuid, characteristic.handle, characteristic.properties
                        );
                    }
                }
                controller.set_notify(UART_SERVICE, UART_DATA, true)?;
                controller.write_characteristic(
                    UART_SERVICE,
                    UART_DATA,
                    b"The quick brown fox jumps over the lazy dog. ".repeat(3),
                    WriteMode::WithResponse,
                )?;
                controller.read_characteristic(UART_SERVICE, UART_DATA)?;
                controller.read_remote_rssi()?;
            }
            GattEvent::MtuChanged(result) => println!("MTU: {:?}", result),
            GattEvent::DescriptorWrite { descriptor, result, .. } => {
                println!("Descriptor {} written: {:?}", descriptor, result.map(hex::encode));
            }
            GattEvent::Notification { value, .. } => {
                println!("Notification: {}", String::from_utf8_lossy(&value));
            }
            GattEvent::CharacteristicWrite { result, .. } => match result {
                Ok(value) => println!("Wrote {} bytes at MTU {}", value.len(), controller.mtu()),
                Err(err) => println!("Write failed: {}", err),
            },
            GattEvent::CharacteristicRead { result, .. } => {
                if let Ok(value) = result {
                    println!("Read back {} bytes", value.len());
                }
            }
            GattEvent::RemoteRssi(result) => {
                println!("RSSI: {:?}", result);
                controller.disconnect();
            }
            GattEvent::Disconnected { address } => {
                println!("Disconnected from {}", address);
                break;
            }
            other => println!("{:?}", other),
        }
    }

    Ok(())
}
