use std::time::Duration;

use log::{debug, info, warn};
use rusb::{Device, DeviceHandle, Direction, GlobalContext, TransferType};

use crate::error::TransportError;
use crate::resource::{ResourceIdentifier, UsbIdentity};
use crate::transport::Transport;

// USB Test & Measurement Class
const CLASS_APPLICATION: u8 = 0xFE;
const SUBCLASS_TMC: u8 = 0x03;

const DEV_DEP_MSG_OUT: u8 = 1;
const REQUEST_DEV_DEP_MSG_IN: u8 = 2;

const HEADER_SIZE: usize = 12;
const MAX_TRANSFER_SIZE: u32 = 4096;

struct Endpoints {
    interface: u8,
    bulk_in: u8,
    bulk_out: u8,
}

/// A USBTMC interface opened through libusb
pub struct UsbTmcTransport {
    resource: String,
    handle: Option<DeviceHandle<GlobalContext>>,
    endpoints: Endpoints,
    tag: u8,
    timeout: Duration,
}

impl UsbTmcTransport {
    pub fn open(resource: &str, timeout: Duration) -> Result<Self, TransportError> {
        let identity = UsbIdentity::from_identifier(&ResourceIdentifier::new(resource))
            .map_err(|_| TransportError::Unsupported(resource.to_owned()))?;

        for device in rusb::devices()?.iter() {
            let descriptor = device.device_descriptor()?;

            if descriptor.vendor_id() != identity.vendor_id
                || descriptor.product_id() != identity.product_id
            {
                continue;
            }

            let Some(endpoints) = find_endpoints(&device, identity.interface_id)? else {
                continue;
            };

            let mut handle = device.open()?;
            let serial = handle
                .read_serial_number_string_ascii(&descriptor)
                .unwrap_or_default();

            if serial != identity.serial_number {
                continue;
            }

            // Not every platform can detach the kernel driver, claiming may still work
            if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
                debug!("Unable to auto detach kernel driver: {}", e);
            }
            handle.claim_interface(endpoints.interface)?;

            info!("Claimed USBTMC interface {} on {:?}", endpoints.interface, device);

            return Ok(Self {
                resource: resource.to_owned(),
                handle: Some(handle),
                endpoints,
                tag: 0,
                timeout,
            });
        }

        Err(TransportError::ResourceNotFound(resource.to_owned()))
    }

    fn next_tag(&mut self) -> u8 {
        // bTag 0 is reserved
        self.tag = self.tag.wrapping_add(1).max(1);
        self.tag
    }

    fn header(&mut self, message_id: u8, transfer_size: u32, attributes: u8) -> [u8; HEADER_SIZE] {
        let tag = self.next_tag();
        let size = transfer_size.to_le_bytes();

        [
            message_id, tag, !tag, 0x00, size[0], size[1], size[2], size[3], attributes, 0x00,
            0x00, 0x00,
        ]
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>, TransportError> {
        self.handle.as_ref().ok_or(TransportError::Usb(rusb::Error::NoDevice))
    }
}

impl Transport for UsbTmcTransport {
    fn resource_name(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let mut payload = command.as_bytes().to_vec();
        payload.push(b'\n');

        // End of message flag set, the whole command goes out in one transfer
        let mut message = self.header(DEV_DEP_MSG_OUT, payload.len() as u32, 0x01).to_vec();
        message.extend_from_slice(&payload);
        while message.len() % 4 != 0 {
            message.push(0);
        }

        let handle = self.handle()?;
        handle.write_bulk(self.endpoints.bulk_out, &message, self.timeout)?;

        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut response = Vec::new();

        loop {
            let request = self.header(REQUEST_DEV_DEP_MSG_IN, MAX_TRANSFER_SIZE, 0x00);
            let handle = self.handle()?;
            handle.write_bulk(self.endpoints.bulk_out, &request, self.timeout)?;

            let mut buf = vec![0u8; HEADER_SIZE + MAX_TRANSFER_SIZE as usize];
            let read = handle.read_bulk(self.endpoints.bulk_in, &mut buf, self.timeout)?;

            if read < HEADER_SIZE {
                return Err(TransportError::MalformedResponse {
                    resource: self.resource.clone(),
                    reason: format!("short USBTMC header ({} bytes)", read),
                });
            }

            let size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
            let end = (HEADER_SIZE + size).min(read);
            response.extend_from_slice(&buf[HEADER_SIZE..end]);

            if buf[8] & 0x01 != 0 {
                break;
            }
        }

        let text = String::from_utf8(response).map_err(|e| TransportError::MalformedResponse {
            resource: self.resource.clone(),
            reason: e.to_string(),
        })?;

        Ok(text.trim_end_matches(['\r', '\n']).to_owned())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut handle) = self.handle.take() {
            handle.release_interface(self.endpoints.interface)?;
        }

        Ok(())
    }
}

fn find_endpoints(
    device: &Device<GlobalContext>,
    interface_id: u16,
) -> Result<Option<Endpoints>, TransportError> {
    let config = device.active_config_descriptor()?;

    for interface in config.interfaces() {
        for setting in interface.descriptors() {
            if setting.class_code() != CLASS_APPLICATION
                || setting.sub_class_code() != SUBCLASS_TMC
                || u16::from(setting.interface_number()) != interface_id
            {
                continue;
            }

            let mut bulk_in = None;
            let mut bulk_out = None;

            for endpoint in setting.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }

                match endpoint.direction() {
                    Direction::In => bulk_in = Some(endpoint.address()),
                    Direction::Out => bulk_out = Some(endpoint.address()),
                }
            }

            if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
                return Ok(Some(Endpoints {
                    interface: setting.interface_number(),
                    bulk_in,
                    bulk_out,
                }));
            }
        }
    }

    Ok(None)
}

/// Lists every USBTMC interface on the bus as `USB0::<vid>::<pid>::<serial>::<iface>::INSTR`
pub fn list_resources() -> Result<Vec<String>, TransportError> {
    let mut resources = Vec::new();

    for device in rusb::devices()?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        let Ok(config) = device.active_config_descriptor() else {
            continue;
        };

        for interface in config.interfaces() {
            let Some(setting) = interface.descriptors().find(|setting| {
                setting.class_code() == CLASS_APPLICATION
                    && setting.sub_class_code() == SUBCLASS_TMC
            }) else {
                continue;
            };

            let serial = match device.open() {
                Ok(handle) => handle
                    .read_serial_number_string_ascii(&descriptor)
                    .unwrap_or_default(),
                Err(e) => {
                    warn!("Unable to open {:?} to read its serial number: {}", device, e);
                    continue;
                }
            };

            let identity = UsbIdentity {
                protocol: "USB0".to_owned(),
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                serial_number: serial,
                interface_id: u16::from(setting.interface_number()),
            };

            resources.push(identity.to_resource_string());
        }
    }

    Ok(resources)
}
