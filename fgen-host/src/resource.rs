use std::collections::HashSet;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use log::{error, info, warn};

use crate::error::{DiscoveryError, ResourceError};
use crate::transport::ResourceManager;

/// Separator between the fields of a VISA resource string
pub const DELIMITER: &str = "::";

/// A VISA resource string split into its `::` separated tokens
///
/// e.g. `USB0::2391::9479::MY52102525::0::INSTR`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    raw: String,
    parts: Vec<String>,
}

impl ResourceIdentifier {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parts = raw.split(DELIMITER).map(str::to_owned).collect();

        Self { raw, parts }
    }

    /// The resource string exactly as it was handed in
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The interface type and board number, e.g. `USB0` or `ASRL1`
    pub fn protocol(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or_default()
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_usb(&self) -> bool {
        self.protocol().to_ascii_lowercase().starts_with("usb")
    }
}

impl Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// The identity of a USB instrument. Two identities are equal when they
/// describe the same physical interface, whichever order it was enumerated in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbIdentity {
    pub protocol: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: String,
    pub interface_id: u16,
}

impl UsbIdentity {
    /// Maps the tokens of `identifier` onto the USB fields. Any token count is
    /// accepted; a missing vendor, product or serial number is an error.
    pub fn from_identifier(identifier: &ResourceIdentifier) -> Result<Self, ResourceError> {
        let parts = identifier.parts();
        let resource = identifier.raw();

        let token = |index: usize, field: &'static str| {
            parts
                .get(index)
                .map(String::as_str)
                .ok_or_else(|| ResourceError::MissingField {
                    resource: resource.to_owned(),
                    field,
                })
        };

        let number = |index: usize, field: &'static str| -> Result<u16, ResourceError> {
            let value = token(index, field)?;
            value.parse().map_err(|_| ResourceError::Parse {
                resource: resource.to_owned(),
                field,
                value: value.to_owned(),
            })
        };

        let vendor_id = number(1, "vendor id")?;
        let product_id = number(2, "product id")?;
        let serial_number = token(3, "serial number")?.to_owned();
        let interface_id = if parts.len() == 6 {
            number(4, "interface id")?
        } else {
            0
        };

        Ok(Self {
            protocol: identifier.protocol().to_owned(),
            vendor_id,
            product_id,
            serial_number,
            interface_id,
        })
    }

    /// Parses a USB resource string, rejecting other protocols and anything
    /// that is not 5 or 6 tokens long
    pub fn parse_strict(raw: &str) -> Result<Self, ResourceError> {
        let identifier = ResourceIdentifier::new(raw);
        let tokens = identifier.parts().len();

        if !identifier.is_usb() {
            return Err(ResourceError::NotUsb(raw.to_owned()));
        }

        if tokens != 5 && tokens != 6 {
            return Err(ResourceError::InvalidFormat {
                resource: raw.to_owned(),
                tokens,
            });
        }

        Self::from_identifier(&identifier)
    }

    /// Re-encodes the identity as a fully qualified resource string
    pub fn to_resource_string(&self) -> String {
        format!(
            "{}::{}::{}::{}::{}::INSTR",
            self.protocol, self.vendor_id, self.product_id, self.serial_number, self.interface_id
        )
    }
}

impl Display for UsbIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Device: VendorID=0x{:04X}, ProductID=0x{:04X}, SN='{}'",
            self.protocol, self.vendor_id, self.product_id, self.serial_number
        )
    }
}

#[derive(Debug, Clone)]
pub struct UsbDevice {
    identifier: ResourceIdentifier,
    identity: Result<UsbIdentity, ResourceError>,
}

impl UsbDevice {
    pub fn new(identifier: ResourceIdentifier) -> Self {
        let identity = UsbIdentity::from_identifier(&identifier);

        Self {
            identifier,
            identity,
        }
    }

    pub fn identifier(&self) -> &ResourceIdentifier {
        &self.identifier
    }

    /// The parsed identity, or the reason it is absent
    pub fn identity(&self) -> Result<&UsbIdentity, &ResourceError> {
        self.identity.as_ref()
    }
}

/// An instrument found on the bus
#[derive(Debug, Clone)]
pub enum Device {
    Generic(ResourceIdentifier),
    Usb(UsbDevice),
}

/// What two devices are compared and hashed by
#[derive(Debug, PartialEq, Eq, Hash)]
enum DeviceKey<'a> {
    Usb(&'a UsbIdentity),
    Raw(&'a str),
}

impl Device {
    /// Builds the device variant matching the protocol prefix of `raw`.
    ///
    /// Malformed USB fields never fail the call: the device is still returned
    /// with its identity absent, and the parse error is logged.
    pub fn from_resource(raw: &str) -> Self {
        let identifier = ResourceIdentifier::new(raw);

        if !identifier.is_usb() {
            return Device::Generic(identifier);
        }

        let device = UsbDevice::new(identifier);

        if let Err(e) = device.identity() {
            warn!("Could not parse USB resource: {}", e);
        }

        Device::Usb(device)
    }

    pub fn identifier(&self) -> &ResourceIdentifier {
        match self {
            Device::Generic(identifier) => identifier,
            Device::Usb(device) => device.identifier(),
        }
    }

    /// The resource string handed to the transport when opening the device
    pub fn resource(&self) -> &str {
        self.identifier().raw()
    }

    pub fn protocol(&self) -> &str {
        self.identifier().protocol()
    }

    /// The reason this device cannot be used, if any
    pub fn parse_error(&self) -> Option<&ResourceError> {
        match self {
            Device::Generic(_) => None,
            Device::Usb(device) => device.identity().err(),
        }
    }

    fn key(&self) -> DeviceKey<'_> {
        match self {
            Device::Usb(device) => match device.identity() {
                Ok(identity) => DeviceKey::Usb(identity),
                Err(_) => DeviceKey::Raw(device.identifier().raw()),
            },
            Device::Generic(identifier) => DeviceKey::Raw(identifier.raw()),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Generic(identifier) => {
                write!(f, "{} Device: {}", identifier.protocol(), identifier.raw())
            }
            Device::Usb(device) => match device.identity() {
                Ok(identity) => write!(f, "{}", identity),
                Err(e) => write!(f, "{} (unusable: {})", device.identifier().raw(), e),
            },
        }
    }
}

/// Lists the resource strings known to `manager` that match `filter`.
///
/// Discovery failures are logged and reported as an empty list.
pub fn list_devices(manager: &mut dyn ResourceManager, filter: &str) -> Vec<String> {
    info!("Scanning VISA devices...");

    match manager.list_resources(filter).map_err(DiscoveryError::from) {
        Ok(resources) => resources,
        Err(e) => {
            error!("Error listing resources: {}", e);
            Vec::new()
        }
    }
}

/// Lists the devices matching `filter`, dropping duplicate enumerations of the same instrument
pub fn discover(manager: &mut dyn ResourceManager, filter: &str) -> Vec<Device> {
    let mut seen = HashSet::new();

    list_devices(manager, filter)
        .iter()
        .map(|raw| Device::from_resource(raw))
        .filter(|device| seen.insert(device.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;
    use crate::sim::SimulatedResourceManager;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn parses_six_token_usb_resource() {
        let identity = UsbIdentity::parse_strict("USB0::2391::9479::MY52102525::0::INSTR").unwrap();

        assert_eq!(identity.protocol, "USB0");
        assert_eq!(identity.vendor_id, 2391);
        assert_eq!(identity.product_id, 9479);
        assert_eq!(identity.serial_number, "MY52102525");
        assert_eq!(identity.interface_id, 0);
    }

    #[test]
    fn five_token_resource_defaults_interface_to_zero() {
        let identity = UsbIdentity::parse_strict("USB0::2391::9479::MY52102525::INSTR").unwrap();

        assert_eq!(identity.interface_id, 0);
        assert_eq!(identity.serial_number, "MY52102525");
    }

    #[test]
    fn reencoding_is_lossless() {
        for raw in [
            "USB0::2391::9479::MY52102525::INSTR",
            "USB1::1689::838::C010234::2::INSTR",
        ] {
            let identity = UsbIdentity::parse_strict(raw).unwrap();
            let reparsed = UsbIdentity::parse_strict(&identity.to_resource_string()).unwrap();

            assert_eq!(identity, reparsed);
            assert_eq!(hash_of(&identity), hash_of(&reparsed));
        }
    }

    #[test]
    fn strict_parse_rejects_wrong_token_count() {
        assert_eq!(
            UsbIdentity::parse_strict("USB0::2391::9479::INSTR"),
            Err(ResourceError::InvalidFormat {
                resource: "USB0::2391::9479::INSTR".into(),
                tokens: 4,
            })
        );
    }

    #[test]
    fn malformed_numbers_leave_identity_absent() {
        let device = Device::from_resource("USB0::0x0957::9479::MY52102525::0::INSTR");

        let Device::Usb(usb) = &device else {
            panic!("expected a USB device");
        };

        assert!(matches!(
            usb.identity(),
            Err(ResourceError::Parse {
                field: "vendor id",
                ..
            })
        ));
        assert!(device.parse_error().is_some());
        assert_eq!(device.resource(), "USB0::0x0957::9479::MY52102525::0::INSTR");
    }

    #[test]
    fn strict_parse_rejects_other_protocols() {
        assert_eq!(
            UsbIdentity::parse_strict("ASRL1::1::2::SN::INSTR"),
            Err(ResourceError::NotUsb("ASRL1::1::2::SN::INSTR".into()))
        );
    }

    #[test]
    fn malformed_product_id_leaves_identity_absent() {
        let device = Device::from_resource("USB0::2391::product::MY52102525::0::INSTR");

        assert_eq!(
            device.parse_error(),
            Some(&ResourceError::Parse {
                resource: "USB0::2391::product::MY52102525::0::INSTR".into(),
                field: "product id",
                value: "product".into(),
            })
        );
    }

    #[test]
    fn malformed_interface_id_leaves_identity_absent() {
        let device = Device::from_resource("USB0::2391::9479::MY52102525::first::INSTR");

        assert!(matches!(
            device.parse_error(),
            Some(ResourceError::Parse {
                field: "interface id",
                ..
            })
        ));
        assert_eq!(device.resource(), "USB0::2391::9479::MY52102525::first::INSTR");
    }

    #[test]
    fn factory_picks_variant_from_protocol_prefix() {
        assert!(matches!(
            Device::from_resource("usb0::1::2::SN::INSTR"),
            Device::Usb(_)
        ));
        assert!(matches!(
            Device::from_resource("ASRL/dev/ttyUSB0::INSTR"),
            Device::Generic(_)
        ));
        assert!(matches!(
            Device::from_resource("TCPIP0::10.0.0.2::5025::SOCKET"),
            Device::Generic(_)
        ));
    }

    #[test]
    fn loose_parse_accepts_short_resources_with_fields_absent() {
        let device = Device::from_resource("USB0::2391");

        assert!(matches!(
            device.parse_error(),
            Some(ResourceError::MissingField {
                field: "product id",
                ..
            })
        ));
    }

    #[test]
    fn same_instrument_compares_equal_across_spellings() {
        let a = Device::from_resource("USB0::2391::9479::MY52102525::INSTR");
        let b = Device::from_resource("USB0::2391::9479::MY52102525::0::INSTR");
        let c = Device::from_resource("USB0::2391::9479::MY52102525::1::INSTR");

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn discover_deduplicates_devices() {
        let mut manager = SimulatedResourceManager::new(vec![
            "USB0::2391::9479::MY52102525::INSTR".into(),
            "USB0::2391::9479::MY52102525::0::INSTR".into(),
            "ASRL/dev/ttyS0::INSTR".into(),
        ]);

        let devices = discover(&mut manager, "?*::INSTR");

        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn discovery_failure_yields_no_devices() {
        let mut manager = SimulatedResourceManager::new(vec!["USB0::1::2::SN::INSTR".into()]);
        manager.instrument().faults_mut().fail_list = true;

        assert!(list_devices(&mut manager, "?*").is_empty());
    }
}
