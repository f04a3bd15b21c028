use glob::{MatchOptions, Pattern};
use log::warn;

use crate::error::TransportError;

pub mod serial;
pub mod system;
pub mod tcp;
#[cfg(feature = "usbtmc")]
pub mod usbtmc;

/// Filter matching every resource a manager knows about
pub const ALL_RESOURCES: &str = "?*";

/// A live, message based handle to one instrument
pub trait Transport {
    /// The resource string this handle was opened for
    fn resource_name(&self) -> &str;

    /// Sends a single command, terminated the way the bus expects
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Reads one response line, without its terminator
    fn read_line(&mut self) -> Result<String, TransportError>;

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        self.read_line()
    }

    /// Releases the handle. Further calls fail.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Enumerates and opens instrument resources
pub trait ResourceManager {
    /// Lists the resource strings matching `filter`
    fn list_resources(&mut self, filter: &str) -> Result<Vec<String>, TransportError>;

    fn open_resource(&mut self, resource: &str) -> Result<Box<dyn Transport>, TransportError>;

    /// Releases the manager itself
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Matches a resource string against a VISA style filter, ignoring case.
///
/// `?` matches any single character and `*` any run of characters; the whole
/// resource has to match. A filter without either is a plain substring match,
/// so `2391::9479` selects every instrument with that vendor and product id.
/// A filter that is not a valid pattern matches nothing.
pub fn matches_filter(resource: &str, filter: &str) -> bool {
    if !filter.contains(['?', '*']) {
        return resource
            .to_ascii_lowercase()
            .contains(&filter.to_ascii_lowercase());
    }

    let pattern = match Pattern::new(filter) {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Invalid resource filter `{}`: {}", filter, e);
            return false;
        }
    };

    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    pattern.matches_with(resource, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_filters_match_whole_resource() {
        assert!(matches_filter("USB0::2391::9479::MY52102525::INSTR", "?*::INSTR"));
        assert!(matches_filter("USB0::2391::9479::MY52102525::INSTR", "usb?*"));
        assert!(!matches_filter("TCPIP0::10.0.0.2::5025::SOCKET", "?*::INSTR"));
        assert!(matches_filter("ASRL/dev/ttyUSB0::INSTR", "ASRL*"));
        assert!(!matches_filter("", "?*"));
        assert!(matches_filter("", "*"));
    }

    #[test]
    fn plain_filters_are_substring_matches() {
        assert!(matches_filter("USB0::2391::9479::MY52102525::INSTR", "2391::9479"));
        assert!(matches_filter("USB0::2391::9479::MY52102525::INSTR", "USB"));
        assert!(!matches_filter("ASRL/dev/ttyS0::INSTR", "USB"));
    }

    #[test]
    fn invalid_patterns_match_nothing() {
        assert!(!matches_filter("USB0::2391::9479::MY52102525::INSTR", "USB[*"));
    }
}
