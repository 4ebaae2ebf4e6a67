//! Libvirt device XML for plugged vNICs.

use eswitch_types::{MacAddress, PciAddress};
use std::fmt::Write;

/// What a plugged vNIC looks like to the guest definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestDevice {
    /// Macvtap passthrough over a host netdev.
    Interface { mac: MacAddress, dev: String },
    /// PCI passthrough of a virtual function.
    HostDev { address: PciAddress },
}

impl GuestDevice {
    pub fn dev(&self) -> String {
        match self {
            GuestDevice::Interface { dev, .. } => dev.clone(),
            GuestDevice::HostDev { address } => address.to_string(),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        match self {
            GuestDevice::Interface { mac, dev } => {
                xml.push_str("<interface type=\"direct\">\n");
                let _ = writeln!(xml, "  <mac address=\"{mac}\"/>");
                xml.push_str("  <model type=\"virtio\"/>\n");
                let _ = writeln!(xml, "  <source dev=\"{}\" mode=\"passthrough\"/>", escape_attr(dev));
                xml.push_str("</interface>\n");
            }
            GuestDevice::HostDev { address } => {
                xml.push_str("<hostdev mode=\"subsystem\" type=\"pci\">\n");
                xml.push_str("  <source>\n");
                let _ = writeln!(
                    xml,
                    "    <address domain=\"0x{:04x}\" bus=\"0x{:02x}\" slot=\"0x{:02x}\" function=\"0x{:x}\"/>",
                    address.domain(),
                    address.bus(),
                    address.slot(),
                    address.function()
                );
                xml.push_str("  </source>\n");
                xml.push_str("</hostdev>\n");
            }
        }
        xml
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
