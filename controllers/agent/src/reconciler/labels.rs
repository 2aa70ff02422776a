//! Inventory labels and the version annotation written on Agents.

use assisted_client::Inventory;
use std::collections::BTreeMap;

/// Value of the `<prefix>version` annotation
pub const INVENTORY_VERSION: &str = "0.1";

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Labels derived from the host inventory, keyed with `prefix`
pub fn inventory_labels(prefix: &str, inventory: &Inventory) -> BTreeMap<String, String> {
    let non_rotational = inventory.disks.iter().any(|d| d.drive_type.eq_ignore_ascii_case("SSD"));
    let virt_enabled = inventory.cpu.flags.iter().any(|f| f == "vmx" || f == "svm");

    [
        ("storage-hasnonrotationaldisk", non_rotational.to_string()),
        ("cpu-architecture", inventory.cpu.architecture.clone()),
        ("cpu-virtenabled", virt_enabled.to_string()),
        ("host-manufacturer", strip_whitespace(&inventory.system_vendor.manufacturer)),
        ("host-productname", strip_whitespace(&inventory.system_vendor.product_name)),
        ("host-isvirtual", inventory.system_vendor.is_virtual.to_string()),
    ]
    .into_iter()
    .map(|(name, value)| (format!("{}{}", prefix, name), sanitize_label_value(value)))
    .collect()
}

pub fn inventory_annotations(prefix: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(format!("{}version", prefix), INVENTORY_VERSION.to_string())])
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Kubernetes label value syntax; anything else is replaced by ""
fn sanitize_label_value(value: String) -> String {
    if is_valid_label_value(&value) {
        value
    } else {
        String::new()
    }
}

pub fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return false;
    }
    let bytes = value.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_alphanumeric();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// True when every desired entry is already present with the same value
pub fn contains_all(current: Option<&BTreeMap<String, String>>, desired: &BTreeMap<String, String>) -> bool {
    desired
        .iter()
        .all(|(k, v)| current.and_then(|c| c.get(k)) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assisted_client::{Cpu, Disk, SystemVendor};

    const PREFIX: &str = "inventory.agent-install.openshift.io/";

    fn inventory() -> Inventory {
        Inventory {
            cpu: Cpu {
                architecture: "x86_64".to_string(),
                flags: vec!["fpu".to_string(), "vmx".to_string()],
                ..Default::default()
            },
            system_vendor: SystemVendor {
                manufacturer: "Red Hat".to_string(),
                product_name: "KVM (RHEL 8.4.0 PC (Q35 + ICH9, 2009))".to_string(),
                is_virtual: true,
                ..Default::default()
            },
            disks: vec![
                Disk {
                    id: "/dev/sda".to_string(),
                    drive_type: "HDD".to_string(),
                    ..Default::default()
                },
                Disk {
                    id: "/dev/nvme0n1".to_string(),
                    drive_type: "SSD".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_inventory_labels() {
        let labels = inventory_labels(PREFIX, &inventory());
        let get = |name: &str| labels.get(&format!("{}{}", PREFIX, name)).map(String::as_str);
        assert_eq!(get("storage-hasnonrotationaldisk"), Some("true"));
        assert_eq!(get("cpu-architecture"), Some("x86_64"));
        assert_eq!(get("cpu-virtenabled"), Some("true"));
        assert_eq!(get("host-manufacturer"), Some("RedHat"));
        assert_eq!(get("host-isvirtual"), Some("true"));
        // parentheses are not valid in label values
        assert_eq!(get("host-productname"), Some(""));
    }

    #[test]
    fn test_label_value_syntax() {
        assert!(is_valid_label_value(""));
        assert!(is_valid_label_value("Dell_Inc.-1"));
        assert!(!is_valid_label_value("-leading"));
        assert!(!is_valid_label_value("trailing."));
        assert!(!is_valid_label_value(&"a".repeat(64)));
    }

    #[test]
    fn test_contains_all() {
        let desired = inventory_annotations(PREFIX);
        assert!(!contains_all(None, &desired));
        let mut current = desired.clone();
        current.insert("other".to_string(), "x".to_string());
        assert!(contains_all(Some(&current), &desired));
    }
}
