//! Helper registry exposed to pack-provided checks.
//!
//! Rule checks written in packs refer to helpers by name: common
//! tree-walking utilities plus per-vendor namespaces. The registry is
//! built once, is read-only afterwards, and resolves bare short names
//! with first-wins semantics over the frozen [`VENDOR_ORDER`] so the
//! visible shape never depends on map iteration order.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::node::ConfigNode;

/// A helper callable: a node plus string arguments, yielding a boolean.
pub type HelperFn = fn(&ConfigNode, &[&str]) -> bool;

/// Vendor namespaces, in registration order.
///
/// This order decides which vendor wins a bare short-name collision; it is
/// part of the public contract and must not be reordered.
pub const VENDOR_ORDER: &[&str] = &[
    "cisco", "juniper", "arista", "aruba", "cumulus", "extreme", "fortinet", "huawei", "mikrotik",
    "nokia", "paloalto", "vyos",
];

/// Namespace name for the common helper table.
pub const COMMON_NAMESPACE: &str = "common";

/// Immutable helper lookup table.
pub struct HelperRegistry {
    common: BTreeMap<&'static str, HelperFn>,
    vendors: BTreeMap<&'static str, BTreeMap<&'static str, HelperFn>>,
    /// Bare-name table: common helpers first, then vendors in
    /// [`VENDOR_ORDER`], first registration wins.
    short: BTreeMap<&'static str, HelperFn>,
}

impl HelperRegistry {
    /// Build the registry with all built-in helpers.
    pub fn with_defaults() -> Self {
        let mut builder = RegistryBuilder::default();

        for &(name, helper) in COMMON_HELPERS {
            builder.register_common(name, helper);
        }
        for &vendor in VENDOR_ORDER {
            for &(name, helper) in vendor_helpers(vendor) {
                builder.register_vendor(vendor, name, helper);
            }
        }

        builder.freeze()
    }

    /// Process-wide registry, built on first use.
    pub fn global() -> &'static HelperRegistry {
        static REGISTRY: OnceLock<HelperRegistry> = OnceLock::new();
        REGISTRY.get_or_init(HelperRegistry::with_defaults)
    }

    /// Resolve a helper by optional namespace and name.
    ///
    /// A `None` namespace consults the bare-name table; `common` is a
    /// valid explicit namespace alongside the vendor names.
    pub fn lookup(&self, namespace: Option<&str>, name: &str) -> Option<HelperFn> {
        match namespace {
            None => self.short.get(name).copied(),
            Some(COMMON_NAMESPACE) => self.common.get(name).copied(),
            Some(vendor) => self.vendors.get(vendor)?.get(name).copied(),
        }
    }

    /// Names registered under a vendor namespace, for introspection.
    pub fn vendor_helper_names(&self, vendor: &str) -> Vec<&'static str> {
        self.vendors
            .get(vendor)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct RegistryBuilder {
    common: BTreeMap<&'static str, HelperFn>,
    vendors: BTreeMap<&'static str, BTreeMap<&'static str, HelperFn>>,
    short: BTreeMap<&'static str, HelperFn>,
}

impl RegistryBuilder {
    fn register_common(&mut self, name: &'static str, helper: HelperFn) {
        self.common.insert(name, helper);
        self.short.entry(name).or_insert(helper);
    }

    fn register_vendor(&mut self, vendor: &'static str, name: &'static str, helper: HelperFn) {
        self.vendors.entry(vendor).or_default().insert(name, helper);
        // First registration for a short name wins; later ones are dropped.
        self.short.entry(name).or_insert(helper);
    }

    fn freeze(self) -> HelperRegistry {
        HelperRegistry {
            common: self.common,
            vendors: self.vendors,
            short: self.short,
        }
    }
}

// ============================================================================
// Shared walkers
// ============================================================================

fn descendant_content_contains(node: &ConfigNode, needle: &str) -> bool {
    node.walk().any(|n| n.content.contains(needle))
}

fn child_with_kind(node: &ConfigNode, kind: &str) -> bool {
    node.children.iter().any(|c| c.kind == kind)
}

fn descendant_with_kind_containing(node: &ConfigNode, kind: &str, needle: &str) -> bool {
    node.walk()
        .any(|n| n.kind == kind && (n.id.contains(needle) || n.content.contains(needle)))
}

// ============================================================================
// Common helpers
// ============================================================================

const COMMON_HELPERS: &[(&str, HelperFn)] = &[
    ("has_child_kind", common_has_child_kind),
    ("descendant_contains", common_descendant_contains),
    ("child_count_at_least", common_child_count_at_least),
    ("content_starts_with", common_content_starts_with),
    ("is_leaf", common_is_leaf),
    ("has_descendant_id", common_has_descendant_id),
];

fn common_has_child_kind(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&kind| child_with_kind(node, kind))
}

fn common_descendant_contains(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&needle| descendant_content_contains(node, needle))
}

fn common_child_count_at_least(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .and_then(|n| n.parse::<usize>().ok())
        .is_some_and(|n| node.children.len() >= n)
}

fn common_content_starts_with(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|prefix| node.content.starts_with(prefix))
}

fn common_is_leaf(node: &ConfigNode, _args: &[&str]) -> bool {
    node.children.is_empty()
}

fn common_has_descendant_id(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&selector| node.walk().any(|n| n.matches_selector(selector)))
}

// ============================================================================
// Vendor namespaces
// ============================================================================

fn vendor_helpers(vendor: &str) -> &'static [(&'static str, HelperFn)] {
    match vendor {
        "cisco" => CISCO_HELPERS,
        "juniper" => JUNIPER_HELPERS,
        "arista" => ARISTA_HELPERS,
        "aruba" => ARUBA_HELPERS,
        "cumulus" => CUMULUS_HELPERS,
        "extreme" => EXTREME_HELPERS,
        "fortinet" => FORTINET_HELPERS,
        "huawei" => HUAWEI_HELPERS,
        "mikrotik" => MIKROTIK_HELPERS,
        "nokia" => NOKIA_HELPERS,
        "paloalto" => PALOALTO_HELPERS,
        "vyos" => VYOS_HELPERS,
        _ => &[],
    }
}

const CISCO_HELPERS: &[(&str, HelperFn)] = &[
    ("has_interface", cisco_has_interface),
    ("service_enabled", cisco_service_enabled),
    ("banner_present", cisco_banner_present),
];

// IOS-style: interfaces are direct or nested nodes of kind `interface`.
fn cisco_has_interface(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&name| descendant_with_kind_containing(node, "interface", name))
}

fn cisco_service_enabled(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|svc| descendant_content_contains(node, &format!("service {svc}")))
}

fn cisco_banner_present(node: &ConfigNode, _args: &[&str]) -> bool {
    descendant_content_contains(node, "banner")
}

const JUNIPER_HELPERS: &[(&str, HelperFn)] = &[
    ("has_interface", juniper_has_interface),
    ("stanza_present", juniper_stanza_present),
];

// Junos-style: a single `interfaces` stanza holds named children.
fn juniper_has_interface(node: &ConfigNode, args: &[&str]) -> bool {
    args.first().is_some_and(|&name| {
        node.walk().filter(|n| n.kind == "interfaces").any(|n| {
            descendant_content_contains(n, name) || n.children.iter().any(|c| c.id.contains(name))
        })
    })
}

fn juniper_stanza_present(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|stanza| node.walk().any(|n| n.kind == *stanza))
}

const ARISTA_HELPERS: &[(&str, HelperFn)] = &[("has_vlan", arista_has_vlan)];

fn arista_has_vlan(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|vlan| descendant_content_contains(node, &format!("vlan {vlan}")))
}

const ARUBA_HELPERS: &[(&str, HelperFn)] = &[("ap_group_defined", aruba_ap_group_defined)];

fn aruba_ap_group_defined(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|group| descendant_content_contains(node, &format!("ap-group {group}")))
}

const CUMULUS_HELPERS: &[(&str, HelperFn)] = &[("bridge_defined", cumulus_bridge_defined)];

fn cumulus_bridge_defined(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&bridge| descendant_with_kind_containing(node, "bridge", bridge))
}

const EXTREME_HELPERS: &[(&str, HelperFn)] = &[("policy_present", extreme_policy_present)];

fn extreme_policy_present(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|policy| descendant_content_contains(node, &format!("policy {policy}")))
}

const FORTINET_HELPERS: &[(&str, HelperFn)] =
    &[("firewall_policy_present", fortinet_firewall_policy_present)];

fn fortinet_firewall_policy_present(node: &ConfigNode, args: &[&str]) -> bool {
    args.first().is_some_and(|id| {
        node.walk()
            .filter(|n| n.kind == "firewall-policy")
            .any(|n| n.id.contains(id) || n.content.contains(id))
    })
}

const HUAWEI_HELPERS: &[(&str, HelperFn)] = &[("sysname_set", huawei_sysname_set)];

fn huawei_sysname_set(node: &ConfigNode, _args: &[&str]) -> bool {
    descendant_content_contains(node, "sysname")
}

const MIKROTIK_HELPERS: &[(&str, HelperFn)] =
    &[("firewall_rule_present", mikrotik_firewall_rule_present)];

fn mikrotik_firewall_rule_present(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|chain| descendant_content_contains(node, &format!("chain={chain}")))
}

const NOKIA_HELPERS: &[(&str, HelperFn)] = &[("port_configured", nokia_port_configured)];

fn nokia_port_configured(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&port| descendant_with_kind_containing(node, "port", port))
}

const PALOALTO_HELPERS: &[(&str, HelperFn)] = &[("zone_defined", paloalto_zone_defined)];

fn paloalto_zone_defined(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|&zone| descendant_with_kind_containing(node, "zone", zone))
}

const VYOS_HELPERS: &[(&str, HelperFn)] = &[("firewall_name_defined", vyos_firewall_name_defined)];

fn vyos_firewall_name_defined(node: &ConfigNode, args: &[&str]) -> bool {
    args.first()
        .is_some_and(|name| descendant_content_contains(node, &format!("firewall name {name}")))
}
