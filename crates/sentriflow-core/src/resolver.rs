//! Rule resolver: deterministic merge of packs into one rule set.
//!
//! Packs merge in ascending priority; at equal priority the later source
//! wins (the map insert uses `>=`). This tie behavior is a stability
//! contract, covered by tests. Disable directives apply to the default
//! rule layer only.

use std::collections::{HashMap, HashSet};

use crate::defaults::{DEFAULTS_PRIORITY, default_rules};
use crate::pack::RulePack;
use crate::rule::Rule;

/// A rule in the final set plus the priority of the pack it came from.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub rule: Rule,
    pub source_priority: u32,
}

/// The final rule set of one resolve, keyed by rule id.
///
/// Built once per scan, read-only afterwards.
#[derive(Debug, Default)]
pub struct ResolvedRuleSet {
    rules: HashMap<String, ResolvedRule>,
}

impl ResolvedRuleSet {
    pub fn get(&self, id: &str) -> Option<&ResolvedRule> {
        self.rules.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate the resolved rules. Order is arbitrary and must not be
    /// relied upon.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values().map(|resolved| &resolved.rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedRule> {
        self.rules.values()
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
            .into_values()
            .map(|resolved| resolved.rule)
            .collect()
    }
}

/// Options controlling one resolve.
#[derive(Debug, Default, Clone)]
pub struct ResolverOptions {
    /// Keep only rules applicable to this vendor (`common` and
    /// vendor-less rules always pass).
    pub vendor_filter: Option<String>,
    /// Skip the default rule layer entirely when `false`.
    pub include_defaults: bool,
    /// Additional rule ids to disable at the defaults layer (legacy
    /// `disable` lists from config and CLI).
    pub extra_disables: Vec<String>,
}

impl ResolverOptions {
    pub fn new() -> Self {
        Self {
            vendor_filter: None,
            include_defaults: true,
            extra_disables: Vec::new(),
        }
    }
}

fn passes_vendor_filter(rule: &Rule, filter: Option<&str>) -> bool {
    match filter {
        Some(vendor) => rule.applies_to_vendor(vendor),
        None => true,
    }
}

/// Merge packs into the final rule set.
///
/// `packs` arrive in source-insertion order; the sort below is stable so
/// that order breaks priority ties (later wins).
pub fn resolve(packs: Vec<RulePack>, options: &ResolverOptions) -> ResolvedRuleSet {
    let mut set = ResolvedRuleSet::default();

    // Collect disables across every pack plus the legacy lists.
    let mut disable_all_defaults = !options.include_defaults;
    let mut disabled_ids: HashSet<String> = options.extra_disables.iter().cloned().collect();
    let mut disabled_vendors: HashSet<String> = HashSet::new();
    for pack in &packs {
        if let Some(disables) = &pack.disables {
            disable_all_defaults |= disables.all;
            disabled_ids.extend(disables.rules.iter().cloned());
            disabled_vendors.extend(disables.vendors.iter().cloned());
        }
    }

    // Seed the defaults layer.
    if !disable_all_defaults {
        for rule in default_rules() {
            if disabled_ids.contains(&rule.id) {
                continue;
            }
            if let Some(vendor) = &rule.vendor {
                if disabled_vendors
                    .iter()
                    .any(|disabled| vendor.names_vendor(disabled))
                {
                    continue;
                }
            }
            if !passes_vendor_filter(rule, options.vendor_filter.as_deref()) {
                continue;
            }
            set.rules.insert(
                rule.id.clone(),
                ResolvedRule {
                    rule: rule.clone(),
                    source_priority: DEFAULTS_PRIORITY,
                },
            );
        }
    }

    // Merge packs in ascending priority; stable sort keeps insertion
    // order for ties so later sources win on `>=`.
    let mut ordered = packs;
    ordered.sort_by_key(|pack| pack.priority);

    for pack in ordered {
        for rule in pack.rules {
            if !passes_vendor_filter(&rule, options.vendor_filter.as_deref()) {
                continue;
            }
            // `>=` means a later source overwrites an equal-priority
            // earlier one.
            let overrides = set
                .rules
                .get(&rule.id)
                .is_none_or(|existing| pack.priority >= existing.source_priority);
            if overrides {
                set.rules.insert(
                    rule.id.clone(),
                    ResolvedRule {
                        rule,
                        source_priority: pack.priority,
                    },
                );
            }
        }
    }

    set
}
