// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer option model.
//
// A device's configurable surface is an ordered list of [`OptionGroup`]s,
// each holding [`PrinterOption`]s with their keyword, choices, and a default
// choice.  Groups are built once from the device's attribute map during
// registry refresh and are read-only afterwards, except for default-choice
// overrides applied when a device is assigned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Closed set of option-group kinds.  The discriminant orders groups in
/// operator-facing listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum OptionGroupKind {
    /// Page geometry: media, sides, orientation, scaling.
    PageSetup = 0,
    /// Job-level handling: copies, collation, output bin, priority.
    Job = 1,
    /// Device-specific extras exposed to administrators.
    Advanced = 2,
    /// Informational attributes never sent with a job.
    ReferenceOnly = 3,
}

impl OptionGroupKind {
    /// Whether options in this group participate in job submission.
    pub fn is_submittable(self) -> bool {
        !matches!(self, OptionGroupKind::ReferenceOnly)
    }
}

/// One selectable value of a printer option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Raw keyword value sent on the wire (e.g. `iso_a4_210x297mm`).
    pub value: String,
    /// Localized display text.
    pub text: String,
    /// Extended choices are hidden from restricted (non-admin) views.
    pub extended: bool,
}

impl Choice {
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
            extended: false,
        }
    }

    pub fn extended(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
            extended: true,
        }
    }
}

/// A printer option: keyword, ordered choices, and a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterOption {
    /// IPP keyword of the option (e.g. `media`, `sides`).
    pub keyword: String,
    pub choices: Vec<Choice>,
    /// Index into `choices`; `None` when the device reported no default.
    pub default: Option<usize>,
}

impl PrinterOption {
    pub fn new(keyword: impl Into<String>, choices: Vec<Choice>) -> Self {
        Self {
            keyword: keyword.into(),
            choices,
            default: None,
        }
    }

    pub fn default_choice(&self) -> Option<&Choice> {
        self.default.and_then(|i| self.choices.get(i))
    }

    /// Override the default to the choice with the given raw value.  Applied
    /// at device-assignment time; a value the device does not offer leaves
    /// the default untouched.
    pub fn override_default(&mut self, value: &str) -> bool {
        match self.choices.iter().position(|c| c.value == value) {
            Some(i) => {
                self.default = Some(i);
                true
            }
            None => false,
        }
    }

    /// Drop extended choices, fixing up the default index.  Used when
    /// producing a restricted view of a device copy.
    pub fn prune_extended(&mut self) {
        let default_value = self.default_choice().map(|c| c.value.clone());
        self.choices.retain(|c| !c.extended);
        self.default = default_value
            .and_then(|v| self.choices.iter().position(|c| c.value == v));
    }
}

/// An ordered, named group of options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionGroup {
    pub kind: OptionGroupKind,
    pub name: String,
    pub options: Vec<PrinterOption>,
}

impl OptionGroup {
    pub fn new(kind: OptionGroupKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            options: Vec::new(),
        }
    }

    pub fn option(&self, keyword: &str) -> Option<&PrinterOption> {
        self.options.iter().find(|o| o.keyword == keyword)
    }

    pub fn option_mut(&mut self, keyword: &str) -> Option<&mut PrinterOption> {
        self.options.iter_mut().find(|o| o.keyword == keyword)
    }
}

/// Option keywords read from a device's attribute map during refresh,
/// paired with the group they land in.
const CAPABILITY_KEYWORDS: &[(&str, OptionGroupKind)] = &[
    ("media", OptionGroupKind::PageSetup),
    ("media-source", OptionGroupKind::PageSetup),
    ("sides", OptionGroupKind::PageSetup),
    ("print-scaling", OptionGroupKind::PageSetup),
    ("orientation-requested", OptionGroupKind::PageSetup),
    ("print-color-mode", OptionGroupKind::Job),
    ("print-quality", OptionGroupKind::Job),
    ("output-bin", OptionGroupKind::Job),
    ("multiple-document-handling", OptionGroupKind::Job),
];

/// Build the standard option groups from a device's flattened attribute
/// map.  For each capability keyword the device's `<kw>-supported` list
/// becomes the choices and `<kw>-default` selects the default.  Keywords
/// the device does not advertise are omitted.
pub fn groups_from_attributes(attrs: &HashMap<String, String>) -> Vec<OptionGroup> {
    let mut page_setup = OptionGroup::new(OptionGroupKind::PageSetup, "Page setup");
    let mut job = OptionGroup::new(OptionGroupKind::Job, "Job handling");

    for &(keyword, kind) in CAPABILITY_KEYWORDS {
        let Some(supported) = attrs.get(&format!("{keyword}-supported")) else {
            continue;
        };
        let choices: Vec<Choice> = supported
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Choice::new(v, v))
            .collect();
        if choices.is_empty() {
            continue;
        }

        let mut option = PrinterOption::new(keyword, choices);
        if let Some(default) = attrs.get(&format!("{keyword}-default")) {
            option.override_default(default.trim());
        }

        match kind {
            OptionGroupKind::PageSetup => page_setup.options.push(option),
            _ => job.options.push(option),
        }
    }

    let mut groups = Vec::new();
    if !page_setup.options.is_empty() {
        groups.push(page_setup);
    }
    if !job.options.is_empty() {
        groups.push(job);
    }
    debug!(groups = groups.len(), "built option groups from device attributes");
    groups
}

/// Merge process-wide common groups into a device's own, without
/// overwriting options the device already advertises.  Common groups carry
/// site policy options (job clearing, accounting tags) that every device
/// offers regardless of hardware.
pub fn merge_common_groups(device: &mut Vec<OptionGroup>, common: &[OptionGroup]) {
    for group in common {
        match device.iter_mut().find(|g| g.kind == group.kind) {
            Some(existing) => {
                for option in &group.options {
                    if existing.option(&option.keyword).is_none() {
                        existing.options.push(option.clone());
                    }
                }
            }
            None => device.push(group.clone()),
        }
    }
    device.sort_by_key(|g| g.kind);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn groups_built_from_supported_and_default_pairs() {
        let attrs = attrs(&[
            ("media-supported", "iso_a4_210x297mm, na_letter_8.5x11in"),
            ("media-default", "iso_a4_210x297mm"),
            ("sides-supported", "one-sided, two-sided-long-edge"),
            ("print-color-mode-supported", "monochrome, color"),
            ("print-color-mode-default", "color"),
        ]);
        let groups = groups_from_attributes(&attrs);
        assert_eq!(groups.len(), 2);

        let page_setup = &groups[0];
        assert_eq!(page_setup.kind, OptionGroupKind::PageSetup);
        let media = page_setup.option("media").unwrap();
        assert_eq!(media.choices.len(), 2);
        assert_eq!(media.default_choice().unwrap().value, "iso_a4_210x297mm");
        // sides had no -default attribute
        assert!(page_setup.option("sides").unwrap().default.is_none());

        let job = &groups[1];
        assert_eq!(
            job.option("print-color-mode").unwrap().default_choice().unwrap().value,
            "color"
        );
    }

    #[test]
    fn override_default_rejects_unknown_value() {
        let mut option = PrinterOption::new(
            "sides",
            vec![Choice::new("one-sided", "One-sided")],
        );
        assert!(!option.override_default("two-sided-long-edge"));
        assert!(option.default.is_none());
        assert!(option.override_default("one-sided"));
        assert_eq!(option.default, Some(0));
    }

    #[test]
    fn prune_extended_fixes_default_index() {
        let mut option = PrinterOption::new(
            "output-bin",
            vec![
                Choice::extended("face-up", "Face up"),
                Choice::new("face-down", "Face down"),
            ],
        );
        option.override_default("face-down");
        option.prune_extended();
        assert_eq!(option.choices.len(), 1);
        assert_eq!(option.default_choice().unwrap().value, "face-down");
    }

    #[test]
    fn prune_extended_clears_default_when_default_was_extended() {
        let mut option = PrinterOption::new(
            "media",
            vec![
                Choice::extended("custom_banner", "Banner"),
                Choice::new("iso_a4_210x297mm", "A4"),
            ],
        );
        option.override_default("custom_banner");
        option.prune_extended();
        assert!(option.default.is_none());
    }

    #[test]
    fn merge_common_groups_does_not_shadow_device_options() {
        let mut device = vec![OptionGroup {
            kind: OptionGroupKind::Job,
            name: "Job handling".into(),
            options: vec![PrinterOption::new(
                "print-quality",
                vec![Choice::new("5", "High")],
            )],
        }];
        let common = vec![OptionGroup {
            kind: OptionGroupKind::Job,
            name: "Job handling".into(),
            options: vec![
                PrinterOption::new("print-quality", vec![Choice::new("4", "Normal")]),
                PrinterOption::new("job-clear", vec![Choice::new("all", "All")]),
            ],
        }];
        merge_common_groups(&mut device, &common);

        assert_eq!(device.len(), 1);
        let group = &device[0];
        // the device's own print-quality wins
        assert_eq!(group.option("print-quality").unwrap().choices[0].value, "5");
        assert!(group.option("job-clear").is_some());
    }

    #[test]
    fn reference_only_groups_are_not_submittable() {
        assert!(OptionGroupKind::PageSetup.is_submittable());
        assert!(!OptionGroupKind::ReferenceOnly.is_submittable());
    }
}
