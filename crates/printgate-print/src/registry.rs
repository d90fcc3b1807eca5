// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer registry: the process-wide cache of known devices.
//
// Devices are keyed by upper-cased name.  `refresh` is single-flight: one
// refresh talks to the server at a time, and concurrent lazy-init callers
// observe the in-progress result rather than starting a second round trip.
// The circuit breaker is consulted before any network attempt; while it is
// open, refresh fails fast and callers keep reading whatever is cached.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use printgate_core::error::{GatewayError, Result};

use crate::circuit::CircuitBreaker;
use crate::ipp_client::{DeviceAttributes, JobProtocol, RawAttributes};
use crate::options::{self, OptionGroup};

/// One cached device.  Exclusively owned by the registry; callers that need
/// to localize or prune options take a deep copy via [`PrinterRegistry::get_copy`].
#[derive(Debug, Clone)]
pub struct CachedPrinter {
    /// Canonical upper-case lookup key.
    pub name: String,
    /// Name exactly as the server reported it.
    pub display_name: String,
    /// Physical device URI (`device-uri`, backend-specific).
    pub device_uri: String,
    /// Protocol URI jobs are sent to (`printer-uri-supported`).
    pub protocol_uri: String,
    /// Ordered option groups, built on first sight and preserved across
    /// identity updates.
    pub groups: Vec<OptionGroup>,
    pub duplex: bool,
    pub color: bool,
    /// Device can render monochrome itself; when false, grayscale requests
    /// are converted client-side before sending.
    pub grayscale_native: bool,
    pub auto_media_source: bool,
    pub manual_media_source: bool,
    /// Device honours `separate-documents-collated-copies` natively.
    pub collate_native: bool,
    pub has_ppd: bool,
    pub accepting_jobs: bool,
    /// Identity fields, updated in place on every refresh.
    pub job_ticket: bool,
    pub archive_disabled: bool,
    pub journal_disabled: bool,
    pub externally_managed: bool,
    pub default_color_mode: Option<String>,
    /// Name of a site-local extension descriptor, when tagged.
    pub custom_extension: Option<String>,
}

/// Site identity markers carried in the device's `printer-info` text, e.g.
/// `"Lobby MFP [ticket][noarchive][ext:lobby]"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DeviceIdentity {
    job_ticket: bool,
    archive_disabled: bool,
    journal_disabled: bool,
    externally_managed: bool,
    custom_extension: Option<String>,
}

impl DeviceIdentity {
    fn parse(info: &str) -> Self {
        let mut identity = Self::default();
        let mut rest = info;
        while let Some(start) = rest.find('[') {
            let Some(len) = rest[start..].find(']') else {
                break;
            };
            let marker = &rest[start + 1..start + len];
            match marker {
                "ticket" => identity.job_ticket = true,
                "noarchive" => identity.archive_disabled = true,
                "nojournal" => identity.journal_disabled = true,
                "external" => identity.externally_managed = true,
                other => {
                    if let Some(name) = other.strip_prefix("ext:") {
                        identity.custom_extension = Some(name.to_string());
                    }
                }
            }
            rest = &rest[start + len + 1..];
        }
        identity
    }
}

/// What a refresh changed, by canonical key.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

pub struct PrinterRegistry {
    protocol: Arc<dyn JobProtocol>,
    breaker: Arc<CircuitBreaker>,
    /// Process-wide option groups merged into every newly discovered device.
    common_groups: Vec<OptionGroup>,
    printers: RwLock<HashMap<String, CachedPrinter>>,
    /// Serializes refreshes; held across the whole protocol round trip.
    refresh_gate: Mutex<()>,
    initialized: AtomicBool,
}

impl PrinterRegistry {
    pub fn new(
        protocol: Arc<dyn JobProtocol>,
        breaker: Arc<CircuitBreaker>,
        common_groups: Vec<OptionGroup>,
    ) -> Self {
        Self {
            protocol,
            breaker,
            common_groups,
            printers: RwLock::new(HashMap::new()),
            refresh_gate: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Idempotent bootstrap.  The first call performs a full refresh;
    /// concurrent first calls collapse into that one refresh; later calls
    /// return immediately.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _gate = self.refresh_gate.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            // another caller finished the bootstrap while we waited
            return Ok(());
        }
        self.refresh_locked().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Re-fetch the device list.  `force` refreshes even when the registry
    /// is already initialized; without it an uninitialized registry
    /// bootstraps and an initialized one is left alone.
    #[instrument(skip(self))]
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome> {
        if !force && self.initialized.load(Ordering::Acquire) {
            return Ok(RefreshOutcome::default());
        }
        let _gate = self.refresh_gate.lock().await;
        if !force && self.initialized.load(Ordering::Acquire) {
            // a concurrent bootstrap finished while we waited on the gate
            return Ok(RefreshOutcome::default());
        }
        let outcome = self.refresh_locked().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(outcome)
    }

    /// Name is upper-cased before lookup.
    pub fn lookup(&self, name: &str) -> Option<CachedPrinter> {
        let key = name.to_uppercase();
        // a poisoned lock only means a panicked writer; the map itself is
        // still plain data
        let map = self
            .printers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(&key).cloned()
    }

    /// Deep copy, safe for localization and extended-choice pruning without
    /// touching the shared cache.  Today's representation clones on every
    /// read, so this is an alias of [`lookup`](Self::lookup) kept for the
    /// caller-facing contract.
    pub fn get_copy(&self, name: &str) -> Option<CachedPrinter> {
        self.lookup(name)
    }

    pub fn printer_names(&self) -> Vec<String> {
        let map = self
            .printers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    /// The actual refresh.  Caller holds `refresh_gate`.
    async fn refresh_locked(&self) -> Result<RefreshOutcome> {
        if !self.breaker.allow_request() {
            let detail = self
                .breaker
                .last_error()
                .unwrap_or_else(|| "circuit open".into());
            warn!("refresh skipped, circuit open: {detail}");
            return Err(GatewayError::Connect(format!(
                "print server unavailable ({detail})"
            )));
        }

        let devices = self.protocol.discover_printers().await?;

        // Concrete devices first; classes reference their members.
        let mut fresh: HashMap<String, CachedPrinter> = HashMap::new();
        let mut raw_by_key: HashMap<String, RawAttributes> = HashMap::new();
        let mut classes: Vec<DeviceAttributes> = Vec::new();

        for device in devices {
            if device.attrs.contains_key("member-names") {
                classes.push(device);
                continue;
            }
            let detail = match self.protocol.get_printer_attributes(&device.uri).await {
                Ok(detail) => detail,
                Err(err) => {
                    // one bad device must not sink the whole refresh
                    warn!(name = %device.name, "detail fetch failed, device skipped: {err}");
                    continue;
                }
            };
            let printer = build_printer(&device, &detail);
            raw_by_key.insert(printer.name.clone(), detail);
            fresh.insert(printer.name.clone(), printer);
        }

        for class in classes {
            match resolve_class(&class, &fresh, &raw_by_key) {
                Some(printer) => {
                    fresh.insert(printer.name.clone(), printer);
                }
                None => {
                    warn!(name = %class.name, "printer class skipped");
                }
            }
        }

        let outcome = self.apply(fresh);
        info!(
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "registry refreshed"
        );
        Ok(outcome)
    }

    /// Merge the freshly retrieved device set into the cache: new keys are
    /// registered with the common option groups merged in, existing keys
    /// get only their identity fields updated in place (resolved option
    /// structure is preserved), and keys absent from the retrieval are
    /// evicted.
    fn apply(&self, fresh: HashMap<String, CachedPrinter>) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        let mut map = self
            .printers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        map.retain(|key, _| {
            if fresh.contains_key(key) {
                true
            } else {
                outcome.removed.push(key.clone());
                false
            }
        });

        for (key, mut printer) in fresh {
            match map.get_mut(&key) {
                Some(existing) => {
                    existing.job_ticket = printer.job_ticket;
                    existing.archive_disabled = printer.archive_disabled;
                    existing.journal_disabled = printer.journal_disabled;
                    existing.externally_managed = printer.externally_managed;
                    existing.default_color_mode = printer.default_color_mode.clone();
                    existing.custom_extension = printer.custom_extension.clone();
                    existing.accepting_jobs = printer.accepting_jobs;
                }
                None => {
                    options::merge_common_groups(&mut printer.groups, &self.common_groups);
                    debug!(name = %key, "newly discovered device");
                    outcome.added.push(key.clone());
                    map.insert(key, printer);
                }
            }
        }

        outcome.removed.sort();
        outcome.added.sort();
        outcome
    }
}

fn attr_list_contains(attrs: &RawAttributes, name: &str, value: &str) -> bool {
    attrs
        .get(name)
        .map(|v| v.split(',').any(|item| item.trim() == value))
        .unwrap_or(false)
}

fn build_printer(device: &DeviceAttributes, detail: &RawAttributes) -> CachedPrinter {
    let identity = DeviceIdentity::parse(detail.get("printer-info").map_or("", String::as_str));
    CachedPrinter {
        name: device.name.to_uppercase(),
        display_name: device.name.clone(),
        device_uri: detail.get("device-uri").cloned().unwrap_or_default(),
        protocol_uri: device.uri.clone(),
        groups: options::groups_from_attributes(detail),
        duplex: attr_list_contains(detail, "sides-supported", "two-sided-long-edge")
            || attr_list_contains(detail, "sides-supported", "two-sided-short-edge"),
        color: attr_list_contains(detail, "print-color-mode-supported", "color"),
        grayscale_native: attr_list_contains(detail, "print-color-mode-supported", "monochrome"),
        auto_media_source: attr_list_contains(detail, "media-source-supported", "auto"),
        manual_media_source: attr_list_contains(detail, "media-source-supported", "manual"),
        collate_native: attr_list_contains(
            detail,
            "multiple-document-handling-supported",
            "separate-documents-collated-copies",
        ),
        has_ppd: detail.contains_key("printer-make-and-model"),
        accepting_jobs: detail
            .get("printer-is-accepting-jobs")
            .map(|v| v.trim() == "true" || v.trim() == "1")
            .unwrap_or(true),
        job_ticket: identity.job_ticket,
        archive_disabled: identity.archive_disabled,
        journal_disabled: identity.journal_disabled,
        externally_managed: identity.externally_managed,
        default_color_mode: detail.get("print-color-mode-default").cloned(),
        custom_extension: identity.custom_extension,
    }
}

/// Resolve a CUPS printer class against already-built concrete devices.
///
/// A class inherits capability fields and option structure from one
/// representative member, provided every member shares the same make and
/// model.  Zero members or a make/model mismatch disqualifies the class.
fn resolve_class(
    class: &DeviceAttributes,
    concrete: &HashMap<String, CachedPrinter>,
    raw_by_key: &HashMap<String, RawAttributes>,
) -> Option<CachedPrinter> {
    let members: Vec<String> = class
        .attrs
        .get("member-names")
        .map(|v| {
            v.split(',')
                .map(|m| m.trim().to_uppercase())
                .filter(|m| !m.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if members.is_empty() {
        warn!(name = %class.name, "class has no members");
        return None;
    }

    let mut make_model: Option<&str> = None;
    for member in &members {
        let Some(raw) = raw_by_key.get(member) else {
            warn!(name = %class.name, member = %member, "class member not in device list");
            return None;
        };
        let this = raw.get("printer-make-and-model").map_or("", String::as_str);
        match make_model {
            None => make_model = Some(this),
            Some(expected) if expected == this => {}
            Some(expected) => {
                warn!(
                    name = %class.name,
                    expected,
                    found = this,
                    "class members differ in make/model"
                );
                return None;
            }
        }
    }

    let representative = concrete.get(&members[0])?;
    let identity = DeviceIdentity::parse(class.attrs.get("printer-info").map_or("", String::as_str));

    Some(CachedPrinter {
        name: class.name.to_uppercase(),
        display_name: class.name.clone(),
        device_uri: String::new(),
        protocol_uri: class.uri.clone(),
        job_ticket: identity.job_ticket,
        archive_disabled: identity.archive_disabled,
        journal_disabled: identity.journal_disabled,
        externally_managed: identity.externally_managed,
        custom_extension: identity.custom_extension,
        ..representative.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use printgate_core::types::{DispatchedJob, UserId};

    use crate::ipp_client::{SendJobRequest, SubscriptionLease};

    /// Serves a fixed device list per refresh, advancing through `rounds`.
    struct FakeProtocol {
        rounds: std::sync::Mutex<Vec<Vec<DeviceAttributes>>>,
        discover_calls: AtomicUsize,
        discover_delay: Option<std::time::Duration>,
        details: HashMap<String, RawAttributes>,
    }

    impl FakeProtocol {
        fn new(rounds: Vec<Vec<DeviceAttributes>>, details: HashMap<String, RawAttributes>) -> Self {
            Self {
                rounds: std::sync::Mutex::new(rounds),
                discover_calls: AtomicUsize::new(0),
                discover_delay: None,
                details,
            }
        }
    }

    #[async_trait]
    impl JobProtocol for FakeProtocol {
        async fn discover_printers(&self) -> Result<Vec<DeviceAttributes>> {
            self.discover_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.discover_delay {
                tokio::time::sleep(delay).await;
            }
            let mut rounds = self.rounds.lock().unwrap();
            if rounds.len() > 1 {
                Ok(rounds.remove(0))
            } else {
                Ok(rounds[0].clone())
            }
        }

        async fn get_printer_attributes(&self, printer_uri: &str) -> Result<RawAttributes> {
            self.details
                .get(printer_uri)
                .cloned()
                .ok_or_else(|| GatewayError::Connect(format!("no detail for {printer_uri}")))
        }

        async fn send_job(&self, _request: SendJobRequest) -> Result<DispatchedJob> {
            unimplemented!("not used by registry tests")
        }

        async fn query_job(&self, _uri: &str, _job_id: i32) -> Result<Option<DispatchedJob>> {
            unimplemented!("not used by registry tests")
        }

        async fn cancel_job(&self, _uri: &str, _job_id: i32, _user: &UserId) -> Result<bool> {
            unimplemented!("not used by registry tests")
        }

        async fn create_subscription(
            &self,
            _events: &[String],
            _lease_secs: u32,
        ) -> Result<SubscriptionLease> {
            unimplemented!("not used by registry tests")
        }

        async fn renew_subscription(&self, _id: i32, _lease_secs: u32) -> Result<u32> {
            unimplemented!("not used by registry tests")
        }

        async fn cancel_subscription(&self, _id: i32) -> Result<()> {
            unimplemented!("not used by registry tests")
        }
    }

    fn device(name: &str, uri: &str) -> DeviceAttributes {
        DeviceAttributes {
            name: name.into(),
            uri: uri.into(),
            attrs: HashMap::new(),
        }
    }

    fn detail(pairs: &[(&str, &str)]) -> RawAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn registry_with(
        rounds: Vec<Vec<DeviceAttributes>>,
        details: HashMap<String, RawAttributes>,
    ) -> (PrinterRegistry, Arc<FakeProtocol>) {
        let protocol = Arc::new(FakeProtocol::new(rounds, details));
        let registry = PrinterRegistry::new(
            protocol.clone(),
            Arc::new(CircuitBreaker::default()),
            Vec::new(),
        );
        (registry, protocol)
    }

    fn hp1_details() -> HashMap<String, RawAttributes> {
        let mut details = HashMap::new();
        details.insert(
            "ipp://srv/printers/hp1".to_string(),
            detail(&[
                ("printer-make-and-model", "HP LaserJet 4200"),
                ("sides-supported", "one-sided,two-sided-long-edge"),
                ("print-color-mode-supported", "monochrome"),
                ("printer-info", "Lobby HP [ticket][nojournal]"),
                ("printer-is-accepting-jobs", "true"),
            ]),
        );
        details
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let (registry, _) = registry_with(
            vec![vec![device("hp1", "ipp://srv/printers/hp1")]],
            hp1_details(),
        );
        registry.ensure_initialized().await.unwrap();

        assert!(registry.lookup("hp1").is_some());
        assert!(registry.lookup("HP1").is_some());
        assert!(registry.lookup("Hp1").is_some());
        assert!(registry.lookup("other").is_none());
    }

    #[tokio::test]
    async fn identity_markers_are_parsed_from_printer_info() {
        let (registry, _) = registry_with(
            vec![vec![device("hp1", "ipp://srv/printers/hp1")]],
            hp1_details(),
        );
        registry.ensure_initialized().await.unwrap();

        let printer = registry.lookup("HP1").unwrap();
        assert!(printer.job_ticket);
        assert!(printer.journal_disabled);
        assert!(!printer.archive_disabled);
        assert!(printer.duplex);
        assert!(printer.grayscale_native);
        assert!(!printer.color);
    }

    #[tokio::test]
    async fn ensure_initialized_refreshes_only_once() {
        let (registry, protocol) = registry_with(
            vec![vec![device("hp1", "ipp://srv/printers/hp1")]],
            hp1_details(),
        );
        registry.ensure_initialized().await.unwrap();
        registry.ensure_initialized().await.unwrap();
        registry.ensure_initialized().await.unwrap();

        assert_eq!(protocol.discover_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unforced_refresh_during_lazy_init_shares_the_round_trip() {
        let mut protocol = FakeProtocol::new(
            vec![vec![device("hp1", "ipp://srv/printers/hp1")]],
            hp1_details(),
        );
        protocol.discover_delay = Some(std::time::Duration::from_millis(200));
        let protocol = Arc::new(protocol);
        let registry = Arc::new(PrinterRegistry::new(
            protocol.clone(),
            Arc::new(CircuitBreaker::default()),
            Vec::new(),
        ));

        let bootstrap = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.ensure_initialized().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // arrives while the bootstrap holds the gate; must not start a
        // second round trip
        let outcome = registry.refresh(false).await.unwrap();
        assert!(outcome.added.is_empty() && outcome.removed.is_empty());
        bootstrap.await.unwrap().unwrap();

        assert_eq!(protocol.discover_calls.load(Ordering::SeqCst), 1);
        assert!(registry.lookup("HP1").is_some());
    }

    #[tokio::test]
    async fn refresh_without_force_is_a_noop_after_init() {
        let (registry, protocol) = registry_with(
            vec![vec![device("hp1", "ipp://srv/printers/hp1")]],
            hp1_details(),
        );
        registry.ensure_initialized().await.unwrap();
        let outcome = registry.refresh(false).await.unwrap();
        assert!(outcome.added.is_empty() && outcome.removed.is_empty());
        assert_eq!(protocol.discover_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn device_absent_from_second_refresh_is_evicted() {
        let (registry, _) = registry_with(
            vec![
                vec![device("hp1", "ipp://srv/printers/hp1")],
                vec![],
            ],
            hp1_details(),
        );
        registry.ensure_initialized().await.unwrap();
        assert!(registry.lookup("HP1").is_some());

        let outcome = registry.refresh(true).await.unwrap();
        assert_eq!(outcome.removed, vec!["HP1".to_string()]);
        assert!(registry.lookup("HP1").is_none());
    }

    #[tokio::test]
    async fn identity_updates_in_place_preserve_option_groups() {
        let mut details = hp1_details();
        // refresh #2 serves the same device without the ticket marker
        let mut round2 = details["ipp://srv/printers/hp1"].clone();
        round2.insert("printer-info".into(), "Lobby HP".into());
        details.insert("ipp://srv/printers/hp1#2".into(), round2);

        let (registry, _) = registry_with(
            vec![
                vec![device("hp1", "ipp://srv/printers/hp1")],
                vec![device("hp1", "ipp://srv/printers/hp1#2")],
            ],
            details,
        );
        registry.ensure_initialized().await.unwrap();
        let before = registry.lookup("HP1").unwrap();
        assert!(before.job_ticket);

        let outcome = registry.refresh(true).await.unwrap();
        assert!(outcome.added.is_empty() && outcome.removed.is_empty());
        let after = registry.lookup("HP1").unwrap();
        assert!(!after.job_ticket);
        assert_eq!(after.groups, before.groups);
    }

    #[tokio::test]
    async fn detail_fetch_failure_skips_only_that_device() {
        let (registry, _) = registry_with(
            vec![vec![
                device("hp1", "ipp://srv/printers/hp1"),
                device("broken", "ipp://srv/printers/broken"),
            ]],
            hp1_details(),
        );
        registry.ensure_initialized().await.unwrap();

        assert!(registry.lookup("HP1").is_some());
        assert!(registry.lookup("BROKEN").is_none());
    }

    #[tokio::test]
    async fn class_inherits_from_representative_member() {
        let mut details = hp1_details();
        details.insert(
            "ipp://srv/printers/hp2".into(),
            detail(&[
                ("printer-make-and-model", "HP LaserJet 4200"),
                ("sides-supported", "one-sided,two-sided-long-edge"),
                ("print-color-mode-supported", "monochrome"),
            ]),
        );

        let mut class = device("floor1", "ipp://srv/classes/floor1");
        class.attrs.insert("member-names".into(), "hp1,hp2".into());

        let (registry, _) = registry_with(
            vec![vec![
                device("hp1", "ipp://srv/printers/hp1"),
                device("hp2", "ipp://srv/printers/hp2"),
                class,
            ]],
            details,
        );
        registry.ensure_initialized().await.unwrap();

        let class = registry.lookup("FLOOR1").unwrap();
        assert!(class.duplex);
        assert_eq!(class.protocol_uri, "ipp://srv/classes/floor1");
    }

    #[tokio::test]
    async fn class_with_mismatched_members_is_skipped() {
        let mut details = hp1_details();
        details.insert(
            "ipp://srv/printers/xerox".into(),
            detail(&[("printer-make-and-model", "Xerox VersaLink")]),
        );

        let mut class = device("floor1", "ipp://srv/classes/floor1");
        class
            .attrs
            .insert("member-names".into(), "hp1,xerox".into());

        let (registry, _) = registry_with(
            vec![vec![
                device("hp1", "ipp://srv/printers/hp1"),
                device("xerox", "ipp://srv/printers/xerox"),
                class,
            ]],
            details,
        );
        registry.ensure_initialized().await.unwrap();

        assert!(registry.lookup("FLOOR1").is_none());
        assert!(registry.lookup("HP1").is_some());
        assert!(registry.lookup("XEROX").is_some());
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_and_keeps_stale_cache() {
        let protocol = Arc::new(FakeProtocol::new(
            vec![vec![device("hp1", "ipp://srv/printers/hp1")]],
            hp1_details(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(1, std::time::Duration::from_secs(600)));
        let registry = PrinterRegistry::new(protocol.clone(), breaker.clone(), Vec::new());
        registry.ensure_initialized().await.unwrap();

        breaker.record_failure("connection refused");
        let calls_before = protocol.discover_calls.load(Ordering::SeqCst);
        let err = registry.refresh(true).await.unwrap_err();
        assert!(matches!(err, GatewayError::Connect(_)));
        // no network attempt while open; stale data still served
        assert_eq!(protocol.discover_calls.load(Ordering::SeqCst), calls_before);
        assert!(registry.lookup("HP1").is_some());
    }

    #[test]
    fn identity_parse_handles_extension_marker() {
        let identity = DeviceIdentity::parse("Lab [external][ext:lab-a4]");
        assert!(identity.externally_managed);
        assert_eq!(identity.custom_extension.as_deref(), Some("lab-a4"));
        assert!(!identity.job_ticket);
    }

    #[test]
    fn identity_parse_of_plain_text_is_default() {
        assert_eq!(DeviceIdentity::parse("Just a printer"), DeviceIdentity::default());
    }
}
