// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async IPP client for the remote CUPS print server.
//
// Uses the `ipp` crate's async API to send the operations the gateway
// needs:
//   - CUPS-Get-Printers          (device discovery)
//   - Get-Printer-Attributes     (RFC 8011 §4.2.5)
//   - Print-Job                  (RFC 8011 §4.2.1)
//   - Get-Job-Attributes         (RFC 8011 §4.3.4)
//   - Cancel-Job                 (RFC 8011 §4.3.3)
//   - Create/Renew/Cancel-Subscription (RFC 3995)
//
// Every operation is one synchronous request/response round trip.  Connect
// failures toggle the process-wide circuit breaker; the registry consults
// it before refreshing.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ipp::prelude::*;
use tracing::{debug, error, info, instrument, warn};

use printgate_core::error::{GatewayError, Result};
use printgate_core::types::{DispatchedJob, IppJobState, UserId};

use crate::circuit::CircuitBreaker;

/// Flattened attribute map of one response group.
pub type RawAttributes = HashMap<String, String>;

// RFC 3995 operation codes.  The `ipp` crate's `Operation` enum stops at
// the RFC 8011 and CUPS sets, so subscription requests patch the raw code
// into the header.
const CREATE_PRINTER_SUBSCRIPTIONS: u16 = 0x0016;
const RENEW_SUBSCRIPTION: u16 = 0x001C;
const CANCEL_SUBSCRIPTION: u16 = 0x001D;

/// Raw attribute view of one device returned by discovery.
#[derive(Debug, Clone)]
pub struct DeviceAttributes {
    /// `printer-name` as reported by the server.
    pub name: String,
    /// `printer-uri-supported` (the protocol URI of the device queue).
    pub uri: String,
    /// Remaining attributes, flattened to strings.
    pub attrs: RawAttributes,
}

/// A granted event-push subscription.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionLease {
    /// `notify-subscription-id` assigned by the server.
    pub id: i32,
    /// Granted lease duration in seconds.
    pub lease_secs: u32,
}

/// Everything one physical Print-Job send needs.  Built fresh per chunk and
/// never mutated after construction.
#[derive(Debug, Clone)]
pub struct SendJobRequest {
    pub printer_uri: String,
    /// Raw PDF bytes of the document to send.
    pub document: Vec<u8>,
    pub job_name: String,
    pub user: UserId,
    pub copies: u32,
    pub collate: bool,
    /// Additional IPP job-template attributes as keyword values
    /// (media, sides, media-source, print-scaling, print-color-mode, ...).
    pub options: BTreeMap<String, String>,
}

/// Protocol-level operations against the remote print server.
///
/// The registry and dispatcher consume this trait so tests can substitute
/// an in-memory protocol.
#[async_trait]
pub trait JobProtocol: Send + Sync {
    /// Full device list from the server (CUPS-Get-Printers).
    async fn discover_printers(&self) -> Result<Vec<DeviceAttributes>>;

    /// Capability/state attributes of one device queue.
    async fn get_printer_attributes(&self, printer_uri: &str) -> Result<RawAttributes>;

    /// Submit a document; returns the device-side job on success.
    async fn send_job(&self, request: SendJobRequest) -> Result<DispatchedJob>;

    /// Query one job; `None` when the server no longer knows it.
    async fn query_job(&self, printer_uri: &str, job_id: i32) -> Result<Option<DispatchedJob>>;

    /// Cancel a queued-but-unstarted device job.  `false` when the job was
    /// already gone.
    async fn cancel_job(&self, printer_uri: &str, job_id: i32, user: &UserId) -> Result<bool>;

    /// Register for server event push.
    async fn create_subscription(
        &self,
        events: &[String],
        lease_secs: u32,
    ) -> Result<SubscriptionLease>;

    /// Extend an existing subscription; returns the granted lease.
    async fn renew_subscription(&self, id: i32, lease_secs: u32) -> Result<u32>;

    async fn cancel_subscription(&self, id: i32) -> Result<()>;
}

/// Async IPP client bound to one print server endpoint.
pub struct IppJobClient {
    /// Base URI of the print server (e.g. `ipp://cups.local:631/`).
    server_uri: Uri,
    /// Round-trip budget per protocol call.
    read_timeout: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl IppJobClient {
    pub fn new(server_uri: &str, read_timeout: Duration, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let parsed: Uri = server_uri
            .parse()
            .map_err(|e| GatewayError::Connect(format!("invalid server URI '{server_uri}': {e}")))?;
        Ok(Self {
            server_uri: parsed,
            read_timeout,
            breaker,
        })
    }

    pub fn server_uri(&self) -> &Uri {
        &self.server_uri
    }

    /// Send one request and enforce the read timeout.  Success and failure
    /// both feed the circuit breaker — this is the only place that toggles
    /// it.
    async fn roundtrip(
        &self,
        operation: &'static str,
        target: &Uri,
        request: IppRequestResponse,
    ) -> Result<IppRequestResponse> {
        let client = AsyncIppClient::new(target.clone());
        let outcome = tokio::time::timeout(self.read_timeout, client.send(request)).await;

        let response = match outcome {
            Err(_elapsed) => {
                let err = format!("{operation}: timed out after {:?}", self.read_timeout);
                self.breaker.record_failure(&err);
                return Err(GatewayError::Connect(err));
            }
            Ok(Err(err)) => {
                let mapped = classify_ipp_error(operation, &err);
                if mapped.is_retryable() {
                    self.breaker.record_failure(&mapped.to_string());
                }
                return Err(mapped);
            }
            Ok(Ok(response)) => response,
        };

        self.breaker.record_success();
        Ok(response)
    }

    fn parse_uri(&self, uri: &str) -> Result<Uri> {
        uri.parse()
            .map_err(|e| GatewayError::ProtocolSyntax(format!("invalid printer URI '{uri}': {e}")))
    }

    /// Request skeleton for an RFC 3995 operation.  Built with a placeholder
    /// operation; the raw code goes into the header afterwards.
    fn notification_request(&self, opcode: u16) -> IppRequestResponse {
        let mut request = IppRequestResponse::new(
            IppVersion::v1_1(),
            Operation::GetPrinterAttributes,
            Some(self.server_uri.clone()),
        );
        request.header_mut().operation_or_status = opcode;
        request
    }
}

#[async_trait]
impl JobProtocol for IppJobClient {
    #[instrument(skip(self), fields(uri = %self.server_uri))]
    async fn discover_printers(&self) -> Result<Vec<DeviceAttributes>> {
        let request = IppRequestResponse::new(
            IppVersion::v1_1(),
            Operation::CupsGetPrinters,
            Some(self.server_uri.clone()),
        );

        debug!("sending CUPS-Get-Printers");
        let response = self
            .roundtrip("CUPS-Get-Printers", &self.server_uri, request)
            .await?;
        check_status("CUPS-Get-Printers", &response)?;

        // One Printer Attributes group per device.
        let mut devices = Vec::new();
        for group in response
            .attributes()
            .groups_of(DelimiterTag::PrinterAttributes)
        {
            let attrs = flatten_group(group.attributes());
            let Some(name) = attrs.get("printer-name").cloned() else {
                warn!("printer group without printer-name skipped");
                continue;
            };
            let uri = attrs
                .get("printer-uri-supported")
                .or_else(|| attrs.get("printer-uri"))
                .cloned()
                .unwrap_or_default();
            devices.push(DeviceAttributes { name, uri, attrs });
        }

        info!(count = devices.len(), "device list retrieved");
        Ok(devices)
    }

    #[instrument(skip(self), fields(uri = %printer_uri))]
    async fn get_printer_attributes(&self, printer_uri: &str) -> Result<RawAttributes> {
        let uri = self.parse_uri(printer_uri)?;
        let operation = IppOperationBuilder::get_printer_attributes(uri.clone()).build();

        debug!("sending Get-Printer-Attributes");
        let response = self
            .roundtrip("Get-Printer-Attributes", &uri, operation.into())
            .await?;
        check_status("Get-Printer-Attributes", &response)?;

        let attrs = flatten_attributes(response.attributes());
        debug!(count = attrs.len(), "received printer attributes");
        Ok(attrs)
    }

    #[instrument(
        skip(self, request),
        fields(uri = %request.printer_uri, job_name = %request.job_name, bytes = request.document.len())
    )]
    async fn send_job(&self, request: SendJobRequest) -> Result<DispatchedJob> {
        let uri = self.parse_uri(&request.printer_uri)?;
        let payload = IppPayload::new(Cursor::new(request.document));

        let mut builder = IppOperationBuilder::print_job(uri.clone(), payload)
            .user_name(request.user.0.as_str())
            .job_title(request.job_name.as_str())
            .document_format("application/pdf")
            .attribute(IppAttribute::new(
                "copies",
                IppValue::Integer(request.copies.max(1) as i32),
            ))
            .attribute(IppAttribute::new(
                "multiple-document-handling",
                IppValue::Keyword(
                    if request.collate {
                        "separate-documents-collated-copies"
                    } else {
                        "separate-documents-uncollated-copies"
                    }
                    .into(),
                ),
            ));
        for (keyword, value) in &request.options {
            builder = builder.attribute(IppAttribute::new(
                keyword.as_str(),
                IppValue::Keyword(value.clone()),
            ));
        }

        info!("sending Print-Job");
        let response = self
            .roundtrip("Print-Job", &uri, builder.build().into())
            .await?;
        check_status("Print-Job", &response)?;

        let attrs = flatten_by_group(response.attributes(), DelimiterTag::JobAttributes);
        let job_id = int_attr(&attrs, "job-id").ok_or_else(|| {
            GatewayError::ProtocolSyntax("Print-Job response missing job-id".into())
        })?;
        let state = int_attr(&attrs, "job-state")
            .and_then(IppJobState::from_enum_value)
            .unwrap_or(IppJobState::Pending);

        info!(job_id, ?state, "print job accepted by server");
        Ok(DispatchedJob {
            job_id,
            state,
            created_at: Utc::now(),
            completed_at: None,
            title: request.job_name,
            user: request.user,
        })
    }

    #[instrument(skip(self), fields(uri = %printer_uri, job_id))]
    async fn query_job(&self, printer_uri: &str, job_id: i32) -> Result<Option<DispatchedJob>> {
        let uri = self.parse_uri(printer_uri)?;
        let mut request = IppRequestResponse::new(
            IppVersion::v1_1(),
            Operation::GetJobAttributes,
            Some(uri.clone()),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("job-id", IppValue::Integer(job_id)),
        );

        debug!("sending Get-Job-Attributes");
        let response = self.roundtrip("Get-Job-Attributes", &uri, request).await?;
        if response.header().status_code() == StatusCode::ClientErrorNotFound {
            return Ok(None);
        }
        check_status("Get-Job-Attributes", &response)?;

        let attrs = flatten_by_group(response.attributes(), DelimiterTag::JobAttributes);
        let state = int_attr(&attrs, "job-state")
            .and_then(IppJobState::from_enum_value)
            .ok_or_else(|| {
                GatewayError::ProtocolSyntax("Get-Job-Attributes response missing job-state".into())
            })?;

        Ok(Some(DispatchedJob {
            job_id,
            state,
            created_at: Utc::now(),
            completed_at: state.is_terminal().then(Utc::now),
            title: attrs.get("job-name").cloned().unwrap_or_default(),
            user: UserId(
                attrs
                    .get("job-originating-user-name")
                    .cloned()
                    .unwrap_or_default(),
            ),
        }))
    }

    #[instrument(skip(self), fields(uri = %printer_uri, job_id, user = %user))]
    async fn cancel_job(&self, printer_uri: &str, job_id: i32, user: &UserId) -> Result<bool> {
        let uri = self.parse_uri(printer_uri)?;
        let mut request = IppRequestResponse::new(
            IppVersion::v1_1(),
            Operation::CancelJob,
            Some(uri.clone()),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("job-id", IppValue::Integer(job_id)),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requesting-user-name",
                IppValue::NameWithoutLanguage(user.0.clone()),
            ),
        );

        info!("sending Cancel-Job");
        let response = self.roundtrip("Cancel-Job", &uri, request).await?;
        if response.header().status_code() == StatusCode::ClientErrorNotFound {
            debug!("job already gone");
            return Ok(false);
        }
        check_status("Cancel-Job", &response)?;

        info!(job_id, "job cancelled");
        Ok(true)
    }

    #[instrument(skip(self, events), fields(uri = %self.server_uri, lease_secs))]
    async fn create_subscription(
        &self,
        events: &[String],
        lease_secs: u32,
    ) -> Result<SubscriptionLease> {
        let mut request = self.notification_request(CREATE_PRINTER_SUBSCRIPTIONS);
        let event_values: Vec<IppValue> = events
            .iter()
            .map(|e| IppValue::Keyword(e.clone()))
            .collect();
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("notify-events", IppValue::Array(event_values)),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "notify-lease-duration",
                IppValue::Integer(lease_secs as i32),
            ),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("notify-pull-method", IppValue::Keyword("ippget".into())),
        );

        info!("sending Create-Printer-Subscriptions");
        let response = self
            .roundtrip("Create-Printer-Subscriptions", &self.server_uri, request)
            .await?;
        check_status("Create-Printer-Subscriptions", &response)?;

        let attrs = flatten_attributes(response.attributes());
        let id = int_attr(&attrs, "notify-subscription-id").ok_or_else(|| {
            GatewayError::ProtocolSyntax("subscription response missing notify-subscription-id".into())
        })?;
        let granted = int_attr(&attrs, "notify-lease-duration")
            .map(|v| v as u32)
            .unwrap_or(lease_secs);

        info!(id, granted, "subscription created");
        Ok(SubscriptionLease {
            id,
            lease_secs: granted,
        })
    }

    #[instrument(skip(self), fields(uri = %self.server_uri, id, lease_secs))]
    async fn renew_subscription(&self, id: i32, lease_secs: u32) -> Result<u32> {
        let mut request = self.notification_request(RENEW_SUBSCRIPTION);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("notify-subscription-id", IppValue::Integer(id)),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "notify-lease-duration",
                IppValue::Integer(lease_secs as i32),
            ),
        );

        debug!("sending Renew-Subscription");
        let response = self
            .roundtrip("Renew-Subscription", &self.server_uri, request)
            .await?;
        check_status("Renew-Subscription", &response)?;

        let attrs = flatten_attributes(response.attributes());
        let granted = int_attr(&attrs, "notify-lease-duration")
            .map(|v| v as u32)
            .unwrap_or(lease_secs);
        debug!(id, granted, "subscription renewed");
        Ok(granted)
    }

    #[instrument(skip(self), fields(uri = %self.server_uri, id))]
    async fn cancel_subscription(&self, id: i32) -> Result<()> {
        let mut request = self.notification_request(CANCEL_SUBSCRIPTION);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("notify-subscription-id", IppValue::Integer(id)),
        );

        let response = self
            .roundtrip("Cancel-Subscription", &self.server_uri, request)
            .await?;
        check_status("Cancel-Subscription", &response)?;
        info!(id, "subscription cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helper functions for parsing IPP responses
// ---------------------------------------------------------------------------

/// Classify a transport-layer error from the `ipp` crate into the closed
/// gateway taxonomy.  The crate does not expose a stable variant split
/// between transport and parse failures, so this matches on the rendered
/// message.
fn classify_ipp_error(operation: &str, err: &IppError) -> GatewayError {
    let text = err.to_string();
    let lower = text.to_ascii_lowercase();
    if lower.contains("parse") || lower.contains("invalid") || lower.contains("unexpected") {
        GatewayError::ProtocolSyntax(format!("{operation}: {text}"))
    } else {
        GatewayError::Connect(format!("{operation}: {text}"))
    }
}

/// Fail on a non-success IPP status code.
fn check_status(operation: &str, response: &IppRequestResponse) -> Result<()> {
    let code = response.header().status_code();
    if code.is_success() {
        Ok(())
    } else {
        error!(status = ?code, "{operation} failed");
        Err(GatewayError::ProtocolSyntax(format!(
            "{operation} returned status {code:?}"
        )))
    }
}

/// Flatten all attribute groups into a single map.  Multi-valued
/// attributes render with `", "` separators, discarding group context in
/// favour of a simpler lookup interface.
fn flatten_attributes(attrs: &IppAttributes) -> RawAttributes {
    let mut map = HashMap::new();
    for group in attrs.groups() {
        for (name, attr) in group.attributes() {
            map.insert(name.clone(), format!("{}", attr.value()));
        }
    }
    map
}

/// Flatten only the groups with the given delimiter tag.
fn flatten_by_group(attrs: &IppAttributes, tag: DelimiterTag) -> RawAttributes {
    let mut map = HashMap::new();
    for group in attrs.groups_of(tag) {
        for (name, attr) in group.attributes() {
            map.insert(name.clone(), format!("{}", attr.value()));
        }
    }
    map
}

/// Flatten one group's attribute map.
fn flatten_group(attributes: &HashMap<String, IppAttribute>) -> RawAttributes {
    attributes
        .iter()
        .map(|(name, attr)| (name.clone(), format!("{}", attr.value())))
        .collect()
}

/// Read an integer attribute from a flattened map.
fn int_attr(attrs: &RawAttributes, name: &str) -> Option<i32> {
    attrs.get(name).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> IppJobClient {
        IppJobClient::new(
            "ipp://192.168.1.10:631/",
            Duration::from_secs(5),
            Arc::new(CircuitBreaker::default()),
        )
        .expect("valid uri")
    }

    #[test]
    fn new_rejects_invalid_uri() {
        let result = IppJobClient::new(
            "not a valid uri %%%",
            Duration::from_secs(5),
            Arc::new(CircuitBreaker::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn new_accepts_valid_ipp_uri() {
        let c = client();
        assert_eq!(c.server_uri().port_u16(), Some(631));
    }

    #[test]
    fn int_attr_parses_flattened_values() {
        let mut attrs = RawAttributes::new();
        attrs.insert("job-id".into(), "42".into());
        attrs.insert("job-state".into(), " 9 ".into());
        assert_eq!(int_attr(&attrs, "job-id"), Some(42));
        assert_eq!(int_attr(&attrs, "job-state"), Some(9));
        assert_eq!(int_attr(&attrs, "missing"), None);
    }

    #[test]
    fn notification_requests_carry_rfc3995_opcodes() {
        let c = client();
        let create = c.notification_request(CREATE_PRINTER_SUBSCRIPTIONS);
        assert_eq!(create.header().operation_or_status, 0x0016);
        let renew = c.notification_request(RENEW_SUBSCRIPTION);
        assert_eq!(renew.header().operation_or_status, 0x001C);
        let cancel = c.notification_request(CANCEL_SUBSCRIPTION);
        assert_eq!(cancel.header().operation_or_status, 0x001D);
    }

    #[test]
    fn flatten_group_renders_attribute_values() {
        let mut group = HashMap::new();
        group.insert(
            "printer-name".to_string(),
            IppAttribute::new("printer-name", IppValue::Keyword("hp1".into())),
        );
        group.insert(
            "job-id".to_string(),
            IppAttribute::new("job-id", IppValue::Integer(7)),
        );
        let flat = flatten_group(&group);
        assert_eq!(flat.get("printer-name").map(String::as_str), Some("hp1"));
        assert_eq!(int_attr(&flat, "job-id"), Some(7));
    }

    #[test]
    fn transport_errors_classify_as_connect() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = classify_ipp_error("Print-Job", &IppError::from(io));
        assert!(matches!(err, GatewayError::Connect(_)));
        assert!(err.is_retryable());
    }
}
