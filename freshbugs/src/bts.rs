//! Debbugs SOAP client for bugs.debian.org.
//!
//! Wraps the two operations this tool needs: `get_bugs`, resolving a
//! role/identifier pair to bug numbers, and `get_status`, fetching full bug
//! records. Envelopes are built by hand and responses are mined with
//! regexes; both response shapes are shallow key/value listings, so a full
//! XML stack would outweigh the parsing.

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEBBUGS_SOAP_URL: &str = "https://bugs.debian.org/cgi-bin/soap.cgi";
const SOAP_NAMESPACE: &str = "Debbugs/SOAP";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from talking to the Debbugs SOAP endpoint.
#[derive(Debug, thiserror::Error)]
pub enum BtsError {
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("SOAP fault: {0}")]
    Fault(String),
    #[error("malformed SOAP response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Query roles and records
// ---------------------------------------------------------------------------

/// Lens used to resolve an identifier to bug numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Maintainer,
    Submitter,
    Owner,
    Correspondent,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Maintainer,
        Role::Submitter,
        Role::Owner,
        Role::Correspondent,
    ];

    /// Key understood by the Debbugs `get_bugs` query.
    fn query_key(self) -> &'static str {
        match self {
            Role::Maintainer => "maint",
            Role::Submitter => "submitter",
            Role::Owner => "owner",
            Role::Correspondent => "correspondent",
        }
    }
}

/// A bug as reported by `get_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugRecord {
    pub number: u32,
    pub package: String,
    pub subject: String,
    /// Reporter as free text, usually `Name <email>`.
    pub originator: Option<String>,
    /// Last modification instant, truncated to the second.
    pub last_modified: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Positional argument of a SOAP call.
enum SoapArg<'a> {
    Str(&'a str),
    Int(u32),
}

pub struct DebbugsClient {
    client: reqwest::Client,
    endpoint: String,
}

impl DebbugsClient {
    pub fn new() -> Self {
        Self::with_endpoint(DEBBUGS_SOAP_URL)
    }

    /// Client against a non-default endpoint (mirrors, tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Generic SOAP helper
    // -----------------------------------------------------------------------

    async fn soap_call(&self, method: &str, args: &[SoapArg<'_>]) -> Result<String, BtsError> {
        let body = soap_envelope(method, args);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("{SOAP_NAMESPACE}#{method}"))
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            warn!("Debbugs SOAP error: HTTP {} : {}", status.as_u16(), text);
            return Err(BtsError::Http {
                status: status.as_u16(),
                message: text,
            });
        }
        if let Some(fault) = extract_fault(&text) {
            return Err(BtsError::Fault(fault));
        }
        Ok(text)
    }

    // -----------------------------------------------------------------------
    // Public API methods
    // -----------------------------------------------------------------------

    /// Resolve one role/identifier pair to bug numbers. An identifier the
    /// BTS does not know yields an empty list, not an error.
    pub async fn get_bugs(&self, role: Role, identifier: &str) -> Result<Vec<u32>, BtsError> {
        let args = [SoapArg::Str(role.query_key()), SoapArg::Str(identifier)];
        let body = self.soap_call("get_bugs", &args).await?;
        Ok(parse_bug_numbers(&body))
    }

    /// Fetch full records for the given bugs. Numbers the BTS does not know
    /// are simply absent from the result.
    pub async fn get_status(&self, numbers: &[u32]) -> Result<Vec<BugRecord>, BtsError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let args: Vec<SoapArg> = numbers.iter().map(|n| SoapArg::Int(*n)).collect();
        let body = self.soap_call("get_status", &args).await?;
        parse_status(&body)
    }
}

impl Default for DebbugsClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Envelope construction
// ---------------------------------------------------------------------------

fn soap_envelope(method: &str, args: &[SoapArg<'_>]) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    body.push_str(
        "<soap:Envelope \
         xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         soap:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">",
    );
    body.push_str("<soap:Body>");
    body.push_str(&format!("<ns:{method} xmlns:ns=\"{SOAP_NAMESPACE}\">"));
    for (index, arg) in args.iter().enumerate() {
        match arg {
            SoapArg::Str(value) => body.push_str(&format!(
                "<arg{index} xsi:type=\"xsd:string\">{}</arg{index}>",
                xml_escape(value)
            )),
            SoapArg::Int(value) => body.push_str(&format!(
                "<arg{index} xsi:type=\"xsd:int\">{value}</arg{index}>"
            )),
        }
    }
    body.push_str(&format!("</ns:{method}>"));
    body.push_str("</soap:Body></soap:Envelope>");
    body
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn extract_fault(body: &str) -> Option<String> {
    let re = Regex::new(r"(?s)<faultstring[^>]*>(.*?)</faultstring>").unwrap();
    re.captures(body).map(|c| xml_unescape(c[1].trim()))
}

/// `get_bugs` responses list the matches as `<item ...>NNN</item>`.
fn parse_bug_numbers(body: &str) -> Vec<u32> {
    let re = Regex::new(r"<item[^>]*>\s*(\d+)\s*</item>").unwrap();
    re.captures_iter(body)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// `get_status` responses map each bug number key to a flat struct of
/// scalar fields; only the fields this tool reports are extracted.
fn parse_status(body: &str) -> Result<Vec<BugRecord>, BtsError> {
    let item_re = Regex::new(r"(?s)<item[^>]*>(.*?)</item>").unwrap();
    let key_re = Regex::new(r"(?s)<key[^>]*>\s*(\d+)\s*</key>").unwrap();

    let mut records = Vec::new();
    for item in item_re.captures_iter(body) {
        let block = &item[1];
        let number: u32 = key_re
            .captures(block)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| BtsError::Malformed("status item without a bug number key".into()))?;

        let package = field(block, "package").unwrap_or_default();
        let subject = field(block, "subject").unwrap_or_default();
        let originator = field(block, "originator").filter(|o| !o.is_empty());

        let modified_raw = field(block, "log_modified")
            .ok_or_else(|| BtsError::Malformed(format!("bug {number} is missing log_modified")))?;
        // Epoch seconds; some servers report a float, the fraction is noise.
        let secs: i64 = modified_raw
            .split('.')
            .next()
            .unwrap_or("")
            .parse()
            .map_err(|_| {
                BtsError::Malformed(format!("bug {number} log_modified {modified_raw:?}"))
            })?;
        let last_modified = chrono::DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| {
                BtsError::Malformed(format!("bug {number} log_modified {secs} out of range"))
            })?
            .naive_utc();

        records.push(BugRecord {
            number,
            package,
            subject,
            originator,
            last_modified,
        });
    }
    Ok(records)
}

/// First `<name ...>text</name>` occurrence inside a status block.
fn field(block: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?s)<{name}[^>]*>(.*?)</{name}>")).unwrap();
    re.captures(block).map(|c| xml_unescape(c[1].trim()))
}
