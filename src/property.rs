//! Typed property values (§3.2/§9): the dynamic-typing model the rest of
//! the crate uses instead of raw XML bytes.
//!
//! `DavFileSystem` never sees these — they belong to the property store
//! (`propstore.rs`) and to live properties computed by `handle_props`.
use std::time::{Duration, SystemTime};

use base64::Engine;
use url::Url;
use uuid::Uuid;
use xmltree::Element;

/// A (namespace URI, local name) pair. Equality is exact string equality
/// on both halves, per §3.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> QName {
        QName {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub fn dav(local: impl Into<String>) -> QName {
        QName::new("DAV:", local)
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{{{}}}{}", self.ns, self.local)
    }
}

/// The tagged value union from §9 DESIGN NOTES. One-dimensional arrays
/// only — nested arrays are not representable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    /// Decimal values are kept as their exact decimal string form; the
    /// crate never needs arithmetic on them, only round-trip preservation.
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Time(SystemTime),
    Duration(Duration),
    Uri(Url),
    Uuid(Uuid),
    QName(QName),
    /// An arbitrary, uninterpreted XML fragment (verbatim dead-property content).
    Xml(Element),
    Array(Vec<Value>),
}

impl Value {
    /// The `xs:`-prefixed type name inferred from this value's runtime
    /// variant, used to fill in `xsi:type` for properties that don't
    /// declare one explicitly (§4.4 "Type inference").
    pub fn inferred_xsd_type(&self) -> Option<&'static str> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some("xs:boolean"),
            Value::Int64(_) => Some("xs:int"),
            Value::Uint64(_) => Some("xs:unsignedInt"),
            Value::Float64(_) => Some("xs:double"),
            Value::Decimal(_) => Some("xs:decimal"),
            Value::String(_) => Some("xs:string"),
            Value::Bytes(_) => Some("xs:base64Binary"),
            Value::Time(_) => Some("xs:dateTime"),
            Value::Duration(_) => Some("xs:duration"),
            Value::Uri(_) => Some("xs:anyURI"),
            Value::Uuid(_) => Some("xs:string"),
            Value::QName(_) => Some("xs:QName"),
            Value::Xml(_) => None,
            Value::Array(_) => None,
        }
    }

    /// Checks a declared XSD type name against this value's variant.
    /// Unknown type names are accepted (forward-compat with vocabularies
    /// this crate doesn't model); only an outright variant mismatch fails.
    pub fn validates_as(&self, xsd_type: &str) -> bool {
        match (xsd_type, self) {
            ("xs:boolean", Value::Bool(_)) => true,
            ("xs:int" | "xs:integer" | "xs:long" | "xs:short", Value::Int64(_)) => true,
            ("xs:unsignedInt" | "xs:unsignedLong" | "xs:nonNegativeInteger", Value::Uint64(_)) => true,
            ("xs:float" | "xs:double", Value::Float64(_)) => true,
            ("xs:decimal", Value::Decimal(_)) => true,
            ("xs:string" | "xs:token" | "xs:normalizedString", Value::String(_)) => true,
            ("xs:base64Binary" | "xs:hexBinary", Value::Bytes(_)) => true,
            ("xs:dateTime" | "xs:date", Value::Time(_)) => true,
            ("xs:duration", Value::Duration(_)) => true,
            ("xs:anyURI", Value::Uri(_)) => true,
            ("xs:QName", Value::QName(_)) => true,
            (_, Value::Null) => true,
            // A type name we don't recognize at all: don't reject it,
            // the caller asked us to preserve something we don't model.
            (t, _) if !KNOWN_XSD_TYPES.contains(&t) => true,
            _ => false,
        }
    }

    /// Renders this value as the text content of its `<prop>` element,
    /// honoring the resolved (declared-or-inferred) `xsd_type` where the
    /// serialization actually depends on it (§4.4 "Type inference"):
    /// `xs:hexBinary` switches `Bytes` to hex instead of base64, and
    /// `xs:date` switches `Time` to date-only instead of full `dateTime`.
    pub fn as_xml_text_typed(&self, xsd_type: Option<&str>) -> Option<String> {
        match self {
            Value::Bool(b) => Some(if *b { "true".into() } else { "false".into() }),
            Value::Int64(n) => Some(n.to_string()),
            Value::Uint64(n) => Some(n.to_string()),
            Value::Float64(n) => Some(n.to_string()),
            Value::Decimal(s) => Some(s.clone()),
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(match xsd_type {
                Some("xs:hexBinary") => encode_hex(b),
                _ => base64::engine::general_purpose::STANDARD.encode(b),
            }),
            Value::Time(t) => Some(match xsd_type {
                Some("xs:date") => crate::util::systemtime_to_date(*t),
                _ => crate::util::systemtime_to_rfc3339(*t),
            }),
            Value::Duration(d) => Some(format_duration(*d)),
            Value::Uri(u) => Some(u.to_string()),
            Value::Uuid(u) => Some(u.to_string()),
            Value::QName(q) => Some(q.to_string()),
            Value::Null | Value::Xml(_) | Value::Array(_) => None,
        }
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

const KNOWN_XSD_TYPES: &[&str] = &[
    "xs:boolean",
    "xs:int",
    "xs:integer",
    "xs:long",
    "xs:short",
    "xs:unsignedInt",
    "xs:unsignedLong",
    "xs:nonNegativeInteger",
    "xs:float",
    "xs:double",
    "xs:decimal",
    "xs:string",
    "xs:token",
    "xs:normalizedString",
    "xs:base64Binary",
    "xs:hexBinary",
    "xs:dateTime",
    "xs:date",
    "xs:duration",
    "xs:anyURI",
    "xs:QName",
];

// RFC 3339 calendar duration, the common subset this crate ever produces:
// "PnDTnHnMnS" built from a plain `std::time::Duration`.
fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86400;
    let hours = (total % 86400) / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    let mut s = String::from("P");
    if days > 0 {
        s.push_str(&format!("{}D", days));
    }
    if hours > 0 || mins > 0 || secs > 0 {
        s.push('T');
        if hours > 0 {
            s.push_str(&format!("{}H", hours));
        }
        if mins > 0 {
            s.push_str(&format!("{}M", mins));
        }
        if secs > 0 || s.ends_with('T') {
            s.push_str(&format!("{}S", secs));
        }
    }
    if s == "P" {
        s.push_str("T0S");
    }
    s
}

/// A protected, dead, or computed property as exposed at the API boundary.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: QName,
    pub xsd_type: Option<String>,
    pub lang: Option<String>,
    pub content: PropValue,
}

#[derive(Debug, Clone)]
pub enum PropValue {
    Value(Value),
    /// Verbatim XML, preserved byte-for-byte including namespaces and
    /// inherited `xml:lang` — used for dead properties whose shape the
    /// store never needs to interpret.
    Xml(Element),
    Error(http::StatusCode),
}

impl Property {
    pub fn new(name: QName, content: PropValue) -> Property {
        Property {
            name,
            xsd_type: None,
            lang: None,
            content,
        }
    }

    pub fn with_type(mut self, xsd_type: impl Into<String>) -> Property {
        self.xsd_type = Some(xsd_type.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Property {
        self.lang = Some(lang.into());
        self
    }

    /// Validates a declared type, if any, against the carried value.
    /// §3.2: "if a type is specified, the value must validate against it."
    pub fn validate(&self) -> bool {
        match (&self.xsd_type, &self.content) {
            (Some(t), PropValue::Value(v)) => v.validates_as(t),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration as StdDuration, UNIX_EPOCH};

    #[test]
    fn bytes_default_to_base64() {
        let v = Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(v.as_xml_text_typed(Some("xs:base64Binary")), Some("3q2+7w==".to_string()));
        assert_eq!(v.as_xml_text_typed(None), Some("3q2+7w==".to_string()));
    }

    #[test]
    fn bytes_hex_binary_emits_hex() {
        let v = Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(v.as_xml_text_typed(Some("xs:hexBinary")), Some("deadbeef".to_string()));
    }

    #[test]
    fn time_default_to_full_datetime() {
        let t = UNIX_EPOCH + StdDuration::from_secs(1_000_000_000);
        let v = Value::Time(t);
        let text = v.as_xml_text_typed(Some("xs:dateTime")).unwrap();
        assert!(text.contains('T'), "expected full dateTime form, got {}", text);
    }

    #[test]
    fn time_declared_date_is_date_only() {
        let t = UNIX_EPOCH + StdDuration::from_secs(1_000_000_000);
        let v = Value::Time(t);
        let text = v.as_xml_text_typed(Some("xs:date")).unwrap();
        assert!(!text.contains('T'), "expected date-only form, got {}", text);
        assert_eq!(text, "2001-09-09");
    }
}
