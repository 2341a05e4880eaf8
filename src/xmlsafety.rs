//! XML parsing safety for request bodies (§4.2 "XML parsing safety").
//!
//! Applied to every WebDAV method body (`PROPFIND`, `PROPPATCH`, `LOCK`)
//! before it reaches `xmltree`/`xml-rs`: external entities (`SYSTEM`/
//! `PUBLIC` DTD entity declarations) are rejected outright, and internal
//! entity replacement text is capped at 100 characters. DTDs and internal
//! entities within that bound are otherwise left alone -- `xml-rs` doesn't
//! expand them into the element tree anyway, so this is only a guard
//! against a hostile declaration, not a general DTD processor.
use crate::errors::DavError;
use crate::DavResult;

const MAX_ENTITY_VALUE_LEN: usize = 100;

/// Scan for `<!ENTITY ...>` declarations in a (not-yet-parsed) XML body and
/// reject anything that looks like an external entity or an oversized
/// internal one. Operates on raw bytes -- this runs before we know the
/// document even parses, exactly where the attack surface is.
pub(crate) fn check_xml_safety(data: &[u8]) -> DavResult<()> {
    let mut i = 0;
    while let Some(pos) = find(data, i, b"<!ENTITY") {
        let end = match find(data, pos, b">") {
            Some(e) => e,
            None => return Err(DavError::Status(http::StatusCode::BAD_REQUEST)),
        };
        let decl = &data[pos..=end];

        if contains(decl, b"SYSTEM") || contains(decl, b"PUBLIC") {
            return Err(external_entity_error());
        }

        if let Some(value) = quoted_value(decl) {
            if value.len() > MAX_ENTITY_VALUE_LEN {
                return Err(DavError::Status(http::StatusCode::BAD_REQUEST));
            }
        }

        i = end + 1;
    }
    Ok(())
}

fn external_entity_error() -> DavError {
    // DAV:no-external-entities (§6.4); the resolver "raises a condition
    // code" per §4.2, surfaced as 403 like the other named-precondition
    // failures (`DAV:cannot-modify-protected-property`, etc).
    DavError::Status(http::StatusCode::FORBIDDEN)
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, 0, needle).is_some()
}

// Extract the text between the first matching pair of quotes (single or
// double) in an `<!ENTITY name "value">` declaration.
fn quoted_value(decl: &[u8]) -> Option<&[u8]> {
    let quote = decl.iter().position(|&b| b == b'"' || b == b'\'')?;
    let q = decl[quote];
    let end = decl[quote + 1..].iter().position(|&b| b == q)? + quote + 1;
    Some(&decl[quote + 1..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_body_passes() {
        let body = b"<propfind xmlns=\"DAV:\"><allprop/></propfind>";
        assert!(check_xml_safety(body).is_ok());
    }

    #[test]
    fn external_system_entity_rejected() {
        let body = br#"<!DOCTYPE foo [ <!ENTITY xxe SYSTEM "file:///etc/passwd"> ]>
            <propfind xmlns="DAV:"><prop>&xxe;</prop></propfind>"#;
        let err = check_xml_safety(body).unwrap_err();
        assert_eq!(err.statuscode(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn external_public_entity_rejected() {
        let body = br#"<!DOCTYPE foo [ <!ENTITY pub PUBLIC "-//x" "http://evil/x.dtd"> ]>"#;
        let err = check_xml_safety(body).unwrap_err();
        assert_eq!(err.statuscode(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn short_internal_entity_ok() {
        let body = br#"<!DOCTYPE foo [ <!ENTITY short "hi"> ]><propfind xmlns="DAV:"><allprop/></propfind>"#;
        assert!(check_xml_safety(body).is_ok());
    }

    #[test]
    fn oversized_internal_entity_rejected() {
        let long = "x".repeat(200);
        let body = format!(r#"<!DOCTYPE foo [ <!ENTITY big "{}"> ]>"#, long);
        let err = check_xml_safety(body.as_bytes()).unwrap_err();
        assert_eq!(err.statuscode(), http::StatusCode::BAD_REQUEST);
    }
}
