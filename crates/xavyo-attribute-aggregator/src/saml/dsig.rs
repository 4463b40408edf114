//! Enveloped XML-DSig signatures with exclusive canonicalization
//!
//! Signatures reference their parent element by `ID` and are placed directly
//! after the parent's `Issuer`, as SAML requires.

use super::signing::{
    digest_from_uri, verify_with_certificates, SignatureAlgorithm, SigningCredentials,
    SigningError,
};
use super::NS_DS;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::x509::X509;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use xml_canonicalization::Canonicalizer;

const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const TRANSFORM_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Apply Exclusive XML Canonicalization (C14N) without comments
pub fn canonicalize_xml(xml: &str) -> Result<String, SigningError> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| SigningError::Canonicalization(e.to_string()))?;

    String::from_utf8(output)
        .map_err(|e| SigningError::Canonicalization(format!("not valid UTF-8: {e}")))
}

/// XML escape special characters
#[must_use]
pub fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

fn reader_position(reader: &Reader<&[u8]>) -> usize {
    reader.buffer_position() as usize
}

/// Start offset of the tag that ends at `tag_end`.
///
/// `<` cannot occur unescaped inside a tag, so the last one before the end is
/// the tag's own.
fn tag_start(xml: &str, tag_end: usize) -> Option<usize> {
    xml.get(..tag_end)?.rfind('<')
}

fn has_id(e: &BytesStart<'_>, element_id: &str) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.as_ref() == b"ID" && a.unescape_value().is_ok_and(|v| v == element_id)
    })
}

fn parse_error(e: impl std::fmt::Display) -> SigningError {
    SigningError::MalformedSignature(format!("XML parse error: {e}"))
}

/// Byte range of the element carrying `ID="element_id"`, end tag included.
///
/// The ID must be unique in the document.
pub(crate) fn element_range(xml: &str, element_id: &str) -> Result<(usize, usize), SigningError> {
    let mut reader = Reader::from_str(xml);
    // Start offsets of the open elements
    let mut open: Vec<usize> = Vec::new();
    let mut target_depth: Option<usize> = None;
    let mut found: Option<(usize, usize)> = None;

    loop {
        let event = reader.read_event().map_err(parse_error)?;
        let after = reader_position(&reader);
        match event {
            Event::Start(e) | Event::Empty(e) if has_id(&e, element_id) => {
                if found.is_some() || target_depth.is_some() {
                    return Err(SigningError::MalformedSignature(format!(
                        "ID {element_id} is not unique"
                    )));
                }
                let start = tag_start(xml, after).ok_or_else(|| parse_error("tag start"))?;
                if xml.get(..after).is_some_and(|head| head.ends_with("/>")) {
                    found = Some((start, after));
                } else {
                    open.push(start);
                    target_depth = Some(open.len());
                }
            }
            Event::Start(_) => {
                open.push(tag_start(xml, after).ok_or_else(|| parse_error("tag start"))?);
            }
            Event::End(_) => {
                if target_depth == Some(open.len()) {
                    target_depth = None;
                    found = open.last().map(|&start| (start, after));
                }
                open.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    found.ok_or_else(|| {
        SigningError::MalformedSignature(format!("element {element_id} not found"))
    })
}

/// End offset of the first `</Issuer>` (any prefix) in `xml`
fn issuer_end(xml: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(pos) = xml[search_from..].find("Issuer>") {
        let abs = search_from + pos;
        if let Some(open) = xml[..abs].rfind("</") {
            let prefix = &xml[open + 2..abs];
            if prefix.is_empty() || (prefix.ends_with(':') && !prefix.contains(['<', '>', ' '])) {
                return Some(abs + "Issuer>".len());
            }
        }
        search_from = abs + 1;
    }
    None
}

/// Byte range of the `Signature` that is a direct child of the root of
/// `element`. The root must carry `ID="element_id"`.
fn child_signature_range(
    element: &str,
    element_id: &str,
) -> Result<(usize, usize), SigningError> {
    let mut reader = Reader::from_str(element);
    let mut depth = 0usize;
    let mut signature_start: Option<usize> = None;

    loop {
        let event = reader.read_event().map_err(parse_error)?;
        let after = reader_position(&reader);
        match event {
            Event::Start(e) | Event::Empty(e) if depth == 0 => {
                if !has_id(&e, element_id) {
                    return Err(SigningError::MalformedSignature(format!(
                        "element is not {element_id}"
                    )));
                }
                depth = 1;
            }
            Event::Start(e) => {
                let is_signature = e.local_name().as_ref() == b"Signature";
                if depth == 1 && is_signature && signature_start.is_none() {
                    signature_start = tag_start(element, after);
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some(start) = signature_start {
                        return Ok((start, after));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(SigningError::MalformedSignature(
        "element is not signed".to_string(),
    ))
}

fn digest_base64(digest: MessageDigest, data: &str) -> Result<String, SigningError> {
    let hash = openssl::hash::hash(digest, data.as_bytes())
        .map_err(|e| SigningError::Crypto(format!("digest failed: {e}")))?;
    Ok(STANDARD.encode(hash))
}

/// Sign the element identified by `element_id` inside `xml`.
///
/// The element must contain an `Issuer`; the `ds:Signature` is inserted
/// immediately after it. Returns the complete document with the signature.
pub fn sign_enveloped(
    xml: &str,
    element_id: &str,
    credentials: &SigningCredentials,
    algorithm: SignatureAlgorithm,
) -> Result<String, SigningError> {
    let (start, end) = element_range(xml, element_id)?;
    let element = &xml[start..end];

    let insert_at = issuer_end(element)
        .map(|pos| start + pos)
        .ok_or_else(|| SigningError::MalformedSignature("element has no Issuer".to_string()))?;

    let digest_b64 = digest_base64(MessageDigest::sha256(), &canonicalize_xml(element)?)?;

    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"");
    signed_info.push_str(NS_DS);
    signed_info.push_str("\">");
    signed_info.push_str("<ds:CanonicalizationMethod Algorithm=\"");
    signed_info.push_str(C14N_EXCLUSIVE);
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:SignatureMethod Algorithm=\"");
    signed_info.push_str(algorithm.uri());
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:Reference URI=\"#");
    signed_info.push_str(&xml_escape(element_id));
    signed_info.push_str("\">");
    signed_info.push_str("<ds:Transforms>");
    signed_info.push_str("<ds:Transform Algorithm=\"");
    signed_info.push_str(TRANSFORM_ENVELOPED);
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:Transform Algorithm=\"");
    signed_info.push_str(C14N_EXCLUSIVE);
    signed_info.push_str("\"/>");
    signed_info.push_str("</ds:Transforms>");
    signed_info.push_str("<ds:DigestMethod Algorithm=\"");
    signed_info.push_str(DIGEST_SHA256);
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:DigestValue>");
    signed_info.push_str(&digest_b64);
    signed_info.push_str("</ds:DigestValue>");
    signed_info.push_str("</ds:Reference>");
    signed_info.push_str("</ds:SignedInfo>");

    let canonicalized_signed_info = canonicalize_xml(&signed_info)?;
    let signature = credentials.sign(algorithm, canonicalized_signed_info.as_bytes())?;
    let certificate_b64 = credentials.certificate_base64_der()?;

    // No surrounding whitespace: the enveloped transform must restore the
    // exact bytes that were digested.
    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"");
    signature_xml.push_str(NS_DS);
    signature_xml.push_str("\">");
    signature_xml.push_str(&signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&STANDARD.encode(signature));
    signature_xml.push_str("</ds:SignatureValue>");
    signature_xml.push_str("<ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    signature_xml.push_str(&certificate_b64);
    signature_xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo>");
    signature_xml.push_str("</ds:Signature>");

    let mut result = String::with_capacity(xml.len() + signature_xml.len());
    result.push_str(&xml[..insert_at]);
    result.push_str(&signature_xml);
    result.push_str(&xml[insert_at..]);
    Ok(result)
}

/// Components of a `ds:Signature` element
#[derive(Debug, Default)]
struct SignatureInfo {
    signed_info: String,
    signature_method: String,
    reference_uri: String,
    digest_method: String,
    digest_value: String,
    signature_value: String,
}

fn extract_signature_info(signature_xml: &str) -> Result<SignatureInfo, SigningError> {
    let mut info = SignatureInfo::default();

    // SignedInfo is kept verbatim; canonicalization happens on the raw bytes.
    let si_start = signature_xml
        .find("SignedInfo")
        .and_then(|pos| signature_xml[..pos].rfind('<'))
        .ok_or_else(|| SigningError::MalformedSignature("no SignedInfo element".to_string()))?;
    let si_tag = signature_xml[si_start + 1..]
        .split(|c: char| c.is_whitespace() || c == '>')
        .next()
        .unwrap_or("SignedInfo");
    let si_close = format!("</{si_tag}>");
    let si_end = signature_xml[si_start..]
        .find(&si_close)
        .map(|pos| si_start + pos + si_close.len())
        .ok_or_else(|| SigningError::MalformedSignature("unterminated SignedInfo".to_string()))?;
    info.signed_info = with_inherited_namespace(&signature_xml[si_start..si_end], si_tag);

    let mut reader = Reader::from_str(signature_xml);
    reader.config_mut().trim_text(true);

    let mut current = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                let attr = |key: &str| {
                    e.attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == key.as_bytes())
                        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
                };
                match name {
                    "SignatureMethod" => info.signature_method = attr("Algorithm").unwrap_or_default(),
                    "DigestMethod" => info.digest_method = attr("Algorithm").unwrap_or_default(),
                    "Reference" => info.reference_uri = attr("URI").unwrap_or_default(),
                    _ => {}
                }
                current = name.to_string();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default();
                match current.as_str() {
                    "DigestValue" => info.digest_value.push_str(&text),
                    "SignatureValue" => info.signature_value.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SigningError::MalformedSignature(format!(
                    "XML parse error: {e}"
                )))
            }
            _ => {}
        }
    }

    if info.signature_value.is_empty() {
        return Err(SigningError::MalformedSignature(
            "no SignatureValue element".to_string(),
        ));
    }
    if info.digest_value.is_empty() {
        return Err(SigningError::MalformedSignature(
            "no DigestValue element".to_string(),
        ));
    }

    Ok(info)
}

/// Declare the dsig namespace on a detached `SignedInfo` that relied on an
/// ancestor declaration.
fn with_inherited_namespace(signed_info: &str, tag: &str) -> String {
    let (decl, needle) = match tag.split_once(':') {
        Some((prefix, _)) => (format!(" xmlns:{prefix}=\"{NS_DS}\""), format!("xmlns:{prefix}=")),
        None => (format!(" xmlns=\"{NS_DS}\""), "xmlns=".to_string()),
    };
    let tag_end = signed_info.find('>').unwrap_or(signed_info.len());
    if signed_info[..tag_end].contains(&needle) {
        return signed_info.to_string();
    }
    let insert_at = 1 + tag.len();
    let mut result = String::with_capacity(signed_info.len() + decl.len());
    result.push_str(&signed_info[..insert_at]);
    result.push_str(&decl);
    result.push_str(&signed_info[insert_at..]);
    result
}

/// Verify the enveloped signature of the element identified by `element_id`.
///
/// The ID must be unique in `xml`. See [`verify_element`] for the checks on
/// the element itself.
pub fn verify_enveloped(
    xml: &str,
    element_id: &str,
    certificates: &[X509],
) -> Result<(), SigningError> {
    let (start, end) = element_range(xml, element_id)?;
    verify_element(&xml[start..end], element_id, certificates)
}

/// Verify the enveloped signature of `element`, the exact markup of one
/// element whose root carries `ID="element_id"`.
///
/// The signature must be a direct child of that root and reference
/// `#element_id`. Its digest must match the element with the signature
/// removed, and the `SignedInfo` must verify against one of `certificates`.
pub fn verify_element(
    element: &str,
    element_id: &str,
    certificates: &[X509],
) -> Result<(), SigningError> {
    let (sig_start, sig_end) = child_signature_range(element, element_id)?;
    let info = extract_signature_info(&element[sig_start..sig_end])?;

    if info.reference_uri.trim_start_matches('#') != element_id {
        return Err(SigningError::VerificationFailed(format!(
            "signature references {} instead of #{element_id}",
            info.reference_uri
        )));
    }

    let mut unsigned = String::with_capacity(element.len());
    unsigned.push_str(&element[..sig_start]);
    unsigned.push_str(&element[sig_end..]);

    let digest = digest_from_uri(&info.digest_method)?;
    let computed = digest_base64(digest, &canonicalize_xml(&unsigned)?)?;
    let expected: String = info.digest_value.split_whitespace().collect();
    if computed != expected {
        return Err(SigningError::VerificationFailed("digest mismatch".to_string()));
    }

    let algorithm: SignatureAlgorithm = info.signature_method.parse()?;
    let signature_bytes = STANDARD
        .decode(info.signature_value.split_whitespace().collect::<String>())
        .map_err(|e| SigningError::MalformedSignature(format!("invalid signature encoding: {e}")))?;
    let canonicalized_signed_info = canonicalize_xml(&info.signed_info)?;

    verify_with_certificates(
        certificates,
        algorithm,
        canonicalized_signed_info.as_bytes(),
        &signature_bytes,
    )
}
