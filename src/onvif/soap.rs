//! SOAP 1.2 envelopes with WS-Security UsernameToken digest authentication.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use super::xml::escape;
use crate::config::Credentials;

pub const NS_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const NS_MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const NS_PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";

const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const NS_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const PASSWORD_DIGEST: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const BASE64_BINARY: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// `Base64(SHA1(nonce + created + password))`
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the `<s:Header>` carrying a fresh UsernameToken.
///
/// Returns an empty string for anonymous access (empty username).
pub fn security_header(credentials: &Credentials) -> String {
    if credentials.username.is_empty() {
        return String::new();
    }
    let nonce: [u8; 16] = rand::random();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    security_header_with(credentials, &nonce, &created)
}

pub(crate) fn security_header_with(
    credentials: &Credentials,
    nonce: &[u8],
    created: &str,
) -> String {
    let digest = password_digest(nonce, created, &credentials.password);
    format!(
        r#"<s:Header><wsse:Security s:mustUnderstand="1" xmlns:wsse="{wsse}" xmlns:wsu="{wsu}"><wsse:UsernameToken><wsse:Username>{user}</wsse:Username><wsse:Password Type="{digest_type}">{digest}</wsse:Password><wsse:Nonce EncodingType="{b64}">{nonce}</wsse:Nonce><wsu:Created>{created}</wsu:Created></wsse:UsernameToken></wsse:Security></s:Header>"#,
        wsse = NS_WSSE,
        wsu = NS_WSU,
        user = escape(&credentials.username),
        digest_type = PASSWORD_DIGEST,
        digest = digest,
        b64 = BASE64_BINARY,
        nonce = STANDARD.encode(nonce),
        created = created,
    )
}

/// Wraps `body` in a SOAP 1.2 envelope declaring the ONVIF namespaces.
pub fn envelope(credentials: &Credentials, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="{tds}" xmlns:trt="{trt}" xmlns:tptz="{tptz}" xmlns:tt="{tt}">{header}<s:Body>{body}</s:Body></s:Envelope>"#,
        tds = NS_DEVICE,
        trt = NS_MEDIA,
        tptz = NS_PTZ,
        tt = NS_SCHEMA,
        header = security_header(credentials),
        body = body,
    )
}
