//! Encoding of relay responses, relay requests and helper input.

use super::CodecError;
use super::parser::OP_KEY;
use super::types::{CredentialRequest, CredentialResponse, Fields};

fn check_field(key: &str, value: &str) -> Result<(), CodecError> {
    if key.is_empty() {
        return Err(CodecError::InvalidField("empty key".into()));
    }
    if key == OP_KEY {
        return Err(CodecError::InvalidField(format!("reserved key {OP_KEY:?}")));
    }
    if key.contains(['=', '\n', '\r']) {
        return Err(CodecError::InvalidField(format!("key {key:?}")));
    }
    if value.contains('\n') {
        return Err(CodecError::InvalidField(format!("newline in value of {key:?}")));
    }
    Ok(())
}

/// Append `key=value\n` for every field, in insertion order.
///
/// Does not write the terminating blank line.
pub fn encode_fields(fields: &Fields, out: &mut Vec<u8>) -> Result<(), CodecError> {
    for (key, value) in fields.iter() {
        check_field(key, value)?;
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    Ok(())
}

/// Encode a relay response. An empty response is a single `\n`.
pub fn encode_response(response: &CredentialResponse) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_fields(&response.fields, &mut out)?;
    out.push(b'\n');
    Ok(out)
}

/// Encode a relay request, `op=` envelope line first.
pub fn encode_request(request: &CredentialRequest) -> Result<Vec<u8>, CodecError> {
    let mut out = format!("{OP_KEY}={}\n", request.operation).into_bytes();
    encode_fields(&request.fields, &mut out)?;
    out.push(b'\n');
    Ok(out)
}

/// Encode the stdin of a credential helper: the fields without envelope.
pub fn encode_helper_input(fields: &Fields) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_fields(fields, &mut out)?;
    out.push(b'\n');
    Ok(out)
}
