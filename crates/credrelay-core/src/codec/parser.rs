//! Decoding of relay requests and helper output.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::CodecError;
use super::types::{CredentialRequest, Fields, Operation};

/// Envelope key carrying the operation on the relay socket.
pub const OP_KEY: &str = "op";

/// Upper bound on the size of a single relay request.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct RequestBuilder {
    operation: Option<Operation>,
    fields: Fields,
    lines: usize,
}

impl RequestBuilder {
    fn push_line(&mut self, raw: &[u8]) -> Result<(), CodecError> {
        self.lines += 1;
        let line = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8 {
            line: self.lines,
        })?;
        let (key, value) = line.split_once('=').ok_or(CodecError::Malformed {
            line: self.lines,
            reason: "missing '='",
        })?;
        if key.is_empty() {
            return Err(CodecError::Malformed {
                line: self.lines,
                reason: "empty key",
            });
        }
        if key == OP_KEY {
            self.operation = Some(value.parse()?);
        } else {
            self.fields.insert(key, value);
        }
        Ok(())
    }

    fn finish(self) -> CredentialRequest {
        CredentialRequest {
            operation: self.operation.unwrap_or_default(),
            fields: self.fields,
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode a complete request held in memory.
///
/// The request ends at the first blank line, or at end of input if the
/// last line was newline-terminated. Input that ends mid-line is truncated.
pub fn decode(input: &[u8]) -> Result<CredentialRequest, CodecError> {
    if input.len() > MAX_REQUEST_BYTES {
        return Err(CodecError::TooLarge {
            limit: MAX_REQUEST_BYTES,
        });
    }
    if input.is_empty() {
        return Err(CodecError::Truncated);
    }

    let mut builder = RequestBuilder::default();
    let mut rest = input;
    while !rest.is_empty() {
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            return Err(CodecError::Truncated);
        };
        let line = strip_line_ending(&rest[..=end]);
        rest = &rest[end + 1..];
        if line.is_empty() {
            break;
        }
        builder.push_line(line)?;
    }
    Ok(builder.finish())
}

/// Read one request from a stream.
///
/// Same framing rules as [`decode`]. Never reads past the terminating blank
/// line, and never buffers more than [`MAX_REQUEST_BYTES`].
pub async fn read_request<R>(reader: &mut R) -> Result<CredentialRequest, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = (&mut *reader).take(MAX_REQUEST_BYTES as u64 + 1);
    let mut builder = RequestBuilder::default();
    let mut line = Vec::new();
    let mut total = 0usize;

    loop {
        line.clear();
        let n = limited.read_until(b'\n', &mut line).await?;
        if n == 0 {
            // Clean end of stream: only acceptable after at least one line.
            if total == 0 {
                return Err(CodecError::Truncated);
            }
            return Ok(builder.finish());
        }
        total += n;
        if total > MAX_REQUEST_BYTES {
            return Err(CodecError::TooLarge {
                limit: MAX_REQUEST_BYTES,
            });
        }
        if line.last() != Some(&b'\n') {
            return Err(CodecError::Truncated);
        }
        let content = strip_line_ending(&line);
        if content.is_empty() {
            return Ok(builder.finish());
        }
        builder.push_line(content)?;
    }
}

/// Parse a credential helper's stdout.
///
/// Helpers are local and trusted but not always tidy, so this is lenient:
/// lines without `=`, with an empty key or with the reserved `op` key are
/// skipped, and parsing stops at the first blank line.
pub fn parse_helper_output(stdout: &[u8]) -> Fields {
    let text = String::from_utf8_lossy(stdout);
    let mut fields = Fields::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.is_empty() && key != OP_KEY => {
                fields.insert(key, value);
            }
            _ => tracing::debug!("Skipping unparseable helper output line"),
        }
    }
    fields
}
