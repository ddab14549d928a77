//! Framed command protocol spoken with the agent daemon.
//!
//! Every message is a 4-byte little-endian length followed by the payload.
//! A request payload is the verb and its arguments joined by single spaces.
//! Response payloads are sniffed by prefix: `ok`, `ok <body>` or `pong <json>`.
use crate::error::AgentError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

pub const OK: &str = "ok";
pub const OK_PREFIX: &str = "ok ";
pub const PONG_PREFIX: &str = "pong ";

/// Encode a command into a complete frame
pub fn encode(verb: &str, args: &[&str]) -> Result<Vec<u8>, AgentError> {
    if verb.is_empty() {
        return Err(AgentError::Protocol("empty verb".to_string()));
    }

    let mut payload = String::from(verb);
    for token in std::iter::once(&verb).chain(args) {
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(AgentError::Protocol(format!(
                "invalid token {:?} in {} command",
                token, verb
            )));
        }
    }
    for arg in args {
        payload.push(' ');
        payload.push_str(arg);
    }

    encode_frame(payload.as_bytes())
}

/// Wrap a raw payload in a length-prefixed frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, AgentError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(AgentError::Protocol(format!(
            "frame size {} exceeds maximum allowed size of {}",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a command payload back into its verb and arguments
pub fn decode_command(payload: &[u8]) -> Result<(String, Vec<String>), AgentError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| AgentError::Protocol(format!("command is not valid UTF-8: {}", e)))?;

    let mut tokens = text.split(' ');
    let verb = match tokens.next() {
        Some(verb) if !verb.is_empty() => verb.to_string(),
        _ => return Err(AgentError::Protocol("empty command".to_string())),
    };

    Ok((verb, tokens.map(str::to_string).collect()))
}

/// Write one command frame
pub async fn write<W>(writer: &mut W, verb: &str, args: &[&str]) -> Result<(), AgentError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(verb, args)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one raw payload frame
pub async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> Result<(), AgentError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one complete frame and return its payload
pub async fn read<R>(reader: &mut R) -> Result<Vec<u8>, AgentError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(truncated)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(AgentError::Protocol(format!(
            "frame size {} exceeds maximum allowed size of {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(truncated)?;
    Ok(buf)
}

fn truncated(err: std::io::Error) -> AgentError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        AgentError::Protocol("truncated frame".to_string())
    } else {
        AgentError::Io(err)
    }
}

/// Reply body text, used verbatim as the error message for unexpected replies
pub fn reply_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Accept only the bare `ok` reply
pub fn expect_ok(payload: &[u8]) -> Result<(), String> {
    if payload == OK.as_bytes() {
        Ok(())
    } else {
        Err(reply_text(payload))
    }
}

/// Accept `ok <body>` and return the body
pub fn strip_ok(payload: &[u8]) -> Result<&[u8], String> {
    payload
        .strip_prefix(OK_PREFIX.as_bytes())
        .ok_or_else(|| reply_text(payload))
}

/// Accept `pong <json>` and return the JSON
pub fn strip_pong(payload: &[u8]) -> Result<&[u8], String> {
    payload
        .strip_prefix(PONG_PREFIX.as_bytes())
        .ok_or_else(|| reply_text(payload))
}

/// Parse a JSON reply body
pub fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AgentError> {
    serde_json::from_slice(body)
        .map_err(|e| AgentError::Protocol(format!("invalid reply body: {}", e)))
}
