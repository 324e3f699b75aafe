//! Command execution.

use crate::Commands;
use colored::Colorize;
use kitten_client::Client;
use kitten_protocol::{read_message, Header, Message, METHOD_KEY};
use serde_json::Value;

/// Executes a command against a connected client and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Ping { count } => {
            let mut lines = Vec::new();
            for i in 0..count.max(1) {
                let rtt = client.heartbeat().await?;
                lines.push(format!(
                    "{} seq={} time={:.3} ms",
                    "PONG".green(),
                    i + 1,
                    rtt.as_secs_f64() * 1000.0
                ));
            }
            Ok(lines.join("\n"))
        }

        Commands::Call {
            method,
            payload,
            hex,
            json,
            one_way,
        } => {
            let body = match payload {
                Some(arg) => parse_payload_arg(&arg, hex)?,
                None => Vec::new(),
            };

            if one_way {
                client.notify(&method, body).await?;
                return Ok(format!("{} one-way request to {}", "Sent".green(), method.cyan()));
            }

            if json {
                let args: Value = if body.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(&body)?
                };
                let reply: Value = client.call_json(&method, &args).await?;
                return Ok(format_json(&reply));
            }

            let reply = client.call(&method, body).await?;
            Ok(format_payload(&reply))
        }

        // Offline commands are handled directly in main.rs
        Commands::Inspect { .. } | Commands::Encode { .. } => unreachable!(),
    }
}

/// Decodes a hex-encoded frame and describes every field.
pub fn inspect(frame_hex: &str) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = parse_hex(frame_hex)?;
    let mut cursor = &bytes[..];
    let message = read_message(&mut cursor)?;
    let trailing = cursor.len();

    let mut out = String::new();
    out.push_str(&format!("{}\n", "Header".bold()));
    out.push_str(&format_header(&message.header));

    out.push_str(&format!("{} ({} entries)\n", "Metadata".bold(), message.metadata.len()));
    for (key, value) in &message.metadata {
        out.push_str(&format!("  {} = {}\n", key.cyan(), value));
    }

    out.push_str(&format!("{} ({} bytes)\n", "Payload".bold(), message.payload.len()));
    if !message.payload.is_empty() {
        out.push_str(&format!("  {}\n", format_payload(&message.payload)));
    }

    if trailing > 0 {
        out.push_str(&format!(
            "{}: {} trailing bytes after frame\n",
            "Warning".yellow(),
            trailing
        ));
    }

    Ok(out.trim_end().to_string())
}

/// Encodes a request frame and returns it as hex.
pub fn encode(
    method: &str,
    payload: Option<&str>,
    seq: u64,
    one_way: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut message = Message::request(seq)
        .with_meta(METHOD_KEY, method)
        .with_payload(payload.unwrap_or_default().as_bytes().to_vec());
    message.header.set_one_way(one_way);
    Ok(hex::encode(message.encode()?))
}

fn format_header(header: &Header) -> String {
    let magic = if header.check_magic_number() {
        "ok".green()
    } else {
        "INVALID".red()
    };
    format!(
        "  magic:          {:#04x} ({})\n  version:        {}\n  message type:   {:?}\n  heartbeat:      {}\n  one-way:        {}\n  compress type:  {:?}\n  status:         {:?}\n  serialize type: {:?}\n  seq:            {}\n",
        header.as_bytes()[0],
        magic,
        header.version(),
        header.message_type(),
        header.is_heartbeat(),
        header.is_one_way(),
        header.compress_type(),
        header.message_status(),
        header.serialize_type(),
        header.seq()
    )
}

/// Parses hex input, tolerating whitespace and an optional `0x` prefix.
fn parse_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let cleaned: String = input.split_whitespace().collect();
    let cleaned = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    hex::decode(cleaned)
}

/// Parses a payload argument (text, hex, or @file).
fn parse_payload_arg(arg: &str, is_hex: bool) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        return Ok(std::fs::read(path)?);
    }
    if is_hex {
        return Ok(parse_hex(arg)?);
    }
    Ok(arg.as_bytes().to_vec())
}

/// Shows a payload as text when it is valid UTF-8, otherwise as hex.
fn format_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(payload)),
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A complete header with nothing after it.
    const HEADER_ONLY: &str = "080000000000000000000001";

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(parse_hex("0a 0b\n0c").unwrap(), vec![0x0a, 0x0b, 0x0c]);
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_parse_payload_arg() {
        assert_eq!(parse_payload_arg("hi", false).unwrap(), b"hi".to_vec());
        assert_eq!(parse_payload_arg("6869", true).unwrap(), b"hi".to_vec());
        assert!(parse_payload_arg("@/nonexistent/kitten-payload", false).is_err());
    }

    #[test]
    fn test_format_payload() {
        assert_eq!(format_payload(b"meow"), "meow");
        assert_eq!(format_payload(&[0xff, 0x00]), "0xff00");
    }

    #[test]
    fn test_encode_then_inspect() {
        let frame = encode("Kitten.Echo", Some("hello"), 42, true).unwrap();
        let report = inspect(&frame).unwrap();
        assert!(report.contains("42"));
        assert!(report.contains("Kitten.Echo"));
        assert!(report.contains("hello"));
        assert!(report.contains("Request"));
        assert!(!report.contains("trailing"));
    }

    #[test]
    fn test_inspect_reports_trailing_bytes() {
        let mut frame = encode("Kitten.Echo", None, 1, false).unwrap();
        frame.push_str("ffff");
        let report = inspect(&frame).unwrap();
        assert!(report.contains("2 trailing bytes"));
    }

    #[test]
    fn test_inspect_truncated_frame() {
        assert!(inspect(HEADER_ONLY).is_err());
        assert!(inspect("").is_err());
    }
}
