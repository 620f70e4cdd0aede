use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use spotwire_mercury::MercuryResponse;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    kind: &'a str,
    uri: &'a str,
    status_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    sequence_id: String,
    part_sizes: Vec<usize>,
    parts: Vec<String>,
    timestamp: String,
}

#[derive(Serialize)]
struct CandidatesOutput<'a> {
    candidates: &'a [String],
}

/// Print a response (`kind = "response"`) or a push (`kind = "push"`).
pub fn print_message(message: &MercuryResponse, kind: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                kind,
                uri: &message.uri,
                status_code: message.status_code,
                content_type: message.content_type.as_deref(),
                sequence_id: to_hex(&message.sequence_id),
                part_sizes: message.payload.iter().map(|p| p.len()).collect(),
                parts: message.payload.iter().map(|p| payload_preview(p)).collect(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "URI", "STATUS", "PARTS", "FIRST PART"]);
            table.add_row(vec![
                kind.to_string(),
                message.uri.clone(),
                message.status_code.to_string(),
                message.payload.len().to_string(),
                message
                    .body()
                    .map(|p| payload_preview(p))
                    .unwrap_or_default(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{kind} uri={} status={} seq={} parts={}",
                message.uri,
                message.status_code,
                to_hex(&message.sequence_id),
                message.payload.len()
            );
            for (i, part) in message.payload.iter().enumerate() {
                println!("  [{i}] {}", payload_preview(part));
            }
        }
        OutputFormat::Raw => {
            for part in &message.payload {
                print_raw(part);
            }
        }
    }
}

pub fn print_candidates(candidates: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&CandidatesOutput { candidates })
                    .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "ACCESS POINT"]);
            for (i, addr) in candidates.iter().enumerate() {
                table.add_row(vec![i.to_string(), addr.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for addr in candidates {
                println!("{addr}");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_binary() {
        assert_eq!(payload_preview(b"text"), "text");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn sequence_ids_render_as_hex() {
        assert_eq!(to_hex(&[0x00]), "00");
        assert_eq!(to_hex(&[0x01, 0xab]), "01ab");
    }
}
