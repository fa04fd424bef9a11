use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hubwire_protocol::HubMessage;
use hubwire_transport::ListenAddr;
use serde::Serialize;

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
    name: &'a str,
    #[serde(rename = "invocationId", skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    size: usize,
    message: &'a HubMessage,
    timestamp: String,
}

#[derive(Serialize)]
struct ListeningOutput {
    listening: String,
}

/// Print one decoded message. `raw` is the frame payload it was decoded from.
pub fn print_message(message: &HubMessage, raw: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                name: message.name(),
                invocation_id: message.invocation_id(),
                size: raw.len(),
                message,
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
                .set_header(vec!["TYPE", "INVOCATION", "SIZE", "DETAIL"])
                .add_row(vec![
                    message.name().to_string(),
                    message.invocation_id().unwrap_or("-").to_string(),
                    raw.len().to_string(),
                    message_detail(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} ({}) id={} size={} {}",
                message.message_type(),
                message.name(),
                message.invocation_id().unwrap_or("-"),
                raw.len(),
                message_detail(message)
            );
        }
        OutputFormat::Raw => {
            print_raw(raw);
            println!();
        }
    }
}

pub fn print_listening(addr: &ListenAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ListeningOutput {
                listening: addr.to_string(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        _ => println!("listening on {addr}"),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// One-line summary of what a message carries.
pub fn message_detail(message: &HubMessage) -> String {
    match message {
        HubMessage::Invocation(invocation) | HubMessage::StreamInvocation(invocation) => {
            let args: Vec<&str> = invocation.arguments.iter().map(|arg| arg.get()).collect();
            let mut detail = format!("{}({})", invocation.target, args.join(", "));
            if !invocation.stream_ids.is_empty() {
                detail.push_str(&format!(" streams=[{}]", invocation.stream_ids.join(", ")));
            }
            detail
        }
        HubMessage::StreamItem(item) => item.item.to_string(),
        HubMessage::Completion(completion) => match (&completion.error, &completion.result) {
            (Some(error), _) => format!("error: {error}"),
            (None, Some(result)) => result.to_string(),
            (None, None) => String::new(),
        },
        HubMessage::Close(close) => close.error.clone().unwrap_or_default(),
        HubMessage::CancelInvocation(_) | HubMessage::Ping => String::new(),
        HubMessage::Other(envelope) => format!("unknown type {}", envelope.message_type),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
