//! evsession CLI — inspect, decode and mirror evdev input devices.

use std::io::Read;
use std::str::FromStr;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use evsession_types::registry::{self, EventType};
use evsession_types::{decode_records, RawEvent, TypedEvent};

mod config;
#[cfg(all(feature = "linux", target_os = "linux"))]
mod device;

#[derive(Parser)]
#[command(
    name = "evsession",
    about = "Typed access to evdev input devices",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every event a device produces until interrupted.
    Monitor {
        /// Device node, e.g. /dev/input/event3.
        path: String,
        /// Grab the device so no other client sees its events.
        #[arg(short, long)]
        grab: bool,
    },

    /// Grab a device and replay its events through a virtual clone.
    Mirror {
        /// Device node to mirror.
        path: String,
    },

    /// Decode a single (type, code, value) triple.
    Decode {
        /// Event type, as a number or a name such as EV_KEY.
        #[arg(value_name = "TYPE")]
        event_type: String,
        /// Event code, as a number or a name such as KEY_A.
        code: String,
        /// Event value.
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },

    /// Decode raw event records, e.g. captured with `cat /dev/input/eventN`.
    Records {
        /// File of whole 24-byte records; standard input when omitted.
        path: Option<String>,
    },

    /// Show a device's identity and capabilities.
    Info {
        /// Device node to inspect.
        path: String,
        /// Also list every supported code.
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Decode {
            event_type,
            code,
            value,
        } => {
            let raw = parse_triple(&event_type, &code, value)?;
            print_decoded(&raw);
        }
        Commands::Records { path } => {
            let buf = match &path {
                Some(path) => {
                    std::fs::read(path).with_context(|| format!("failed to read {path}"))?
                }
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("failed to read standard input")?;
                    buf
                }
            };
            for line in render_records(&buf)? {
                println!("{line}");
            }
        }
        #[cfg(all(feature = "linux", target_os = "linux"))]
        Commands::Monitor { path, grab } => {
            device::monitor(&path, grab || config.session.grab).await?;
        }
        #[cfg(all(feature = "linux", target_os = "linux"))]
        Commands::Mirror { path } => device::mirror(&path, &config).await?,
        #[cfg(all(feature = "linux", target_os = "linux"))]
        Commands::Info { path, verbose } => device::info(&path, verbose)?,
        #[cfg(not(all(feature = "linux", target_os = "linux")))]
        Commands::Monitor { .. } | Commands::Mirror { .. } | Commands::Info { .. } => {
            bail!("device commands need the `linux` feature on a Linux host")
        }
    }

    Ok(())
}

/// Parse a decimal or `0x`-prefixed number.
fn parse_number(text: &str) -> Option<u16> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_triple(event_type: &str, code: &str, value: i32) -> anyhow::Result<RawEvent> {
    let type_id = match parse_number(event_type) {
        Some(type_id) => type_id,
        None => EventType::from_str(event_type)
            .with_context(|| format!("unknown event type {event_type}"))?
            .raw(),
    };
    let code_id = match parse_number(code) {
        Some(code_id) => code_id,
        None => match registry::code_by_name(type_id, code) {
            Some(code_id) => code_id,
            None => bail!("unknown code {code} for event type {event_type}"),
        },
    };
    Ok(RawEvent::new(type_id, code_id, value))
}

fn print_decoded(raw: &RawEvent) {
    let (type_name, code_name) = registry::describe(raw.type_id, raw.code_id);
    let typed = TypedEvent::from(raw);
    println!(
        "type {} ({type_name}), code {} ({code_name}), value {}",
        raw.type_id, raw.code_id, raw.value
    );
    println!("{typed:?}");
    if typed.has_unknown_code() {
        println!("note: code is not enumerated for this event type");
    }
}

/// One line per record in `buf`, which must hold whole records.
fn render_records(buf: &[u8]) -> anyhow::Result<Vec<String>> {
    let records = decode_records(buf).context("malformed record stream")?;
    Ok(records
        .iter()
        .map(|raw| {
            let (type_name, code_name) = registry::describe(raw.type_id, raw.code_id);
            format!(
                "{}.{:06} {type_name} {code_name} {} {:?}",
                raw.time.seconds,
                raw.time.microseconds,
                raw.value,
                TypedEvent::from(raw)
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evsession_types::Timestamp;

    #[test]
    fn numbers_parse_in_both_bases() {
        assert_eq!(parse_number("30"), Some(30));
        assert_eq!(parse_number("0x1e"), Some(30));
        assert_eq!(parse_number("KEY_A"), None);
    }

    #[test]
    fn triples_parse_from_names() {
        let raw = parse_triple("EV_KEY", "KEY_A", 1).unwrap();
        assert_eq!(raw.triple(), (1, 30, 1));

        let raw = parse_triple("3", "ABS_X", -5).unwrap();
        assert_eq!(raw.triple(), (3, 0, -5));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(parse_triple("EV_NOPE", "0", 0).is_err());
        assert!(parse_triple("EV_REL", "KEY_A", 0).is_err());
    }

    #[test]
    fn record_streams_render_one_line_per_record() {
        let mut buf = Vec::new();
        for raw in [
            RawEvent::with_time(Timestamp::new(12, 5), 0x01, 30, 1),
            RawEvent::with_time(Timestamp::new(12, 5), 0x00, 0, 0),
        ] {
            buf.extend_from_slice(&raw.to_bytes().unwrap());
        }

        let lines = render_records(&buf).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("12.000005 EV_KEY KEY_A 1 Key {"));
        assert!(lines[1].starts_with("12.000005 EV_SYN SYN_REPORT 0 Syn {"));
        assert!(render_records(&[]).unwrap().is_empty());
    }

    #[test]
    fn partial_records_are_rejected() {
        let raw = RawEvent::new(0x02, 0, 1).to_bytes().unwrap();
        let err = render_records(&raw[..20]).unwrap_err();
        assert!(format!("{err:#}").contains("multiple of 24"));
    }

    #[test]
    fn cli_parses_decode_with_negative_value() {
        let cli = Cli::try_parse_from(["evsession", "decode", "EV_REL", "REL_X", "-3"]).unwrap();
        match cli.command {
            Commands::Decode { value, .. } => assert_eq!(value, -3),
            _ => panic!("expected decode"),
        }
    }
}
