//! Console rendering
//!
//! Turns datagrams and decoded packets into the lines printed by the
//! `listen`, `talk` and `snoop` commands. Rendering is pure: every function
//! returns strings and the caller decides where they go.

use crossterm::style::{StyledContent, Stylize};
use std::io::IsTerminal;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::config::DisplayConfig;
use crate::network::Datagram;
use crate::protocol::{decode, Argument, Message, Packet, TimeTag};

/// Local UTC offset, falling back to UTC when it cannot be determined.
/// Call before any other thread is spawned; the lookup refuses to run in a
/// multi-threaded process on some platforms.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Renders packets for the console
#[derive(Debug, Clone)]
pub struct Renderer {
    config: DisplayConfig,
    offset: UtcOffset,
}

impl Renderer {
    /// `offset` is used for timestamps unless the config asks for UTC
    pub fn new(config: DisplayConfig, offset: UtcOffset) -> Self {
        let offset = if config.utc { UtcOffset::UTC } else { offset };
        Self { config, offset }
    }

    fn paint(&self, text: String, style: impl FnOnce(String) -> StyledContent<String>) -> String {
        if self.config.color {
            style(text).to_string()
        } else {
            text
        }
    }

    /// Everything printed for one received datagram
    pub fn datagram(&self, datagram: &Datagram) -> Vec<String> {
        let mut lines = vec![String::new(), self.datagram_header(datagram)];

        if self.config.hex_dump {
            lines.extend(hex_dump(&datagram.payload));
        }

        match decode(&datagram.payload) {
            Ok(packet) => lines.extend(self.packet(&packet)),
            Err(e) => {
                tracing::debug!("Undecodable datagram from {}: {}", datagram.from, e);
                lines.push(self.error(&format!("Decode error: {}", e)));
            }
        }

        lines
    }

    /// `<from> (received <time>)`, or `<from> -> <to> (...)` for relayed traffic
    pub fn datagram_header(&self, datagram: &Datagram) -> String {
        let received = self.format_time(OffsetDateTime::from(datagram.received_at));
        let header = match datagram.to {
            Some(to) => format!("{} -> {} (received {})", datagram.from, to, received),
            None => format!("{} (received {})", datagram.from, received),
        };
        self.paint(header, |t| t.blue())
    }

    /// One line per message or bundle, children indented under their bundle
    pub fn packet(&self, packet: &Packet) -> Vec<String> {
        let mut lines = Vec::new();
        self.packet_into(packet, 0, &mut lines);
        lines
    }

    fn packet_into(&self, packet: &Packet, depth: usize, lines: &mut Vec<String>) {
        let indent = " ".repeat(depth * self.config.indent);
        match packet {
            Packet::Message(message) => {
                lines.push(format!("{}{}", indent, self.message(message)));
            }
            Packet::Bundle(bundle) => {
                let header = format!("Bundle ({})", self.bundle_time(bundle.time));
                lines.push(format!("{}{}", indent, self.paint(header, |t| t.dim())));
                for child in &bundle.packets {
                    self.packet_into(child, depth + 1, lines);
                }
            }
        }
    }

    /// Bold address followed by the rendered arguments
    pub fn message(&self, message: &Message) -> String {
        let address = self.paint(message.address.clone(), |t| t.bold());
        if message.args.is_empty() {
            address
        } else {
            format!("{} {}", address, self.arguments(&message.args))
        }
    }

    pub fn arguments(&self, args: &[Argument]) -> String {
        args.iter()
            .map(|arg| match arg {
                Argument::Int32(value) => value.to_string(),
                Argument::Float32(value) => format!("{:.*}", self.config.float_precision, value),
                Argument::String(value) => format!("\"{}\"", value.escape_debug()),
                Argument::Blob(data) => format!("<Blob ({}B)>", data.len()),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn bundle_time(&self, time: TimeTag) -> String {
        if time.is_immediate() {
            return "immediately".to_string();
        }
        match OffsetDateTime::from_unix_timestamp_nanos(time.to_unix_nanos()) {
            Ok(at) => self.format_time(at),
            Err(_) => format!("{}.{:08x}", time.seconds, time.fraction),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS.mmm` in the renderer's offset
    pub fn format_time(&self, time: OffsetDateTime) -> String {
        let format = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        );
        time.to_offset(self.offset)
            .format(&format)
            .unwrap_or_else(|_| time.unix_timestamp().to_string())
    }

    pub fn error(&self, message: &str) -> String {
        self.paint(message.to_string(), |t| t.red())
    }

    /// Inverse-video title centered across the terminal
    pub fn banner(&self, text: &str) -> String {
        let stdout = std::io::stdout();
        let width = if stdout.is_terminal() {
            crossterm::terminal::size().ok().map(|(columns, _)| columns)
        } else {
            None
        };
        self.banner_with_width(text, width)
    }

    pub fn banner_with_width(&self, text: &str, width: Option<u16>) -> String {
        let len = text.chars().count();
        let free = width.map(|w| (w as usize).saturating_sub(len)).unwrap_or(0);
        let left = (free.div_ceil(2)).max(2);
        let right = (free / 2).max(2);
        let line = format!("{}{}{}", " ".repeat(left), text, " ".repeat(right));
        self.paint(line, |t| t.reverse())
    }

    /// Help shown by `:help` at the talk prompt
    pub fn talk_help(&self) -> Vec<String> {
        vec![
            self.paint("/address arg arg ...".to_string(), |t| t.bold()),
            "  42 -7        int32".to_string(),
            "  1.5 .5 3f    float32".to_string(),
            "  \"text\"       string (escapes: \\\" \\\\ \\n \\t \\uXXXX)".to_string(),
            self.paint(":quit".to_string(), |t| t.bold()) + "  leave the session",
        ]
    }
}

/// Offset, hex bytes and printable ASCII, 16 bytes per line
pub fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!("  {:04x}  {:<47}  |{}|", i * 16, hex.join(" "), ascii)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, encode_packet, Bundle};
    use bytes::Bytes;
    use std::time::{Duration, UNIX_EPOCH};

    fn plain() -> Renderer {
        let config = DisplayConfig {
            color: false,
            utc: true,
            ..Default::default()
        };
        Renderer::new(config, UtcOffset::UTC)
    }

    #[test]
    fn test_message_line() {
        let message = Message::new(
            "/synth/freq",
            vec![
                Argument::Float32(440.5),
                Argument::Int32(-3),
                "lead".into(),
                Argument::Blob(vec![1, 2, 3]),
            ],
        );
        assert_eq!(
            plain().message(&message),
            r#"/synth/freq 440.500 -3 "lead" <Blob (3B)>"#
        );
        assert_eq!(plain().message(&Message::new("/x", vec![])), "/x");
    }

    #[test]
    fn test_bundle_tree_is_indented() {
        let inner = Bundle::new(
            TimeTag::new(2_208_988_800, 0),
            vec![Message::new("/b", vec![Argument::Int32(2)]).into()],
        );
        let outer = Packet::Bundle(Bundle::new(
            TimeTag::IMMEDIATE,
            vec![Message::new("/a", vec![]).into(), inner.into()],
        ));

        assert_eq!(
            plain().packet(&outer),
            vec![
                "Bundle (immediately)".to_string(),
                "  /a".to_string(),
                "  Bundle (1970-01-01 00:00:00.000)".to_string(),
                "    /b 2".to_string(),
            ]
        );
    }

    #[test]
    fn test_datagram_rendering() {
        let payload = encode("/x", &[Argument::Float32(1.0)]).unwrap();
        let mut datagram = Datagram::new("127.0.0.1:9000".parse().unwrap(), payload);
        datagram.received_at = UNIX_EPOCH + Duration::from_millis(1_234);

        let lines = plain().datagram(&datagram);
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "127.0.0.1:9000 (received 1970-01-01 00:00:01.234)");
        assert_eq!(lines[2], "/x 1.000");
    }

    #[test]
    fn test_relayed_header_and_decode_error() {
        let datagram = Datagram::new("127.0.0.1:9000".parse().unwrap(), Bytes::from_static(b"junk"))
            .forwarded_to("127.0.0.1:9001".parse().unwrap());

        let lines = plain().datagram(&datagram);
        assert!(lines[1].starts_with("127.0.0.1:9000 -> 127.0.0.1:9001 (received "));
        assert_eq!(lines[2], "Decode error: Missing NUL terminator in address");
    }

    #[test]
    fn test_float_precision() {
        let renderer = Renderer::new(
            DisplayConfig {
                color: false,
                float_precision: 1,
                ..Default::default()
            },
            UtcOffset::UTC,
        );
        assert_eq!(renderer.arguments(&[Argument::Float32(1.2345)]), "1.2");
    }

    #[test]
    fn test_color_codes() {
        let renderer = Renderer::new(DisplayConfig::default(), UtcOffset::UTC);
        let line = renderer.message(&Message::new("/boom", vec![]));
        assert!(line.contains("/boom"));
        assert!(line.starts_with('\u{1b}'));
    }

    #[test]
    fn test_banner_centering() {
        let renderer = plain();
        assert_eq!(renderer.banner_with_width("hi", None), "  hi  ");
        assert_eq!(renderer.banner_with_width("hi", Some(11)), "     hi    ");
    }

    #[test]
    fn test_hex_dump() {
        let packet = Packet::Message(Message::new("/abc", vec![]));
        let bytes = encode_packet(&packet).unwrap();
        let lines = hex_dump(&bytes);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("  0000  2f 61 62 63 00"));
        assert!(lines[0].ends_with("|/abc....,...|"));
    }
}
