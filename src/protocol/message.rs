//! Protocol value model
//!
//! Defines the typed arguments, messages and bundles shared by the codec
//! and the line lexer.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::NTP_UNIX_OFFSET;

/// Wire type tag identifying an argument's representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    #[serde(rename = "i")]
    Int32,
    #[serde(rename = "f")]
    Float32,
    #[serde(rename = "s")]
    String,
    #[serde(rename = "b")]
    Blob,
}

impl TypeTag {
    /// The tag character written into the type tag string
    pub fn as_char(self) -> char {
        match self {
            TypeTag::Int32 => 'i',
            TypeTag::Float32 => 'f',
            TypeTag::String => 's',
            TypeTag::Blob => 'b',
        }
    }

    /// Map a tag character back to a tag, if it is one we support
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(TypeTag::Int32),
            'f' => Some(TypeTag::Float32),
            's' => Some(TypeTag::String),
            'b' => Some(TypeTag::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A single typed message argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    #[serde(rename = "i")]
    Int32(i32),
    #[serde(rename = "f")]
    Float32(f32),
    #[serde(rename = "s")]
    String(String),
    #[serde(rename = "b")]
    Blob(Vec<u8>),
}

impl Argument {
    /// The tag matching this argument's variant
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Argument::Int32(_) => TypeTag::Int32,
            Argument::Float32(_) => TypeTag::Float32,
            Argument::String(_) => TypeTag::String,
            Argument::Blob(_) => TypeTag::Blob,
        }
    }
}

impl From<i32> for Argument {
    fn from(value: i32) -> Self {
        Argument::Int32(value)
    }
}

impl From<f32> for Argument {
    fn from(value: f32) -> Self {
        Argument::Float32(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::String(value.to_string())
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Argument::String(value)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(value: Vec<u8>) -> Self {
        Argument::Blob(value)
    }
}

/// An addressed message with its ordered arguments
///
/// `type_tags` runs parallel to `args`. [`Message::new`] derives it from the
/// arguments; the fields stay public so a decoded message can be inspected
/// as-is, and the encoder refuses a message whose tags disagree with its args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Address pattern, always starting with `/`
    pub address: String,
    /// One tag per argument
    pub type_tags: Vec<TypeTag>,
    /// Arguments in wire order
    pub args: Vec<Argument>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<Argument>) -> Self {
        let type_tags = args.iter().map(Argument::type_tag).collect();
        Self {
            address: address.into(),
            type_tags,
            args,
        }
    }

    /// Tag characters without the leading comma, e.g. `"fs"`
    pub fn type_tag_string(&self) -> String {
        self.type_tags.iter().map(|t| t.as_char()).collect()
    }

    /// True when every tag matches the variant of its argument
    pub fn is_consistent(&self) -> bool {
        self.type_tags.len() == self.args.len()
            && self
                .type_tags
                .iter()
                .zip(&self.args)
                .all(|(tag, arg)| *tag == arg.type_tag())
    }
}

/// 64-bit NTP time tag: whole seconds since 1900 plus a 1/2^32 fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    /// The conventional "execute immediately" tag
    pub const IMMEDIATE: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// A zero seconds word means the bundle is due immediately
    pub fn is_immediate(&self) -> bool {
        self.seconds == 0
    }

    /// Nanoseconds relative to the Unix epoch; negative before 1970
    pub fn to_unix_nanos(&self) -> i128 {
        let whole = (self.seconds as i128 - NTP_UNIX_OFFSET as i128) * 1_000_000_000;
        let frac = (self.fraction as i128 * 1_000_000_000) >> 32;
        whole + frac
    }

    /// Build a time tag from a wall-clock time. Times outside the NTP era
    /// that starts in 1900 are clamped to its bounds.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_ntp = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Duration::from_secs(NTP_UNIX_OFFSET).saturating_add(after),
            Err(before) => Duration::from_secs(NTP_UNIX_OFFSET).saturating_sub(before.duration()),
        };

        let seconds = match u32::try_from(since_ntp.as_secs()) {
            Ok(seconds) => seconds,
            Err(_) => return Self::new(u32::MAX, u32::MAX),
        };
        let fraction = ((since_ntp.subsec_nanos() as u64) << 32) / 1_000_000_000;

        Self::new(seconds, fraction as u32)
    }

    /// Current wall-clock time as a time tag
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }
}

impl Default for TimeTag {
    fn default() -> Self {
        Self::IMMEDIATE
    }
}

/// A time-tagged group of packets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub time: TimeTag,
    pub packets: Vec<Packet>,
}

impl Bundle {
    pub fn new(time: TimeTag, packets: Vec<Packet>) -> Self {
        Self { time, packets }
    }
}

/// Anything that can travel in one datagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// Height of the packet tree; a lone message has depth 1
    pub fn depth(&self) -> usize {
        match self {
            Packet::Message(_) => 1,
            Packet::Bundle(bundle) => {
                1 + bundle.packets.iter().map(Packet::depth).max().unwrap_or(0)
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Packet::Message(message)
    }
}

impl From<Bundle> for Packet {
    fn from(bundle: Bundle) -> Self {
        Packet::Bundle(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_tags() {
        let msg = Message::new("/synth/freq", vec![440.5f32.into(), "lead".into()]);
        assert_eq!(msg.type_tags, vec![TypeTag::Float32, TypeTag::String]);
        assert_eq!(msg.type_tag_string(), "fs");
        assert!(msg.is_consistent());
    }

    #[test]
    fn test_mismatched_tags_detected() {
        let mut msg = Message::new("/x", vec![Argument::Int32(1)]);
        msg.type_tags = vec![TypeTag::Float32];
        assert!(!msg.is_consistent());

        msg.type_tags.clear();
        assert!(!msg.is_consistent());
    }

    #[test]
    fn test_tag_chars() {
        for c in ['i', 'f', 's', 'b'] {
            assert_eq!(TypeTag::from_char(c).unwrap().as_char(), c);
        }
        assert_eq!(TypeTag::from_char('T'), None);
    }

    #[test]
    fn test_time_tag_unix_epoch() {
        let tag = TimeTag::new(2_208_988_800, 0);
        assert_eq!(tag.to_unix_nanos(), 0);

        let half = TimeTag::new(2_208_988_800, 1 << 31);
        assert_eq!(half.to_unix_nanos(), 500_000_000);
    }

    #[test]
    fn test_time_tag_before_unix_epoch() {
        assert_eq!(TimeTag::new(0, 0).to_unix_nanos(), -2_208_988_800_000_000_000);
        assert!(TimeTag::new(0, 0).is_immediate());
        assert!(TimeTag::IMMEDIATE.is_immediate());
    }

    #[test]
    fn test_time_tag_from_system_time() {
        let time = UNIX_EPOCH + Duration::from_millis(1_500);
        let tag = TimeTag::from_system_time(time);
        assert_eq!(tag.seconds, 2_208_988_801);
        assert_eq!(tag.fraction, 1 << 31);
        assert_eq!(tag.to_unix_nanos(), 1_500_000_000);
    }

    #[test]
    fn test_packet_depth() {
        let inner = Bundle::new(TimeTag::IMMEDIATE, vec![Message::new("/a", vec![]).into()]);
        let outer = Packet::Bundle(Bundle::new(TimeTag::IMMEDIATE, vec![inner.into()]));
        assert_eq!(outer.depth(), 3);
        assert_eq!(Packet::Bundle(Bundle::new(TimeTag::IMMEDIATE, vec![])).depth(), 1);
    }
}
