//! Protocol codec for encoding/decoding packets
//!
//! Decoding always builds a fresh packet tree from a complete datagram;
//! encoding always produces a complete datagram. Neither keeps state
//! between calls.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{
    padded_len, Argument, Bundle, Message, Packet, TimeTag, TypeTag, BUNDLE_TAG,
    MAX_BUNDLE_DEPTH,
};

/// Errors raised while decoding a datagram
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty packet")]
    Empty,

    #[error("Packet ended while reading {0}")]
    UnexpectedEnd(&'static str),

    #[error("Missing NUL terminator in {0}")]
    UnterminatedString(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Address must start with '/': {0:?}")]
    InvalidAddress(String),

    #[error("Type tag string must start with ',': {0:?}")]
    InvalidTypeTags(String),

    #[error("Unsupported type tag '{0}'")]
    UnsupportedTypeTag(char),

    #[error("Invalid blob length: {0}")]
    InvalidBlobLength(i32),

    #[error("Blob claims {length} bytes but only {remaining} remain")]
    BlobOverrun { length: usize, remaining: usize },

    #[error("Invalid bundle element size: {0}")]
    InvalidElementSize(i32),

    #[error("Bundle element claims {size} bytes but only {remaining} remain")]
    ElementOverrun { size: usize, remaining: usize },

    #[error("Bundles nested deeper than {0} levels")]
    TooDeep(usize),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised while encoding a packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Address must start with '/': {0:?}")]
    InvalidAddress(String),

    #[error("{0} cannot contain a NUL byte")]
    EmbeddedNul(&'static str),

    #[error("Blob of {0} bytes is too large")]
    BlobTooLarge(usize),

    #[error("Type tags ,{tags} do not match the {count} argument(s)")]
    TagMismatch { tags: String, count: usize },

    #[error("{0} has no wire representation")]
    Unsupported(String),

    #[error("Bundle element of {0} bytes is too large")]
    ElementTooLarge(usize),
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Decode one datagram into a packet tree
pub fn decode(data: &[u8]) -> DecodeResult<Packet> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    decode_packet(data, 0)
}

fn decode_packet(data: &[u8], depth: usize) -> DecodeResult<Packet> {
    if data.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(DecodeError::TooDeep(MAX_BUNDLE_DEPTH));
        }
        decode_bundle(&data[BUNDLE_TAG.len()..], depth).map(Packet::Bundle)
    } else {
        decode_message(data).map(Packet::Message)
    }
}

fn decode_bundle(mut buf: &[u8], depth: usize) -> DecodeResult<Bundle> {
    if buf.remaining() < 8 {
        return Err(DecodeError::UnexpectedEnd("bundle time tag"));
    }
    let time = TimeTag::new(buf.get_u32(), buf.get_u32());

    let mut packets = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(DecodeError::UnexpectedEnd("bundle element size"));
        }
        let size = buf.get_i32();
        if size <= 0 {
            return Err(DecodeError::InvalidElementSize(size));
        }

        let size = size as usize;
        if size > buf.remaining() {
            return Err(DecodeError::ElementOverrun {
                size,
                remaining: buf.remaining(),
            });
        }

        packets.push(decode_packet(&buf[..size], depth + 1)?);
        buf.advance(size);
    }

    Ok(Bundle::new(time, packets))
}

fn decode_message(mut buf: &[u8]) -> DecodeResult<Message> {
    let address = read_string(&mut buf, "address")?;
    if !address.starts_with('/') {
        return Err(DecodeError::InvalidAddress(address));
    }

    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEnd("type tags"));
    }
    let tag_string = read_string(&mut buf, "type tags")?;
    let Some(tag_chars) = tag_string.strip_prefix(',') else {
        return Err(DecodeError::InvalidTypeTags(tag_string));
    };

    let type_tags = tag_chars
        .chars()
        .map(|c| TypeTag::from_char(c).ok_or(DecodeError::UnsupportedTypeTag(c)))
        .collect::<DecodeResult<Vec<_>>>()?;

    let mut args = Vec::with_capacity(type_tags.len());
    for tag in &type_tags {
        let arg = match tag {
            TypeTag::Int32 => {
                if buf.remaining() < 4 {
                    return Err(DecodeError::UnexpectedEnd("int32 argument"));
                }
                Argument::Int32(buf.get_i32())
            }
            TypeTag::Float32 => {
                if buf.remaining() < 4 {
                    return Err(DecodeError::UnexpectedEnd("float32 argument"));
                }
                Argument::Float32(buf.get_f32())
            }
            TypeTag::String => Argument::String(read_string(&mut buf, "string argument")?),
            TypeTag::Blob => Argument::Blob(read_blob(&mut buf)?),
        };
        args.push(arg);
    }

    // Anything after the last argument is ignored
    Ok(Message {
        address,
        type_tags,
        args,
    })
}

/// Read a NUL-terminated string and skip its padding
fn read_string(buf: &mut &[u8], what: &'static str) -> DecodeResult<String> {
    let Some(len) = buf.iter().position(|&b| b == 0) else {
        return Err(DecodeError::UnterminatedString(what));
    };

    let total = padded_len(len + 1);
    if total > buf.remaining() {
        return Err(DecodeError::UnexpectedEnd(what));
    }

    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| DecodeError::InvalidUtf8(what))?
        .to_string();
    buf.advance(total);
    Ok(text)
}

fn read_blob(buf: &mut &[u8]) -> DecodeResult<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(DecodeError::UnexpectedEnd("blob length"));
    }
    let length = buf.get_i32();
    if length < 0 {
        return Err(DecodeError::InvalidBlobLength(length));
    }

    let length = length as usize;
    if length > buf.remaining() {
        return Err(DecodeError::BlobOverrun {
            length,
            remaining: buf.remaining(),
        });
    }
    if padded_len(length) > buf.remaining() {
        return Err(DecodeError::UnexpectedEnd("blob padding"));
    }

    let data = buf[..length].to_vec();
    buf.advance(padded_len(length));
    Ok(data)
}

/// Encode a message from an address and its arguments
pub fn encode(address: &str, args: &[Argument]) -> EncodeResult<Bytes> {
    let mut buf = BytesMut::new();
    write_message(address, args, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message, refusing one whose type tags disagree with its arguments
pub fn encode_message(message: &Message) -> EncodeResult<Bytes> {
    if !message.is_consistent() {
        return Err(EncodeError::TagMismatch {
            tags: message.type_tag_string(),
            count: message.args.len(),
        });
    }
    encode(&message.address, &message.args)
}

/// Encode a message or a (possibly nested) bundle
pub fn encode_packet(packet: &Packet) -> EncodeResult<Bytes> {
    match packet {
        Packet::Message(message) => encode_message(message),
        Packet::Bundle(bundle) => {
            let mut buf = BytesMut::new();
            buf.put_slice(BUNDLE_TAG);
            buf.put_u32(bundle.time.seconds);
            buf.put_u32(bundle.time.fraction);

            for element in &bundle.packets {
                let encoded = encode_packet(element)?;
                let size = i32::try_from(encoded.len())
                    .map_err(|_| EncodeError::ElementTooLarge(encoded.len()))?;
                buf.put_i32(size);
                buf.put_slice(&encoded);
            }

            Ok(buf.freeze())
        }
    }
}

fn write_message(address: &str, args: &[Argument], buf: &mut BytesMut) -> EncodeResult<()> {
    if !address.starts_with('/') {
        return Err(EncodeError::InvalidAddress(address.to_string()));
    }
    write_string(address, "Address", buf)?;

    let mut tags = String::with_capacity(args.len() + 1);
    tags.push(',');
    tags.extend(args.iter().map(|arg| arg.type_tag().as_char()));
    write_string(&tags, "Type tags", buf)?;

    for arg in args {
        match arg {
            Argument::Int32(value) => buf.put_i32(*value),
            Argument::Float32(value) => buf.put_f32(*value),
            Argument::String(value) => write_string(value, "String argument", buf)?,
            Argument::Blob(data) => {
                let length =
                    i32::try_from(data.len()).map_err(|_| EncodeError::BlobTooLarge(data.len()))?;
                buf.put_i32(length);
                buf.put_slice(data);
                buf.put_bytes(0, padded_len(data.len()) - data.len());
            }
        }
    }

    Ok(())
}

/// Write a string followed by at least one NUL, padded to the alignment
fn write_string(value: &str, what: &'static str, buf: &mut BytesMut) -> EncodeResult<()> {
    if value.as_bytes().contains(&0) {
        return Err(EncodeError::EmbeddedNul(what));
    }
    buf.put_slice(value.as_bytes());
    buf.put_bytes(0, padded_len(value.len() + 1) - value.len());
    Ok(())
}
