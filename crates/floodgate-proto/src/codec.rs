//! Frame encoding.
//!
//! A frame is one WebSocket message: the first byte is the [`MessageType`]
//! code and the remaining bytes are the payload. There is no length prefix;
//! the transport delimits frames.
//!
//! Payloads are accepted as any [`serde::Serialize`] value and encoded by
//! shape. Text encodes as its raw UTF-8 bytes and a `u8` encodes as that
//! single byte. Every other shape is rejected with
//! [`CodecError::UnsupportedPayloadType`].

use crate::types::MessageType;
use serde::ser::{self, Impossible, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// Errors that can occur while encoding or splitting frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No encoder exists for the payload's shape.
    #[error("no encoder for payload type {0}")]
    UnsupportedPayloadType(&'static str),
    /// The input byte slice was empty.
    #[error("frame is empty")]
    Empty,
    /// The first byte does not match any known message type.
    #[error("unknown message type {0}")]
    UnknownType(u8),
    /// A payload's `Serialize` implementation reported an error.
    #[error("payload serialization failed: {0}")]
    Custom(String),
}

impl ser::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// Encodes `payload` into a frame tagged with `typ`.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedPayloadType`] if `payload` is neither
/// text nor a single byte. No partial frame is returned on failure.
///
/// # Examples
///
/// ```
/// use floodgate_proto::{encode, MessageType};
/// let frame = encode(MessageType::Captcha, &0u8).unwrap();
/// assert_eq!(frame, [39, 0]);
/// ```
pub fn encode<T>(typ: MessageType, payload: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let mut frame = Vec::with_capacity(16);
    frame.push(typ.code());
    payload.serialize(PayloadSerializer { out: &mut frame })?;
    Ok(frame)
}

/// Splits a received frame into its message type and payload bytes.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for an empty frame and
/// [`CodecError::UnknownType`] for an unassigned type byte.
pub fn split_frame(data: &[u8]) -> Result<(MessageType, &[u8]), CodecError> {
    let (&tag, payload) = data.split_first().ok_or(CodecError::Empty)?;
    Ok((MessageType::try_from(tag)?, payload))
}

/// Writes a payload's bytes after the type tag.
struct PayloadSerializer<'a> {
    out: &'a mut Vec<u8>,
}

type Unsupported = Impossible<(), CodecError>;

fn unsupported<T>(shape: &'static str) -> Result<T, CodecError> {
    Err(CodecError::UnsupportedPayloadType(shape))
}

impl ser::Serializer for PayloadSerializer<'_> {
    type Ok = ();
    type Error = CodecError;

    type SerializeSeq = Unsupported;
    type SerializeTuple = Unsupported;
    type SerializeTupleStruct = Unsupported;
    type SerializeTupleVariant = Unsupported;
    type SerializeMap = Unsupported;
    type SerializeStruct = Unsupported;
    type SerializeStructVariant = Unsupported;

    fn serialize_str(self, v: &str) -> Result<(), CodecError> {
        self.out.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), CodecError> {
        self.out.push(v);
        Ok(())
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<(), CodecError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<(), CodecError> {
        unsupported("bool")
    }

    fn serialize_i8(self, _v: i8) -> Result<(), CodecError> {
        unsupported("i8")
    }

    fn serialize_i16(self, _v: i16) -> Result<(), CodecError> {
        unsupported("i16")
    }

    fn serialize_i32(self, _v: i32) -> Result<(), CodecError> {
        unsupported("i32")
    }

    fn serialize_i64(self, _v: i64) -> Result<(), CodecError> {
        unsupported("i64")
    }

    fn serialize_u16(self, _v: u16) -> Result<(), CodecError> {
        unsupported("u16")
    }

    fn serialize_u32(self, _v: u32) -> Result<(), CodecError> {
        unsupported("u32")
    }

    fn serialize_u64(self, _v: u64) -> Result<(), CodecError> {
        unsupported("u64")
    }

    fn serialize_f32(self, _v: f32) -> Result<(), CodecError> {
        unsupported("f32")
    }

    fn serialize_f64(self, _v: f64) -> Result<(), CodecError> {
        unsupported("f64")
    }

    fn serialize_char(self, _v: char) -> Result<(), CodecError> {
        unsupported("char")
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<(), CodecError> {
        unsupported("bytes")
    }

    fn serialize_none(self) -> Result<(), CodecError> {
        unsupported("option")
    }

    fn serialize_some<T>(self, _value: &T) -> Result<(), CodecError>
    where
        T: Serialize + ?Sized,
    {
        unsupported("option")
    }

    fn serialize_unit(self) -> Result<(), CodecError> {
        unsupported("unit")
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), CodecError> {
        unsupported("unit struct")
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), CodecError> {
        unsupported("enum")
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), CodecError>
    where
        T: Serialize + ?Sized,
    {
        unsupported("enum")
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Unsupported, CodecError> {
        unsupported("sequence")
    }

    fn serialize_tuple(self, _len: usize) -> Result<Unsupported, CodecError> {
        unsupported("tuple")
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Unsupported, CodecError> {
        unsupported("tuple struct")
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Unsupported, CodecError> {
        unsupported("enum")
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Unsupported, CodecError> {
        unsupported("map")
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Unsupported, CodecError> {
        unsupported("struct")
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Unsupported, CodecError> {
        unsupported("enum")
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_type() -> impl Strategy<Value = MessageType> {
        prop::sample::select(MessageType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn text_frames_are_tag_plus_utf8(typ in arb_type(), text in ".{0,256}") {
            let frame = encode(typ, &text).unwrap();
            prop_assert_eq!(frame[0], typ.code());
            prop_assert_eq!(&frame[1..], text.as_bytes());
        }

        #[test]
        fn byte_frames_are_exactly_two_bytes(typ in arb_type(), b in any::<u8>()) {
            let frame = encode(typ, &b).unwrap();
            prop_assert_eq!(frame, vec![typ.code(), b]);
        }

        #[test]
        fn split_recovers_what_encode_wrote(typ in arb_type(), text in ".{0,64}") {
            let frame = encode(typ, &text).unwrap();
            let (parsed, payload) = split_frame(&frame).unwrap();
            prop_assert_eq!(parsed, typ);
            prop_assert_eq!(payload, text.as_bytes());
        }
    }
}
