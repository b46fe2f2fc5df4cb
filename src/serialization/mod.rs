//! Binary encodings for persisted relay metadata.
//!
//! - CBOR via `ciborium` for serde types (blob certificates)
//! - A length-prefixed frame codec for chunk lists
//!
//! Frame layout: `u32` BE frame count, then for each frame a `u32` BE length
//! followed by that many bytes. Trailing bytes are rejected.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Serialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// CBOR encoding failed.
    #[error("CBOR encoding failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("CBOR decoding failed: {0}")]
    Decode(String),

    /// Frame list is truncated or carries trailing bytes.
    #[error("malformed frame list: {0}")]
    Frames(String),
}

/// Serialize to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| SerializationError::Encode(format!("{:?}", e)))?;
    Ok(bytes)
}

/// Deserialize from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    ciborium::from_reader(bytes).map_err(|e| SerializationError::Decode(format!("{:?}", e)))
}

/// Encode a list of frames.
pub fn encode_frames(frames: &[Vec<u8>]) -> Result<Vec<u8>, SerializationError> {
    let count = u32::try_from(frames.len())
        .map_err(|_| SerializationError::Frames("too many frames".to_string()))?;
    let body: usize = frames.iter().map(|f| 4 + f.len()).sum();

    let mut out = Vec::with_capacity(4 + body);
    out.extend_from_slice(&count.to_be_bytes());
    for frame in frames {
        let len = u32::try_from(frame.len())
            .map_err(|_| SerializationError::Frames("frame too large".to_string()))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(frame);
    }
    Ok(out)
}

/// Decode a list of frames produced by [`encode_frames`].
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Vec<u8>>, SerializationError> {
    let (count, mut rest) = read_u32(bytes)?;
    let mut frames = Vec::with_capacity((count as usize).min(rest.len() / 4));
    for i in 0..count {
        let (len, tail) = read_u32(rest)?;
        let len = len as usize;
        if tail.len() < len {
            return Err(SerializationError::Frames(format!(
                "frame {} truncated: need {} bytes, have {}",
                i,
                len,
                tail.len()
            )));
        }
        frames.push(tail[..len].to_vec());
        rest = &tail[len..];
    }
    if !rest.is_empty() {
        return Err(SerializationError::Frames(format!(
            "{} trailing bytes",
            rest.len()
        )));
    }
    Ok(frames)
}

fn read_u32(bytes: &[u8]) -> Result<(u32, &[u8]), SerializationError> {
    if bytes.len() < 4 {
        return Err(SerializationError::Frames("truncated length".to_string()));
    }
    let (head, tail) = bytes.split_at(4);
    let mut buf = [0u8; 4];
    buf.copy_from_slice(head);
    Ok((u32::from_be_bytes(buf), tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestStruct {
        value: u64,
        name: String,
    }

    #[test]
    fn test_cbor_roundtrip() {
        let original = TestStruct {
            value: 42,
            name: "test".to_string(),
        };
        let bytes = to_cbor(&original).unwrap();
        let recovered: TestStruct = from_cbor(&bytes).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_cbor_decode_garbage_fails() {
        let result: Result<TestStruct, _> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(SerializationError::Decode(_))));
    }

    #[test]
    fn test_frames_layout() {
        let encoded = encode_frames(&[vec![0xaa], vec![]]).unwrap();
        assert_eq!(
            encoded,
            vec![0, 0, 0, 2, 0, 0, 0, 1, 0xaa, 0, 0, 0, 0],
            "count, then length-prefixed frames"
        );
        assert_eq!(decode_frames(&encoded).unwrap(), vec![vec![0xaa], vec![]]);
    }

    #[test]
    fn test_frames_empty_list() {
        let encoded = encode_frames(&[]).unwrap();
        assert_eq!(encoded, vec![0, 0, 0, 0]);
        assert!(decode_frames(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_frames_reject_truncation_and_trailing_bytes() {
        let mut encoded = encode_frames(&[vec![1, 2, 3]]).unwrap();
        assert!(decode_frames(&encoded[..encoded.len() - 1]).is_err());

        encoded.push(9);
        assert!(matches!(
            decode_frames(&encoded),
            Err(SerializationError::Frames(_))
        ));

        assert!(decode_frames(&[0, 0]).is_err());
    }
}
