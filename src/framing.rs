//! Length-prefixed framing for binary updates (spec §4.A).
//!
//! Each update is written as `varuint(len(update)) || update`, using the
//! same unsigned LEB128 shape as Protocol Buffers' varint encoding for
//! values up to 2^35. Concatenating framed updates stays valid framed
//! data, which is what lets the producer merge many items into one HTTP
//! body (§4.D) and lets readers re-split a batched response (§4.F).

use crate::error::ProviderError;
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum varuint length we'll decode before giving up — guards against
/// a corrupt or adversarial length prefix spinning forever.
const MAX_VARUINT_BYTES: usize = 5; // enough for 2^35 - 1

/// Frame a single update: `varuint(len) || bytes`.
pub fn frame(update: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(update.len() + 5);
    write_varuint(&mut buf, update.len() as u64);
    buf.put_slice(update);
    buf.freeze()
}

/// Frame and concatenate several updates into one buffer, preserving
/// enqueue order (used by the producer to build a batch body).
pub fn frame_concat<'a, I>(updates: I) -> Bytes
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut buf = BytesMut::new();
    for u in updates {
        write_varuint(&mut buf, u.len() as u64);
        buf.put_slice(u);
    }
    buf.freeze()
}

fn write_varuint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Parse a concatenation of framed updates, yielding each update's bytes
/// in order.
///
/// On truncation (a length prefix whose payload exceeds the remaining
/// bytes, or an unterminated varuint) this returns a `Framing` error and
/// stops — it never yields a partial update. Parsing a prefix of a valid
/// framed buffer is always either a clean, restartable boundary or this
/// error; it never silently drops data.
pub fn parse(bytes: &Bytes) -> Result<Vec<Bytes>, ProviderError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let (len, consumed) = read_varuint(&bytes[pos..])?;
        pos += consumed;

        let len = len as usize;
        if pos + len > bytes.len() {
            return Err(ProviderError::Framing(format!(
                "truncated frame: need {len} bytes at offset {pos}, have {}",
                bytes.len() - pos
            )));
        }

        out.push(bytes.slice(pos..pos + len));
        pos += len;
    }

    Ok(out)
}

/// Read one varuint from the front of `buf`, returning `(value, bytes_consumed)`.
fn read_varuint(buf: &[u8]) -> Result<(u64, usize), ProviderError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARUINT_BYTES {
            return Err(ProviderError::Framing("varuint too long".to_string()));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(ProviderError::Framing(
        "truncated varuint length prefix".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_single_update() {
        let framed = frame(b"hello");
        let parsed = parse(&framed).unwrap();
        assert_eq!(parsed, vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn roundtrip_empty_update() {
        let framed = frame(b"");
        let parsed = parse(&framed).unwrap();
        assert_eq!(parsed, vec![Bytes::new()]);
    }

    #[test]
    fn concatenation_of_framed_updates_stays_valid() {
        let blobs: Vec<&[u8]> = vec![b"a", b"bb", b"ccc"];
        let mut buf = BytesMut::new();
        for b in &blobs {
            buf.extend_from_slice(&frame(b));
        }
        let combined = buf.freeze();
        let parsed = parse(&combined).unwrap();
        assert_eq!(
            parsed,
            blobs.iter().map(|b| Bytes::copy_from_slice(b)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn frame_concat_matches_manual_concatenation() {
        let blobs: Vec<&[u8]> = vec![b"x", b"yz"];
        let via_helper = frame_concat(blobs.iter().copied());
        let parsed = parse(&via_helper).unwrap();
        assert_eq!(parsed, vec![Bytes::from_static(b"x"), Bytes::from_static(b"yz")]);
    }

    #[test]
    fn truncated_length_prefix_is_framing_error() {
        // A continuation byte with nothing after it.
        let bad = Bytes::from_static(&[0x80]);
        assert!(matches!(parse(&bad), Err(ProviderError::Framing(_))));
    }

    #[test]
    fn truncated_payload_is_framing_error() {
        // Claims 10 bytes of payload but only provides 2.
        let bad = Bytes::from_static(&[10, b'a', b'b']);
        assert!(matches!(parse(&bad), Err(ProviderError::Framing(_))));
    }

    #[test]
    fn multi_byte_varuint_length() {
        let big = vec![0u8; 300];
        let framed = frame(&big);
        let parsed = parse(&framed).unwrap();
        assert_eq!(parsed[0].len(), 300);
    }

    #[test]
    fn large_values_roundtrip_at_boundaries() {
        for len in [0usize, 1, 127, 128, 16383, 16384, 2_097_151, 2_097_152] {
            let data = vec![7u8; len];
            let framed = frame(&data);
            let parsed = parse(&framed).unwrap();
            assert_eq!(parsed[0].len(), len, "len={len}");
        }
    }
}
