//! Length-prefixed framing: `[4-byte BE length][UTF-8 JSON payload]`.

use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_LEN};
use crate::error::FrameError;

/// Wrap a payload in a 4-byte big-endian length header.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Pop the next complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame. An
/// announced length beyond [`MAX_FRAME_LEN`] is unrecoverable for the
/// connection and surfaces as [`FrameError::Oversized`].
pub fn next_frame(buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, FrameError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&buf[..FRAME_HEADER_LEN]);
    let len = u32::from_be_bytes(header) as usize;

    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    if buf.len() < FRAME_HEADER_LEN + len {
        return Ok(None);
    }

    let payload = buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
    buf.drain(..FRAME_HEADER_LEN + len);
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_and_pop_round_trip() {
        let mut buf = frame(b"{\"type\":\"LOGOUT\"}");
        let popped = next_frame(&mut buf).unwrap().unwrap();
        assert_eq!(popped, b"{\"type\":\"LOGOUT\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let full = frame(b"hello");
        let mut buf = full[..3].to_vec();
        assert!(next_frame(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[3..7]);
        assert!(next_frame(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[7..]);
        assert_eq!(next_frame(&mut buf).unwrap().unwrap(), b"hello");
    }

    #[test]
    fn two_frames_pop_in_order() {
        let mut buf = frame(b"first");
        buf.extend_from_slice(&frame(b"second"));

        assert_eq!(next_frame(&mut buf).unwrap().unwrap(), b"first");
        assert_eq!(next_frame(&mut buf).unwrap().unwrap(), b"second");
        assert!(next_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            next_frame(&mut buf),
            Err(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn max_length_is_still_accepted() {
        let payload = vec![b'x'; MAX_FRAME_LEN];
        let mut buf = frame(&payload);
        assert_eq!(next_frame(&mut buf).unwrap().unwrap().len(), MAX_FRAME_LEN);
    }
}
