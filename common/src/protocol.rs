//! Request/reply exchange between the page and the meter.
//!
//! A text frame asks for the latest period; the reply is always a 4-byte
//! little-endian `u32` in a binary frame. A binary frame is echoed back
//! unchanged. Nothing is rejected.

use thiserror::Error;

use crate::types::PeriodMeasurement;

pub const PERIOD_FRAME_LEN: usize = 4;

/// Payload the page sends on every polling tick. The content is never inspected.
pub const PERIOD_REQUEST: &str = "c";

/// Subprotocol offered by the page when it opens the socket.
pub const WS_SUBPROTOCOL: &str = "arduino";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Period([u8; PERIOD_FRAME_LEN]),
    Echo(&'a [u8]),
}

impl Reply<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Period(frame) => frame,
            Self::Echo(payload) => payload,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("period frame must be {PERIOD_FRAME_LEN} bytes, got {0}")]
    WrongLength(usize),
}

pub fn respond(inbound: Inbound<'_>, latest: PeriodMeasurement) -> Option<Reply<'_>> {
    match inbound {
        Inbound::Text(_) => Some(Reply::Period(encode_period_frame(latest))),
        Inbound::Binary(payload) => Some(Reply::Echo(payload)),
        Inbound::Closed => None,
    }
}

pub fn encode_period_frame(period: PeriodMeasurement) -> [u8; PERIOD_FRAME_LEN] {
    period.as_micros().to_le_bytes()
}

pub fn decode_period_frame(frame: &[u8]) -> Result<PeriodMeasurement, FrameError> {
    let bytes: [u8; PERIOD_FRAME_LEN] = frame
        .try_into()
        .map_err(|_| FrameError::WrongLength(frame.len()))?;
    Ok(PeriodMeasurement::from_micros(u32::from_le_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn text_request_returns_four_byte_period() {
        let latest = PeriodMeasurement::from_micros(48_213);
        let reply = respond(Inbound::Text(PERIOD_REQUEST), latest).unwrap();

        assert_eq!(reply.as_bytes().len(), PERIOD_FRAME_LEN);
        assert_eq!(reply.as_bytes(), &[0x55, 0xbc, 0x00, 0x00]);
        assert_eq!(decode_period_frame(reply.as_bytes()), Ok(latest));
    }

    #[test]
    fn text_content_is_ignored() {
        let latest = PeriodMeasurement::from_micros(u32::MAX);
        for payload in ["", "c", "give me watts", "\u{1f6b2}"] {
            let reply = respond(Inbound::Text(payload), latest).unwrap();
            assert_eq!(reply, Reply::Period([0xff; 4]));
        }
    }

    #[test]
    fn binary_payload_echoes_unchanged() {
        let long: Vec<u8> = (0..=255).cycle().take(4_099).collect();
        for payload in [&[][..], &[0x00][..], &[1, 2, 3, 4, 5][..], long.as_slice()] {
            let reply = respond(Inbound::Binary(payload), PeriodMeasurement::ZERO).unwrap();
            assert_eq!(reply.as_bytes(), payload);
        }
    }

    #[test]
    fn close_gets_no_reply() {
        assert_eq!(respond(Inbound::Closed, PeriodMeasurement::ZERO), None);
    }

    #[test]
    fn short_frames_are_rejected_by_client_decode() {
        assert_eq!(decode_period_frame(&[1, 2, 3]), Err(FrameError::WrongLength(3)));
        assert_eq!(
            decode_period_frame(&[0; 8]).unwrap_err().to_string(),
            "period frame must be 4 bytes, got 8"
        );
    }
}
