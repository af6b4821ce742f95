//! Wire encoding for frames carried over a UDP datagram.
//!
//! Each datagram is one frame: a fixed 9-byte header followed by the
//! fragment payload. There is no length prefix -- UDP already delivers
//! message boundaries, so the payload is simply "whatever is left in the
//! datagram after the header".
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           session id                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            stream id                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    flags      |                   payload ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use aeroflux_transport::{FrameFlags, FrameHeader, SessionId};

pub const HEADER_LEN: usize = 9;

const FLAG_BEGIN: u8 = 0b01;
const FLAG_END: u8 = 0b10;

pub fn encode_header(buf: &mut [u8], header: &FrameHeader) {
    debug_assert!(buf.len() >= HEADER_LEN);
    buf[0..4].copy_from_slice(&header.session_id.value().to_be_bytes());
    buf[4..8].copy_from_slice(&header.stream_id.to_be_bytes());
    let mut flags = 0u8;
    if header.flags.begin {
        flags |= FLAG_BEGIN;
    }
    if header.flags.end {
        flags |= FLAG_END;
    }
    buf[8] = flags;
}

/// Parses a datagram into its header and payload slice. Returns `None` if
/// the datagram is shorter than the fixed header -- such a datagram did not
/// come from an aeroflux peer and is dropped.
pub fn decode(datagram: &[u8]) -> Option<(FrameHeader, &[u8])> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    let session_id = SessionId::new(i32::from_be_bytes(datagram[0..4].try_into().unwrap()));
    let stream_id = i32::from_be_bytes(datagram[4..8].try_into().unwrap());
    let raw_flags = datagram[8];
    let flags = FrameFlags {
        begin: raw_flags & FLAG_BEGIN != 0,
        end: raw_flags & FLAG_END != 0,
    };
    let header = FrameHeader {
        session_id,
        stream_id,
        flags,
    };
    Some((header, &datagram[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let header = FrameHeader {
            session_id: SessionId::new(-42),
            stream_id: 7,
            flags: FrameFlags::BEGIN,
        };
        let mut datagram = vec![0u8; HEADER_LEN + 3];
        encode_header(&mut datagram, &header);
        datagram[HEADER_LEN..].copy_from_slice(b"abc");

        let (decoded, payload) = decode(&datagram).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn rejects_short_datagrams() {
        assert!(decode(&[0u8; HEADER_LEN - 1]).is_none());
    }
}
