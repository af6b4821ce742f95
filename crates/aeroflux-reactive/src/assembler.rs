//! Reassembles BEGIN/MIDDLE/END-flagged fragments back into one contiguous
//! payload per session, matching §4.C and §6's "wire fragmentation" rule.

use aeroflux_transport::{FrameHeader, SessionId};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tracing::warn;

/// One assembler per `MessageSubscription`. A client subscription only ever
/// assembles one session at a time; the server assembles many concurrently.
/// Either way the state is keyed by session id, so one type serves both.
#[derive(Default)]
pub struct FragmentAssembler {
    partial: DashMap<SessionId, BytesMut>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment. Returns the complete payload once the END flag
    /// is observed; returns `None` while a message is still being
    /// assembled.
    pub fn assemble(&self, payload: &[u8], header: &FrameHeader) -> Option<Bytes> {
        if header.flags.begin {
            if self.partial.contains_key(&header.session_id) {
                warn!(session_id = %header.session_id, "dropping in-flight fragment: new message started mid-assembly");
            }
            self.partial.insert(header.session_id, BytesMut::from(payload));
        } else {
            match self.partial.get_mut(&header.session_id) {
                Some(mut buf) => buf.extend_from_slice(payload),
                None => {
                    warn!(session_id = %header.session_id, "dropping continuation fragment with no in-flight message");
                    return None;
                }
            }
        }

        if header.flags.end {
            self.partial.remove(&header.session_id).map(|(_, buf)| buf.freeze())
        } else {
            None
        }
    }

    /// Drops any in-flight assembly for a session, e.g. when its image goes
    /// away mid-message.
    pub fn discard(&self, session_id: SessionId) {
        self.partial.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroflux_transport::FrameFlags;
    use proptest::prelude::*;

    fn header(session_id: i32, flags: FrameFlags) -> FrameHeader {
        FrameHeader {
            session_id: SessionId::new(session_id),
            stream_id: 1,
            flags,
        }
    }

    #[test]
    fn single_fragment_message_assembles_immediately() {
        let assembler = FragmentAssembler::new();
        let result = assembler.assemble(b"hello", &header(1, FrameFlags::UNFRAGMENTED));
        assert_eq!(result.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn multi_fragment_message_assembles_in_order() {
        let assembler = FragmentAssembler::new();
        assert!(assembler.assemble(b"one-", &header(1, FrameFlags::BEGIN)).is_none());
        assert!(assembler.assemble(b"two-", &header(1, FrameFlags::MIDDLE)).is_none());
        let result = assembler.assemble(b"three", &header(1, FrameFlags::END));
        assert_eq!(result.unwrap(), Bytes::from_static(b"one-two-three"));
    }

    #[test]
    fn interleaved_sessions_do_not_cross_contaminate() {
        let assembler = FragmentAssembler::new();
        assembler.assemble(b"a-", &header(1, FrameFlags::BEGIN));
        assembler.assemble(b"b-", &header(2, FrameFlags::BEGIN));
        let a = assembler.assemble(b"end", &header(1, FrameFlags::END)).unwrap();
        let b = assembler.assemble(b"end", &header(2, FrameFlags::END)).unwrap();
        assert_eq!(a, Bytes::from_static(b"a-end"));
        assert_eq!(b, Bytes::from_static(b"b-end"));
    }

    proptest! {
        #[test]
        fn arbitrary_chunking_reassembles_byte_identical(
            payload in proptest::collection::vec(any::<u8>(), 1..4096),
            chunk_sizes in proptest::collection::vec(1usize..512, 1..64),
        ) {
            let assembler = FragmentAssembler::new();
            let mut offset = 0;
            let mut chunks = Vec::new();
            for size in chunk_sizes {
                if offset >= payload.len() {
                    break;
                }
                let end = (offset + size).min(payload.len());
                chunks.push(&payload[offset..end]);
                offset = end;
            }
            if offset < payload.len() {
                chunks.push(&payload[offset..]);
            }

            let mut result = None;
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.iter().enumerate() {
                let flags = match (i == 0, i == last) {
                    (true, true) => FrameFlags::UNFRAGMENTED,
                    (true, false) => FrameFlags::BEGIN,
                    (false, true) => FrameFlags::END,
                    (false, false) => FrameFlags::MIDDLE,
                };
                result = assembler.assemble(chunk, &header(1, flags));
            }
            prop_assert_eq!(result.unwrap(), Bytes::copy_from_slice(&payload));
        }
    }
}
