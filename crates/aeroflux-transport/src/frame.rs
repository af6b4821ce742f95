use crate::session::SessionId;

/// Position of a fragment within a reassembled message. Single-fragment
/// messages carry both `begin` and `end` set, matching the wire
/// fragmentation rule from the design notes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFlags {
    pub begin: bool,
    pub end: bool,
}

impl FrameFlags {
    pub const UNFRAGMENTED: FrameFlags = FrameFlags {
        begin: true,
        end: true,
    };
    pub const BEGIN: FrameFlags = FrameFlags {
        begin: true,
        end: false,
    };
    pub const MIDDLE: FrameFlags = FrameFlags {
        begin: false,
        end: false,
    };
    pub const END: FrameFlags = FrameFlags {
        begin: false,
        end: true,
    };
}

/// Metadata accompanying every fragment delivered to a fragment handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub session_id: SessionId,
    pub stream_id: i32,
    pub flags: FrameFlags,
}
