use crate::token::DICT_VERSION;

/// Stream prologue magic, sent raw before the first frame of a connection.
pub const MESSAGE_START: [u8; 3] = [b'W', b'A', DICT_VERSION];

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
