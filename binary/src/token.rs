use std::collections::HashMap;
use std::sync::LazyLock;

/// Bumping this is a forward-incompatible wire change; both peers must agree.
pub const DICT_VERSION: u8 = 5;

// --- Special non-token bytes ---
pub const LIST_EMPTY: u8 = 0;
pub const STREAM_START: u8 = 1;
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_7: u8 = 243;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_31: u8 = 254;
pub const NIBBLE_8: u8 = 255;

pub const PACKED_MAX: u8 = 127;

/// Primary token table. Indices 0..=2 are reserved (`LIST_EMPTY`,
/// `STREAM_START`, unused); single-byte tokens start at index 3.
/// The table must stay under 236 entries so token bytes never collide
/// with the special bytes above.
pub static PRIMARY: &[&str] = &[
    "",
    "",
    "",
    "account",
    "ack",
    "action",
    "active",
    "add",
    "after",
    "all",
    "allow",
    "author",
    "auth",
    "available",
    "bad-protocol",
    "bad-request",
    "before",
    "body",
    "broadcast",
    "cancel",
    "category",
    "challenge",
    "chat",
    "chatstate",
    "class",
    "clean",
    "code",
    "composing",
    "config",
    "contacts",
    "count",
    "create",
    "creation",
    "creator",
    "debug",
    "default",
    "delete",
    "delivered",
    "delivery",
    "deny",
    "dirty",
    "duplicate",
    "elapsed",
    "enable",
    "encoding",
    "encrypt",
    "error",
    "event",
    "expiration",
    "expired",
    "extend",
    "fail",
    "failure",
    "false",
    "feature",
    "features",
    "field",
    "file",
    "filehash",
    "first",
    "free",
    "from",
    "g.us",
    "get",
    "group",
    "groups",
    "height",
    "ib",
    "id",
    "identity",
    "index",
    "internal-server-error",
    "invalid-mechanism",
    "invite",
    "ip",
    "iq",
    "item",
    "item-not-found",
    "jabber:iq:last",
    "jabber:iq:privacy",
    "jid",
    "kind",
    "last",
    "leave",
    "list",
    "matched",
    "mechanism",
    "media",
    "message",
    "message_acks",
    "mimetype",
    "mode",
    "modify",
    "mute",
    "name",
    "none",
    "not-acceptable",
    "not-allowed",
    "not-authorized",
    "notification",
    "notify",
    "off",
    "offline",
    "order",
    "owner",
    "paid",
    "participant",
    "participants",
    "participating",
    "paused",
    "picture",
    "ping",
    "platform",
    "pong",
    "port",
    "presence",
    "preview",
    "pricing",
    "privacy",
    "probe",
    "promote",
    "prop",
    "props",
    "query",
    "raw",
    "read",
    "reason",
    "receipt",
    "received",
    "registration",
    "relay",
    "remove",
    "request",
    "required",
    "resource",
    "response",
    "result",
    "retry",
    "s.whatsapp.net",
    "seconds",
    "server",
    "server-error",
    "service-unavailable",
    "set",
    "show",
    "sid",
    "silent",
    "size",
    "skey",
    "sound",
    "stamp",
    "status",
    "stream:error",
    "stream:features",
    "subject",
    "subscribe",
    "success",
    "sync",
    "t",
    "text",
    "timeout",
    "timestamp",
    "to",
    "true",
    "type",
    "unavailable",
    "unsubscribe",
    "uri",
    "url",
    "urn:ietf:params:xml:ns:xmpp-sasl",
    "urn:ietf:params:xml:ns:xmpp-stanzas",
    "urn:xmpp:ping",
    "urn:xmpp:receipts",
    "urn:xmpp:whatsapp",
    "urn:xmpp:whatsapp:account",
    "urn:xmpp:whatsapp:dirty",
    "urn:xmpp:whatsapp:mms",
    "urn:xmpp:whatsapp:push",
    "user",
    "value",
    "version",
    "w",
    "web",
    "width",
    "xmlns",
    "xmlns:stream",
    "1",
    "WAUTH-2",
];

/// Secondary token tables, selected by prefix bytes 236..=243.
/// Table 0 carries the media and encryption vocabulary, table 1 the
/// group/profile extensions; the remaining six are reserved.
pub static SECONDARY: &[&[&str]] = &[
    &[
        "audio",
        "caption",
        "codecs",
        "document",
        "duration",
        "enc",
        "image",
        "latitude",
        "location",
        "longitude",
        "origin",
        "pkmsg",
        "msg",
        "thumbnail",
        "vcard",
        "video",
        "abitrate",
        "acodec",
        "asampfmt",
        "asampfreq",
        "fps",
        "vbitrate",
        "vcodec",
        "av",
        "keys",
        "key",
    ],
    &[
        "admin",
        "background",
        "bad-available",
        "demote",
        "description",
        "invalid",
        "linked_id",
        "members",
        "nonexisting",
        "qr",
        "state",
        "statuses",
        "subscribers",
        "template",
        "verified_level",
        "verified_name",
    ],
    &[],
    &[],
    &[],
    &[],
    &[],
    &[],
];

static SINGLE_BYTE_MAP: LazyLock<HashMap<&'static str, u8>> = LazyLock::new(|| {
    PRIMARY
        .iter()
        .enumerate()
        .skip(3)
        .map(|(i, s)| (*s, i as u8))
        .collect()
});

static DOUBLE_BYTE_MAP: LazyLock<HashMap<&'static str, (u8, u8)>> = LazyLock::new(|| {
    SECONDARY
        .iter()
        .enumerate()
        .flat_map(|(dict, table)| {
            table
                .iter()
                .enumerate()
                .map(move |(i, s)| (*s, (dict as u8, i as u8)))
        })
        .collect()
});

pub fn index_of_single_token(token: &str) -> Option<u8> {
    SINGLE_BYTE_MAP.get(token).copied()
}

pub fn index_of_double_byte_token(token: &str) -> Option<(u8, u8)> {
    DOUBLE_BYTE_MAP.get(token).copied()
}

pub fn get_single_token(index: u8) -> Option<&'static str> {
    if index < 3 {
        return None;
    }
    PRIMARY.get(index as usize).copied()
}

pub fn get_double_token(dict: u8, index: u8) -> Option<&'static str> {
    SECONDARY
        .get(dict as usize)
        .and_then(|d| d.get(index as usize))
        .copied()
}
