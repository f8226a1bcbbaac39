//! Status record exchanged between sender and gateway.
//!
//! Binary format (33 bytes, identical on both ends of the link):
//! - identifier: 32 bytes, UTF-8, NUL-terminated, at most 31 used bytes
//! - machine_on: 1 byte, `0` = off, anything else = on
//!
//! There are no variable-length fields. A datagram of any other length is
//! rejected as [`MalformedMessage`].

use core::str::FromStr;

use thiserror_no_std::Error;

/// Size of the identifier field including its terminator.
pub const ID_FIELD_SIZE: usize = 32;

/// Maximum number of identifier bytes carried on the wire.
pub const MAX_ID_LEN: usize = ID_FIELD_SIZE - 1;

/// Total size of an encoded [`StatusMessage`].
pub const RECORD_SIZE: usize = ID_FIELD_SIZE + 1;

/// Board identifier as carried in a status record.
pub type BoardId = heapless::String<MAX_ID_LEN>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("status record must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("status record identifier is not valid UTF-8")]
    Identifier,
}

/// Longest prefix of `identifier` that fits the wire field.
///
/// Stops at the first NUL (the receiver would stop there as well) and never
/// splits a UTF-8 character.
pub fn truncate_identifier(identifier: &str) -> &str {
    let identifier = match identifier.find('\0') {
        Some(nul) => &identifier[..nul],
        None => identifier,
    };

    if identifier.len() <= MAX_ID_LEN {
        return identifier;
    }

    let mut end = MAX_ID_LEN;
    while !identifier.is_char_boundary(end) {
        end -= 1;
    }
    &identifier[..end]
}

/// One status observation from one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    id: BoardId,
    machine_on: bool,
}

impl StatusMessage {
    /// Build a record, truncating `id` to [`MAX_ID_LEN`] bytes.
    pub fn new(id: &str, machine_on: bool) -> Self {
        let truncated = truncate_identifier(id);
        if truncated.len() != id.len() {
            log::warn!(
                "Identifier '{}' truncated to '{}' for the wire record",
                id,
                truncated
            );
        }

        // Cannot fail: `truncated` is at most MAX_ID_LEN bytes
        let id = BoardId::from_str(truncated).unwrap_or_default();

        Self { id, machine_on }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn machine_on(&self) -> bool {
        self.machine_on
    }

    /// Returns the size of the encoded record in bytes (33).
    pub const fn size() -> usize {
        RECORD_SIZE
    }

    /// Converts the record to its fixed wire layout.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];

        let id = self.id.as_bytes();
        bytes[..id.len()].copy_from_slice(id);
        // Terminator and unused tail are already zero

        bytes[ID_FIELD_SIZE] = u8::from(self.machine_on);
        bytes
    }

    /// Parses a record from a received datagram.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedMessage> {
        if bytes.len() != RECORD_SIZE {
            return Err(MalformedMessage::Length {
                expected: RECORD_SIZE,
                actual: bytes.len(),
            });
        }

        // A sender that forgot the terminator still gets its first 31 bytes
        let field = &bytes[..MAX_ID_LEN];
        let id_len = field.iter().position(|&b| b == 0).unwrap_or(MAX_ID_LEN);
        let id = core::str::from_utf8(&field[..id_len])
            .map_err(|_| MalformedMessage::Identifier)?;

        Ok(Self {
            id: BoardId::from_str(id).map_err(|_| MalformedMessage::Identifier)?,
            machine_on: bytes[ID_FIELD_SIZE] != 0,
        })
    }
}

/// Encode a status observation into its wire record.
pub fn encode(identifier: &str, machine_on: bool) -> [u8; RECORD_SIZE] {
    StatusMessage::new(identifier, machine_on).to_bytes()
}

/// Decode a wire record.
pub fn decode(bytes: &[u8]) -> Result<StatusMessage, MalformedMessage> {
    StatusMessage::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_record_size() {
        assert_eq!(StatusMessage::size(), 33, "record must match the C layout");
        assert_eq!(encode("washer", true).len(), RECORD_SIZE);
    }

    #[test]
    fn test_layout() {
        let bytes = encode("FARRIS_WASHER_1", true);

        assert_eq!(&bytes[..15], b"FARRIS_WASHER_1");
        assert!(bytes[15..ID_FIELD_SIZE].iter().all(|&b| b == 0));
        assert_eq!(bytes[ID_FIELD_SIZE], 1);
    }

    #[test]
    fn test_round_trip() {
        let decoded = decode(&encode("FARRIS_DRYER_2", false)).unwrap();

        assert_eq!(decoded.id(), "FARRIS_DRYER_2");
        assert!(!decoded.machine_on());
    }

    #[test]
    fn test_empty_identifier() {
        let decoded = decode(&encode("", true)).unwrap();

        assert_eq!(decoded.id(), "");
        assert!(decoded.machine_on());
    }

    #[test]
    fn test_overlong_identifier_is_truncated() {
        let long = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let decoded = decode(&encode(long, true)).unwrap();

        assert_eq!(decoded.id(), &long[..MAX_ID_LEN]);
        assert_eq!(encode(long, true)[MAX_ID_LEN], 0, "terminator must survive");
    }

    #[test]
    fn test_truncation_keeps_char_boundaries() {
        // 30 ASCII bytes followed by a 2-byte character
        let id = "abcdefghijklmnopqrstuvwxyz0123é";
        assert_eq!(truncate_identifier(id), "abcdefghijklmnopqrstuvwxyz0123");
    }

    #[test]
    fn test_interior_nul_ends_identifier() {
        assert_eq!(truncate_identifier("dryer\0garbage"), "dryer");
        assert_eq!(decode(&encode("dryer\0garbage", false)).unwrap().id(), "dryer");
    }

    #[test]
    fn test_nonzero_flag_is_on() {
        let mut bytes = encode("washer", false);
        bytes[ID_FIELD_SIZE] = 0x7f;

        assert!(decode(&bytes).unwrap().machine_on());
    }

    #[test]
    fn test_missing_terminator() {
        let mut bytes = [b'A'; RECORD_SIZE];
        bytes[ID_FIELD_SIZE] = 0;

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id().len(), MAX_ID_LEN);
    }

    #[test]
    fn test_invalid_utf8_identifier() {
        let mut bytes = encode("washer", true);
        bytes[0] = 0xff;

        assert_eq!(decode(&bytes), Err(MalformedMessage::Identifier));
    }

    #[test]
    fn test_wrong_length() {
        assert_eq!(
            decode(&[0u8; 32]),
            Err(MalformedMessage::Length {
                expected: 33,
                actual: 32
            })
        );
        assert!(decode(&[]).is_err());
        assert!(decode(&[0u8; 34]).is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_reproduces_truncated_identifier(id in "\\PC{0,48}", on: bool) {
            let decoded = decode(&encode(&id, on)).unwrap();

            prop_assert_eq!(decoded.id(), truncate_identifier(&id));
            prop_assert_eq!(decoded.machine_on(), on);
        }

        #[test]
        fn prop_wrong_length_is_malformed(bytes in prop::collection::vec(any::<u8>(), 0..96)) {
            prop_assume!(bytes.len() != RECORD_SIZE);

            let is_length_error = matches!(decode(&bytes), Err(MalformedMessage::Length { .. }));
            prop_assert!(is_length_error);
        }
    }
}
