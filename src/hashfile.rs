//! Parsing, serialization, and filename classification for a single hash file.
//!
//! A hash file is one line: `<format-id>:<unix-seconds>:<param-id>:<payload>`.
//! Anything after the first newline belongs to the caller (historical
//! revisions some formats appended) and must be preserved verbatim by
//! writers; this module only ever looks at the first line.

use crate::error::StoreError;

/// A parsed first line of a hash file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub format_id: String,
    pub last_changed: u64,
    pub param_id: u32,
    pub payload: String,
}

impl HashRecord {
    pub fn new(format_id: impl Into<String>, last_changed: u64, param_id: u32, payload: impl Into<String>) -> Self {
        Self { format_id: format_id.into(), last_changed, param_id, payload: payload.into() }
    }

    /// Parses the first line of `bytes`. Trailing lines, if any, are not
    /// touched; callers that need to preserve them should slice past the
    /// first `\n` themselves.
    pub fn parse(bytes: &[u8]) -> Result<Self, StoreError> {
        let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or(bytes);
        let line = std::str::from_utf8(first_line).map_err(|e| StoreError::Malformed(e.to_string()))?;

        let mut fields = line.splitn(4, ':');
        let format_id = fields.next().ok_or_else(|| StoreError::Malformed("missing format id".into()))?;
        let last_changed = fields.next().ok_or_else(|| StoreError::Malformed("missing timestamp".into()))?;
        let param_id = fields.next().ok_or_else(|| StoreError::Malformed("missing parameter-set id".into()))?;
        let payload = fields.next().ok_or_else(|| StoreError::Malformed("missing payload".into()))?;

        if format_id.is_empty() {
            return Err(StoreError::Malformed("empty format id".into()));
        }

        let last_changed: u64 = last_changed.parse().map_err(|_| StoreError::Malformed(format!("invalid timestamp: {last_changed:?}")))?;
        let param_id: u32 = param_id.parse().map_err(|_| StoreError::Malformed(format!("invalid parameter-set id: {param_id:?}")))?;
        if param_id == 0 {
            return Err(StoreError::Malformed("parameter-set id 0 is reserved".into()));
        }

        Ok(Self { format_id: format_id.to_owned(), last_changed, param_id, payload: payload.to_owned() })
    }

    /// Renders the first line, including the trailing newline.
    pub fn serialize(&self) -> Vec<u8> {
        format!("{}:{}:{}:{}\n", self.format_id, self.last_changed, self.param_id, self.payload).into_bytes()
    }
}

/// The on-disk role a user's hash file encodes, expressed purely by the
/// filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// `[A-Za-z0-9][-_.@A-Za-z0-9]*`, checked without pulling in a regex engine.
pub fn is_valid_user_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

/// Builds the filename for `user` in the given `role`.
pub fn file_name(user: &str, role: Role) -> String {
    format!("{user}.{}", role.extension())
}

/// Splits a filename into `(user, role)`, rejecting anything whose stem
/// fails the user-name grammar or whose suffix isn't `admin`/`user`.
pub fn classify(filename: &str) -> Result<(String, Role), StoreError> {
    let (stem, ext) = filename.rsplit_once('.').ok_or_else(|| StoreError::InvalidName(filename.to_owned()))?;

    if !is_valid_user_name(stem) {
        return Err(StoreError::InvalidName(filename.to_owned()));
    }

    let role = match ext {
        "admin" => Role::Admin,
        "user" => Role::User,
        _ => return Err(StoreError::InvalidName(filename.to_owned())),
    };

    Ok((stem.to_owned(), role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record() {
        let record = HashRecord::new("argon2id", 1_700_000_000, 2, "c2FsdA:aGFzaA");
        let bytes = record.serialize();
        assert_eq!(HashRecord::parse(&bytes).unwrap(), record);
    }

    #[test]
    fn preserves_trailing_lines_when_parsing() {
        let bytes = b"argon2id:1:2:payload\nsome historical junk\n";
        let record = HashRecord::parse(bytes).unwrap();
        assert_eq!(record.format_id, "argon2id");
        assert_eq!(record.payload, "payload");
    }

    #[test]
    fn rejects_param_id_zero() {
        let bytes = b"argon2id:1:0:payload\n";
        assert!(matches!(HashRecord::parse(bytes), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn rejects_short_records() {
        assert!(HashRecord::parse(b"argon2id:1\n").is_err());
    }

    #[test]
    fn classify_round_trip() {
        for (user, role) in [("alice", Role::Admin), ("bob-2.test@x", Role::User)] {
            let name = file_name(user, role);
            let (parsed_user, parsed_role) = classify(&name).unwrap();
            assert_eq!(parsed_user, user);
            assert_eq!(parsed_role, role);
        }
    }

    #[test]
    fn classify_rejects_unknown_suffix() {
        assert!(classify("alice.root").is_err());
    }

    #[test]
    fn classify_rejects_bad_names() {
        assert!(classify("-alice.user").is_err());
        assert!(classify(".admin").is_err());
    }

    #[test]
    fn valid_user_name_accepts_the_documented_alphabet() {
        assert!(is_valid_user_name("a"));
        assert!(is_valid_user_name("alice.smith-99@corp"));
        assert!(!is_valid_user_name(""));
        assert!(!is_valid_user_name("_alice"));
    }
}
