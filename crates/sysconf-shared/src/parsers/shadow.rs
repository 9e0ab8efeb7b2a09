//! `/etc/shadow` entries.

use std::fmt;
use std::str::FromStr;

/// Hash stored for accounts without a password.
pub const LOCKED_HASH: &str = "!";

/// One line of the shadow database. Aging fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub name: String,
    pub hash: String,
    pub last_change: String,
    pub min_age: String,
    pub max_age: String,
    pub warn: String,
    pub inactive: String,
    pub expire: String,
    pub reserved: String,
}

impl ShadowEntry {
    /// Fresh entry with the default aging policy.
    pub fn new(name: &str, hash: Option<&str>, days_since_epoch: i64) -> Self {
        Self {
            name: name.to_string(),
            hash: hash.unwrap_or(LOCKED_HASH).to_string(),
            last_change: days_since_epoch.to_string(),
            min_age: "0".to_string(),
            max_age: "99999".to_string(),
            warn: "7".to_string(),
            inactive: String::new(),
            expire: String::new(),
            reserved: String::new(),
        }
    }

    /// Hash as a configured password, `None` for locked or empty entries.
    pub fn password(&self) -> Option<&str> {
        if self.hash.is_empty() || self.hash.starts_with('!') || self.hash.starts_with('*') {
            None
        } else {
            Some(&self.hash)
        }
    }

    pub fn parse_all(content: &str) -> Result<Vec<Self>, String> {
        super::parse_db(content, str::parse)
    }

    pub fn render_all(entries: &[Self]) -> String {
        super::render_db(entries)
    }
}

impl FromStr for ShadowEntry {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let f: Vec<&str> = line.split(':').collect();
        if f.len() != 9 {
            return Err(format!("malformed shadow line for '{}'", f[0]));
        }
        Ok(Self {
            name: f[0].to_string(),
            hash: f[1].to_string(),
            last_change: f[2].to_string(),
            min_age: f[3].to_string(),
            max_age: f[4].to_string(),
            warn: f[5].to_string(),
            inactive: f[6].to_string(),
            expire: f[7].to_string(),
            reserved: f[8].to_string(),
        })
    }
}

impl fmt::Display for ShadowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.name,
            self.hash,
            self.last_change,
            self.min_age,
            self.max_age,
            self.warn,
            self.inactive,
            self.expire,
            self.reserved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_layout() {
        let entry = ShadowEntry::new("test_user", None, 19000);
        assert_eq!(entry.to_string(), "test_user:!:19000:0:99999:7:::");
        assert_eq!(entry.password(), None);
    }

    #[test]
    fn test_parse_keeps_aging_fields() {
        let line = "root:$6$salt$hash:18000:1:90:14:3:20000:";
        let entry: ShadowEntry = line.parse().unwrap();
        assert_eq!(entry.password(), Some("$6$salt$hash"));
        assert_eq!(entry.max_age, "90");
        assert_eq!(entry.to_string(), line);
    }

    #[test]
    fn test_malformed_does_not_leak_hash() {
        let err = "u:$6$secret".parse::<ShadowEntry>().unwrap_err();
        assert!(!err.contains("secret"));
    }
}
