//! `/etc/passwd` entries.

use std::fmt;
use std::str::FromStr;

/// One line of the account database: `name:x:uid:gid:gecos:home:shell`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

impl PasswdEntry {
    pub fn parse_all(content: &str) -> Result<Vec<Self>, String> {
        super::parse_db(content, str::parse)
    }

    pub fn render_all(entries: &[Self]) -> String {
        super::render_db(entries)
    }
}

impl FromStr for PasswdEntry {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            return Err(format!("malformed passwd line: '{}'", line));
        }
        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| format!("bad id '{}' in passwd line '{}'", s, line))
        };
        Ok(Self {
            name: fields[0].to_string(),
            password: fields[1].to_string(),
            uid: number(fields[2])?,
            gid: number(fields[3])?,
            gecos: fields[4].to_string(),
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        })
    }
}

impl fmt::Display for PasswdEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.name, self.password, self.uid, self.gid, self.gecos, self.home, self.shell
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let content = "root:x:0:0:root:/root:/bin/bash\n\ntest_user:x:1000:1000::/home/test_user:/bin/sh\n";
        let entries = PasswdEntry::parse_all(content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].gecos, "root");
        assert_eq!(entries[1].uid, 1000);
        assert_eq!(entries[1].gecos, "");
        assert_eq!(
            PasswdEntry::render_all(&entries),
            "root:x:0:0:root:/root:/bin/bash\ntest_user:x:1000:1000::/home/test_user:/bin/sh\n"
        );
    }

    #[test]
    fn test_malformed_rejected() {
        assert!("root:x:0:0".parse::<PasswdEntry>().is_err());
        assert!("root:x:zero:0:::".parse::<PasswdEntry>().is_err());
    }
}
