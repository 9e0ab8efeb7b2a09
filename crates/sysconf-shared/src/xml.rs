//! XML rendering of configuration and state documents.
//!
//! Documents are built as a small element tree, optionally cut down to one
//! path, and serialized without whitespace between elements.

use crate::change::path_segments;
use crate::error::SysconfError;
use crate::model::{ClockConfig, SystemConfig};
use crate::state::{SystemState, STATE_ROOT};
use crate::{SYSTEM_NAMESPACE, SYSTEM_ROOT};

#[derive(Debug, Clone, PartialEq)]
struct Element {
    name: &'static str,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    fn node(name: &'static str, children: Vec<Element>) -> Self {
        Self {
            name,
            text: None,
            children,
        }
    }

    fn leaf(name: &'static str, text: impl ToString) -> Self {
        Self {
            name,
            text: Some(text.to_string()),
            children: Vec::new(),
        }
    }

    fn key(&self) -> Option<&str> {
        self.children
            .iter()
            .find(|c| c.name == "name")
            .and_then(|c| c.text.as_deref())
    }

    /// Keep only the branch selected by `segments`.
    fn select(&self, segments: &[(String, Option<String>)]) -> Option<Element> {
        let Some(((name, key), rest)) = segments.split_first() else {
            return Some(self.clone());
        };
        let children: Vec<Element> = self
            .children
            .iter()
            .filter(|c| c.name == name.as_str())
            .filter(|c| key.as_deref().map_or(true, |k| c.key() == Some(k)))
            .filter_map(|c| c.select(rest))
            .collect();
        if children.is_empty() {
            return None;
        }
        Some(Element {
            name: self.name,
            text: None,
            children,
        })
    }

    fn write(&self, out: &mut String, namespace: Option<&str>) {
        out.push('<');
        out.push_str(self.name);
        if let Some(ns) = namespace {
            out.push_str(" xmlns=\"");
            out.push_str(ns);
            out.push('"');
        }
        if self.text.is_none() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(&escape(text));
        }
        for child in &self.children {
            child.write(out, None);
        }
        out.push_str("</");
        out.push_str(self.name);
        out.push('>');
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn config_tree(config: &SystemConfig) -> Element {
    let mut root = Element::node("system", Vec::new());
    if let Some(contact) = &config.contact {
        root.children.push(Element::leaf("contact", contact));
    }
    if let Some(hostname) = &config.hostname {
        root.children.push(Element::leaf("hostname", hostname));
    }
    if let Some(location) = &config.location {
        root.children.push(Element::leaf("location", location));
    }
    if let Some(clock) = &config.clock {
        let leaf = match clock {
            ClockConfig::TimezoneName(name) => Element::leaf("timezone-name", name),
            ClockConfig::TimezoneUtcOffset(minutes) => {
                Element::leaf("timezone-utc-offset", minutes)
            }
        };
        root.children.push(Element::node("clock", vec![leaf]));
    }
    if config.ntp.enabled || !config.ntp.servers.is_empty() {
        let mut ntp = vec![Element::leaf("enabled", config.ntp.enabled)];
        for server in &config.ntp.servers {
            let mut udp = vec![Element::leaf("address", &server.address)];
            if let Some(port) = server.port {
                udp.push(Element::leaf("port", port));
            }
            ntp.push(Element::node(
                "server",
                vec![
                    Element::leaf("name", &server.name),
                    Element::node("udp", udp),
                    Element::leaf("association-type", server.association_type),
                    Element::leaf("iburst", server.iburst),
                    Element::leaf("prefer", server.prefer),
                ],
            ));
        }
        root.children.push(Element::node("ntp", ntp));
    }
    if !config.authentication.is_empty() {
        let users = config
            .authentication
            .values()
            .map(|user| {
                let mut children = vec![Element::leaf("name", &user.name)];
                if let Some(password) = &user.password {
                    children.push(Element::leaf("password", password));
                }
                for key in user.authorized_keys.values() {
                    children.push(Element::node(
                        "authorized-key",
                        vec![
                            Element::leaf("name", &key.name),
                            Element::leaf("algorithm", &key.algorithm),
                            Element::leaf("key-data", &key.key_data),
                        ],
                    ));
                }
                Element::node("user", children)
            })
            .collect();
        root.children.push(Element::node("authentication", users));
    }
    root
}

fn state_tree(state: &SystemState) -> Element {
    Element::node(
        "system-state",
        vec![
            Element::node(
                "platform",
                vec![
                    Element::leaf("os-name", &state.platform.os_name),
                    Element::leaf("os-release", &state.platform.os_release),
                    Element::leaf("os-version", &state.platform.os_version),
                    Element::leaf("machine", &state.platform.machine),
                ],
            ),
            Element::node(
                "clock",
                vec![
                    Element::leaf("current-datetime", state.clock.current_datetime.to_rfc3339()),
                    Element::leaf("boot-datetime", state.clock.boot_datetime.to_rfc3339()),
                ],
            ),
            Element::leaf("hostname", &state.hostname),
        ],
    )
}

fn render(tree: Element, path: Option<&str>, root: &str) -> Result<String, SysconfError> {
    let selected = match path {
        Some(path) => {
            let segments = path_segments(path, root)?;
            tree.select(&segments)
                .unwrap_or_else(|| Element::node(tree.name, Vec::new()))
        }
        None => tree,
    };
    let mut out = String::new();
    selected.write(&mut out, Some(SYSTEM_NAMESPACE));
    Ok(out)
}

/// Configuration document, optionally restricted to `path`.
pub fn render_config(config: &SystemConfig, path: Option<&str>) -> Result<String, SysconfError> {
    render(config_tree(config), path, SYSTEM_ROOT)
}

/// State document, optionally restricted to `path`.
pub fn render_state(state: &SystemState, path: Option<&str>) -> Result<String, SysconfError> {
    render(state_tree(state), path, STATE_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthorizedKey, LocalUser, NtpServer};

    #[test]
    fn test_contact_document() {
        let mut config = SystemConfig::default();
        config.contact = Some("test_contact".to_string());
        config.hostname = Some("box".to_string());
        let xml = render_config(&config, Some("/ietf-system:system/contact")).unwrap();
        assert_eq!(
            xml,
            "<system xmlns=\"urn:ietf:params:xml:ns:yang:ietf-system\"><contact>test_contact</contact></system>"
        );
    }

    #[test]
    fn test_keyed_selection() {
        let mut config = SystemConfig::default();
        config.ntp.enabled = true;
        config.ntp.servers.push(NtpServer::new("a", "10.0.0.1"));
        config.ntp.servers.push(NtpServer::new("b", "10.0.0.2"));
        let xml = render_config(
            &config,
            Some("/ietf-system:system/ntp/server[name='b']/udp/address"),
        )
        .unwrap();
        assert!(xml.contains("<server><udp><address>10.0.0.2</address></udp></server>"));
        assert!(!xml.contains("10.0.0.1"));
    }

    #[test]
    fn test_missing_path_gives_empty_root() {
        let xml = render_config(&SystemConfig::default(), Some("/ietf-system:system/location"))
            .unwrap();
        assert_eq!(xml, "<system xmlns=\"urn:ietf:params:xml:ns:yang:ietf-system\"/>");
    }

    #[test]
    fn test_escaping() {
        let mut config = SystemConfig::default();
        let mut user = LocalUser::new("u");
        user.authorized_keys.insert(
            "k".to_string(),
            AuthorizedKey::new("k", "ssh-rsa", "AAAA"),
        );
        config.authentication.insert("u".to_string(), user);
        config.location = Some("rack <3> & \"row\"".to_string());
        let xml = render_config(&config, None).unwrap();
        assert!(xml.contains("<location>rack &lt;3&gt; &amp; &quot;row&quot;</location>"));
        assert!(xml.contains("<authorized-key><name>k</name><algorithm>ssh-rsa</algorithm>"));
    }
}
