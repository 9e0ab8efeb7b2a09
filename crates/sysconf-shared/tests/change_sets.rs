//! Change sets as a datastore would deliver them for common edits.

use sysconf_shared::change::{apply_changes, touched_domains};
use sysconf_shared::xml::render_config;
use sysconf_shared::{ChangeNode, ClockConfig, Domain, SystemConfig};

const USER: &str = "/ietf-system:system/authentication/user[name='test_user']";

fn user_changes() -> Vec<ChangeNode> {
    let key = format!("{}/authorized-key[name='test_rsa.pub']", USER);
    vec![
        ChangeNode::created_node("/ietf-system:system/authentication"),
        ChangeNode::created_node(USER),
        ChangeNode::created(format!("{}/name", USER), "test_user"),
        ChangeNode::created(format!("{}/password", USER), "$6$salt$hash"),
        ChangeNode::created_node(key.clone()),
        ChangeNode::created(format!("{}/name", key), "test_rsa.pub"),
        ChangeNode::created(format!("{}/algorithm", key), "ssh-rsa"),
        ChangeNode::created(format!("{}/key-data", key), "AAAAB3NzaC1yc2E="),
    ]
}

#[test]
fn test_user_with_key() {
    let config = apply_changes(&SystemConfig::default(), &user_changes()).unwrap();
    let user = &config.authentication["test_user"];
    assert_eq!(user.password.as_deref(), Some("$6$salt$hash"));
    let key = &user.authorized_keys["test_rsa.pub"];
    assert_eq!(key.file_content(), "ssh-rsa\nAAAAB3NzaC1yc2E=\n");
}

#[test]
fn test_invalid_algorithm_rejected() {
    let mut changes = user_changes();
    let last = changes.len() - 2;
    changes[last] = ChangeNode::created(
        format!("{}/authorized-key[name='test_rsa.pub']/algorithm", USER),
        "ssh-unknown",
    );
    let err = apply_changes(&SystemConfig::default(), &changes).unwrap_err();
    assert_eq!(err.code(), -32602);
}

#[test]
fn test_mismatched_name_leaf_rejected() {
    let changes = vec![
        ChangeNode::created_node(USER),
        ChangeNode::created(format!("{}/name", USER), "someone_else"),
    ];
    assert!(apply_changes(&SystemConfig::default(), &changes).is_err());
}

#[test]
fn test_password_removal_locks_account() {
    let config = apply_changes(&SystemConfig::default(), &user_changes()).unwrap();
    let next = apply_changes(
        &config,
        &[ChangeNode::deleted(
            format!("{}/password", USER),
            Some("$6$salt$hash".to_string()),
        )],
    )
    .unwrap();
    assert!(next.authentication["test_user"].password.is_none());
    assert_eq!(touched_domains(&user_changes()), vec![Domain::Authentication]);
}

#[test]
fn test_contact_round_trip_to_document() {
    let config = apply_changes(
        &SystemConfig::default(),
        &[ChangeNode::created("/ietf-system:system/contact", "test_contact")],
    )
    .unwrap();
    let xml = render_config(&config, Some("/ietf-system:system/contact")).unwrap();
    assert!(xml.contains("<contact>test_contact</contact>"));

    let cleared = apply_changes(
        &config,
        &[ChangeNode::deleted(
            "/ietf-system:system/contact",
            Some("test_contact".to_string()),
        )],
    )
    .unwrap();
    assert!(cleared.contact.is_none());
}

#[test]
fn test_ntp_enable_with_server() {
    let server = "/ietf-system:system/ntp/server[name='hr.pool.ntp.org']";
    let config = apply_changes(
        &SystemConfig::default(),
        &[
            ChangeNode::created("/ietf-system:system/ntp/enabled", "true"),
            ChangeNode::created_node(server),
            ChangeNode::created(format!("{}/udp/address", server), "162.159.200.123"),
            ChangeNode::created(format!("{}/iburst", server), "true"),
        ],
    )
    .unwrap();
    assert!(config.ntp.enabled);
    assert_eq!(config.ntp.servers.len(), 1);
    assert_eq!(config.ntp.servers[0].address, "162.159.200.123");
    assert!(config.ntp.servers[0].iburst);

    let bad = apply_changes(
        &config,
        &[ChangeNode::modified("/ietf-system:system/ntp/enabled", "true", "yes")],
    );
    assert!(bad.is_err());
}

#[test]
fn test_clock_variants_replace_each_other() {
    let named = apply_changes(
        &SystemConfig::default(),
        &[ChangeNode::created(
            "/ietf-system:system/clock/timezone-name",
            "Europe/Stockholm",
        )],
    )
    .unwrap();
    let offset = apply_changes(
        &named,
        &[
            ChangeNode::deleted(
                "/ietf-system:system/clock/timezone-name",
                Some("Europe/Stockholm".to_string()),
            ),
            ChangeNode::created("/ietf-system:system/clock/timezone-utc-offset", "120"),
        ],
    )
    .unwrap();
    assert_eq!(offset.clock, Some(ClockConfig::TimezoneUtcOffset(120)));
}
