//! End-to-end transactions against the in-memory host.

use std::path::Path;
use std::sync::Arc;

use sysconf_common::{
    AccountsDb, ClockOps, Failure, FileSystem, HostnameOps, MemoryHost, NtpConfigFile,
    ServiceControl, ShadowDb,
};
use sysconf_shared::parsers::parse_servers;
use sysconf_shared::rpc::TransactionState;
use sysconf_shared::xml::render_config;
use sysconf_shared::{
    AuthorizedKey, ChangeNode, ClockConfig, Domain, LocalUser, NtpServer, OsErrorKind,
    SysconfError, SystemConfig, Transaction,
};
use sysconfd::reconcile::ReconcileSettings;
use sysconfd::{startup, Dispatcher};

const USER: &str = "/ietf-system:system/authentication/user[name='test_user']";
const KEY_DATA: &str = "AAAAB3NzaC1yc2EAAAADAQABAAABAQ==";

fn setup() -> (Arc<MemoryHost>, Dispatcher) {
    let host = Arc::new(MemoryHost::new());
    let dispatcher = Dispatcher::new(
        host.clone(),
        &ReconcileSettings::default(),
        SystemConfig::default(),
    );
    (host, dispatcher)
}

fn server_path(name: &str) -> String {
    format!("/ietf-system:system/ntp/server[name='{}']", name)
}

fn add_server(name: &str, address: &str) -> Vec<ChangeNode> {
    vec![
        ChangeNode::created_node(server_path(name)),
        ChangeNode::created(format!("{}/udp/address", server_path(name)), address),
    ]
}

fn user_changes() -> Vec<ChangeNode> {
    let key = format!("{}/authorized-key[name='test_rsa.pub']", USER);
    vec![
        ChangeNode::created_node(USER),
        ChangeNode::created(format!("{}/name", USER), "test_user"),
        ChangeNode::created(format!("{}/password", USER), "$6$salt$hash"),
        ChangeNode::created_node(key.clone()),
        ChangeNode::created(format!("{}/algorithm", key), "ssh-rsa"),
        ChangeNode::created(format!("{}/key-data", key), KEY_DATA),
    ]
}

fn full_config() -> SystemConfig {
    let mut user = LocalUser::new("test_user");
    user.password = Some("$6$salt$hash".to_string());
    user.authorized_keys.insert(
        "test_rsa.pub".to_string(),
        AuthorizedKey::new("test_rsa.pub", "ssh-rsa", KEY_DATA),
    );
    let mut config = SystemConfig {
        hostname: Some("edge-1".to_string()),
        contact: Some("noc@example.net".to_string()),
        location: Some("rack 4".to_string()),
        clock: Some(ClockConfig::TimezoneName("Europe/Stockholm".to_string())),
        ..Default::default()
    };
    config.ntp.enabled = true;
    config
        .ntp
        .servers
        .push(NtpServer::new("hr.pool.ntp.org", "162.159.200.123"));
    config.authentication.insert(user.name.clone(), user);
    config
}

#[test]
fn test_contact_sets_superuser_comment() {
    let (host, mut d) = setup();
    let tx = Transaction::new(vec![ChangeNode::created(
        "/ietf-system:system/contact",
        "test_contact",
    )]);
    d.apply_transaction(&tx).unwrap();

    assert_eq!(host.passwd_entry("root").unwrap().gecos, "test_contact");
    let xml = render_config(d.running(), Some("/ietf-system:system/contact")).unwrap();
    assert_eq!(
        xml,
        "<system xmlns=\"urn:ietf:params:xml:ns:yang:ietf-system\"><contact>test_contact</contact></system>"
    );
}

#[test]
fn test_ntp_enable_with_server() {
    let (host, mut d) = setup();
    let mut changes = vec![ChangeNode::created("/ietf-system:system/ntp/enabled", "true")];
    changes.extend(add_server("hr.pool.ntp.org", "162.159.200.123"));
    let result = d.apply_transaction(&Transaction::new(changes)).unwrap();
    assert_eq!(result.domains, [Domain::Ntp]);

    assert!(host.is_active("ntpd").unwrap());
    assert!(host.is_enabled("ntpd").unwrap());
    let content = host.read_ntp_config().unwrap();
    let servers = parse_servers(&content);
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].address, "162.159.200.123");
    assert!(content.starts_with("driftfile /var/lib/ntp/drift\n"));
}

#[test]
fn test_ntp_server_order_is_preserved() {
    let (host, mut d) = setup();
    let mut changes = add_server("a", "10.0.0.1");
    changes.extend(add_server("b", "10.0.0.2"));
    d.apply_transaction(&Transaction::new(changes)).unwrap();

    d.apply_transaction(&Transaction::new(add_server("c", "10.0.0.3")))
        .unwrap();
    let addresses = |host: &MemoryHost| -> Vec<String> {
        parse_servers(&host.read_ntp_config().unwrap())
            .into_iter()
            .map(|s| s.address)
            .collect()
    };
    assert_eq!(addresses(&host), ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    d.apply_transaction(&Transaction::new(vec![ChangeNode::deleted(
        server_path("a"),
        None,
    )]))
    .unwrap();
    assert_eq!(addresses(&host), ["10.0.0.2", "10.0.0.3"]);
    // Not enabled, so never started.
    assert!(!host.is_active("ntpd").unwrap());
}

#[test]
fn test_user_lifecycle() {
    let (host, mut d) = setup();
    d.apply_transaction(&Transaction::new(user_changes())).unwrap();

    let entry = host.passwd_entry("test_user").unwrap();
    assert_eq!(entry.uid, 1000);
    assert_eq!(entry.gid, 1000);
    assert_eq!(entry.shell, "/bin/sh");
    assert_eq!(entry.home, "/home/test_user");
    assert_eq!(host.shadow_entry("test_user").unwrap().hash, "$6$salt$hash");
    assert_eq!(
        host.read_file(Path::new("/home/test_user/.ssh/test_rsa.pub"))
            .unwrap()
            .as_deref(),
        Some(format!("ssh-rsa\n{}\n", KEY_DATA).as_str())
    );
    let snapshot = host.snapshot();
    let (_, attrs) = &snapshot.files[Path::new("/home/test_user/.ssh/test_rsa.pub")];
    assert_eq!(attrs.mode, 0o600);
    assert_eq!(attrs.uid, Some(1000));

    d.replace_config(SystemConfig::default()).unwrap();
    assert_eq!(
        host.passwd_entry("test_user").unwrap_err().kind,
        OsErrorKind::NotFound
    );
    assert!(host.shadow_entry("test_user").is_err());
    assert!(!host.exists(Path::new("/home/test_user")));
    // The stash is purged after commit.
    assert!(host.list_dir(Path::new("/home")).unwrap().is_empty());
}

#[test]
fn test_failed_user_creation_leaves_host_untouched() {
    let (host, mut d) = setup();
    let before = host.snapshot();
    host.inject(Failure::on("write_file").kind(OsErrorKind::PermissionDenied));

    let err = d
        .apply_transaction(&Transaction::new(user_changes()))
        .unwrap_err();
    match &err {
        SysconfError::Resource { domain, step, source } => {
            assert_eq!(*domain, Domain::Authentication);
            assert_eq!(*step, 5);
            assert_eq!(source.kind, OsErrorKind::PermissionDenied);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(host.snapshot(), before);
    assert!(d.running().authentication.is_empty());
    assert_eq!(
        d.stats().last_failure.as_ref().map(|f| f.state),
        Some(TransactionState::RolledBack)
    );
}

#[test]
fn test_failed_user_removal_restores_account() {
    let (host, mut d) = setup();
    d.apply_transaction(&Transaction::new(user_changes())).unwrap();
    let before = host.snapshot();

    host.inject(Failure::on("delete_passwd_entry").kind(OsErrorKind::Busy));
    let err = d.replace_config(SystemConfig::default()).unwrap_err();
    assert!(matches!(err, SysconfError::Resource { .. }));
    assert_eq!(host.snapshot(), before);
    assert_eq!(d.running().authentication.len(), 1);
}

#[test]
fn test_service_timeout_rolls_back_every_domain() {
    let (host, mut d) = setup();
    let before = host.snapshot();
    host.inject(Failure::on("service_start").kind(OsErrorKind::Timeout));

    let err = d.replace_config(full_config()).unwrap_err();
    match &err {
        SysconfError::Resource { domain, source, .. } => {
            assert_eq!(*domain, Domain::Ntp);
            assert!(source.is_retryable());
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(host.snapshot(), before);
    assert_eq!(d.running(), &SystemConfig::default());
}

#[test]
fn test_failure_in_last_domain_restores_earlier_ones() {
    let (host, mut d) = setup();
    let before = host.snapshot();
    host.inject(Failure::on("create_dir").matching(".ssh"));

    d.replace_config(full_config()).unwrap_err();
    assert_eq!(host.snapshot(), before);
    assert_eq!(host.hostname().unwrap(), "localhost");
    assert_eq!(host.timezone().unwrap(), None);
}

#[test]
fn test_reapplying_is_idempotent() {
    let (host, mut d) = setup();
    let first = d.replace_config(full_config()).unwrap();
    assert_eq!(
        first.domains,
        [
            Domain::Hostname,
            Domain::Contact,
            Domain::Location,
            Domain::Clock,
            Domain::Ntp,
            Domain::Authentication
        ]
    );
    let after_first = host.snapshot();

    host.clear_journal();
    let second = d.replace_config(full_config()).unwrap();
    assert_eq!(second.steps_applied, 0);
    assert!(host.journal().is_empty());
    assert_eq!(host.snapshot(), after_first);
}

#[test]
fn test_restart_then_reapply_changes_nothing() {
    let (host, mut d) = setup();
    d.replace_config(full_config()).unwrap();
    let after_first = host.snapshot();

    let settings = ReconcileSettings::default();
    let running = startup::synchronize(host.as_ref(), &settings).unwrap();
    assert_eq!(running.authentication, full_config().authentication);

    let mut restarted = Dispatcher::new(host.clone(), &settings, running);
    host.clear_journal();
    restarted.replace_config(full_config()).unwrap();
    assert!(host.journal().is_empty(), "{:?}", host.journal());
    assert_eq!(host.snapshot(), after_first);
}

#[test]
fn test_hostname_delete_resets_default() {
    let (host, mut d) = setup();
    d.apply_transaction(&Transaction::new(vec![ChangeNode::created(
        "/ietf-system:system/hostname",
        "test-hostname",
    )]))
    .unwrap();
    assert_eq!(host.hostname().unwrap(), "test-hostname");

    d.apply_transaction(&Transaction::new(vec![ChangeNode::deleted(
        "/ietf-system:system/hostname",
        Some("test-hostname".to_string()),
    )]))
    .unwrap();
    assert_eq!(host.hostname().unwrap(), "localhost");
    assert!(d.running().hostname.is_none());
}

#[test]
fn test_timezone_offset_applies_etc_zone() {
    let (host, mut d) = setup();
    d.apply_transaction(&Transaction::new(vec![ChangeNode::created(
        "/ietf-system:system/clock/timezone-utc-offset",
        "120",
    )]))
    .unwrap();
    assert_eq!(host.timezone().unwrap().as_deref(), Some("Etc/GMT-2"));
}

#[test]
fn test_duplicate_key_rejected_before_mutation() {
    let (host, mut d) = setup();
    d.apply_transaction(&Transaction::new(user_changes())).unwrap();
    host.clear_journal();

    let key = format!("{}/authorized-key[name='test_rsa.pub']", USER);
    let err = d
        .apply_transaction(&Transaction::new(vec![ChangeNode::created_node(key)]))
        .unwrap_err();
    assert!(matches!(err, SysconfError::Validation { .. }));
    assert!(host.journal().is_empty());
}
