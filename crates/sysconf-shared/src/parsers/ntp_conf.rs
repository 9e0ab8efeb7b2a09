//! ntp.conf association lines.
//!
//! Only `server`, `peer` and `pool` directives are owned by the daemon. Every
//! other line (comments, `driftfile`, `restrict`, ...) is kept verbatim and in
//! place; the configured associations are appended after them.

use crate::model::{AssociationType, NtpServer};

fn directive(line: &str) -> Option<AssociationType> {
    line.split_whitespace().next()?.parse().ok()
}

/// Render one association line: `<assoc> <address>[:<port>][ iburst][ prefer]`.
pub fn render_server(server: &NtpServer) -> String {
    let mut line = format!("{} ", server.association_type);
    match server.port {
        Some(port) if server.address.contains(':') => {
            line.push_str(&format!("[{}]:{}", server.address, port))
        }
        Some(port) => line.push_str(&format!("{}:{}", server.address, port)),
        None => line.push_str(&server.address),
    }
    if server.iburst {
        line.push_str(" iburst");
    }
    if server.prefer {
        line.push_str(" prefer");
    }
    line
}

/// Replace the association lines of `existing` with `servers`, in order.
pub fn render_ntp_conf(existing: &str, servers: &[NtpServer]) -> String {
    let mut out = String::new();
    for line in existing.lines() {
        if directive(line).is_none() {
            out.push_str(line);
            out.push('\n');
        }
    }
    for server in servers {
        out.push_str(&render_server(server));
        out.push('\n');
    }
    out
}

/// Association lines of a config file, named after their address.
pub fn parse_servers(content: &str) -> Vec<NtpServer> {
    let mut servers = Vec::new();
    for line in content.lines() {
        let Some(assoc) = directive(line) else {
            continue;
        };
        let mut words = line.split_whitespace().skip(1);
        let Some(endpoint) = words.next() else {
            continue;
        };
        let (address, port) = split_endpoint(endpoint);
        let mut server = NtpServer::new(address, address);
        server.port = port;
        server.association_type = assoc;
        for option in words {
            match option {
                "iburst" => server.iburst = true,
                "prefer" => server.prefer = true,
                _ => {}
            }
        }
        servers.push(server);
    }
    servers
}

fn split_endpoint(endpoint: &str) -> (&str, Option<u16>) {
    if let Some(rest) = endpoint.strip_prefix('[') {
        if let Some((addr, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (addr, port);
        }
    }
    match endpoint.rsplit_once(':') {
        Some((addr, port)) if !addr.contains(':') => (addr, port.parse().ok()),
        _ => (endpoint, None),
    }
}
