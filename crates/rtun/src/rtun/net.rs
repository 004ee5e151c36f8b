use std::borrow::Cow;

/// Normalize a bind/listen address.
///
/// The shorthand `":PORT"` means "bind on all interfaces". Rust's `SocketAddr`
/// parsing and Tokio bind APIs do not accept `":PORT"`, so we normalize it to
/// `"0.0.0.0:PORT"`.
pub fn normalize_bind_addr(addr: &str) -> Cow<'_, str> {
    let addr = addr.trim();
    if addr.starts_with(':') {
        Cow::Owned(format!("0.0.0.0{addr}"))
    } else {
        Cow::Borrowed(addr)
    }
}

/// Normalize a dial address: `":PORT"` dials the local machine.
pub fn normalize_dial_addr(addr: &str) -> Cow<'_, str> {
    let addr = addr.trim();
    if addr.starts_with(':') {
        Cow::Owned(format!("127.0.0.1{addr}"))
    } else {
        Cow::Borrowed(addr)
    }
}

/// Empty host means all interfaces.
pub fn normalize_bind_host(host: &str) -> Cow<'_, str> {
    let host = host.trim();
    if host.is_empty() {
        Cow::Borrowed("0.0.0.0")
    } else {
        Cow::Borrowed(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_bind_addr_port_only() {
        assert_eq!(normalize_bind_addr(":8421").as_ref(), "0.0.0.0:8421");
        assert_eq!(normalize_bind_addr(" :9000 ").as_ref(), "0.0.0.0:9000");
    }

    #[test]
    fn normalize_bind_addr_passthrough() {
        assert_eq!(
            normalize_bind_addr("127.0.0.1:8421").as_ref(),
            "127.0.0.1:8421"
        );
        assert_eq!(normalize_bind_addr("[::]:8421").as_ref(), "[::]:8421");
    }

    #[test]
    fn normalize_dial_addr_port_only() {
        assert_eq!(normalize_dial_addr(":9000").as_ref(), "127.0.0.1:9000");
        assert_eq!(
            normalize_dial_addr("relay.example.com:9000").as_ref(),
            "relay.example.com:9000"
        );
    }

    #[test]
    fn normalize_bind_host_defaults_to_all_interfaces() {
        assert_eq!(normalize_bind_host("").as_ref(), "0.0.0.0");
        assert_eq!(normalize_bind_host(" 127.0.0.1 ").as_ref(), "127.0.0.1");
    }
}
