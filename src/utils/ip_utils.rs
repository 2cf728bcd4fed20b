use std::net::IpAddr;

/// IP utility functions for validation and address splitting

/// Check if a string is a valid IP address (IPv4 or IPv6)
pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<IpAddr>().is_ok()
}

/// Check if a string is a valid IPv4 address
pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.parse::<std::net::Ipv4Addr>().is_ok()
}

/// Host part of an address that may carry a port.
///
/// Handles "1.2.3.4:26656", "[2001:db8::1]:26656", bare IPs and bare host names.
pub fn host_of(address: &str) -> &str {
    let address = address.trim();

    if let Some(rest) = address.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }

    // A bare IPv6 address is full of colons; leave it alone
    if is_valid_ip(address) {
        return address;
    }

    match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}
