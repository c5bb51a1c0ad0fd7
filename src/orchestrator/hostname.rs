/// Hostnames longer than this are rejected by Proxmox.
const MAX_HOSTNAME_LEN: usize = 63;

/// Turn a user-supplied name into a DNS-safe hostname.
///
/// Lowercases, collapses each whitespace run into one hyphen, drops anything
/// outside `[a-z0-9-]` and strips leading and trailing hyphens. Other hyphen
/// runs are kept as-is.
pub fn sanitize_hostname(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('-');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            out.push(c);
        }
    }

    out.trim_matches('-').to_string()
}

/// Hostname sent to Proxmox for `name`.
///
/// Falls back to `ct-<vmid>` when nothing usable is left after sanitizing,
/// and truncates to the DNS label limit.
pub(crate) fn container_hostname(name: &str, vmid: i64) -> String {
    let mut hostname = sanitize_hostname(name);
    if hostname.len() > MAX_HOSTNAME_LEN {
        hostname.truncate(MAX_HOSTNAME_LEN);
        hostname = hostname.trim_end_matches('-').to_string();
    }
    if hostname.is_empty() {
        return format!("ct-{}", vmid);
    }
    hostname
}
