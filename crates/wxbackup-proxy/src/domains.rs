//! Intercepted host filtering.
//!
//! Only traffic to the content platform is decrypted; every other CONNECT
//! tunnel is passed through untouched.

/// Hosts intercepted by default.
pub const PLATFORM_HOSTS: &[&str] = &["mp.weixin.qq.com"];

/// Set of hosts whose traffic is decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptHosts {
    hosts: Vec<String>,
}

impl Default for InterceptHosts {
    fn default() -> Self {
        Self::new(PLATFORM_HOSTS.iter().copied())
    }
}

impl InterceptHosts {
    /// Creates a host set. Entries are compared case-insensitively.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Checks if `host` (optionally with a port) should be intercepted.
    ///
    /// # Examples
    ///
    /// ```
    /// use wxbackup_proxy::InterceptHosts;
    ///
    /// let hosts = InterceptHosts::default();
    /// assert!(hosts.contains("mp.weixin.qq.com"));
    /// assert!(hosts.contains("mp.weixin.qq.com:443"));
    /// assert!(!hosts.contains("res.wx.qq.com"));
    /// ```
    pub fn contains(&self, host: &str) -> bool {
        let host = strip_port(host);
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Returns the configured hosts.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

/// Removes a trailing `:port`, leaving IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(h, _)| h.trim_start_matches('['))
            .unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contains_platform() {
        let hosts = InterceptHosts::default();
        assert!(hosts.contains("mp.weixin.qq.com"));
        assert!(hosts.contains("MP.WEIXIN.QQ.COM"));
    }

    #[test]
    fn port_is_ignored() {
        let hosts = InterceptHosts::default();
        assert!(hosts.contains("mp.weixin.qq.com:443"));
        assert!(hosts.contains("mp.weixin.qq.com:8443"));
    }

    #[test]
    fn other_hosts_pass_through() {
        let hosts = InterceptHosts::default();
        assert!(!hosts.contains("weixin.qq.com"));
        assert!(!hosts.contains("mp.weixin.qq.com.evil.example"));
        assert!(!hosts.contains("example.com"));
    }

    #[test]
    fn custom_hosts() {
        let hosts = InterceptHosts::new(["a.example", " ", "B.example"]);
        assert_eq!(hosts.hosts(), &["a.example".to_string(), "b.example".to_string()]);
        assert!(hosts.contains("b.example"));
    }

    #[test]
    fn strip_port_handles_ipv6() {
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("localhost:80"), "localhost");
        assert_eq!(strip_port("localhost"), "localhost");
    }
}
