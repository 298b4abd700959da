//! Classifies an inbound CONNECT host as allowed, blackholed, or passthrough.
//!
//! Matching is exact-string only against a `host:port` form, no wildcards and
//! no CIDR — unlike the teacher's IP-range allow-list this one only ever
//! needs to compare hostnames, so it is a pair of static sets rather than a
//! trie.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Allow,
    Blackhole,
    Default,
}

pub struct AllowList {
    allow: HashSet<String>,
    blackhole: HashSet<String>,
}

const DEFAULT_ALLOW: &[&str] = &[
    "pixiv.net",
    "www.pixiv.net",
    "i.pximg.net",
    "source.pixiv.net",
    "accounts.pixiv.net",
    "touch.pixiv.net",
    "imgaz.pixiv.net",
    "app-api.pixiv.net",
    "oauth.secure.pixiv.net",
    "dic.pixiv.net",
    "comic.pixiv.net",
    "factory.pixiv.net",
    "g-client-proxy.pixiv.net",
    "sketch.pixiv.net",
    "payment.pixiv.net",
    "sensei.pixiv.net",
    "novel.pixiv.net",
    "en-dic.pixiv.net",
    "i1.pixiv.net",
    "i2.pixiv.net",
    "i3.pixiv.net",
    "i4.pixiv.net",
    "d.pixiv.org",
    "pixiv.pximg.net",
    "fanbox.pixiv.net",
    "s.pximg.net",
    "pixivsketch.net",
    "pximg.net",
];

const DEFAULT_BLACKHOLE: &[&str] = &["www.google.com"];

impl AllowList {
    pub fn new(allow: impl IntoIterator<Item = String>, blackhole: impl IntoIterator<Item = String>) -> Self {
        AllowList {
            allow: with_port_projection(allow),
            blackhole: with_port_projection(blackhole),
        }
    }

    /// The compiled-in default lists, mirroring spec.md §6's "compiled in as
    /// static arrays" requirement.
    pub fn defaults() -> Self {
        AllowList::new(
            DEFAULT_ALLOW.iter().map(|s| s.to_string()),
            DEFAULT_BLACKHOLE.iter().map(|s| s.to_string()),
        )
    }

    /// `host_port` must already include the port, e.g. `"www.pixiv.net:443"`.
    pub fn classify(&self, host_port: &str) -> Classification {
        if self.blackhole.contains(host_port) {
            Classification::Blackhole
        } else if self.allow.contains(host_port) {
            Classification::Allow
        } else {
            Classification::Default
        }
    }

    /// Bare hostnames (no port) currently on the allow-list, for C4's
    /// fallback-verification iteration.
    pub fn allowed_hostnames(&self) -> impl Iterator<Item = &str> {
        self.allow.iter().filter_map(|entry| entry.split(':').next())
    }
}

fn with_port_projection(names: impl IntoIterator<Item = String>) -> HashSet<String> {
    let mut set = HashSet::new();
    for name in names {
        set.insert(format!("{name}:443"));
        set.insert(name);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_blackhole() {
        let list = AllowList::defaults();
        assert_eq!(list.classify("www.google.com:443"), Classification::Blackhole);
    }

    #[test]
    fn classifies_allow() {
        let list = AllowList::defaults();
        assert_eq!(list.classify("www.pixiv.net:443"), Classification::Allow);
    }

    #[test]
    fn classifies_default() {
        let list = AllowList::defaults();
        assert_eq!(list.classify("example.com:443"), Classification::Default);
    }

    #[test]
    fn matching_is_exact_no_wildcard() {
        let list = AllowList::defaults();
        assert_eq!(list.classify("evil.www.pixiv.net:443"), Classification::Default);
        assert_eq!(list.classify("www.pixiv.net.evil.com:443"), Classification::Default);
    }

    #[test]
    fn allowed_hostnames_strips_port() {
        let list = AllowList::defaults();
        let names: HashSet<&str> = list.allowed_hostnames().collect();
        assert!(names.contains("www.pixiv.net"));
    }
}
