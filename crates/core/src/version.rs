//! Build metadata surfaced on the management dashboard.

use std::fmt;

#[derive(Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub name: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: env!("CARGO_PKG_VERSION"),
    name: env!("CARGO_PKG_NAME"),
};

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}
