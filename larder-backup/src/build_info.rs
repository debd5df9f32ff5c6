/// Version metadata captured at compile time. Built once at startup and
/// passed to whatever reports it; there is no global mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: Option<&'static str>,
    pub date: Option<&'static str>,
    pub dirty: bool,
}

impl BuildInfo {
    /// Reads the crate version plus the optional `LARDER_BUILD_*` variables
    /// the release pipeline exports at compile time.
    pub fn from_build_env() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("LARDER_BUILD_COMMIT"),
            date: option_env!("LARDER_BUILD_DATE"),
            dirty: matches!(option_env!("LARDER_BUILD_DIRTY"), Some("true")),
        }
    }

    pub fn short(&self) -> &'static str {
        self.version
    }

    /// `version (commit, date) [dirty]`, omitting whatever is unknown.
    pub fn full(&self) -> String {
        let mut out = String::from(self.version);
        let mut parts = Vec::new();
        if let Some(commit) = self.commit {
            parts.push(commit);
        }
        if let Some(date) = self.date {
            parts.push(date);
        }
        if !parts.is_empty() {
            out.push_str(&format!(" ({})", parts.join(", ")));
        }
        if self.dirty {
            out.push_str(" [dirty]");
        }
        out
    }
}
