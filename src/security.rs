//! Redacts filesystem identity from user-visible logs.
//!
//! Grounded in the teacher's `Scrubber::scrub_path`; the teacher's
//! companion `is_blocked_command`/`scrub_env_hints` are dropped here —
//! that role is already served by [`crate::privacy::PrivacyFilter`],
//! which runs before anything reaches a store or a log.

pub struct PathScrubber {
    home_dir: String,
    username: String,
}

impl Default for PathScrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl PathScrubber {
    pub fn new() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_default().to_string_lossy().to_string();
        let username = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_default();
        Self { home_dir, username }
    }

    /// Replaces the home directory with `~` and the local username with
    /// `<user>`, so interaction logs don't leak machine identity.
    pub fn scrub_path(&self, path: &str) -> String {
        let mut result = path.to_string();
        if !self.home_dir.is_empty() {
            result = result.replace(&self.home_dir, "~");
        }
        if !self.username.is_empty() {
            result = result.replace(&self.username, "<user>");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_configured_home_dir() {
        let scrubber = PathScrubber { home_dir: "/home/alice".into(), username: "alice".into() };
        assert_eq!(scrubber.scrub_path("/home/alice/projects/foo"), "~/projects/foo");
    }

    #[test]
    fn scrubs_username_outside_home_dir() {
        let scrubber = PathScrubber { home_dir: "/home/alice".into(), username: "alice".into() };
        assert_eq!(scrubber.scrub_path("/tmp/alice-cache"), "/tmp/<user>-cache");
    }
}
