//! Physical key construction.
//!
//! Every key the cache writes is built here:
//!
//! ```text
//!   entry       <prefix>:<generation>:<group>:<id>
//!   generation  <prefix>:cache_ver_<group>
//!   lock        <prefix>:lock_<id>
//!   limit       <prefix>:act_limit:<actor>:<action>:<window_end>
//! ```
//!
//! An empty prefix drops the leading `<prefix>:` segment.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
    separator: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: separator.into(),
        }
    }

    fn scoped(&self, parts: &[&str]) -> String {
        let joined = parts.join(&self.separator);
        if self.prefix.is_empty() {
            joined
        } else {
            format!("{}{}{}", self.prefix, self.separator, joined)
        }
    }

    pub fn entry(&self, group: &str, generation: u64, id: &str) -> String {
        self.scoped(&[&generation.to_string(), group, id])
    }

    pub fn generation(&self, group: &str) -> String {
        self.scoped(&[&format!("cache_ver_{}", group)])
    }

    pub fn lock(&self, id: &str) -> String {
        self.scoped(&[&format!("lock_{}", id)])
    }

    pub fn limit(&self, actor: &str, action: &str, window_end: u64) -> String {
        self.scoped(&["act_limit", actor, action, &window_end.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        let keys = KeyLayout::new("app", ":");
        assert_eq!(keys.entry("users", 3, "42"), "app:3:users:42");
        assert_eq!(keys.generation("users"), "app:cache_ver_users");
        assert_eq!(keys.lock("report"), "app:lock_report");
        assert_eq!(keys.limit("u1", "login", 120), "app:act_limit:u1:login:120");
    }

    #[test]
    fn test_empty_prefix() {
        let keys = KeyLayout::new("", "/");
        assert_eq!(keys.entry("_cache_", 0, "k"), "0/_cache_/k");
        assert_eq!(keys.generation("_cache_"), "cache_ver__cache_");
    }
}
