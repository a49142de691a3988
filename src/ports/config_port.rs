//! Configuration access port trait.

use std::time::Duration;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;

    /// Millisecond setting as a [`Duration`]; negative values clamp to zero.
    fn get_millis(&self, section: &str, key: &str, default_ms: u64) -> Duration {
        let ms = self.get_int(section, key, default_ms as i64);
        Duration::from_millis(ms.max(0) as u64)
    }
}
