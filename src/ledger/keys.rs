/// Redis key layout
///
/// - `{prefix}:job:{job_id}` -> hash { data: Job (JSON), rev: u64 }
/// - `{prefix}:jobs` -> set of job ids (listing and pruning)
/// - `{prefix}:dedup:{fingerprint_key}` -> job id
/// - `{prefix}:queue` -> list of pending job ids (LPUSH in, BRPOPLPUSH out)
/// - `{prefix}:delayed` -> sorted set of job ids scored by due time (ms)
/// - `{prefix}:consumers` -> set of consumer ids that may hold popped jobs
/// - `{prefix}:consumer:{id}:lease` -> present while the consumer is alive
/// - `{prefix}:consumer:{id}:processing` -> ids popped and not yet acknowledged
use crate::job::{Fingerprint, JobId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches(':').to_string();
        Self { prefix }
    }

    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    pub fn jobs_index(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    pub fn dedup(&self, fingerprint: &Fingerprint) -> String {
        format!("{}:dedup:{}", self.prefix, fingerprint.key)
    }

    pub fn queue(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn consumers(&self) -> String {
        format!("{}:consumers", self.prefix)
    }

    pub fn lease(&self, consumer: &str) -> String {
        format!("{}:consumer:{}:lease", self.prefix, consumer)
    }

    pub fn processing(&self, consumer: &str) -> String {
        format!("{}:consumer:{}:processing", self.prefix, consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_encoding() {
        let keys = KeySpace::new("mediabox");
        assert_eq!(keys.job(&JobId::from("abc-123")), "mediabox:job:abc-123");
    }

    #[test]
    fn test_consumer_keys() {
        let keys = KeySpace::new("mediabox");
        assert_eq!(keys.consumers(), "mediabox:consumers");
        assert_eq!(keys.lease("c1"), "mediabox:consumer:c1:lease");
        assert_eq!(keys.processing("c1"), "mediabox:consumer:c1:processing");
    }

    #[test]
    fn test_trailing_colon_trimmed() {
        let keys = KeySpace::new("ydl:");
        assert_eq!(keys.queue(), "ydl:queue");
        assert_eq!(keys.delayed(), "ydl:delayed");
        assert_eq!(keys.jobs_index(), "ydl:jobs");
    }

    #[test]
    fn test_dedup_key_uses_fingerprint_digest() {
        let keys = KeySpace::new("mediabox");
        let fp = Fingerprint::new("https://example.com/v/1", None).unwrap();
        assert_eq!(keys.dedup(&fp), format!("mediabox:dedup:{}", fp.key));
    }
}
