//! Shared helpers for tests.

use std::time::Duration;

/// A valid source URL whose video id is unique per `n`.
pub fn sample_url(n: u32) -> String {
    format!("https://example.com/watch?v={}", sample_video_id(n))
}

/// An 11-character video id unique per `n`.
pub fn sample_video_id(n: u32) -> String {
    format!("vid{:08}", n)
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::extract_video_id;

    #[test]
    fn test_sample_urls_are_valid_and_distinct() {
        assert_eq!(
            extract_video_id(&sample_url(1)),
            Some(sample_video_id(1))
        );
        assert_ne!(sample_url(1), sample_url(2));
    }
}
