use std::time::{Duration, Instant};

/// A utility for tracking frames per second.
#[derive(Debug)]
pub struct FpsCounter {
    frame_count: u32,
    last_time: Option<Instant>,
    interval: Duration,
}

impl FpsCounter {
    /// Create a new FPS counter reporting once per second.
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            last_time: None,
            interval: Duration::from_secs(1),
        }
    }

    /// Count a frame presented at `now`.
    /// Returns Some(fps) if the reporting interval has passed, otherwise None.
    pub fn update(&mut self, now: Instant) -> Option<f32> {
        let last = *self.last_time.get_or_insert(now);
        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(last);

        if elapsed >= self.interval {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.frame_count = 0;
            self.last_time = Some(now);
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_per_interval() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new();
        for i in 0..60 {
            assert_eq!(fps.update(t0 + Duration::from_millis(i * 16)), None);
        }
        let rate = fps.update(t0 + Duration::from_secs(1)).unwrap();
        assert!((rate - 61.0).abs() < 0.01);
        assert_eq!(fps.update(t0 + Duration::from_millis(1010)), None);
    }
}
