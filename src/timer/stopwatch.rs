use tokio::time::{Duration, Instant};

/// Wall-clock stopwatch that survives pauses.
///
/// Time from earlier running windows is folded into `baseline`; the current
/// window is measured from `anchor`. Elapsed time is always recomputed from
/// the clock, never accumulated from ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    baseline: Duration,
    anchor: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    /// Starts from zero, discarding any previous reading.
    pub fn restart(&mut self) {
        self.baseline = Duration::ZERO;
        self.anchor = Some(Instant::now());
    }

    /// Continues from the frozen reading. No-op while running.
    pub fn resume(&mut self) {
        if self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
    }

    /// Freezes the reading and returns it.
    pub fn pause(&mut self) -> Duration {
        if let Some(anchor) = self.anchor.take() {
            self.baseline = self.baseline.saturating_add(anchor.elapsed());
        }
        self.baseline
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn elapsed(&self) -> Duration {
        match self.anchor {
            Some(anchor) => self.baseline.saturating_add(anchor.elapsed()),
            None => self.baseline,
        }
    }

    pub fn elapsed_secs_f64(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Whole seconds, rounded down.
    pub fn elapsed_whole_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn measures_wall_clock_time() {
        let mut watch = Stopwatch::new();
        watch.restart();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert!(watch.is_running());
        assert_eq!(watch.elapsed_secs_f64(), 2.5);
        assert_eq!(watch.elapsed_whole_secs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_and_resume_continues() {
        let mut watch = Stopwatch::new();
        watch.restart();
        tokio::time::sleep(Duration::from_millis(10_700)).await;

        let frozen = watch.pause();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(watch.elapsed(), frozen);

        watch.resume();
        assert_eq!(watch.elapsed_whole_secs(), 10);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(watch.elapsed_whole_secs(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_and_reset_clear_the_reading() {
        let mut watch = Stopwatch::new();
        watch.restart();
        tokio::time::sleep(Duration::from_secs(5)).await;
        watch.restart();
        assert_eq!(watch.elapsed(), Duration::ZERO);

        watch.reset();
        assert!(!watch.is_running());
        assert_eq!(watch.elapsed(), Duration::ZERO);
    }
}
