use std::time::Duration;

/// Wall time spent in each stage of one task, retries and backoff included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    download: Option<Duration>,
    extraction: Option<Duration>,
    analysis: Option<Duration>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_download(&mut self, duration: Duration) {
        self.download = Some(duration);
    }

    pub fn record_extraction(&mut self, duration: Duration) {
        self.extraction = Some(duration);
    }

    pub fn record_analysis(&mut self, duration: Duration) {
        self.analysis = Some(duration);
    }

    pub fn download(&self) -> Option<Duration> {
        self.download
    }

    pub fn extraction(&self) -> Option<Duration> {
        self.extraction
    }

    pub fn analysis(&self) -> Option<Duration> {
        self.analysis
    }

    pub fn millis(duration: Option<Duration>) -> u64 {
        duration.map(|d| d.as_millis() as u64).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecorded_stages_report_zero_millis() {
        let mut timings = StageTimings::new();
        timings.record_download(Duration::from_millis(1250));
        assert_eq!(StageTimings::millis(timings.download()), 1250);
        assert_eq!(StageTimings::millis(timings.extraction()), 0);
        assert_eq!(StageTimings::millis(timings.analysis()), 0);
    }
}
