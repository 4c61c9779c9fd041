use std::io::{self, Read};

use tracing::info;

/// Receives the cumulative number of bytes transferred
pub type ProgressFn = Box<dyn FnMut(u64) + Send>;

/// Counts the bytes going through a reader.
///
/// The callback is called after every non-empty chunk, and once more by
/// [`ProgressReader::complete`] with the final total.
pub struct ProgressReader<R> {
    inner: R,
    total: u64,
    on_progress: Option<ProgressFn>,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, on_progress: Option<ProgressFn>) -> Self {
        Self {
            inner,
            total: 0,
            on_progress,
        }
    }

    /// Report the final total and return it
    pub fn complete(mut self) -> u64 {
        if let Some(on_progress) = self.on_progress.as_mut() {
            on_progress(self.total);
        }
        self.total
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.total += n as u64;
            if let Some(on_progress) = self.on_progress.as_mut() {
                on_progress(self.total);
            }
        }
        Ok(n)
    }
}

/// Logs a transfer every 10 %, or every 8 MiB when its size is unknown, and
/// once more with the final total when it completes
pub struct ProgressLog {
    label: String,
    expected: Option<u64>,
    next_step: u64,
    last: Option<u64>,
}

const UNKNOWN_SIZE_STEP: u64 = 8 << 20;

/// What a progress notification means for the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// A logging step was crossed
    Step,
    /// The final total was reported
    Completed,
}

impl ProgressLog {
    pub fn new(label: impl Into<String>, expected: Option<u64>) -> Self {
        let mut log = Self {
            label: label.into(),
            expected: expected.filter(|&e| e > 0),
            next_step: 0,
            last: None,
        };
        log.next_step = log.step();
        log
    }

    fn step(&self) -> u64 {
        self.expected
            .map_or(UNKNOWN_SIZE_STEP, |expected| expected.div_ceil(10).max(1))
    }

    /// Classify a cumulative count. Chunks always grow the count, so seeing
    /// the previous count again (or zero first) is the completion report.
    fn observe(&mut self, transferred: u64) -> Option<Mark> {
        let completed = transferred == self.last.unwrap_or(0);
        self.last = Some(transferred);
        if completed {
            return Some(Mark::Completed);
        }

        if transferred < self.next_step {
            return None;
        }
        let step = self.step();
        while self.next_step <= transferred {
            self.next_step += step;
        }
        Some(Mark::Step)
    }

    pub fn into_callback(mut self) -> ProgressFn {
        Box::new(move |transferred| match self.observe(transferred) {
            None => {}
            Some(Mark::Completed) => {
                info!("{}: done, {}", self.label, human_bytes(transferred))
            }
            Some(Mark::Step) => match self.expected {
                Some(expected) => info!(
                    "{}: {}% ({} / {})",
                    self.label,
                    (transferred * 100 / expected).min(100),
                    human_bytes(transferred),
                    human_bytes(expected)
                ),
                None => info!("{}: {}", self.label, human_bytes(transferred)),
            },
        })
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn reports_every_chunk_and_completion() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let on_progress: ProgressFn = Box::new(move |n| seen.lock().unwrap().push(n));

        let data = vec![7u8; 10_000];
        let mut reader = ProgressReader::new(&data[..], Some(on_progress));
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.complete(), 10_000);

        let calls = calls.lock().unwrap();
        assert!(calls.len() >= 2);
        assert!(calls.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(calls.last(), Some(&10_000));
    }

    #[test]
    fn log_steps_follow_the_expected_size() {
        let mut log = ProgressLog::new("x", Some(1000));
        assert_eq!(log.observe(50), None);
        assert_eq!(log.observe(100), Some(Mark::Step));
        assert_eq!(log.observe(150), None);
        assert_eq!(log.observe(420), Some(Mark::Step));
        assert_eq!(log.observe(480), None);
        assert_eq!(log.observe(500), Some(Mark::Step));

        let mut log = ProgressLog::new("x", None);
        assert_eq!(log.observe(1 << 20), None);
        assert_eq!(log.observe(9 << 20), Some(Mark::Step));
        assert_eq!(log.observe(15 << 20), None);
    }

    #[test]
    fn log_reports_the_final_total() {
        // Unknown size, smaller than one step
        let mut log = ProgressLog::new("x", None);
        assert_eq!(log.observe(4096), None);
        assert_eq!(log.observe(4096), Some(Mark::Completed));

        // Actual size below the announced one
        let mut log = ProgressLog::new("x", Some(1000));
        assert_eq!(log.observe(150), Some(Mark::Step));
        assert_eq!(log.observe(170), None);
        assert_eq!(log.observe(170), Some(Mark::Completed));

        // Empty transfer
        let mut log = ProgressLog::new("x", Some(1000));
        assert_eq!(log.observe(0), Some(Mark::Completed));
    }

    #[test]
    fn reader_completion_repeats_the_total() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let on_progress: ProgressFn = Box::new(move |n| seen.lock().unwrap().push(n));

        let mut reader = ProgressReader::new(&b"abc"[..], Some(on_progress));
        io::copy(&mut reader, &mut io::sink()).unwrap();
        reader.complete();

        let mut log = ProgressLog::new("x", None);
        let marks: Vec<_> = calls.lock().unwrap().iter().map(|&n| log.observe(n)).collect();
        assert_eq!(marks.last(), Some(&Some(Mark::Completed)));
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 << 30), "3.0 GiB");
    }
}
