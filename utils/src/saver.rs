//! Optional streaming of measurement rows to a file. Used by the estimators
//! to dump, for every completed lambda, the estimated vs measured round-trip
//! and processing times for offline analysis.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;

/// Appends one timestamped CSV row per call to a file, flushing after each
/// row. A saver created with [`MeasurementSaver::disabled`] swallows rows.
///
/// The output file is truncated on creation.
pub struct MeasurementSaver {
    out: Option<Mutex<BufWriter<File>>>,
}

impl MeasurementSaver {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("cannot open measurement file {}", path.display()))?;
        tracing::info!(path = %path.display(), "saving measurements");
        Ok(Self {
            out: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn disabled() -> Self {
        Self { out: None }
    }

    /// Create a saver from an optional path, disabled when absent or empty.
    pub fn from_option(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) if !p.is_empty() => Self::new(p),
            _ => Ok(Self::disabled()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.out.is_some()
    }

    /// Write one row: timestamp, label, then the values.
    pub fn save(&self, label: &str, values: &[f64]) {
        let Some(out) = &self.out else {
            return;
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let mut row = format!("{timestamp:.6},{label}");
        for value in values {
            row.push_str(&format!(",{value}"));
        }
        row.push('\n');

        let mut guard = out.lock();
        if let Err(err) = guard.write_all(row.as_bytes()).and_then(|()| guard.flush()) {
            tracing::error!(%err, "cannot write measurement row");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_disabled_swallows_rows() {
        let saver = MeasurementSaver::disabled();
        assert!(!saver.enabled());
        saver.save("lambda dest", &[1.0, 2.0]);
    }

    #[test]
    fn test_rows_are_written_and_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let saver = MeasurementSaver::new(&path).unwrap();
        assert!(saver.enabled());

        saver.save("f0 dest-0", &[100.0, 0.5]);
        saver.save("f1 dest-1", &[200.0, 1.5]);

        // per-line flush means the rows are visible without dropping the saver
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(2, lines.len());
        assert!(lines[0].contains(",f0 dest-0,100,0.5"));
        assert!(lines[1].contains(",f1 dest-1,200,1.5"));
    }

    #[test]
    fn test_from_option() {
        assert!(!MeasurementSaver::from_option(None).unwrap().enabled());
        assert!(!MeasurementSaver::from_option(Some("")).unwrap().enabled());
    }
}
