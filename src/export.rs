use crate::metrics::MetricsExport;
use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write `export` as pretty JSON to `dir/metrics_<unix_ms>.json`, creating
/// the directory if needed. Returns the file written.
pub fn write_export(dir: &Path, export: &MetricsExport, unix_ms: u64) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("metrics_{}.json", unix_ms));
    let body = serde_json::to_string_pretty(export)?;
    fs::write(&path, body)?;
    info!("Metrics exported → {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{RuntimeSnapshot, SessionAccumulator};
    use chrono::Utc;

    #[test]
    fn test_writes_named_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let acc = SessionAccumulator::new(0).with_dropped_frame(2048);
        let export = MetricsExport::build(RuntimeSnapshot::default(), &acc, 1_000, Utc::now(), 150, 1_000_000);

        let path = write_export(&dir.path().join("nested"), &export, 1_700_000_000_123).unwrap();
        assert_eq!(path.file_name().unwrap(), "metrics_1700000000123.json");

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'), "pretty printed");
        let parsed: MetricsExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.session_summary.dropped_frames, 1);
        assert_eq!(parsed.session_summary.max_buffered_kb, 2.0);
    }
}
