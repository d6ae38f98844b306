use serde::{Serialize, Serializer};
use std::path::PathBuf;

/// Per-file counters, reduced across worker threads into [`RunStatistics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileTally {
    pub total_files: u64,
    pub total_data_size: u64,
    pub total_chunks: u64,
    pub new_chunks: u64,
    pub new_data_size: u64,
    pub empty_files: u64,
    pub failed_files: u64,
}

impl FileTally {
    pub fn merge(self, o: FileTally) -> FileTally {
        FileTally {
            total_files: self.total_files + o.total_files,
            total_data_size: self.total_data_size + o.total_data_size,
            total_chunks: self.total_chunks + o.total_chunks,
            new_chunks: self.new_chunks + o.new_chunks,
            new_data_size: self.new_data_size + o.new_data_size,
            empty_files: self.empty_files + o.empty_files,
            failed_files: self.failed_files + o.failed_files,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RunStatistics {
    pub total_files: u64,
    pub total_data_size: u64,
    pub total_chunks: u64,
    pub new_chunks: u64,
    pub new_data_size: u64,
    pub empty_files: u64,
    pub failed_files: u64,
    pub backup_set: PathBuf,
    #[serde(serialize_with = "ratio_or_na")]
    pub dedup_ratio_percentage: Option<f64>,
}

fn ratio_or_na<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(r) => s.serialize_f64(*r),
        None => s.serialize_str("N/A"),
    }
}

/// `(1 - new/total) * 100`, undefined when nothing was processed.
pub fn dedup_ratio_percentage(new_data_size: u64, total_data_size: u64) -> Option<f64> {
    if total_data_size == 0 {
        return None;
    }
    Some((1.0 - new_data_size as f64 / total_data_size as f64) * 100.0)
}

impl RunStatistics {
    pub fn from_tally(t: FileTally, backup_set: PathBuf) -> Self {
        Self {
            total_files: t.total_files,
            total_data_size: t.total_data_size,
            total_chunks: t.total_chunks,
            new_chunks: t.new_chunks,
            new_data_size: t.new_data_size,
            empty_files: t.empty_files,
            failed_files: t.failed_files,
            backup_set,
            dedup_ratio_percentage: dedup_ratio_percentage(t.new_data_size, t.total_data_size),
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut v = vec![
            "=== Deduplication Summary ===".to_string(),
            format!("Total Files Backed Up: {}", self.total_files),
            format!("Total Size of Data: {} bytes", self.total_data_size),
            format!("New Data Blocks Written: {}", self.new_chunks),
            format!("New Data Written: {} bytes", self.new_data_size),
            format!("Total Chunks Processed: {}", self.total_chunks),
        ];
        if self.empty_files > 0 || self.failed_files > 0 {
            v.push(format!("Empty Files: {}, Failed Files: {}", self.empty_files, self.failed_files));
        }
        match self.dedup_ratio_percentage {
            Some(r) => v.push(format!("Deduplication Ratio: {:.2}%", r)),
            None => v.push("Deduplication Ratio: N/A (no data processed)".to_string()),
        }
        v
    }
}
