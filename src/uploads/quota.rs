use crate::config::UploadConfig;
use crate::error::AppError;

/// Snapshot of a user's upload history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadUsage {
    pub total_uploads: i64,
    pub uploads_last_day: i64,
    pub bytes_last_day: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    pub max_total_uploads: i64,
    pub max_uploads_per_day: i64,
    pub max_total_size_per_day: i64,
}

impl From<&UploadConfig> for QuotaPolicy {
    fn from(cfg: &UploadConfig) -> Self {
        Self {
            max_total_uploads: cfg.max_total_uploads,
            max_uploads_per_day: cfg.max_uploads_per_day,
            max_total_size_per_day: cfg.max_total_size_per_day,
        }
    }
}

fn megabytes(bytes: i64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb.fract() == 0.0 {
        format!("{}", mb as i64)
    } else {
        format!("{:.1}", mb)
    }
}

impl QuotaPolicy {
    /// Lifetime count first, then daily count, then daily bytes.
    pub fn check(&self, usage: &UploadUsage) -> Result<(), AppError> {
        if usage.total_uploads >= self.max_total_uploads {
            return Err(AppError::QuotaExceeded(format!(
                "Total upload limit of {} files reached",
                self.max_total_uploads
            )));
        }
        if usage.uploads_last_day >= self.max_uploads_per_day {
            return Err(AppError::QuotaExceeded(format!(
                "Daily upload limit of {} files reached",
                self.max_uploads_per_day
            )));
        }
        if usage.bytes_last_day >= self.max_total_size_per_day {
            return Err(AppError::QuotaExceeded(format!(
                "Daily storage limit of {}MB reached",
                megabytes(self.max_total_size_per_day)
            )));
        }
        Ok(())
    }
}
