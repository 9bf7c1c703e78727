pub mod logging;

use chrono::Local;

/// Sortable key used to name persisted captures and analyses.
///
/// Millisecond precision keeps two captures in the same second apart.
pub fn timestamp_key() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}
