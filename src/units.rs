//! Human readable byte sizes

const SI_UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

/// Format a byte count with SI (power of 1000) units, e.g. `1.0 MB`, `100 kB`
pub fn human_bytes(bytes: u64) -> String {
    if bytes < 10 {
        return format!("{} B", bytes);
    }
    let exp = ((bytes as f64).ln() / 1000f64.ln()).floor() as usize;
    let exp = exp.min(SI_UNITS.len() - 1);
    let value = (bytes as f64 / 1000f64.powi(exp as i32) * 10.0 + 0.5).floor() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, SI_UNITS[exp])
    } else {
        format!("{:.0} {}", value, SI_UNITS[exp])
    }
}
