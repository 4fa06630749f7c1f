//! Machine-readable progress lines.
//!
//! When `SCROLLBACK_PROGRESS_JSON` is set, long-running operations print
//! `SCROLLBACK_PROGRESS:{...}` and `SCROLLBACK_RESULT:{...}` lines to stdout so
//! a wrapping process can follow along without scraping human output.

use std::io::Write;

pub const PROGRESS_ENV: &str = "SCROLLBACK_PROGRESS_JSON";

/// Whether structured progress output was requested.
pub fn enabled() -> bool {
    std::env::var_os(PROGRESS_ENV).is_some_and(|v| !v.is_empty() && v != "0")
}

/// Emit a progress update.
///
/// `archive` is the archive label, `status` one of "fetching", "checkpoint",
/// "tailing", "cancelled" or "error".
///
/// Output format: `SCROLLBACK_PROGRESS:{"archive":"general","status":"checkpoint",...}`
pub fn emit_progress(archive: &str, status: &str, message: &str, records: Option<usize>) {
    if !enabled() {
        return;
    }
    let payload = serde_json::json!({
        "archive": archive,
        "status": status,
        "message": message,
        "records": records,
    });
    print_line("SCROLLBACK_PROGRESS", &payload);
}

/// Emit the final result of an operation.
pub fn emit_result(result_type: &str, status: &str, data: serde_json::Value) {
    if !enabled() {
        return;
    }
    let payload = serde_json::json!({
        "type": result_type,
        "status": status,
        "data": data,
    });
    print_line("SCROLLBACK_RESULT", &payload);
}

pub fn emit_error(archive: &str, message: &str) {
    emit_progress(archive, "error", message, None);
}

fn print_line(prefix: &str, payload: &serde_json::Value) {
    if let Ok(line) = serde_json::to_string(payload) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}:{}", prefix, line);
        let _ = stdout.flush();
    }
}
