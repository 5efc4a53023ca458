//! Panic hook for crash reporting

use backtrace::Backtrace;
use chrono::Local;
use std::panic::PanicHookInfo;

/// Initialize the panic hook for crash reporting
pub fn init_panic_hook() {
    std::panic::set_hook(Box::new(panic_handler));
    tracing::debug!("Panic hook initialized");
}

fn panic_handler(info: &PanicHookInfo) {
    let backtrace = Backtrace::new();
    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");

    let report = format!(
        "=== CRITICAL PANIC ===\n\
         Timestamp: {}\n\
         Thread: {}\n\
         Location: {:?}\n\
         Payload: {}\n\n\
         Stack Trace:\n{:?}",
        Local::now().to_rfc3339(),
        thread_name,
        info.location(),
        payload_text(info.payload()),
        backtrace
    );

    // 1. stderr is always available
    eprintln!("{}", report);

    // 2. tracing, if the subscriber is still alive
    tracing::error!("{}", report);

    // 3. crash dump file
    let dump_filename = format!("qloud_crash_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
    let dump_path = std::env::temp_dir().join(&dump_filename);

    if let Err(e) = std::fs::write(&dump_path, &report) {
        eprintln!("Failed to write crash dump: {}", e);
    }
}

fn payload_text(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<unknown>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_text() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(payload_text(literal.as_ref()), "boom");

        let formatted: Box<dyn std::any::Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(payload_text(formatted.as_ref()), "code 7");

        let other: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(payload_text(other.as_ref()), "<unknown>");
    }
}
