//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a thread to wait.
//! Waiting happens on I/O, on cancellation tokens, or on tokio timers
//! (`tokio::time::sleep_until` for deadlines).

use architectural_enforcement::{assert_clean, code_part, scan};

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan(|lines, idx| {
        let code = code_part(lines[idx]);
        (code.contains("std::thread::sleep") || code.contains("thread::sleep("))
            .then_some("Thread sleep")
    });

    assert_clean(
        &violations,
        "CRITICAL: Thread sleeps found in production code!",
        &[
            "❌ FORBIDDEN: std::thread::sleep",
            "✅ REQUIRED: tokio::time::sleep / sleep_until, or wait on the I/O itself",
        ],
    );
}
