//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code MUST NOT use blocking I/O.
//! **Required**: `reqwest` async client, `tokio::io::stdin`, `tokio::fs`.
//!
//! Synchronous functions (configuration loading before the first exchange,
//! for example) may still read files.

use architectural_enforcement::{assert_clean, code_part, is_in_async_function, scan};

#[test]
fn test_no_blocking_http_client() {
    let violations = scan(|lines, idx| {
        code_part(lines[idx])
            .contains("reqwest::blocking")
            .then_some("Blocking HTTP client")
    });

    assert_clean(
        &violations,
        "CRITICAL: Blocking HTTP client found in production code!",
        &["❌ FORBIDDEN: reqwest::blocking::*", "✅ REQUIRED: reqwest::Client"],
    );
}

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = scan(|lines, idx| {
        let code = code_part(lines[idx]);
        if !is_in_async_function(lines, idx) {
            return None;
        }
        if code.contains("std::io::stdin()") || code.contains("io::stdin().read_line") {
            return Some("Blocking stdin in async");
        }
        if code.contains("std::fs::") {
            return Some("Blocking file I/O in async");
        }
        None
    });

    assert_clean(
        &violations,
        "CRITICAL: Blocking I/O found in async functions!",
        &[
            "❌ FORBIDDEN in async fn: std::io::stdin(), std::fs::*",
            "✅ REQUIRED: tokio::io::stdin() with AsyncBufReadExt, tokio::fs::*",
        ],
    );
}
