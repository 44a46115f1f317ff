//! Logging and tracking instrumentation.

mod helpers;

use helpers::service_from;
use pipefish_lang::Service;
use std::path::Path;

fn tracked_service(fixture: &str) -> Service {
    let mut service = Service::new();
    service.tracking = true;
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("test-files")
        .join(fixture);
    service.initialize_from_filepath(&path).expect("fixture read");
    assert!(
        !service.is_broken(),
        "fixture failed to compile:\n{}",
        service.format_errors()
    );
    service
}

#[test]
fn test_logs_interpolate_embedded_expressions() {
    let mut service = service_from("log_test.pf");
    let v = service.do_line("qux 8");
    assert_eq!(service.to_literal(&v), "\"foo 10 bar\"");
    let log = service.tracking_log();
    assert!(log.contains("We're here."), "log was: {}", log);
    assert!(
        log.contains("We test to see if i (8) is even."),
        "log was: {}",
        log
    );
}

#[test]
fn test_logs_record_line_numbers() {
    let mut service = service_from("log_test.pf");
    service.do_line("qux 8");
    let log = service.tracking_log();
    assert!(log.contains("Log at line"), "log was: {}", log);
}

#[test]
fn test_else_branch_logs_nothing_extra() {
    let mut service = service_from("log_test.pf");
    let v = service.do_line("qux 13");
    assert_eq!(service.to_literal(&v), "\"odd\"");
    let log = service.tracking_log();
    assert!(!log.contains("(13) is even") || log.contains("We're here."));
}

#[test]
fn test_tracking_records_calls_and_returns() {
    let mut service = tracked_service("function_test.pf");
    let v = service.do_line("double 21");
    assert_eq!(service.to_literal(&v), "42");
    let log = service.tracking_log();
    assert!(
        log.contains("called function `double`"),
        "log was: {}",
        log
    );
    assert!(log.contains("returned 42"), "log was: {}", log);
}

#[test]
fn test_tracking_records_conditions() {
    let mut service = tracked_service("function_test.pf");
    service.do_line("fib 1");
    let log = service.tracking_log();
    assert!(
        log.contains("evaluated the condition"),
        "log was: {}",
        log
    );
}

#[test]
fn test_empty_tracking_log() {
    let service = Service::new();
    assert!(service.tracking_log().contains("No tracking data exists"));
}
