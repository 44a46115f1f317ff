//! Support for the table-driven integration suites: build a service from a
//! fixture script and run `(input, want)` pairs against it, with selectable
//! extraction — the value's literal, the first error id, or captured
//! output.

use pipefish_lang::Service;
use std::path::Path;

/// A service compiled from a fixture under `test-files/`, or a blank one
/// for an empty fixture name.
pub fn service_from(fixture: &str) -> Service {
    let mut service = Service::new();
    if !fixture.is_empty() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("test-files")
            .join(fixture);
        service
            .initialize_from_filepath(&path)
            .expect("couldn't read fixture");
        assert!(
            !service.is_broken(),
            "fixture {} failed to compile:\n{}",
            fixture,
            service.format_errors()
        );
    }
    service
}

/// Evaluate each input and compare the value's literal (or, for an error
/// value, its id).
pub fn test_values(fixture: &str, tests: &[(&str, &str)]) {
    let mut service = service_from(fixture);
    for (input, want) in tests {
        let value = service.do_line(input);
        let got = match value.as_error() {
            Some(e) => e.error.id.clone(),
            None => service.to_literal(&value),
        };
        assert_eq!(&got, want, "on input {:?}", input);
    }
}

/// Evaluate each input expecting a compile-time diagnostic; compare its id.
pub fn test_compiler_errors(fixture: &str, tests: &[(&str, &str)]) {
    let mut service = service_from(fixture);
    for (input, want) in tests {
        let value = service.do_line(input);
        assert!(
            !service.get_errors().is_empty() || value.is_error(),
            "expected an error on {:?}, got {}",
            input,
            service.to_literal(&value)
        );
        let got = service
            .get_errors()
            .first()
            .map(|e| e.id.clone())
            .or_else(|| value.as_error().map(|e| e.error.id.clone()))
            .unwrap_or_default();
        assert_eq!(&got, want, "on input {:?}", input);
    }
}
