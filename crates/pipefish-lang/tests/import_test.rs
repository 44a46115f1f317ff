//! Imports and namespaces.

mod helpers;

use helpers::test_values;

#[test]
fn test_namespaced_function_call() {
    test_values(
        "import_test.pf",
        &[
            ("zort.square 5", "25"),
            ("zort.square(6)", "36"),
            ("callAcross 5", "26"),
        ],
    );
}

#[test]
fn test_namespaced_types_and_elements() {
    test_values(
        "import_test.pf",
        &[
            ("zort.RED", "zort.RED"),
            ("type zort.RED", "zort.Color"),
            ("zort.RED in zort.Color", "true"),
            ("zort.Color(4)", "zort.BLUE"),
            ("zort.Qux 5", "zort.Qux(5)"),
            ("zort.blerp", "\"Blerp\""),
        ],
    );
}

#[test]
fn test_unknown_namespace_is_an_error() {
    helpers::test_compiler_errors(
        "import_test.pf",
        &[("nope.square 5", "parse/namespace/exists")],
    );
}

#[test]
fn test_external_without_resolver_is_an_error() {
    let mut service = pipefish_lang::Service::new();
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("test-files")
        .join("external_test.pf");
    service
        .initialize_from_filepath(&path)
        .expect("couldn't read fixture");
    let external_error = service
        .get_errors()
        .iter()
        .find(|e| e.id == "init/external/unsupported")
        .expect("expected an external-resolution error");
    assert!(
        external_error.message.contains("zort"),
        "message was: {}",
        external_error.message
    );
    // The rest of the script still compiles past the broken declaration.
    let v = service.do_line("double 4");
    assert_eq!(service.to_literal(&v), "8");
}
