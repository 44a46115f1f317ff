//! For loops, try expressions and commands.

mod helpers;

use helpers::{service_from, test_values};

#[test]
fn test_fib_by_loop_matches_recursion() {
    test_values(
        "for_test.pf",
        &[("fibLoop 8", "21"), ("fibLoop 1", "1"), ("fibLoop 10", "55")],
    );
}

#[test]
fn test_collatz_recursive_and_looping() {
    test_values(
        "for_test.pf",
        &[("collatzA 42", "1"), ("collatzB 42", "1"), ("collatzB 1", "1")],
    );
}

#[test]
fn test_three_part_header_accumulates() {
    test_values("for_test.pf", &[("sumTo 10", "55"), ("sumTo 0", "0")]);
}

#[test]
fn test_range_over_list_and_string() {
    test_values(
        "for_test.pf",
        &[
            ("evens [10, 20, 30, 40, 50, 60]", "[10, 30, 50]"),
            ("evens \"Angela\"", "['A', 'g', 'l']"),
        ],
    );
}

#[test]
fn test_range_over_enum() {
    // The enum lives in one fixture and the loop in another, so declare
    // the loop inline against the enum's service.
    let mut service = service_from("type_test.pf");
    let ok = service.do_line(
        "pick = func(L) : from a = [] for k::v = range L :\n\tk mod 2 == 0 : a & v\n\telse : a",
    );
    assert_eq!(service.to_literal(&ok), "OK");
    let v = service.do_line("pick Color");
    assert_eq!(service.to_literal(&v), "[RED, YELLOW, BLUE]");
}

#[test]
fn test_try_recovers_runtime_errors() {
    test_values(
        "try_test.pf",
        &[
            ("foo 0", "\"Oops\""),
            ("foo 4", "3"),
            ("fallible 4", "3"),
        ],
    );
}

#[test]
fn test_try_binds_the_error() {
    let mut service = service_from("try_test.pf");
    let v = service.do_line("fallible 0");
    assert!(
        v.as_error().is_some(),
        "expected the bound error back, got {}",
        service.to_literal(&v)
    );
    assert_eq!(v.as_error().unwrap().error.id, "vm/div/zero");
}

#[test]
fn test_command_posts_through_handler() {
    let mut service = service_from("cmd_test.pf");
    service.set_out_handler(Box::new(pipefish_vm::CapturingHandler::new()));
    service.call_main();
    assert!(service.vm.post_happened);
    let captured = service.vm.out.captured().unwrap_or_default();
    assert_eq!(captured.trim_end(), "Hello world!");
}

#[test]
fn test_command_reads_through_in_handler() {
    let mut service = service_from("cmd_test.pf");
    service.set_in_handler(Box::new(pipefish_vm::ScriptedHandler::new(&["Pipefish"])));
    service.set_out_handler(Box::new(pipefish_vm::CapturingHandler::new()));
    let v = service.do_line("greet");
    assert!(
        v.as_error().is_none(),
        "greet failed: {}",
        service.to_literal(&v)
    );
    let captured = service.vm.out.captured().unwrap_or_default();
    assert_eq!(captured.trim_end(), "Hello Pipefish!");
}

#[test]
fn test_vars_and_consts_from_script() {
    test_values(
        "var_test.pf",
        &[
            ("x", "'q'"),
            ("y", "2"),
            ("limit", "100"),
            ("twiceLimit", "200"),
            ("x rune, y int = 'z', 42", "OK"),
            ("x", "'z'"),
            ("y", "42"),
        ],
    );
}

#[test]
fn test_consts_are_constant() {
    helpers::test_compiler_errors("var_test.pf", &[("limit = 5", "comp/assign/const")]);
}
