//! User-declared functions: recursion, overloads, and the fancier fix
//! positions.

mod helpers;

use helpers::test_values;

#[test]
fn test_textbook_fib() {
    test_values(
        "function_test.pf",
        &[("fib 8", "21"), ("fib 1", "1"), ("fib 10", "55")],
    );
}

#[test]
fn test_overloads_dispatch_on_type() {
    test_values(
        "function_test.pf",
        &[
            ("double 21", "42"),
            ("double \"ho\"", "\"hoho\""),
        ],
    );
}

#[test]
fn test_declared_return_type() {
    test_values("function_test.pf", &[("qux 8", "\"foo 10 bar\"")]);
}

#[test]
fn test_prefix_and_unfix() {
    test_values(
        "fancy_function_test.pf",
        &[
            ("foo 99", "\"foo _\""),
            ("spong()", "\"spong _\""),
            ("blerp", "\"blerp\""),
        ],
    );
}

#[test]
fn test_forefix_bling() {
    test_values(
        "fancy_function_test.pf",
        &[
            ("moo boo 8", "\"moo boo _\""),
            ("moo boo coo 8", "\"moo boo coo _\""),
            ("moo zoo", "\"moo zoo\""),
        ],
    );
}

#[test]
fn test_suffix_functions() {
    test_values("fancy_function_test.pf", &[("9 spoit", "\"_ spoit\"")]);
}

#[test]
fn test_midfix_and_endfix_bling() {
    test_values(
        "fancy_function_test.pf",
        &[
            ("xuq 9 mip", "\"xuq _ mip\""),
            ("troz 8 nerf 9", "\"troz _ nerf _\""),
            ("gah 8 hah 9 spah blah", "\"gah _ hah _ spah blah\""),
        ],
    );
}

#[test]
fn test_infix_function_with_bling() {
    test_values(
        "fancy_function_test.pf",
        &[("8 bing 9 bong", "\"_ bing _ bong\"")],
    );
}

#[test]
fn test_lambdas_and_application() {
    test_values(
        "",
        &[
            ("inc = func(x) : x + 1", "OK"),
            ("inc 5", "6"),
            ("f = func(x) : x * 3", "OK"),
            ("f 7", "21"),
        ],
    );
}

#[test]
fn test_lambda_reads_globals() {
    test_values(
        "",
        &[
            ("n = 10", "OK"),
            ("addN = func(x) : x + n", "OK"),
            ("addN 5", "15"),
        ],
    );
}

#[test]
fn test_given_block() {
    test_values(
        "",
        &[
            ("g = func(x) : y * 2 given : y = x + 1", "OK"),
            ("g 4", "10"),
        ],
    );
}
