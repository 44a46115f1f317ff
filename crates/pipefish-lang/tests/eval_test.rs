//! Evaluation of builtin operations in a blank service.

mod helpers;

use helpers::test_values;

#[test]
fn test_arithmetic() {
    test_values(
        "",
        &[
            ("5 + 2", "7"),
            ("5.0 + 2.0", "7"),
            ("5 - 2", "3"),
            ("5.0 - 2.0", "3"),
            ("5 * 2", "10"),
            ("5.0 * 2.0", "10"),
            ("5.0 * 2", "10"),
            ("5 * 2.0", "10"),
            ("-5", "-5"),
            ("-5.0", "-5"),
            ("5 mod 2", "1"),
            ("12 div 5", "2"),
        ],
    );
}

#[test]
fn test_division_always_makes_floats() {
    test_values(
        "",
        &[
            ("5 / 2", "2.5"),
            ("5.0 / 2.0", "2.5"),
            ("5 / 2.0", "2.5"),
            ("5.0 / 2", "2.5"),
        ],
    );
}

#[test]
fn test_division_by_zero() {
    test_values("", &[("1 / 0", "vm/div/zero"), ("5 mod 0", "vm/mod/zero")]);
}

#[test]
fn test_string_and_rune_concatenation() {
    test_values(
        "",
        &[
            ("'h' + 'i'", "\"hi\""),
            ("'j' + \"ello\"", "\"jello\""),
            ("\"jell\" + 'o'", "\"jello\""),
            ("\"jel\" + \"lo\"", "\"jello\""),
        ],
    );
}

#[test]
fn test_comparison() {
    test_values(
        "",
        &[
            ("5 > 2", "true"),
            ("5 >= 2", "true"),
            ("5.0 < 2.0", "false"),
            ("5.0 <= 2.0", "false"),
            ("5 < 2", "false"),
            ("5 <= 5", "true"),
        ],
    );
}

#[test]
fn test_equality() {
    test_values(
        "",
        &[
            ("5 == 2", "false"),
            ("5 != 2", "true"),
            ("true != false", "true"),
            ("\"foo\" == \"foo\"", "true"),
            ("int == int", "true"),
            ("[1, 2, 3] == [1, 2, 3]", "true"),
            ("[1, 2, 4] == [1, 2, 3]", "false"),
            ("[1, 2, 3, 4] == [1, 2, 3]", "false"),
            ("set(1, 2, 3) == set(3, 2, 1)", "true"),
            ("1::2 == 1::2", "true"),
            ("1::2 == 2::2", "false"),
            ("map(1::2, 3::4) == map(3::4, 1::2)", "true"),
            ("map(1::2, 3::4) == map(1::2, 3::5)", "false"),
        ],
    );
}

#[test]
fn test_booleans_and_conditionals() {
    test_values(
        "",
        &[
            ("true : 5 ; else : 6", "5"),
            ("false : 5 ; else : 6", "6"),
            ("1 == 1 : 5 ; else : 6", "5"),
            ("1 == 2 : 5 ; else : 6", "6"),
            ("not true", "false"),
            ("not false", "true"),
            ("true and false", "false"),
            ("true and true", "true"),
            ("false or true", "true"),
            ("false or false", "false"),
        ],
    );
}

#[test]
fn test_containers_and_membership() {
    test_values(
        "",
        &[
            ("[1, 2] + [3, 4]", "[1, 2, 3, 4]"),
            ("set(1, 2) + set(3, 4) == set(1, 2, 3, 4)", "true"),
            ("[1, 2, 3] & 4", "[1, 2, 3, 4]"),
            ("4 in (set(1, 2, 3) & 4)", "true"),
            ("5 in [1, 2, 3]", "false"),
            ("5 in [1, 2, 3, 4, 5]", "true"),
            ("5 in set(1, 2, 3)", "false"),
            ("5 in tuple(1, 2, 3, 4, 5)", "true"),
            ("5 in int", "true"),
            ("5 in string", "false"),
            ("len [1, 2, 3]", "3"),
            ("len \"Angela\"", "6"),
            ("len (map(\"a\"::1, \"b\"::2, \"c\"::3))", "3"),
            ("len (set(1, 2, 3))", "3"),
        ],
    );
}

#[test]
fn test_conversions() {
    test_values(
        "",
        &[
            ("float 5", "5"),
            ("float \"5\"", "5"),
            ("int 5.2", "5"),
            ("int \"5\"", "5"),
            ("string 4", "\"4\""),
            ("string 4.0", "\"4\""),
            ("rune 65", "'A'"),
            ("codepoint 'A'", "65"),
            ("literal 3", "\"3\""),
            ("literal \"foo\"", "\"\\\"foo\\\"\""),
            ("literal 'q'", "\"'q'\""),
        ],
    );
}

#[test]
fn test_tuples() {
    test_values(
        "",
        &[
            ("tuple 1", "tuple(1)"),
            ("len (tuple(1, 2, 3))", "3"),
            ("first (tuple(1, 2, 3, 4, 5))", "1"),
            ("last (tuple(1, 2, 3, 4, 5))", "5"),
            ("[1, 2, 3] ...", "(1, 2, 3)"),
            ("len (tuple ())", "0"),
        ],
    );
}

#[test]
fn test_type_values() {
    test_values(
        "",
        &[
            ("type true", "bool"),
            ("type bool", "type"),
            ("int/string", "int/string"),
            ("5 in int?", "true"),
        ],
    );
}

#[test]
fn test_indexing_and_slicing() {
    test_values(
        "",
        &[
            ("[10, 20, 30][1]", "20"),
            ("\"foo\"[1]", "'o'"),
            ("\"Angela\"[1::3]", "\"ng\""),
            ("[1, 2, 3, 4][1::3]", "[2, 3]"),
            ("(map(\"a\"::1))[\"a\"]", "1"),
            ("[1, 2][5]", "vm/index/range"),
            ("\"foo\"::2", "\"foo\"::2"),
        ],
    );
}

#[test]
fn test_piping() {
    test_values(
        "",
        &[
            ("[1, 2, 3] >> that + 1", "[2, 3, 4]"),
            ("[1, 2, 3, 4] ?> that mod 2 == 0", "[2, 4]"),
            ("5 -> that * 2", "10"),
        ],
    );
}

#[test]
fn test_compile_time_errors() {
    helpers::test_compiler_errors(
        "",
        &[
            ("5 or true", "comp/bool/or/left"),
            ("false or 5", "comp/bool/or/right"),
            ("5 and false", "comp/bool/and/left"),
            ("true and 5", "comp/bool/and/right"),
            ("5 : 5", "comp/bool/cond"),
            ("not 5", "comp/bool/not"),
            ("42 == \"foo\"", "comp/eq/types"),
            ("(error \"foo\") == 42", "comp/error/eq/a"),
            ("42 == (error \"foo\")", "comp/error/eq/b"),
            ("nonsuch + 1", "comp/ident/known"),
        ],
    );
}

#[test]
fn test_user_errors_and_recovery() {
    test_values(
        "",
        &[
            ("error \"oh no\"", "vm/user"),
            ("valid (error \"oh no\")", "false"),
            ("valid 5", "true"),
            ("unwrap 5", "5"),
            ("try : 1 / 0 ; else : \"saved\"", "\"saved\""),
            ("try : 10 / 2 ; else : \"saved\"", "5"),
        ],
    );
}
