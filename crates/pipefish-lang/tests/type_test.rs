//! User-declared types: enums, structs, clones and parameterized aliases.

mod helpers;

use helpers::test_values;

#[test]
fn test_enum_elements_and_conversion() {
    test_values(
        "type_test.pf",
        &[
            ("RED", "RED"),
            ("type RED", "Color"),
            ("RED in Color", "true"),
            ("Color(4)", "BLUE"),
            ("cast 0, Color", "RED"),
            ("Color(99)", "vm/enum/range"),
        ],
    );
}

#[test]
fn test_struct_construction_and_printing() {
    test_values(
        "type_test.pf",
        &[
            (
                "Person(\"John\", 22)",
                "Person with (name::\"John\", age::22)",
            ),
            ("(Person(\"John\", 22))[name]", "\"John\""),
            ("(Person(\"John\", 22))[age]", "22"),
        ],
    );
}

#[test]
fn test_struct_with_clause() {
    test_values(
        "type_test.pf",
        &[
            (
                "Person(\"John\", 22) with age::23",
                "Person with (name::\"John\", age::23)",
            ),
            (
                "birthday Person(\"John\", 22)",
                "Person with (name::\"John\", age::23)",
            ),
        ],
    );
}

#[test]
fn test_cast_list_to_struct() {
    test_values(
        "type_test.pf",
        &[(
            "cast [\"John\", 22], Person",
            "Person with (name::\"John\", age::22)",
        )],
    );
}

#[test]
fn test_clones() {
    test_values(
        "type_test.pf",
        &[
            ("Uid(8)", "Uid(8)"),
            ("Uid(8) == Uid(8)", "true"),
            ("Uid(8) == Uid(9)", "false"),
            ("cast Uid(8), int", "8"),
            ("cast 8, Uid", "Uid(8)"),
            ("5 apples + 3 apples", "apples(8)"),
        ],
    );
}

#[test]
fn test_parameterized_alias() {
    test_values(
        "type_test.pf",
        &[
            ("Strings == list{string}", "true"),
            ("type 5 == int", "true"),
        ],
    );
}

#[test]
fn test_membership_against_user_types() {
    test_values(
        "type_test.pf",
        &[
            ("5 in int", "true"),
            ("RED in Color", "true"),
            ("5 in Color", "false"),
        ],
    );
}
