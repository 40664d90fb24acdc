//! The semantic error catalogue: each ill-formed program aborts the whole
//! compile with a located, first-error diagnostic.

use krill::{CompileError, ErrorKind, Vm};

fn compile_err(source: &str) -> CompileError {
    Vm::new()
        .load_module("test", source)
        .expect_err("source should fail to compile")
}

fn assert_err(source: &str, kind: ErrorKind, fragment: &str) {
    let err = compile_err(source);
    assert_eq!(err.kind, kind, "{err}");
    assert!(
        err.message.contains(fragment),
        "expected '{fragment}' in: {err}"
    );
}

#[test]
fn local_redefinition_in_the_same_scope() {
    assert_err("fun f() { var a = 1; var a = 2; }", ErrorKind::Compile, "redefinition");
}

#[test]
fn shadowing_in_a_nested_scope_is_allowed() {
    Vm::new()
        .load_module("test", "fun f() { var a = 1; { var a = 2; { var a = 3; } } }")
        .expect("shadowing at deeper scopes compiles");
}

#[test]
fn module_variable_redefinition() {
    assert_err("var x = 1; var x = 2;", ErrorKind::Compile, "redefinition");
}

#[test]
fn identifier_longer_than_the_cap() {
    let long = "x".repeat(129);
    assert_err(&format!("var {long} = 1;"), ErrorKind::Compile, "no more than 128");
}

#[test]
fn too_many_locals_in_one_function() {
    let mut body = String::new();
    for i in 0..130 {
        body.push_str(&format!("var v{i} = {i}; "));
    }
    assert_err(&format!("fun f() {{ {body} }}"), ErrorKind::Compile, "local variables");
}

#[test]
fn too_many_arguments_at_a_call_site() {
    let args = (0..17).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
    assert_err(&format!("var x = 1; var y = x.m({args});"), ErrorKind::Compile, "arguments");
}

#[test]
fn assignment_to_a_non_assignable_expression() {
    assert_err("1 = 2;", ErrorKind::Compile, "not assignable");
    assert_err("var a = 1; var b = 2; a + b = 3;", ErrorKind::Compile, "not assignable");
}

#[test]
fn return_outside_a_function() {
    assert_err("return 1;", ErrorKind::Compile, "'return' outside a function");
}

#[test]
fn this_outside_a_method() {
    assert_err("var x = this;", ErrorKind::Compile, "'this'");
    assert_err("fun f() { return this; }", ErrorKind::Compile, "'this'");
}

#[test]
fn super_outside_a_method() {
    assert_err("var x = super.foo();", ErrorKind::Compile, "'super'");
}

#[test]
fn this_does_not_leak_out_of_a_method_into_a_module_function() {
    // A closure inside a method may capture the receiver...
    Vm::new()
        .load_module(
            "test",
            "class A { m() { fun inner() { return this; } return inner; } }",
        )
        .expect("closures capture the receiver");
    // ...but a plain local cannot cross the method boundary outward.
    assert_err(
        "fun outer() { var secret = 1; class_body(); }\n\
         class B { m() { return secret; } }",
        ErrorKind::Compile,
        "never defined",
    );
}

#[test]
fn constructor_restrictions() {
    assert_err("class A { new=(v) { } }", ErrorKind::Compile, "constructor cannot be a setter");
    assert_err("class A { static new() { } }", ErrorKind::Compile, "constructor cannot be static");
    assert_err("class A { new() { return 1; } }", ErrorKind::Compile, "cannot return a value");
}

#[test]
fn repeat_method_definition() {
    assert_err("class A { foo() { } foo() { } }", ErrorKind::Compile, "repeat definition");
}

#[test]
fn instance_var_declarations_are_rejected_in_class_bodies() {
    assert_err("class A { var x = 1 }", ErrorKind::Compile, "static var");
}

#[test]
fn fields_outside_a_class() {
    assert_err("var x = _field;", ErrorKind::Compile, "inside a class");
}

#[test]
fn classes_only_at_module_scope() {
    assert_err("fun f() { class A { } }", ErrorKind::Compile, "module scope");
    assert_err("{ class A { } }", ErrorKind::Compile, "module scope");
}

#[test]
fn break_and_continue_need_a_loop() {
    assert_err("break;", ErrorKind::Compile, "'break' outside a loop");
    assert_err("continue;", ErrorKind::Compile, "'continue' outside a loop");
}

#[test]
fn static_outside_a_class_body() {
    assert_err("static var x = 1;", ErrorKind::Compile, "'static'");
}

#[test]
fn parse_errors_name_the_expectation() {
    let err = compile_err("var = 1;");
    assert_eq!(err.kind, ErrorKind::Parse, "{err}");
    assert!(err.message.contains("expect variable name"), "{err}");

    let err = compile_err("fun f( { }");
    assert_eq!(err.kind, ErrorKind::Parse, "{err}");

    let err = compile_err("var x = (1 + 2;");
    assert!(err.message.contains("expect ')'"), "{err}");
}

#[test]
fn the_first_error_wins() {
    // Both lines are ill-formed; the earlier one is reported.
    let err = compile_err("var x = ;\nvar y = ;");
    assert_eq!(err.line, 1);
}

#[test]
fn errors_carry_file_and_line() {
    let err = compile_err("var a = 1;\nvar a = 2;");
    assert_eq!(err.file, "test");
    assert_eq!(err.line, 2);
    assert!(err.to_string().starts_with("test:2:"), "{err}");
}
