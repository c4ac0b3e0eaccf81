use lox_bytecode::{interpret, InterpretResult};

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_add_type_mismatch() {
    let (result, output) = run("print 1 + true;");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(output, "");
}

#[test]
fn test_numeric_op_type_mismatch() {
    for source in ["print 1 - nil;", "print 2 * \"x\";", "print true < false;"] {
        let (result, _) = run(source);
        assert_eq!(result, InterpretResult::RuntimeError, "{}", source);
    }
}

#[test]
fn test_undefined_global_read() {
    let (result, output) = run("print x;");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(output, "");
}

#[test]
fn test_undefined_global_assignment() {
    // assignment never creates a global
    let (result, _) = run("x = 1;");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn test_runtime_error_stops_the_run() {
    let (result, output) = run("print 1; print 1 + nil; print 2;");
    assert_eq!(result, InterpretResult::RuntimeError);
    // everything before the failing statement already ran
    assert_eq!(output, "1\n");
}

#[test]
fn test_compile_error_produces_no_output() {
    let (result, output) = run("var ; var a = 1; print a;");
    assert_eq!(result, InterpretResult::CompileError);
    // the sticky error latch keeps the chunk from running
    assert_eq!(output, "");
}

#[test]
fn test_synchronization_recovers_per_statement() {
    // both bad statements are reported, the run still fails to compile
    let (result, output) = run("var ; print 1 +; print 2;");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(output, "");
}

#[test]
fn test_invalid_assignment_target() {
    let (result, _) = run("var a; var b; a + b = 3;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_return_at_top_level() {
    let (result, _) = run("return 1;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_missing_expression() {
    let (result, _) = run("print ;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_unterminated_string() {
    let (result, _) = run("print \"oops;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_unexpected_character() {
    let (result, _) = run("print 1 @ 2;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_unclosed_block() {
    let (result, _) = run("{ print 1;");
    assert_eq!(result, InterpretResult::CompileError);
}
