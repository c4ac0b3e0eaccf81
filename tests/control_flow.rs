use lox_bytecode::{interpret, InterpretResult};

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_if_then_else() {
    let source = r#"
if (1 < 2) print "then"; else print "else";
if (1 > 2) print "then"; else print "else";
if (false) print "skipped";
print "after";
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "then\nelse\nafter\n");
}

#[test]
fn test_truthiness_of_conditions() {
    let source = r#"
if (0) print "zero is truthy";
if ("") print "empty string is truthy";
if (nil) print "unreachable"; else print "nil is falsy";
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "zero is truthy\nempty string is truthy\nnil is falsy\n");
}

#[test]
fn test_and_or_results() {
    let source = r#"
print 1 and 2;
print nil and 2;
print 1 or 2;
print nil or 2;
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "2\nnil\n1\n2\n");
}

#[test]
fn test_short_circuit_skips_evaluation() {
    // the right operand reads an undefined global, so reaching it would be a
    // runtime error
    let source = r#"
print false and boom;
print true or boom;
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "false\ntrue\n");
}

#[test]
fn test_while_loop() {
    let source = r#"
var sum = 0;
var i = 1;
while (i <= 4) {
  sum = sum + i;
  i = i + 1;
}
print sum;
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "10\n");
}

#[test]
fn test_while_false_never_runs() {
    let (result, output) = run("while (false) print 1; print 2;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "2\n");
}

#[test]
fn test_for_loop() {
    let source = r#"
var x = 0;
for (var i = 0; i < 3; i = i + 1) {
  x = x + i;
}
print x;
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "3\n");
}

#[test]
fn test_for_loop_variable_is_scoped() {
    let source = r#"
for (var i = 0; i < 1; i = i + 1) {}
print i;
"#;
    let (result, _) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn test_for_without_initializer() {
    let source = r#"
var i = 0;
for (; i < 2; i = i + 1) print i;
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "0\n1\n");
}

#[test]
fn test_for_without_increment() {
    let source = r#"
for (var i = 0; i < 2;) {
  print i;
  i = i + 1;
}
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "0\n1\n");
}

#[test]
fn test_for_with_all_clauses_empty() {
    // for (;;) runs until a return ends it
    let source = r#"
fun run() {
  var i = 0;
  for (;;) {
    i = i + 1;
    if (i == 3) return i;
  }
}
print run();
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "3\n");
}

#[test]
fn test_nested_loops() {
    let source = r#"
var total = 0;
for (var i = 0; i < 3; i = i + 1) {
  for (var j = 0; j < 3; j = j + 1) {
    total = total + 1;
  }
}
print total;
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "9\n");
}
