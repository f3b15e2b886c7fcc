fn try_parse(code: &str) {
    let mut p = samal::Parser::new();
    eprintln!("trying: {:?}", code);
    let r = p.parse("Main", code);
    eprintln!("  -> {:?}", r.is_ok());
}

fn main() {
    try_parse("fn a(p : i32) -> [i32] {\n  [p]\n}");
    try_parse("fn a(p : i32) -> [i32] {\n  [(1,2)]\n}");
    try_parse("fn a(p : i32) -> [i32] {\n  [p, (1, 2)]\n}");
}
