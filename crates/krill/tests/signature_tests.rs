use krill::{MAX_SIGN_LEN, Signature, SignatureKind, Vm};
use pretty_assertions::assert_eq;

#[test]
fn canonical_strings_encode_shape_and_arity() {
    let cases = [
        (Signature::new(SignatureKind::Method, "foo", 0), "foo()"),
        (Signature::new(SignatureKind::Method, "foo", 2), "foo(_,_)"),
        (Signature::new(SignatureKind::Getter, "x", 0), "x"),
        (Signature::new(SignatureKind::Setter, "x", 1), "x=(_)"),
        (Signature::new(SignatureKind::Construct, "new", 3), "new(_,_,_)"),
        (Signature::new(SignatureKind::Subscript, "", 1), "[_]"),
        (Signature::new(SignatureKind::SubscriptSetter, "at", 3), "at[_,_]=(_)"),
        (Signature::new(SignatureKind::SubscriptSetter, "", 2), "[_]=(_)"),
    ];
    for (signature, expected) in cases {
        assert_eq!(signature.canonical(), expected);
        assert!(expected.len() <= MAX_SIGN_LEN);
    }
}

#[test]
fn call_sites_intern_one_symbol_per_signature() {
    let mut vm = Vm::new();
    vm.load_module(
        "test",
        "var a = 1;\n\
         var b = a + a;\n\
         var c = a + b;\n\
         var d = a.toString;\n\
         a.field = 2;",
    )
    .unwrap();

    // '+' was called twice but interned once.
    let plus = vm.method_names.index_of("+(_)").expect("binary + interned");
    assert_eq!(vm.method_names.iter().filter(|n| *n == "+(_)").count(), 1);

    // Symbols are dense and stable in first-use order.
    let getter = vm.method_names.index_of("toString").expect("getter interned");
    let setter = vm.method_names.index_of("field=(_)").expect("setter interned");
    assert!(plus < getter && getter < setter);
}
