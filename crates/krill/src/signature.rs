//! Method signatures and their canonical string form.
//!
//! Every method is identified by a canonical string combining its name, its
//! shape (getter / setter / method / constructor / subscript), and its
//! arity. The canonical strings are interned in the VM's global
//! method-name table so call sites carry a compact 16-bit symbol.

/// Method names are capped at this length.
pub const MAX_METHOD_NAME_LEN: usize = 128;

/// Methods take at most this many arguments; call opcodes encode the arity.
pub const MAX_ARG_NUM: u8 = 16;

/// Longest possible canonical signature: name, parens/brackets, and one
/// `_,` per argument.
pub const MAX_SIGN_LEN: usize = MAX_METHOD_NAME_LEN + MAX_ARG_NUM as usize * 2 + 1;

/// The shape of a method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SignatureKind {
    /// `new(…)` in a class body.
    Construct,
    /// `name(…)` — including zero-argument `name()`.
    Method,
    /// Bare `name`.
    Getter,
    /// `name=(_)`.
    Setter,
    /// `name[…]` — for subscript operators the name is empty.
    Subscript,
    /// `name[…]=(_)`; `arg_num` counts the assigned value too.
    SubscriptSetter,
}

/// A method signature under construction or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub arg_num: u8,
}

impl Signature {
    #[must_use]
    pub fn new(kind: SignatureKind, name: &str, arg_num: u8) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            arg_num,
        }
    }

    /// The canonical string this signature interns under.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + self.arg_num as usize * 2 + 4);
        out.push_str(&self.name);
        match self.kind {
            SignatureKind::Getter => {}
            SignatureKind::Setter => out.push_str("=(_)"),
            SignatureKind::Method | SignatureKind::Construct => {
                out.push('(');
                push_underscores(&mut out, self.arg_num);
                out.push(')');
            }
            SignatureKind::Subscript => {
                out.push('[');
                push_underscores(&mut out, self.arg_num);
                out.push(']');
            }
            SignatureKind::SubscriptSetter => {
                // The last argument is the assigned value; the rest index.
                out.push('[');
                push_underscores(&mut out, self.arg_num.saturating_sub(1));
                out.push_str("]=(_)");
            }
        }
        out
    }
}

fn push_underscores(out: &mut String, count: u8) {
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('_');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        assert_eq!(Signature::new(SignatureKind::Method, "foo", 0).canonical(), "foo()");
        assert_eq!(Signature::new(SignatureKind::Method, "foo", 2).canonical(), "foo(_,_)");
        assert_eq!(Signature::new(SignatureKind::Getter, "x", 0).canonical(), "x");
        assert_eq!(Signature::new(SignatureKind::Setter, "x", 1).canonical(), "x=(_)");
        assert_eq!(Signature::new(SignatureKind::Construct, "new", 1).canonical(), "new(_)");
        assert_eq!(Signature::new(SignatureKind::Subscript, "", 2).canonical(), "[_,_]");
        assert_eq!(
            Signature::new(SignatureKind::SubscriptSetter, "at", 3).canonical(),
            "at[_,_]=(_)"
        );
    }
}
