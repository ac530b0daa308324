//! The builtin `polyphony` library: port classes, timing primitives and
//! the system calls understood by the compiler.
use crate::{Context, Direction, Param, Scope, ScopeTags, SymTags, Type, TypeKind};
use lazy_static::lazy_static;
use polyhls_utils::Id;

pub const PORT_CLASS: &str = "polyphony.io.Port";
pub const QUEUE_CLASS: &str = "polyphony.io.Queue";
pub const FLIPPED: &str = "polyphony.io.flipped";
pub const CLKSLEEP: &str = "polyphony.timing.clksleep";
pub const CLKFENCE: &str = "polyphony.timing.clkfence";
pub const WAIT_RISING: &str = "polyphony.timing.wait_rising";
pub const WAIT_FALLING: &str = "polyphony.timing.wait_falling";
pub const WAIT_VALUE: &str = "polyphony.timing.wait_value";
pub const APPEND_WORKER: &str = "append_worker";
pub const NEW: &str = "$new";

lazy_static! {
    /// Every name accepted as a `SYSCALL` target.
    pub static ref SYSCALLS: Vec<Id> = [
        "print", "assert", "len", "range", "unroll", "pipelined", NEW,
        CLKSLEEP, CLKFENCE, WAIT_RISING, WAIT_FALLING, WAIT_VALUE, FLIPPED,
    ]
    .iter()
    .map(Id::new)
    .collect();
}

pub fn is_syscall(name: Id) -> bool {
    SYSCALLS.contains(&name)
}

/// Timing primitives that stall the calling scope.
pub fn is_timing(name: Id) -> bool {
    [CLKSLEEP, CLKFENCE, WAIT_RISING, WAIT_FALLING, WAIT_VALUE]
        .iter()
        .any(|n| name == *n)
}

pub fn is_port_class(class: Id) -> bool {
    class == PORT_CLASS || class == QUEUE_CLASS
}

/// What a port method does to the port, seen from the calling module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortAccess {
    Read,
    Write,
    /// Queries such as `empty()` that observe the port without taking data.
    Probe,
}

/// Access kind and implied direction of a port method.
pub fn port_method(name: &str) -> Option<(PortAccess, Direction)> {
    Some(match name {
        "rd" | "get" | "edge" => (PortAccess::Read, Direction::Input),
        "wr" | "put" => (PortAccess::Write, Direction::Output),
        "empty" => (PortAccess::Probe, Direction::Input),
        "full" => (PortAccess::Probe, Direction::Output),
        _ => return None,
    })
}

/// Parse the element type name given to a port constructor.
pub fn type_from_name(name: &str, default_width: u32) -> Option<Type> {
    Some(match name {
        "bool" => Type::bool(),
        "int" => Type::int(default_width, true),
        "uint" => Type::int(default_width, false),
        _ => {
            if let Some(w) = name.strip_prefix("uint") {
                Type::int(w.parse().ok()?, false)
            } else if let Some(w) = name.strip_prefix("int") {
                Type::int(w.parse().ok()?, true)
            } else if let Some(w) = name.strip_prefix("bit") {
                Type::int(w.parse().ok()?, false)
            } else {
                return None;
            }
        }
    })
}

const LIB: ScopeTags = ScopeTags::LIB.union(ScopeTags::BUILTIN);

fn namespace(ctx: &mut Context, name: &str, members: &[(&str, Type)]) {
    let mut scope = Scope::new(Id::new(name), ScopeTags::NAMESPACE | LIB);
    for (m, t) in members {
        scope.add_sym(Id::new(m), t.clone(), SymTags::BUILTIN);
    }
    ctx.add_scope(scope);
}

fn function(ctx: &mut Context, name: &str, tags: ScopeTags, params: &[(&str, Type)], ret: Type) {
    let mut scope = Scope::new(Id::new(name), tags | LIB);
    for (p, t) in params {
        scope.add_sym(Id::new(p), t.clone(), SymTags::PARAM);
        scope.params.push(Param {
            sym: Id::new(p),
            default: None,
        });
    }
    scope.return_type = ret;
    ctx.add_scope(scope);
}

fn fn_type(name: &str) -> Type {
    Type::function(Id::new(name))
}

fn port_class(ctx: &mut Context, class: &str, methods: &[(&str, usize, Type)]) {
    let cid = Id::new(class);
    let mut scope = Scope::new(cid, ScopeTags::CLASS | ScopeTags::PORT | LIB);
    let ctor = cid.child("__init__");
    scope.add_sym(Id::new("__init__"), Type::function(ctor), SymTags::BUILTIN);
    for (m, _, _) in methods {
        scope.add_sym(Id::new(m), Type::function(cid.child(m)), SymTags::BUILTIN);
    }
    ctx.add_scope(scope);
    let method = ScopeTags::METHOD | ScopeTags::CALLABLE;
    function(
        ctx,
        ctor.as_ref(),
        method | ScopeTags::CTOR,
        &[("dtype", Type::str()), ("direction", Type::str()), ("init", Type::generic())],
        Type::none(),
    );
    for (m, nargs, ret) in methods {
        let params: Vec<(&str, Type)> = ["v0", "v1"][..*nargs]
            .iter()
            .map(|p| (*p, Type::generic()))
            .collect();
        function(ctx, cid.child(m).as_ref(), method, &params, ret.clone());
    }
}

/// Create the builtin library scopes in a fresh context.
pub fn install(ctx: &mut Context) {
    namespace(
        ctx,
        "polyphony",
        &[
            ("io", Type::namespace(Id::new("polyphony.io"))),
            ("timing", Type::namespace(Id::new("polyphony.timing"))),
        ],
    );
    namespace(
        ctx,
        "polyphony.io",
        &[
            ("Port", Type::class(Id::new(PORT_CLASS))),
            ("Queue", Type::class(Id::new(QUEUE_CLASS))),
            ("flipped", fn_type(FLIPPED)),
        ],
    );
    port_class(
        ctx,
        PORT_CLASS,
        &[
            ("rd", 0, Type::generic()),
            ("wr", 1, Type::none()),
            ("edge", 2, Type::bool()),
        ],
    );
    port_class(
        ctx,
        QUEUE_CLASS,
        &[
            ("get", 0, Type::generic()),
            ("put", 1, Type::none()),
            ("empty", 0, Type::bool()),
            ("full", 0, Type::bool()),
        ],
    );
    function(
        ctx,
        FLIPPED,
        ScopeTags::FUNCTION,
        &[("cls", Type::generic())],
        Type::generic(),
    );
    let timing = [CLKSLEEP, CLKFENCE, WAIT_RISING, WAIT_FALLING, WAIT_VALUE];
    namespace(
        ctx,
        "polyphony.timing",
        &timing.map(|t| (Id::new(t).base(), fn_type(t))),
    );
    let int = Type::int(ctx.config.default_int_width, true);
    function(ctx, CLKSLEEP, ScopeTags::FUNCTION, &[("n", int)], Type::none());
    function(ctx, CLKFENCE, ScopeTags::FUNCTION, &[], Type::none());
    for w in [WAIT_RISING, WAIT_FALLING] {
        function(ctx, w, ScopeTags::FUNCTION, &[("port", Type::generic())], Type::none());
    }
    function(
        ctx,
        WAIT_VALUE,
        ScopeTags::FUNCTION,
        &[("value", Type::generic()), ("port", Type::generic())],
        Type::none(),
    );
}

/// Build a port type from constructor arguments.
pub fn port_type(class: Id, dtype: Type, direction: Direction, init: Option<i64>) -> Type {
    TypeKind::Port {
        scope: class,
        dtype: Box::new(dtype),
        direction,
        init,
        assigned: direction != Direction::Any,
        root: None,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn library_is_installed() {
        let ctx = Context::new(Config::default());
        assert!(ctx.has_scope(Id::new("polyphony.io.Port.wr")));
        assert!(ctx.has_scope(Id::new("polyphony.timing.clksleep")));
        let port = ctx.scope(Id::new(PORT_CLASS)).unwrap();
        assert!(port.borrow().is_lib());
        assert!(port.borrow().has_sym(Id::new("rd")));
        assert!(ctx.user_scopes().is_empty());
    }

    #[test]
    fn names() {
        assert!(is_syscall(Id::new("len")));
        assert!(is_timing(Id::new(CLKSLEEP)));
        assert_eq!(type_from_name("uint8", 32), Some(Type::int(8, false)));
        assert_eq!(type_from_name("int", 16), Some(Type::int(16, true)));
        assert_eq!(port_method("wr"), Some((PortAccess::Write, Direction::Output)));
    }
}
