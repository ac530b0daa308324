//! Abstract Syntax Tree for the textual IR.
//! Names are kept as written; resolution happens when lowering to the IR.
use polyhls_utils::Id;

/// A parsed IR file: a flat list of scopes. The parent of a scope is the
/// dotted prefix of its qualified name.
#[derive(Debug, Default)]
pub struct Program {
    pub scopes: Vec<ScopeDef>,
}

#[derive(Debug)]
pub struct ScopeDef {
    /// Qualified name, e.g. `@top.Foo.run`.
    pub name: Id,
    pub tags: Vec<Id>,
    pub bases: Vec<Id>,
    pub params: Vec<ParamDef>,
    pub ret: Option<TypeDef>,
    pub syms: Vec<SymDef>,
    pub synth: Vec<(Id, String)>,
    pub blocks: Vec<BlockDef>,
}

impl ScopeDef {
    pub fn new(name: Id) -> Self {
        ScopeDef {
            name,
            tags: vec![],
            bases: vec![],
            params: vec![],
            ret: None,
            syms: vec![],
            synth: vec![],
            blocks: vec![],
        }
    }
}

#[derive(Debug)]
pub struct ParamDef {
    pub name: Id,
    pub typ: TypeDef,
    pub default: Option<ExprDef>,
}

#[derive(Debug)]
pub struct SymDef {
    pub name: Id,
    pub typ: TypeDef,
    pub tags: Vec<Id>,
}

#[derive(Debug)]
pub struct BlockDef {
    pub label: Id,
    pub entry: bool,
    pub exit: bool,
    /// Ordered predecessor labels. Phi arguments follow this order.
    pub preds: Vec<Id>,
    pub synth: Vec<(Id, String)>,
    pub stms: Vec<StmDef>,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub kind: TypeKindDef,
    pub explicit: bool,
}

#[derive(Debug, Clone)]
pub enum TypeKindDef {
    Int(u32),
    UInt(u32),
    Bool,
    Str,
    None,
    Undef,
    Generic,
    List {
        elm: Box<TypeDef>,
        len: LengthDef,
        ro: bool,
    },
    Tuple {
        elm: Box<TypeDef>,
        len: u64,
    },
    Object(Id),
    Class(Id, Vec<TypeDef>),
    Namespace(Id),
    Function {
        scope: Id,
        sig: Option<(Vec<TypeDef>, Box<TypeDef>)>,
    },
    Port {
        class: Id,
        dtype: Box<TypeDef>,
        direction: Id,
        frozen: bool,
        init: Option<i64>,
    },
    Expr(Box<ExprDef>),
}

#[derive(Debug, Clone)]
pub enum LengthDef {
    Any,
    Num(u64),
    Expr(Box<ExprDef>),
}

#[derive(Debug, Clone)]
pub enum ExprDef {
    Unop(String, Box<ExprDef>),
    /// Both arithmetic and relational operators; the lowering tells them apart.
    Binop(String, Box<ExprDef>, Box<ExprDef>),
    Condop(Box<ExprDef>, Box<ExprDef>, Box<ExprDef>),
    Polyop(String, Vec<ExprDef>),
    Int(i64),
    Bool(bool),
    Str(String),
    None,
    Name(Id),
    Attr(Box<ExprDef>, Id),
    Subscript(Box<ExprDef>, Box<ExprDef>),
    Mstore(Box<ExprDef>, Box<ExprDef>, Box<ExprDef>),
    Array {
        items: Vec<ExprDef>,
        repeat: Option<Box<ExprDef>>,
        mutable: bool,
    },
    Call {
        func: Box<ExprDef>,
        args: Vec<ExprDef>,
        kwargs: Vec<(Id, ExprDef)>,
    },
    Syscall {
        name: Id,
        args: Vec<ExprDef>,
        kwargs: Vec<(Id, ExprDef)>,
    },
    New {
        class: Id,
        args: Vec<ExprDef>,
        kwargs: Vec<(Id, ExprDef)>,
    },
}

#[derive(Debug)]
pub struct StmDef {
    pub kind: StmKindDef,
    pub line: Option<u32>,
}

#[derive(Debug)]
pub enum StmKindDef {
    Expr(ExprDef),
    Move(ExprDef, ExprDef),
    CExpr(ExprDef, ExprDef),
    CMove(ExprDef, ExprDef, ExprDef),
    CJump(ExprDef, Id, Id),
    MCJump(Vec<(ExprDef, Id)>),
    Jump(Id, Option<String>),
    Ret(ExprDef),
    Phi {
        kind: String,
        var: ExprDef,
        args: Vec<(ExprDef, Option<ExprDef>)>,
    },
}
