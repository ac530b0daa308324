#![allow(clippy::upper_case_acronyms)]

//! Parser for the textual IR.
use crate::ast::{
    self, BlockDef, ExprDef, LengthDef, ParamDef, ScopeDef, StmDef, StmKindDef,
    SymDef, TypeDef, TypeKindDef,
};
use polyhls_utils::{self, HlsResult, Id};
use pest_consume::{Error, Parser, match_nodes};
use std::fs;
use std::io::Read;
use std::path::Path;

type ParseResult<T> = Result<T, Error<Rule>>;
type Node<'i> = pest_consume::Node<'i, Rule, ()>;

// include the grammar file so that Cargo knows to rebuild this file on grammar changes
const _GRAMMAR: &str = include_str!("syntax.pest");

#[derive(Parser)]
#[grammar = "syntax.pest"]
pub struct IrParser;

impl IrParser {
    /// Parse an IR file into an AST representation.
    pub fn parse_file(path: &Path) -> HlsResult<ast::Program> {
        let time = std::time::Instant::now();
        let content = fs::read(path).map_err(|err| {
            polyhls_utils::Error::invalid_file(format!(
                "Failed to read {}: {err}",
                path.to_string_lossy(),
            ))
        })?;
        let content = std::str::from_utf8(&content)?;
        let out = Self::parse_str(content)
            .map_err(|e| Self::error(&path.to_string_lossy(), e))?;
        log::info!(
            "Parsed `{}` in {}ms",
            path.to_string_lossy(),
            time.elapsed().as_millis()
        );
        Ok(out)
    }

    pub fn parse<R: Read>(mut r: R) -> HlsResult<ast::Program> {
        let mut buf = String::new();
        r.read_to_string(&mut buf).map_err(|err| {
            polyhls_utils::Error::invalid_file(format!(
                "Failed to parse buffer: {err}",
            ))
        })?;
        Self::parse_str(&buf).map_err(|e| Self::error("buffer", e))
    }

    fn parse_str(content: &str) -> ParseResult<ast::Program> {
        let inputs = <IrParser as Parser>::parse(Rule::file, content)?;
        let input = inputs.single()?;
        IrParser::file(input)
    }

    fn error(what: &str, err: Error<Rule>) -> polyhls_utils::Error {
        polyhls_utils::Error::parse_error(format!(
            "Failed to parse `{what}`: {err}"
        ))
    }
}

enum Arg {
    Pos(ExprDef),
    Kw(Id, ExprDef),
}

enum Postfix {
    Attr(Id),
    Subscript(ExprDef),
    Call(Vec<ExprDef>, Vec<(Id, ExprDef)>),
}

enum BlockAttr {
    Entry,
    Exit,
    Preds(Vec<Id>),
    Synth(Vec<(Id, String)>),
}

enum ScopeItem {
    Param(ParamDef),
    Return(TypeDef),
    Sym(SymDef),
    Synth(Vec<(Id, String)>),
    Block(BlockDef),
}

type Args = (Vec<ExprDef>, Vec<(Id, ExprDef)>);

#[pest_consume::parser]
impl IrParser {
    fn EOI(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    // ================ Literals =====================
    fn identifier(input: Node) -> ParseResult<Id> {
        Ok(Id::new(input.as_str()))
    }

    fn qual_name(input: Node) -> ParseResult<Id> {
        Ok(Id::new(input.as_str()))
    }

    fn num(input: Node) -> ParseResult<u64> {
        input
            .as_str()
            .parse::<u64>()
            .map_err(|_| input.error("Expected a number"))
    }

    fn int_lit(input: Node) -> ParseResult<i64> {
        input
            .as_str()
            .parse::<i64>()
            .map_err(|_| input.error("Expected an integer"))
    }

    fn bool_lit(input: Node) -> ParseResult<bool> {
        Ok(input.as_str() == "True")
    }

    fn none_lit(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn char(input: Node) -> ParseResult<&str> {
        Ok(input.as_str())
    }

    fn string_lit(input: Node) -> ParseResult<String> {
        Ok(match_nodes!(
            input.into_children();
            [char(c)..] => c.collect::<Vec<_>>().join("")
        ))
    }

    // ================ Types =====================
    fn explicit(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn width(input: Node) -> ParseResult<u32> {
        input
            .as_str()
            .parse::<u32>()
            .map_err(|_| input.error("Expected valid bitwidth"))
    }

    fn int_t(input: Node) -> ParseResult<u32> {
        Ok(match_nodes!(
            input.into_children();
            [width(w)] => w,
        ))
    }

    fn uint_t(input: Node) -> ParseResult<u32> {
        Ok(match_nodes!(
            input.into_children();
            [width(w)] => w,
        ))
    }

    fn bool_t(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn str_t(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn none_t(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn undef_t(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn generic_t(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn len_any(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn length(input: Node) -> ParseResult<LengthDef> {
        Ok(match_nodes!(
            input.into_children();
            [num(n)] => LengthDef::Num(n),
            [len_any(_)] => LengthDef::Any,
            [expr(e)] => LengthDef::Expr(Box::new(e)),
        ))
    }

    fn list_t(input: Node) -> ParseResult<(TypeDef, LengthDef)> {
        Ok(match_nodes!(
            input.into_children();
            [typ(t), length(l)] => (t, l),
        ))
    }

    fn rom_t(input: Node) -> ParseResult<(TypeDef, LengthDef)> {
        Ok(match_nodes!(
            input.into_children();
            [typ(t), length(l)] => (t, l),
        ))
    }

    fn tuple_t(input: Node) -> ParseResult<(TypeDef, u64)> {
        Ok(match_nodes!(
            input.into_children();
            [typ(t), num(n)] => (t, n),
        ))
    }

    fn object_t(input: Node) -> ParseResult<Id> {
        Ok(match_nodes!(
            input.into_children();
            [qual_name(n)] => n,
        ))
    }

    fn class_t(input: Node) -> ParseResult<(Id, Vec<TypeDef>)> {
        Ok(match_nodes!(
            input.into_children();
            [qual_name(n), typ(args)..] => (n, args.collect()),
        ))
    }

    fn namespace_t(input: Node) -> ParseResult<Id> {
        Ok(match_nodes!(
            input.into_children();
            [qual_name(n)] => n,
        ))
    }

    fn fn_sig(input: Node) -> ParseResult<(Vec<TypeDef>, Box<TypeDef>)> {
        let mut types: Vec<TypeDef> = match_nodes!(
            input.clone().into_children();
            [typ(ts)..] => ts.collect(),
        );
        let Some(ret) = types.pop() else {
            return Err(input.error("Function signature without return type"));
        };
        Ok((types, Box::new(ret)))
    }

    fn function_t(input: Node) -> ParseResult<TypeKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [qual_name(scope)] => TypeKindDef::Function { scope, sig: None },
            [qual_name(scope), fn_sig(sig)] => TypeKindDef::Function { scope, sig: Some(sig) },
        ))
    }

    fn direction(input: Node) -> ParseResult<Id> {
        Ok(Id::new(input.as_str()))
    }

    fn frozen(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn port_init(input: Node) -> ParseResult<i64> {
        Ok(match_nodes!(
            input.into_children();
            [int_lit(v)] => v,
        ))
    }

    fn port_t(input: Node) -> ParseResult<TypeKindDef> {
        let port = |class, dtype, direction, frozen, init| TypeKindDef::Port {
            class,
            dtype: Box::new(dtype),
            direction,
            frozen,
            init,
        };
        Ok(match_nodes!(
            input.into_children();
            [qual_name(c), typ(t), direction(d)] => port(c, t, d, false, None),
            [qual_name(c), typ(t), direction(d), frozen(_)] => port(c, t, d, true, None),
            [qual_name(c), typ(t), direction(d), port_init(i)] => port(c, t, d, false, Some(i)),
            [qual_name(c), typ(t), direction(d), frozen(_), port_init(i)] => port(c, t, d, true, Some(i)),
        ))
    }

    fn expr_t(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => e,
        ))
    }

    fn base_type(input: Node) -> ParseResult<TypeKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [list_t(l)] => TypeKindDef::List { elm: Box::new(l.0), len: l.1, ro: false },
            [rom_t(l)] => TypeKindDef::List { elm: Box::new(l.0), len: l.1, ro: true },
            [tuple_t(t)] => TypeKindDef::Tuple { elm: Box::new(t.0), len: t.1 },
            [object_t(n)] => TypeKindDef::Object(n),
            [class_t(c)] => TypeKindDef::Class(c.0, c.1),
            [namespace_t(n)] => TypeKindDef::Namespace(n),
            [function_t(f)] => f,
            [port_t(p)] => p,
            [expr_t(e)] => TypeKindDef::Expr(Box::new(e)),
            [uint_t(w)] => TypeKindDef::UInt(w),
            [int_t(w)] => TypeKindDef::Int(w),
            [bool_t(_)] => TypeKindDef::Bool,
            [str_t(_)] => TypeKindDef::Str,
            [none_t(_)] => TypeKindDef::None,
            [undef_t(_)] => TypeKindDef::Undef,
            [generic_t(_)] => TypeKindDef::Generic,
        ))
    }

    fn typ(input: Node) -> ParseResult<TypeDef> {
        Ok(match_nodes!(
            input.into_children();
            [base_type(kind)] => TypeDef { kind, explicit: false },
            [base_type(kind), explicit(_)] => TypeDef { kind, explicit: true },
        ))
    }

    // ================ Expressions =====================
    fn bin_op(input: Node) -> ParseResult<String> {
        Ok(input.as_str().to_string())
    }

    fn un_op(input: Node) -> ParseResult<String> {
        Ok(input.as_str().to_string())
    }

    fn cond_tail(input: Node) -> ParseResult<(ExprDef, ExprDef)> {
        Ok(match_nodes!(
            input.into_children();
            [expr(l), expr(r)] => (l, r),
        ))
    }

    fn bin_tail(input: Node) -> ParseResult<(String, ExprDef)> {
        Ok(match_nodes!(
            input.into_children();
            [bin_op(op), expr(r)] => (op, r),
        ))
    }

    fn paren_inner(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [expr(c), cond_tail(t)] =>
                ExprDef::Condop(Box::new(c), Box::new(t.0), Box::new(t.1)),
            [expr(l), bin_tail(t)] =>
                ExprDef::Binop(t.0, Box::new(l), Box::new(t.1)),
        ))
    }

    fn unop_body(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [un_op(op), expr(e)] => ExprDef::Unop(op, Box::new(e)),
        ))
    }

    fn paren_expr(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [unop_body(e)] => e,
            [paren_inner(e)] => e,
        ))
    }

    fn kw_poly(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_syscall(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_new(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_mstore(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_list(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_tuple(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn kwarg(input: Node) -> ParseResult<(Id, ExprDef)> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(k), expr(e)] => (k, e),
        ))
    }

    fn arg(input: Node) -> ParseResult<Arg> {
        Ok(match_nodes!(
            input.into_children();
            [kwarg(kw)] => Arg::Kw(kw.0, kw.1),
            [expr(e)] => Arg::Pos(e),
        ))
    }

    fn args(input: Node) -> ParseResult<Args> {
        let all: Vec<Arg> = match_nodes!(
            input.clone().into_children();
            [arg(a)..] => a.collect(),
        );
        let mut args = vec![];
        let mut kwargs = vec![];
        for a in all {
            match a {
                Arg::Pos(e) if kwargs.is_empty() => args.push(e),
                Arg::Pos(_) => {
                    return Err(input
                        .error("Positional argument follows keyword argument"));
                }
                Arg::Kw(k, e) => kwargs.push((k, e)),
            }
        }
        Ok((args, kwargs))
    }

    fn polyop(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_poly(_), bin_op(op), expr(es)..] => ExprDef::Polyop(op, es.collect()),
        ))
    }

    fn syscall(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_syscall(_), qual_name(name), args(a)] =>
                ExprDef::Syscall { name, args: a.0, kwargs: a.1 },
        ))
    }

    fn new_expr(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_new(_), qual_name(class), args(a)] =>
                ExprDef::New { class, args: a.0, kwargs: a.1 },
        ))
    }

    fn mstore(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_mstore(_), expr(m), expr(o), expr(v)] =>
                ExprDef::Mstore(Box::new(m), Box::new(o), Box::new(v)),
        ))
    }

    fn array_kind(input: Node) -> ParseResult<bool> {
        Ok(match_nodes!(
            input.into_children();
            [kw_list(_)] => true,
            [kw_tuple(_)] => false,
        ))
    }

    fn items(input: Node) -> ParseResult<Vec<ExprDef>> {
        Ok(match_nodes!(
            input.into_children();
            [expr(es)..] => es.collect(),
        ))
    }

    fn repeat(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => e,
        ))
    }

    fn array(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [array_kind(mutable), items(items)] =>
                ExprDef::Array { items, repeat: None, mutable },
            [array_kind(mutable), items(items), repeat(r)] =>
                ExprDef::Array { items, repeat: Some(Box::new(r)), mutable },
        ))
    }

    fn attr_access(input: Node) -> ParseResult<Id> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(n)] => n,
        ))
    }

    fn subscript(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => e,
        ))
    }

    fn call_args(input: Node) -> ParseResult<Args> {
        Ok(match_nodes!(
            input.into_children();
            [args(a)] => a,
        ))
    }

    fn postfix(input: Node) -> ParseResult<Postfix> {
        Ok(match_nodes!(
            input.into_children();
            [attr_access(n)] => Postfix::Attr(n),
            [subscript(e)] => Postfix::Subscript(e),
            [call_args(a)] => Postfix::Call(a.0, a.1),
        ))
    }

    fn reference(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(name), postfix(ps)..] => {
                ps.fold(ExprDef::Name(name), |acc, p| match p {
                    Postfix::Attr(a) => ExprDef::Attr(Box::new(acc), a),
                    Postfix::Subscript(o) => ExprDef::Subscript(Box::new(acc), Box::new(o)),
                    Postfix::Call(args, kwargs) => ExprDef::Call { func: Box::new(acc), args, kwargs },
                })
            },
        ))
    }

    fn constant(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [bool_lit(b)] => ExprDef::Bool(b),
            [none_lit(_)] => ExprDef::None,
            [int_lit(i)] => ExprDef::Int(i),
            [string_lit(s)] => ExprDef::Str(s),
        ))
    }

    fn expr(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [paren_expr(e)] => e,
            [polyop(e)] => e,
            [syscall(e)] => e,
            [new_expr(e)] => e,
            [mstore(e)] => e,
            [array(e)] => e,
            [constant(e)] => e,
            [reference(e)] => e,
        ))
    }

    // ================ Statements =====================
    fn kw_cexpr(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_cmove(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_cjump(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_mcjump(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_jump(_input: Node) -> ParseResult<()> {
        Ok(())
    }
    fn kw_ret(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn phi_kind(input: Node) -> ParseResult<String> {
        Ok(input.as_str().to_string())
    }

    fn jump_kind(input: Node) -> ParseResult<String> {
        Ok(input.as_str().to_string())
    }

    fn cexpr_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_cexpr(_), expr(c), expr(e)] => StmKindDef::CExpr(c, e),
        ))
    }

    fn cmove_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_cmove(_), expr(c), reference(d), expr(s)] => StmKindDef::CMove(c, d, s),
        ))
    }

    fn cjump_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_cjump(_), expr(c), identifier(t), identifier(f)] => StmKindDef::CJump(c, t, f),
        ))
    }

    fn mc_arm(input: Node) -> ParseResult<(ExprDef, Id)> {
        Ok(match_nodes!(
            input.into_children();
            [expr(c), identifier(t)] => (c, t),
        ))
    }

    fn mcjump_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_mcjump(_), mc_arm(arms)..] => StmKindDef::MCJump(arms.collect()),
        ))
    }

    fn jump_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_jump(_), identifier(t)] => StmKindDef::Jump(t, None),
            [kw_jump(_), identifier(t), jump_kind(k)] => StmKindDef::Jump(t, Some(k)),
        ))
    }

    fn ret_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [kw_ret(_), expr(e)] => StmKindDef::Ret(e),
        ))
    }

    fn phi_arg(input: Node) -> ParseResult<(ExprDef, Option<ExprDef>)> {
        Ok(match_nodes!(
            input.into_children();
            [expr(a)] => (a, None),
            [expr(a), expr(p)] => (a, Some(p)),
        ))
    }

    fn phi_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [reference(var), phi_kind(kind), phi_arg(args)..] =>
                StmKindDef::Phi { kind, var, args: args.collect() },
        ))
    }

    fn move_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [reference(d), expr(s)] => StmKindDef::Move(d, s),
        ))
    }

    fn expr_stm(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => StmKindDef::Expr(e),
        ))
    }

    fn line_no(input: Node) -> ParseResult<u32> {
        input
            .as_str()
            .parse::<u32>()
            .map_err(|_| input.error("Expected a line number"))
    }

    fn stm_body(input: Node) -> ParseResult<StmKindDef> {
        Ok(match_nodes!(
            input.into_children();
            [cexpr_stm(s)] => s,
            [cmove_stm(s)] => s,
            [cjump_stm(s)] => s,
            [mcjump_stm(s)] => s,
            [jump_stm(s)] => s,
            [ret_stm(s)] => s,
            [phi_stm(s)] => s,
            [move_stm(s)] => s,
            [expr_stm(s)] => s,
        ))
    }

    fn stm(input: Node) -> ParseResult<StmDef> {
        Ok(match_nodes!(
            input.into_children();
            [line_no(l), stm_body(kind)] => StmDef { kind, line: Some(l) },
            [stm_body(kind)] => StmDef { kind, line: None },
        ))
    }

    // ================ Scopes =====================
    fn name_list(input: Node) -> ParseResult<Vec<Id>> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(ns)..] => ns.collect(),
        ))
    }

    fn tags(input: Node) -> ParseResult<Vec<Id>> {
        Ok(match_nodes!(
            input.into_children();
            [name_list(ns)] => ns,
        ))
    }

    fn synth_val(input: Node) -> ParseResult<String> {
        Ok(input.as_str().to_string())
    }

    fn synth_kv(input: Node) -> ParseResult<(Id, String)> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(k), synth_val(v)] => (k, v),
        ))
    }

    fn synth_list(input: Node) -> ParseResult<Vec<(Id, String)>> {
        Ok(match_nodes!(
            input.into_children();
            [synth_kv(kvs)..] => kvs.collect(),
        ))
    }

    fn entry_mark(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn exit_mark(_input: Node) -> ParseResult<()> {
        Ok(())
    }

    fn preds(input: Node) -> ParseResult<Vec<Id>> {
        Ok(match_nodes!(
            input.into_children();
            [name_list(ns)] => ns,
        ))
    }

    fn block_synth(input: Node) -> ParseResult<Vec<(Id, String)>> {
        Ok(match_nodes!(
            input.into_children();
            [synth_list(l)] => l,
        ))
    }

    fn block_attr(input: Node) -> ParseResult<BlockAttr> {
        Ok(match_nodes!(
            input.into_children();
            [entry_mark(_)] => BlockAttr::Entry,
            [exit_mark(_)] => BlockAttr::Exit,
            [preds(ps)] => BlockAttr::Preds(ps),
            [block_synth(s)] => BlockAttr::Synth(s),
        ))
    }

    fn block_attrs(input: Node) -> ParseResult<Vec<BlockAttr>> {
        Ok(match_nodes!(
            input.into_children();
            [block_attr(attrs)..] => attrs.collect(),
        ))
    }

    fn block_stms(input: Node) -> ParseResult<Vec<StmDef>> {
        Ok(match_nodes!(
            input.into_children();
            [stm(stms)..] => stms.collect(),
        ))
    }

    fn block_def(input: Node) -> ParseResult<BlockDef> {
        let (label, attrs, stms) = match_nodes!(
            input.into_children();
            [identifier(l), block_attrs(a), block_stms(s)] => (l, a, s),
        );
        let mut block = BlockDef {
            label,
            entry: false,
            exit: false,
            preds: vec![],
            synth: vec![],
            stms,
        };
        for attr in attrs {
            match attr {
                BlockAttr::Entry => block.entry = true,
                BlockAttr::Exit => block.exit = true,
                BlockAttr::Preds(ps) => block.preds = ps,
                BlockAttr::Synth(s) => block.synth = s,
            }
        }
        Ok(block)
    }

    fn param_default(input: Node) -> ParseResult<ExprDef> {
        Ok(match_nodes!(
            input.into_children();
            [expr(e)] => e,
        ))
    }

    fn param_def(input: Node) -> ParseResult<ParamDef> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(name), typ(typ)] => ParamDef { name, typ, default: None },
            [identifier(name), typ(typ), param_default(d)] => ParamDef { name, typ, default: Some(d) },
        ))
    }

    fn return_def(input: Node) -> ParseResult<TypeDef> {
        Ok(match_nodes!(
            input.into_children();
            [typ(t)] => t,
        ))
    }

    fn sym_def(input: Node) -> ParseResult<SymDef> {
        Ok(match_nodes!(
            input.into_children();
            [identifier(name), typ(typ)] => SymDef { name, typ, tags: vec![] },
            [identifier(name), typ(typ), tags(tags)] => SymDef { name, typ, tags },
        ))
    }

    fn synth_def(input: Node) -> ParseResult<Vec<(Id, String)>> {
        Ok(match_nodes!(
            input.into_children();
            [synth_list(l)] => l,
        ))
    }

    fn scope_item(input: Node) -> ParseResult<ScopeItem> {
        Ok(match_nodes!(
            input.into_children();
            [param_def(p)] => ScopeItem::Param(p),
            [return_def(t)] => ScopeItem::Return(t),
            [sym_def(s)] => ScopeItem::Sym(s),
            [synth_def(s)] => ScopeItem::Synth(s),
            [block_def(b)] => ScopeItem::Block(b),
        ))
    }

    fn qual_list(input: Node) -> ParseResult<Vec<Id>> {
        Ok(match_nodes!(
            input.into_children();
            [qual_name(ns)..] => ns.collect(),
        ))
    }

    fn bases(input: Node) -> ParseResult<Vec<Id>> {
        Ok(match_nodes!(
            input.into_children();
            [qual_list(ns)] => ns,
        ))
    }

    fn scope_def(input: Node) -> ParseResult<ScopeDef> {
        let (name, tags, bases, items): (Id, Vec<Id>, Vec<Id>, Vec<ScopeItem>) = match_nodes!(
            input.into_children();
            [qual_name(n), scope_item(items)..] => (n, vec![], vec![], items.collect()),
            [qual_name(n), tags(t), scope_item(items)..] => (n, t, vec![], items.collect()),
            [qual_name(n), bases(b), scope_item(items)..] => (n, vec![], b, items.collect()),
            [qual_name(n), tags(t), bases(b), scope_item(items)..] => (n, t, b, items.collect()),
        );
        let mut scope = ScopeDef::new(name);
        scope.tags = tags;
        scope.bases = bases;
        for item in items {
            match item {
                ScopeItem::Param(p) => scope.params.push(p),
                ScopeItem::Return(t) => scope.ret = Some(t),
                ScopeItem::Sym(s) => scope.syms.push(s),
                ScopeItem::Synth(s) => scope.synth.extend(s),
                ScopeItem::Block(b) => scope.blocks.push(b),
            }
        }
        Ok(scope)
    }

    fn file(input: Node) -> ParseResult<ast::Program> {
        Ok(match_nodes!(
            input.into_children();
            [scope_def(scopes).., EOI(_)] => ast::Program { scopes: scopes.collect() },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ast::Program {
        IrParser::parse(src.as_bytes()).expect("parse failed")
    }

    #[test]
    fn scope_with_blocks() {
        let prog = parse(
            r#"
            scope @top.add [function, returnable] {
              param a: int16!;
              param b: undef = 1;
              return: undef;
              sym @return: undef [return];
              block b1 entry preds() {
                3: @return = (a + b);
                jump b2;
              }
              block b2 exit preds(b1) {
                ret @return;
              }
            }
            "#,
        );
        assert_eq!(prog.scopes.len(), 1);
        let scope = &prog.scopes[0];
        assert_eq!(scope.name, Id::new("@top.add"));
        assert_eq!(scope.params.len(), 2);
        assert!(scope.params[0].typ.explicit);
        assert!(matches!(scope.params[0].typ.kind, TypeKindDef::Int(16)));
        assert!(scope.params[1].default.is_some());
        assert_eq!(scope.blocks.len(), 2);
        assert!(scope.blocks[0].entry);
        assert_eq!(scope.blocks[1].preds, vec![Id::new("b1")]);
        let first = &scope.blocks[0].stms[0];
        assert_eq!(first.line, Some(3));
        assert!(matches!(
            &first.kind,
            StmKindDef::Move(ExprDef::Name(_), ExprDef::Binop(op, _, _)) if op == "+"
        ));
    }

    #[test]
    fn nested_expressions() {
        let prog = parse(
            r#"
            scope @top [namespace] {
              block b1 entry {
                x = (c ? (-1 + a) : (-a));
                y = poly+(a, b, 1);
                z = m[(i - 1)];
                mstore(m, i, z);
                w = phi(x ? c, y ? (!c));
                cmove c ? self.p = 1;
                cjump c ? b2 : b3;
              }
            }
            "#,
        );
        let stms = &prog.scopes[0].blocks[0].stms;
        assert!(matches!(&stms[0].kind, StmKindDef::Move(_, ExprDef::Condop(..))));
        assert!(matches!(&stms[1].kind, StmKindDef::Move(_, ExprDef::Polyop(op, vs)) if op == "+" && vs.len() == 3));
        assert!(matches!(&stms[2].kind, StmKindDef::Move(_, ExprDef::Subscript(..))));
        assert!(matches!(&stms[3].kind, StmKindDef::Expr(ExprDef::Mstore(..))));
        assert!(matches!(&stms[4].kind, StmKindDef::Phi { args, .. } if args.len() == 2));
        assert!(matches!(&stms[5].kind, StmKindDef::CMove(_, ExprDef::Attr(..), _)));
        assert!(matches!(&stms[6].kind, StmKindDef::CJump(..)));
    }

    #[test]
    fn negative_literal_operand() {
        let prog = parse(
            r#"
            scope @top [namespace] {
              block b1 entry {
                x = (-1 + a);
                y = (-(a * b));
                z = (a - -2);
              }
            }
            "#,
        );
        let stms = &prog.scopes[0].blocks[0].stms;
        assert!(matches!(
            &stms[0].kind,
            StmKindDef::Move(_, ExprDef::Binop(op, l, _)) if op == "+" && matches!(**l, ExprDef::Int(-1))
        ));
        assert!(matches!(
            &stms[1].kind,
            StmKindDef::Move(_, ExprDef::Unop(op, e)) if op == "-" && matches!(**e, ExprDef::Binop(..))
        ));
        assert!(matches!(
            &stms[2].kind,
            StmKindDef::Move(_, ExprDef::Binop(op, _, r)) if op == "-" && matches!(**r, ExprDef::Int(-2))
        ));
    }

    #[test]
    fn types() {
        let prog = parse(
            r#"
            scope @top [namespace] {
              sym m: list<int32>[10];
              sym r: rom<uint8!>[?];
              sym p: port<polyphony.io.Port, int8, out, frozen, init=3>;
              sym f: function<@top.f>(int32, bool) -> int32;
              block b1 entry { ret None; }
            }
            "#,
        );
        let syms = &prog.scopes[0].syms;
        assert!(matches!(&syms[0].typ.kind, TypeKindDef::List { len: LengthDef::Num(10), ro: false, .. }));
        assert!(matches!(&syms[1].typ.kind, TypeKindDef::List { len: LengthDef::Any, ro: true, .. }));
        assert!(matches!(&syms[2].typ.kind, TypeKindDef::Port { frozen: true, init: Some(3), .. }));
        assert!(matches!(&syms[3].typ.kind, TypeKindDef::Function { sig: Some((ps, _)), .. } if ps.len() == 2));
    }

    #[test]
    fn syntax_error_is_reported() {
        let err = IrParser::parse("scope @top { block }".as_bytes()).unwrap_err();
        assert!(err.message().contains("Failed to parse"));
    }
}
