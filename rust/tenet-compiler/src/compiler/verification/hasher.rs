//! Canonical contract encoding and cache keys.
//!
//! The encoding is an S-expression over the bound AST: spans are dropped,
//! literals carry their type, floats use shortest round-trip formatting and
//! strings are escaped. No algebraic normalization happens, so `a + b` and
//! `b + a` get different keys.

use super::contract::{Contract, ContractKind};
use crate::compiler::ast::{BinOp, Expr, Param, Stmt, UnaryOp};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Length of a contract key in hex characters.
pub const HASH_HEX_LEN: usize = 64;

pub struct ContractHasher;

impl ContractHasher {
    /// Hex-encoded SHA-256 of the canonical form.
    pub fn hash(contract: &Contract) -> String {
        format!("{:x}", Sha256::digest(Self::canonical(contract).as_bytes()))
    }

    pub fn canonical(contract: &Contract) -> String {
        let mut out = String::new();
        out.push('(');
        out.push_str(contract.kind.tag());
        out.push_str(" (params");
        for (name, ty) in &contract.params {
            out.push_str(" (");
            atom(&mut out, name);
            out.push(' ');
            atom(&mut out, ty);
            out.push(')');
        }
        out.push(')');
        if contract.kind == ContractKind::Post {
            out.push_str(" (output");
            if let Some(ty) = &contract.output {
                out.push(' ');
                atom(&mut out, ty);
            }
            out.push_str(") (requires");
            for pre in &contract.assumptions {
                out.push(' ');
                expr(&mut out, pre);
            }
            out.push(')');
        }
        out.push(' ');
        expr(&mut out, &contract.expr);
        out.push(')');
        out
    }
}

/// Identifiers and type names are quoted so that no name can collide with
/// the encoding's own keywords or punctuation.
fn atom(out: &mut String, s: &str) {
    out.push('"');
    escape_into(out, s);
    out.push('"');
}

fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Eq => "==",
        BinOp::NotEq => "!=",
        BinOp::Lt => "<",
        BinOp::LtEq => "<=",
        BinOp::Gt => ">",
        BinOp::GtEq => ">=",
        BinOp::And => "and",
        BinOp::Or => "or",
    }
}

fn expr(out: &mut String, e: &Expr) {
    match e {
        Expr::IntLit(v, _) => {
            let _ = write!(out, "(int {})", v);
        }
        Expr::FloatLit(v, _) => {
            // `{:?}` is the shortest representation that parses back exactly.
            let _ = write!(out, "(float {:?})", v);
        }
        Expr::StringLit(s, _) => {
            out.push_str("(str ");
            atom(out, s);
            out.push(')');
        }
        Expr::BoolLit(b, _) => {
            let _ = write!(out, "(bool {})", b);
        }
        Expr::NullLit(_) => out.push_str("null"),
        Expr::Ident(name, _) => {
            out.push_str("(var ");
            atom(out, name);
            out.push(')');
        }
        Expr::ResultRef(_) => out.push_str("result"),
        Expr::BinOp(lhs, op, rhs, _) => {
            let _ = write!(out, "({} ", binop_name(*op));
            expr(out, lhs);
            out.push(' ');
            expr(out, rhs);
            out.push(')');
        }
        Expr::UnaryOp(op, operand, _) => {
            out.push_str(match op {
                UnaryOp::Neg => "(neg ",
                UnaryOp::Not => "(not ",
            });
            expr(out, operand);
            out.push(')');
        }
        Expr::Call {
            target,
            receiver,
            args,
            ..
        } => {
            out.push_str("(call ");
            atom(out, &target.signature());
            out.push_str(" (recv");
            if let Some(r) = receiver {
                out.push(' ');
                expr(out, r);
            }
            out.push(')');
            exprs(out, args);
            out.push(')');
        }
        Expr::New { ctor, args, .. } => {
            out.push_str("(new ");
            atom(out, &ctor.signature());
            exprs(out, args);
            out.push(')');
        }
        Expr::Member {
            object,
            member,
            accessor,
            ..
        } => {
            out.push_str("(member ");
            expr(out, object);
            out.push(' ');
            atom(out, member);
            if let Some(getter) = accessor {
                out.push(' ');
                atom(out, &getter.signature());
            }
            out.push(')');
        }
        Expr::Lambda { params, body, .. } => {
            out.push_str("(lambda (");
            params_list(out, params);
            out.push(')');
            stmts(out, body);
            out.push(')');
        }
        Expr::Await(inner, _) => {
            out.push_str("(await ");
            expr(out, inner);
            out.push(')');
        }
        Expr::Conditional {
            cond,
            then_val,
            else_val,
            ..
        } => {
            out.push_str("(if ");
            expr(out, cond);
            out.push(' ');
            expr(out, then_val);
            out.push(' ');
            expr(out, else_val);
            out.push(')');
        }
    }
}

fn exprs(out: &mut String, list: &[Expr]) {
    for e in list {
        out.push(' ');
        expr(out, e);
    }
}

fn params_list(out: &mut String, params: &[Param]) {
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push('(');
        atom(out, &p.name);
        out.push(' ');
        atom(out, &p.ty);
        out.push(')');
    }
}

fn stmts(out: &mut String, body: &[Stmt]) {
    for s in body {
        out.push(' ');
        stmt(out, s);
    }
}

fn stmt(out: &mut String, s: &Stmt) {
    match s {
        Stmt::Let { name, value, .. } | Stmt::Assign { name, value, .. } => {
            out.push_str(if matches!(s, Stmt::Let { .. }) { "(let " } else { "(set " });
            atom(out, name);
            out.push(' ');
            expr(out, value);
            out.push(')');
        }
        Stmt::FieldAssign {
            object,
            field,
            setter,
            value,
            ..
        } => {
            out.push_str("(store ");
            expr(out, object);
            out.push(' ');
            atom(out, field);
            if let Some(s) = setter {
                out.push(' ');
                atom(out, &s.signature());
            }
            out.push(' ');
            expr(out, value);
            out.push(')');
        }
        Stmt::Expr(e) => {
            out.push_str("(do ");
            expr(out, e);
            out.push(')');
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            out.push_str("(when ");
            expr(out, cond);
            out.push_str(" (then");
            stmts(out, then_body);
            out.push_str(") (else");
            stmts(out, else_body);
            out.push_str("))");
        }
        Stmt::While { cond, body, .. } => {
            out.push_str("(while ");
            expr(out, cond);
            stmts(out, body);
            out.push(')');
        }
        Stmt::Return(value, _) => {
            out.push_str("(return");
            if let Some(v) = value {
                out.push(' ');
                expr(out, v);
            }
            out.push(')');
        }
        Stmt::Throw(value, _) => {
            out.push_str("(throw ");
            expr(out, value);
            out.push(')');
        }
    }
}
