//! 语义检查。

use std::collections::HashSet;

use anyhow::{bail, Result};

use super::{Expr, ValueType};

fn collect<'a>(expr: &'a Expr, vars: &mut Vec<(&'a str, Option<ValueType>)>) {
    match expr {
        Expr::Int(_) | Expr::Bool(_) | Expr::Str(_) => {}
        Expr::Var { name, ty } => match vars.iter_mut().find(|(seen, _)| *seen == name.as_str()) {
            Some((_, seen_ty)) => {
                if seen_ty.is_none() {
                    *seen_ty = *ty;
                }
            }
            None => vars.push((name.as_str(), *ty)),
        },
        Expr::List(items) | Expr::Call { args: items, .. } => {
            for item in items {
                collect(item, vars);
            }
        }
        Expr::Pair(fst, snd) => {
            collect(fst, vars);
            collect(snd, vars);
        }
        Expr::Unary { operand, .. } => collect(operand, vars),
        Expr::Binary { left, right, .. } => {
            collect(left, vars);
            collect(right, vars);
        }
    }
}

/// 表达式中的变量，按第一次出现的顺序
pub fn variables(expr: &Expr) -> Vec<&str> {
    typed_variables(expr)
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

/// 表达式中的变量及其类型标注，同一变量取第一个出现的标注
pub fn typed_variables(expr: &Expr) -> Vec<(&str, Option<ValueType>)> {
    let mut vars = vec![];
    collect(expr, &mut vars);
    vars
}

/// 作为模式匹配时会被绑定的变量。运算和函数调用只做比较，不绑定变量。
pub fn pattern_variables(pattern: &Expr) -> Vec<&str> {
    fn walk<'a>(pattern: &'a Expr, vars: &mut Vec<&'a str>) {
        match pattern {
            Expr::Var { name, .. } => {
                if !vars.contains(&name.as_str()) {
                    vars.push(name);
                }
            }
            Expr::Pair(fst, snd) => {
                walk(fst, vars);
                walk(snd, vars);
            }
            Expr::List(items) => {
                for item in items {
                    walk(item, vars);
                }
            }
            _ => {}
        }
    }

    let mut vars = vec![];
    walk(pattern, &mut vars);
    vars
}

/// `expr` 中没有被任何输入模式绑定的变量
pub fn unbound_variables<'a>(inputs: &[&Expr], expr: &'a Expr) -> Vec<&'a str> {
    let bound = inputs
        .iter()
        .flat_map(|pattern| pattern_variables(pattern))
        .collect::<HashSet<_>>();
    variables(expr)
        .into_iter()
        .filter(|name| !bound.contains(name))
        .collect()
}

/// 输出弧上的变量必须由输入弧或动作绑定
pub fn check_output_variables(
    inputs: &[&Expr],
    assigned: &[&str],
    outputs: &[&Expr],
) -> Result<()> {
    for output in outputs {
        if let Some(name) = unbound_variables(inputs, output)
            .into_iter()
            .find(|name| !assigned.contains(name))
        {
            bail!(
                "variable `{}` in output `{}` is not bound by any input arc",
                name,
                output
            );
        }
    }
    Ok(())
}

/// 守卫中的自由变量会交给求解器
pub fn check_guard_variables(inputs: &[&Expr], guard: &Expr) -> Result<()> {
    let free = unbound_variables(inputs, guard);
    if !free.is_empty() {
        bail!(
            "guard `{}` has free variable(s) {}, which are left to the solver",
            guard,
            free.join(", ")
        );
    }
    Ok(())
}
