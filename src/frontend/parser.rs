//! 表达式解析器。

use super::{BinaryOp, Expr, ExprError, UnaryOp, ValueType};
use pest::{
    error::InputLocation,
    iterators::{Pair, Pairs},
    pratt_parser::{Assoc, Op, PrattParser},
    Parser,
};

mod grammar {
    #[derive(Parser)]
    #[grammar = "frontend/expr.pest"]
    pub struct ExprParser;
}

use grammar::{ExprParser, Rule};

/// 解析一条表达式。
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let mut parsed =
        ExprParser::parse(Rule::Expression, source).map_err(|err| syntax_error(source, &err))?;
    let pratt = pratt_parser();
    let builder = ExprBuilder {
        source,
        pratt: &pratt,
    };

    let mut expression = parsed.next().unwrap().into_inner();
    builder.build_expr(expression.next().unwrap())
}

/// 解析变迁动作，形如 `y = x + 1, z = x - 1`。空文本没有赋值。
pub fn parse_actions(source: &str) -> Result<Vec<(String, Expr)>, ExprError> {
    let mut parsed =
        ExprParser::parse(Rule::Actions, source).map_err(|err| syntax_error(source, &err))?;
    let pratt = pratt_parser();
    let builder = ExprBuilder {
        source,
        pratt: &pratt,
    };

    let mut actions = vec![];
    for assignment in parsed.next().unwrap().into_inner() {
        match assignment.as_rule() {
            Rule::Assignment => {
                let mut inner = assignment.into_inner();
                let name = builder.identifier(&inner.next().unwrap())?;
                let value = builder.build_expr(inner.next().unwrap())?;
                actions.push((name, value));
            }
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    Ok(actions)
}

/// 优先级从低到高
fn pratt_parser() -> PrattParser<Rule> {
    PrattParser::new()
        .op(Op::infix(Rule::Iff, Assoc::Left))
        .op(Op::infix(Rule::Implies, Assoc::Right))
        .op(Op::infix(Rule::Or, Assoc::Left))
        .op(Op::infix(Rule::Xor, Assoc::Left))
        .op(Op::infix(Rule::And, Assoc::Left))
        .op(Op::prefix(Rule::Not))
        .op(Op::infix(Rule::Eq, Assoc::Left)
            | Op::infix(Rule::Ne, Assoc::Left)
            | Op::infix(Rule::Lt, Assoc::Left)
            | Op::infix(Rule::Le, Assoc::Left)
            | Op::infix(Rule::Gt, Assoc::Left)
            | Op::infix(Rule::Ge, Assoc::Left))
        .op(Op::infix(Rule::Add, Assoc::Left) | Op::infix(Rule::Sub, Assoc::Left))
        .op(Op::infix(Rule::Mul, Assoc::Left) | Op::infix(Rule::Div, Assoc::Left))
        .op(Op::prefix(Rule::Neg))
}

fn char_offset(source: &str, byte: usize) -> usize {
    source.get(..byte).map_or(byte, |prefix| prefix.chars().count())
}

fn syntax_error(source: &str, err: &pest::error::Error<Rule>) -> ExprError {
    let start = match err.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    };
    let position = char_offset(source, start);
    match source.get(start..).and_then(|rest| rest.chars().next()) {
        Some(c) => ExprError::syntax(format!("Unexpected character '{}'", c), position),
        None => ExprError::syntax("Unexpected end of input", position),
    }
}

fn unescape(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some(other) => text.push(other),
            None => {}
        }
    }
    text
}

#[derive(Copy, Clone)]
struct ExprBuilder<'a> {
    source: &'a str,
    pratt: &'a PrattParser<Rule>,
}

impl<'a> ExprBuilder<'a> {
    fn position(self, pair: &Pair<'a, Rule>) -> usize {
        char_offset(self.source, pair.as_span().start())
    }

    fn build_expr(self, expr: Pair<'a, Rule>) -> Result<Expr, ExprError> {
        self.pratt
            .map_primary(|primary| self.build_primary(primary))
            .map_prefix(|op, operand| {
                let op = match op.as_rule() {
                    Rule::Neg => UnaryOp::Neg,
                    Rule::Not => UnaryOp::Not,
                    _ => unreachable!(),
                };
                Ok(Expr::unary(op, operand?))
            })
            .map_infix(|left, op, right| {
                let op = match op.as_rule() {
                    Rule::Iff => BinaryOp::Iff,
                    Rule::Implies => BinaryOp::Implies,
                    Rule::Or => BinaryOp::Or,
                    Rule::Xor => BinaryOp::Xor,
                    Rule::And => BinaryOp::And,
                    Rule::Eq => BinaryOp::Eq,
                    Rule::Ne => BinaryOp::Ne,
                    Rule::Lt => BinaryOp::Lt,
                    Rule::Le => BinaryOp::Le,
                    Rule::Gt => BinaryOp::Gt,
                    Rule::Ge => BinaryOp::Ge,
                    Rule::Add => BinaryOp::Add,
                    Rule::Sub => BinaryOp::Sub,
                    Rule::Mul => BinaryOp::Mul,
                    Rule::Div => BinaryOp::Div,
                    _ => unreachable!(),
                };
                // 左边先报错，保证报告的是最靠前的错误
                let left = left?;
                Ok(Expr::binary(op, left, right?))
            })
            .parse(expr.into_inner())
    }

    fn build_primary(self, primary: Pair<'a, Rule>) -> Result<Expr, ExprError> {
        match primary.as_rule() {
            Rule::Bool => {
                let text = primary.as_str();
                Ok(Expr::Bool(text == "T" || text.eq_ignore_ascii_case("true")))
            }
            Rule::Int => primary.as_str().parse().map(Expr::Int).map_err(|_| {
                ExprError::validation(
                    format!("Malformed integer literal '{}'", primary.as_str()),
                    self.position(&primary),
                )
            }),
            Rule::Str => self.build_string(primary),
            Rule::List => self
                .build_sequence(primary.into_inner(), "]", "Expected ',' or ']'")
                .map(Expr::List),
            Rule::Group => {
                let mut items =
                    self.build_sequence(primary.into_inner(), ")", "Expected ')'")?;
                let snd = items.pop();
                match (items.pop(), snd) {
                    (Some(fst), Some(snd)) => Ok(Expr::pair(fst, snd)),
                    (None, Some(inner)) => Ok(inner),
                    _ => unreachable!(),
                }
            }
            Rule::Call => {
                let mut inner = primary.into_inner();
                let head = inner.next().unwrap();
                let name = self.identifier(&head.into_inner().next().unwrap())?;
                let args = self.build_sequence(inner, ")", "Expected ',' or ')'")?;
                Ok(Expr::Call { name, args })
            }
            Rule::Var => {
                let mut inner = primary.into_inner();
                let name = self.identifier(&inner.next().unwrap())?;
                let ty = inner.next().and_then(|ty| ValueType::from_name(ty.as_str()));
                Ok(Expr::Var { name, ty })
            }
            _ => unreachable!(),
        }
    }

    fn build_string(self, string: Pair<'a, Rule>) -> Result<Expr, ExprError> {
        let position = self.position(&string);
        let mut inner = string.into_inner();
        let text = inner.next().unwrap();
        let end = inner.next().unwrap();
        if end.as_str().is_empty() {
            return Err(ExprError::syntax("Unterminated string literal", position));
        }
        Ok(Expr::Str(unescape(text.as_str())))
    }

    /// 依次构建元素；最后一个子节点是结尾符号，不是 `closer` 时说明中间有多余的输入。
    fn build_sequence(
        self,
        pairs: Pairs<'a, Rule>,
        closer: &str,
        expected: &str,
    ) -> Result<Vec<Expr>, ExprError> {
        let mut items = vec![];
        for pair in pairs {
            match pair.as_rule() {
                Rule::Expr => items.push(self.build_expr(pair)?),
                Rule::ListEnd | Rule::GroupEnd | Rule::CallEnd => {
                    if pair.as_str() != closer {
                        return Err(ExprError::syntax(expected, self.position(&pair)));
                    }
                }
                _ => unreachable!(),
            }
        }
        Ok(items)
    }

    fn identifier(self, ident: &Pair<'a, Rule>) -> Result<String, ExprError> {
        let name = ident.as_str();
        if name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(ExprError::validation(
                format!(
                    "Variable names must start with lowercase letter, got '{}'",
                    name
                ),
                self.position(ident),
            ));
        }
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Expr {
        Expr::Int(n)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(
            parse("1 + 2 * x").unwrap(),
            Expr::binary(
                BinaryOp::Add,
                int(1),
                Expr::binary(BinaryOp::Mul, int(2), Expr::var("x"))
            )
        );
        assert_eq!(
            parse("10 - 4 - 3").unwrap(),
            Expr::binary(
                BinaryOp::Sub,
                Expr::binary(BinaryOp::Sub, int(10), int(4)),
                int(3)
            )
        );
        assert_eq!(
            parse("-x * 2").unwrap(),
            Expr::binary(
                BinaryOp::Mul,
                Expr::unary(UnaryOp::Neg, Expr::var("x")),
                int(2)
            )
        );
    }

    #[test]
    fn boolean_precedence() {
        assert_eq!(
            parse("a && b || !c").unwrap(),
            Expr::binary(
                BinaryOp::Or,
                Expr::binary(BinaryOp::And, Expr::var("a"), Expr::var("b")),
                Expr::unary(UnaryOp::Not, Expr::var("c"))
            )
        );
        assert_eq!(
            parse("x > 0 and y = T").unwrap(),
            Expr::binary(
                BinaryOp::And,
                Expr::binary(BinaryOp::Gt, Expr::var("x"), int(0)),
                Expr::binary(BinaryOp::Eq, Expr::var("y"), Expr::Bool(true))
            )
        );
        assert_eq!(
            parse("a -> b -> c").unwrap(),
            Expr::binary(
                BinaryOp::Implies,
                Expr::var("a"),
                Expr::binary(BinaryOp::Implies, Expr::var("b"), Expr::var("c"))
            )
        );
        assert_eq!(
            parse("not x == 1 <-> y").unwrap(),
            Expr::binary(
                BinaryOp::Iff,
                Expr::unary(
                    UnaryOp::Not,
                    Expr::binary(BinaryOp::Eq, Expr::var("x"), int(1))
                ),
                Expr::var("y")
            )
        );
    }

    #[test]
    fn patterns() {
        assert_eq!(
            parse("(a, (b, c))").unwrap(),
            Expr::pair(Expr::var("a"), Expr::pair(Expr::var("b"), Expr::var("c")))
        );
        assert_eq!(
            parse("[x:int, 'a\\'b', F, true]").unwrap(),
            Expr::List(vec![
                Expr::Var {
                    name: "x".to_string(),
                    ty: Some(ValueType::Int)
                },
                Expr::Str("a'b".to_string()),
                Expr::Bool(false),
                Expr::Bool(true),
            ])
        );
        assert_eq!(parse("[]").unwrap(), Expr::List(vec![]));
        assert_eq!(parse("(7)").unwrap(), int(7));
    }

    #[test]
    fn boolean_words_ignore_case() {
        assert_eq!(parse("True").unwrap(), Expr::Bool(true));
        assert_eq!(parse("FALSE").unwrap(), Expr::Bool(false));
        assert_eq!(
            parse("x == tRuE").unwrap(),
            Expr::binary(BinaryOp::Eq, Expr::var("x"), Expr::Bool(true))
        );
        assert!(parse("Trueish").is_err());
    }

    #[test]
    fn calls() {
        assert_eq!(
            parse("substring(s, 0, length(s) - 1)").unwrap(),
            Expr::Call {
                name: "substring".to_string(),
                args: vec![
                    Expr::var("s"),
                    int(0),
                    Expr::binary(
                        BinaryOp::Sub,
                        Expr::Call {
                            name: "length".to_string(),
                            args: vec![Expr::var("s")]
                        },
                        int(1)
                    ),
                ],
            }
        );
        assert_eq!(
            parse("f()").unwrap(),
            Expr::Call {
                name: "f".to_string(),
                args: vec![]
            }
        );
    }

    #[test]
    fn call_name_touches_its_parenthesis() {
        assert_eq!(
            parse("f( x )").unwrap(),
            Expr::Call {
                name: "f".to_string(),
                args: vec![Expr::var("x")]
            }
        );
        assert!(matches!(parse("f (x)"), Err(ExprError::Syntax { .. })));
        assert!(matches!(
            parse("length (s) + 1"),
            Err(ExprError::Syntax { .. })
        ));
    }

    #[test]
    fn type_annotation_is_case_insensitive() {
        assert_eq!(
            parse("n : INT").unwrap(),
            Expr::Var {
                name: "n".to_string(),
                ty: Some(ValueType::Int)
            }
        );
    }

    #[test]
    fn unknown_type_word_is_not_consumed() {
        assert!(matches!(parse("x:foo"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn unterminated_string() {
        let err = parse("'abc").unwrap_err();
        assert_eq!(err, ExprError::syntax("Unterminated string literal", 0));
        let err = parse("concat(s, 'x)").unwrap_err();
        assert_eq!(err, ExprError::syntax("Unterminated string literal", 10));
    }

    #[test]
    fn list_separator() {
        let err = parse("[1 2]").unwrap_err();
        assert_eq!(err, ExprError::syntax("Expected ',' or ']'", 3));
        assert!(err.to_string().contains("Expected ',' or ']'"));
    }

    #[test]
    fn argument_and_group_closers() {
        assert_eq!(
            parse("f(1 2)").unwrap_err(),
            ExprError::syntax("Expected ',' or ')'", 4)
        );
        assert_eq!(
            parse("(1, 2, 3)").unwrap_err(),
            ExprError::syntax("Expected ')'", 5)
        );
    }

    #[test]
    fn uppercase_identifiers() {
        let err = parse("X + 1").unwrap_err();
        assert!(matches!(err, ExprError::Validation { position: 0, .. }));
        assert!(err
            .message()
            .contains("Variable names must start with lowercase letter"));
        assert!(parse("Tx").is_err());
        assert!(parse("Foo(1)").is_err());
    }

    #[test]
    fn unexpected_input() {
        assert_eq!(
            parse("1 + $").unwrap_err(),
            ExprError::syntax("Unexpected character '$'", 4)
        );
        assert_eq!(
            parse("1 +").unwrap_err(),
            ExprError::syntax("Unexpected end of input", 3)
        );
        assert_eq!(
            parse("").unwrap_err(),
            ExprError::syntax("Unexpected end of input", 0)
        );
    }

    #[test]
    fn integer_overflow_is_rejected() {
        assert!(matches!(
            parse("99999999999999999999"),
            Err(ExprError::Validation { position: 0, .. })
        ));
    }

    #[test]
    fn positions_count_characters() {
        assert_eq!(
            parse("'é' + $").unwrap_err(),
            ExprError::syntax("Unexpected character '$'", 6)
        );
    }

    #[test]
    fn actions() {
        assert_eq!(
            parse_actions("y = x + 1, z = x - 1").unwrap(),
            vec![
                (
                    "y".to_string(),
                    Expr::binary(BinaryOp::Add, Expr::var("x"), int(1))
                ),
                (
                    "z".to_string(),
                    Expr::binary(BinaryOp::Sub, Expr::var("x"), int(1))
                ),
            ]
        );
        assert_eq!(parse_actions("  ").unwrap(), vec![]);
        assert!(parse_actions("Y = 1").is_err());
    }

    #[test]
    fn serializer_round_trip() {
        for text in [
            "(a, (b, c))",
            "x:int + 1 * -y",
            "!(a && b) -> c <-> d ^ e",
            "concat('it\\'s', '\\\\n')",
            "[1, [T, F], ('x', -3)]",
            "isSubstringOf(s, t) = true",
        ] {
            let expr = parse(text).unwrap();
            assert_eq!(parse(&expr.to_string()).unwrap(), expr, "{}", text);
        }
    }
}
