//! The bundled evaluator: interprets parsed expressions against a
//! [`ModelView`].
//!
//! Coercion rules are deliberately forgiving, matching how survey forms
//! behave in the field: arithmetic over a value with no numeric reading
//! yields [`Value::Empty`] rather than an error, and `sum()` lets empty
//! nodes contribute nothing.

use chrono::Local;

use crate::parser::{self, BinOp, Expr};
use crate::types::{EvalContext, EvalError, Evaluator, Result, Value};

/// A small XPath-flavoured evaluator. Stateless; one instance can serve any
/// number of forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for SimpleEvaluator {
    fn evaluate(&self, expr: &str, ctx: &EvalContext<'_>) -> Result<Value> {
        let ast = parser::parse(expr)?;
        eval(&ast, ctx)
    }

    fn refs(&self, expr: &str) -> Result<Vec<String>> {
        let ast = parser::parse(expr)?;
        let mut out = Vec::new();
        parser::collect_refs(&ast, &mut out);
        Ok(out)
    }
}

fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Literal(s) => Ok(Value::Text(s.clone())),
        Expr::Ref(reference) => Ok(match ctx.model.value_of(reference, ctx.node)? {
            Some(value) => Value::Text(value),
            None => Value::Empty,
        }),
        Expr::Neg(inner) => Ok(match eval(inner, ctx)?.as_number() {
            Some(n) => Value::Number(-n),
            None => Value::Empty,
        }),
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
        Expr::Call { name, args } => eval_call(name, args, ctx),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    // Logical operators short-circuit.
    match op {
        BinOp::And => {
            if !eval(lhs, ctx)?.as_bool() {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(eval(rhs, ctx)?.as_bool()));
        }
        BinOp::Or => {
            if eval(lhs, ctx)?.as_bool() {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(eval(rhs, ctx)?.as_bool()));
        }
        _ => {}
    }

    let left = eval(lhs, ctx)?;
    let right = eval(rhs, ctx)?;
    Ok(match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => Value::Number(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => a % b,
                }),
                _ => Value::Empty,
            }
        }
        BinOp::Eq => Value::Boolean(values_equal(&left, &right)),
        BinOp::Ne => Value::Boolean(!values_equal(&left, &right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => Value::Boolean(match op {
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                }),
                _ => Value::Boolean(false),
            }
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    })
}

/// Equality follows XPath: a boolean operand compares truthiness, a numeric
/// operand forces numeric comparison, otherwise strings compare.
fn values_equal(left: &Value, right: &Value) -> bool {
    if matches!(left, Value::Boolean(_)) || matches!(right, Value::Boolean(_)) {
        return left.as_bool() == right.as_bool();
    }
    if matches!(left, Value::Number(_)) || matches!(right, Value::Number(_)) {
        return match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
    }
    left.to_text() == right.to_text()
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext<'_>) -> Result<Value> {
    match name {
        "true" => {
            expect_args(name, args, 0)?;
            Ok(Value::Boolean(true))
        }
        "false" => {
            expect_args(name, args, 0)?;
            Ok(Value::Boolean(false))
        }
        "not" => {
            expect_args(name, args, 1)?;
            Ok(Value::Boolean(!eval(&args[0], ctx)?.as_bool()))
        }
        "boolean" => {
            expect_args(name, args, 1)?;
            Ok(Value::Boolean(eval(&args[0], ctx)?.as_bool()))
        }
        "boolean-from-string" => {
            expect_args(name, args, 1)?;
            let s = eval(&args[0], ctx)?.to_text();
            Ok(Value::Boolean(s == "true" || s == "1"))
        }
        "string" => {
            expect_args(name, args, 1)?;
            Ok(Value::Text(eval(&args[0], ctx)?.to_text()))
        }
        "number" => {
            expect_args(name, args, 1)?;
            Ok(match eval(&args[0], ctx)?.as_number() {
                Some(n) => Value::Number(n),
                None => Value::Empty,
            })
        }
        "concat" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&eval(arg, ctx)?.to_text());
            }
            Ok(Value::Text(out))
        }
        "string-length" => {
            expect_args(name, args, 1)?;
            let s = eval(&args[0], ctx)?.to_text();
            Ok(Value::Number(s.chars().count() as f64))
        }
        "count" => {
            expect_args(name, args, 1)?;
            let reference = ref_arg(name, &args[0])?;
            Ok(Value::Number(ctx.model.count_of(reference, ctx.node)? as f64))
        }
        "sum" => {
            expect_args(name, args, 1)?;
            let reference = ref_arg(name, &args[0])?;
            let mut total = 0.0;
            for value in ctx.model.values_of(reference, ctx.node)? {
                if let Ok(n) = value.trim().parse::<f64>() {
                    total += n;
                }
            }
            Ok(Value::Number(total))
        }
        "position" => {
            if args.is_empty() {
                return Ok(Value::Number(ctx.node.leaf_index() as f64));
            }
            expect_args(name, args, 1)?;
            let reference = ref_arg(name, &args[0])?;
            Ok(match ctx.model.resolve_first(reference, ctx.node)? {
                Some(node) => Value::Number(node.leaf_index() as f64),
                None => Value::Empty,
            })
        }
        "selected" => {
            expect_args(name, args, 2)?;
            let list = eval(&args[0], ctx)?.to_text();
            let needle = eval(&args[1], ctx)?.to_text();
            Ok(Value::Boolean(
                list.split_whitespace().any(|token| token == needle),
            ))
        }
        "if" => {
            expect_args(name, args, 3)?;
            if eval(&args[0], ctx)?.as_bool() {
                eval(&args[1], ctx)
            } else {
                eval(&args[2], ctx)
            }
        }
        "coalesce" => {
            expect_args(name, args, 2)?;
            let first = eval(&args[0], ctx)?;
            if first.is_empty() {
                eval(&args[1], ctx)
            } else {
                Ok(first)
            }
        }
        "today" => {
            expect_args(name, args, 0)?;
            Ok(Value::Text(Local::now().date_naive().to_string()))
        }
        "now" => {
            expect_args(name, args, 0)?;
            Ok(Value::Text(Local::now().to_rfc3339()))
        }
        "items" => eval_items(args, ctx),
        "selected-items" => {
            expect_args(name, args, 2)?;
            let list_name = literal_arg(name, &args[0])?;
            let Some(choices) = ctx.model.choice_list(list_name) else {
                return Err(EvalError::UnknownChoiceList {
                    name: list_name.to_string(),
                });
            };
            let selection = eval(&args[1], ctx)?.to_text();
            let tokens: Vec<&str> = selection.split_whitespace().collect();
            let picked = choices
                .iter()
                .filter(|c| tokens.contains(&c.value.as_str()))
                .cloned()
                .collect();
            Ok(Value::Items(picked))
        }
        _ => Err(EvalError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}

/// `items('list')` yields the whole named choice list;
/// `items('list', 'attr', expr)` keeps only choices whose `attr` equals the
/// expression's value. The cascading-select building block.
fn eval_items(args: &[Expr], ctx: &EvalContext<'_>) -> Result<Value> {
    if args.len() != 1 && args.len() != 3 {
        return Err(EvalError::arguments("items", "takes 1 or 3 arguments"));
    }
    let list_name = literal_arg("items", &args[0])?;
    let Some(choices) = ctx.model.choice_list(list_name) else {
        return Err(EvalError::UnknownChoiceList {
            name: list_name.to_string(),
        });
    };
    if args.len() == 1 {
        return Ok(Value::Items(choices.to_vec()));
    }
    let attr = literal_arg("items", &args[1])?;
    let wanted = eval(&args[2], ctx)?.to_text();
    let filtered = choices
        .iter()
        .filter(|c| c.attrs.get(attr).is_some_and(|v| *v == wanted))
        .cloned()
        .collect();
    Ok(Value::Items(filtered))
}

fn expect_args(name: &str, args: &[Expr], want: usize) -> Result<()> {
    if args.len() != want {
        return Err(EvalError::arguments(
            name,
            format!("takes {want} argument(s), got {}", args.len()),
        ));
    }
    Ok(())
}

fn ref_arg<'a>(name: &str, arg: &'a Expr) -> Result<&'a str> {
    match arg {
        Expr::Ref(r) => Ok(r),
        _ => Err(EvalError::arguments(name, "expected a node reference")),
    }
}

fn literal_arg<'a>(name: &str, arg: &'a Expr) -> Result<&'a str> {
    match arg {
        Expr::Literal(s) => Ok(s),
        _ => Err(EvalError::arguments(name, "expected a quoted name")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use trellis_core::{DocNode, InstanceTree, NodeRef, RefPattern};

    use super::*;
    use crate::types::{Choice, ModelView};

    /// Minimal model window over a plain instance tree.
    struct TestView {
        tree: InstanceTree,
        choices: HashMap<String, Vec<Choice>>,
    }

    impl ModelView for TestView {
        fn value_of(&self, reference: &str, context: &NodeRef) -> Result<Option<String>> {
            let pattern = RefPattern::resolve(reference, context)?;
            Ok(self
                .tree
                .resolve_pattern(&pattern)
                .first()
                .and_then(|r| self.tree.value(r))
                .map(String::from))
        }

        fn values_of(&self, reference: &str, context: &NodeRef) -> Result<Vec<String>> {
            let pattern = RefPattern::resolve(reference, context)?;
            Ok(self
                .tree
                .resolve_pattern(&pattern)
                .iter()
                .filter_map(|r| self.tree.value(r))
                .map(String::from)
                .collect())
        }

        fn count_of(&self, reference: &str, context: &NodeRef) -> Result<usize> {
            let pattern = RefPattern::resolve(reference, context)?;
            Ok(self.tree.resolve_pattern(&pattern).len())
        }

        fn resolve_first(&self, reference: &str, context: &NodeRef) -> Result<Option<NodeRef>> {
            let pattern = RefPattern::resolve(reference, context)?;
            Ok(self.tree.resolve_pattern(&pattern).into_iter().next())
        }

        fn choice_list(&self, name: &str) -> Option<&[Choice]> {
            self.choices.get(name).map(Vec::as_slice)
        }
    }

    fn view() -> TestView {
        let doc = DocNode::branch(
            "d",
            vec![
                DocNode::leaf("age", "30"),
                DocNode::leaf("name", "ada"),
                DocNode::leaf("pets", "cat dog"),
                DocNode::branch("rep", vec![DocNode::leaf("n", "2")]),
                DocNode::branch("rep", vec![DocNode::leaf("n", "5")]),
                DocNode::branch("rep", vec![DocNode::leaf("n", "")]),
                DocNode::leaf("country", "nl"),
            ],
        );
        let mut choices = HashMap::new();
        choices.insert(
            "cities".to_string(),
            vec![
                Choice::new("ams", "Amsterdam").with_attr("country", "nl"),
                Choice::new("rot", "Rotterdam").with_attr("country", "nl"),
                Choice::new("ber", "Berlin").with_attr("country", "de"),
            ],
        );
        TestView {
            tree: InstanceTree::from_doc(&doc),
            choices,
        }
    }

    fn run(expr: &str) -> Value {
        run_at(expr, "/d")
    }

    fn run_at(expr: &str, context: &str) -> Value {
        let v = view();
        let node = NodeRef::parse(context).unwrap();
        let ctx = EvalContext::new(&node, &v);
        SimpleEvaluator::new().evaluate(expr, &ctx).unwrap()
    }

    // -- arithmetic & comparison -------------------------------------------

    #[test]
    fn arithmetic() {
        assert_eq!(run("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(run("10 div 4"), Value::Number(2.5));
        assert_eq!(run("7 mod 3"), Value::Number(1.0));
        assert_eq!(run("-age + 40"), Value::Number(10.0));
        // Non-numeric operand degrades to empty, not an error.
        assert_eq!(run("name * 2"), Value::Empty);
    }

    #[test]
    fn comparisons() {
        assert_eq!(run("age > 18"), Value::Boolean(true));
        assert_eq!(run("age <= 18"), Value::Boolean(false));
        assert_eq!(run("name = 'ada'"), Value::Boolean(true));
        assert_eq!(run("name != 'eve'"), Value::Boolean(true));
        // Numeric operand forces numeric equality.
        assert_eq!(run("age = 30"), Value::Boolean(true));
        // Relational on a non-number is simply false.
        assert_eq!(run("name < 3"), Value::Boolean(false));
    }

    #[test]
    fn logic_short_circuits() {
        assert_eq!(run("age > 18 and name = 'ada'"), Value::Boolean(true));
        assert_eq!(run("age > 99 or name = 'ada'"), Value::Boolean(true));
        // The bad rhs call is never reached.
        assert_eq!(run("false() and nope()"), Value::Boolean(false));
    }

    // -- references --------------------------------------------------------

    #[test]
    fn reference_resolution() {
        assert_eq!(run("/d/age"), Value::text("30"));
        assert_eq!(run_at("../age", "/d/name"), Value::text("30"));
        assert_eq!(run_at(".", "/d/name"), Value::text("ada"));
        assert_eq!(run("/d/missing"), Value::Empty);
        assert_eq!(run("/d/rep[2]/n"), Value::text("5"));
    }

    #[test]
    fn node_set_functions() {
        assert_eq!(run("count(/d/rep)"), Value::Number(3.0));
        // Empty instance values contribute nothing to the sum.
        assert_eq!(run("sum(/d/rep/n)"), Value::Number(7.0));
        assert_eq!(run_at("position(..)", "/d/rep[2]/n"), Value::Number(2.0));
        assert_eq!(run_at("position()", "/d/rep[3]"), Value::Number(3.0));
    }

    // -- functions ---------------------------------------------------------

    #[test]
    fn string_functions() {
        assert_eq!(run("concat('a-', name, '-z')"), Value::text("a-ada-z"));
        assert_eq!(run("string-length(name)"), Value::Number(3.0));
        assert_eq!(run("string(age)"), Value::text("30"));
        assert_eq!(run("number('12')"), Value::Number(12.0));
        assert_eq!(run("number('x')"), Value::Empty);
    }

    #[test]
    fn selection_and_branching() {
        assert_eq!(run("selected(pets, 'cat')"), Value::Boolean(true));
        assert_eq!(run("selected(pets, 'ca')"), Value::Boolean(false));
        assert_eq!(run("if(age > 18, 'adult', 'minor')"), Value::text("adult"));
        assert_eq!(run("coalesce(missing, name)"), Value::text("ada"));
        assert_eq!(run("coalesce(name, 'fallback')"), Value::text("ada"));
        assert_eq!(run("boolean-from-string('true')"), Value::Boolean(true));
        assert_eq!(run("boolean-from-string('yes')"), Value::Boolean(false));
        assert_eq!(run("not(age = 30)"), Value::Boolean(false));
    }

    #[test]
    fn date_functions_produce_values() {
        let Value::Text(today) = run("today()") else {
            panic!("today() must yield text");
        };
        assert_eq!(today.len(), 10);
        assert!(run("now()").as_bool());
    }

    #[test]
    fn itemset_lookup_and_filter() {
        let Value::Items(all) = run("items('cities')") else {
            panic!("expected items");
        };
        assert_eq!(all.len(), 3);

        let Value::Items(dutch) = run("items('cities', 'country', country)") else {
            panic!("expected items");
        };
        let values: Vec<&str> = dutch.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, vec!["ams", "rot"]);
    }

    #[test]
    fn selected_items_follows_selection_order_of_the_list() {
        let Value::Items(picked) = run("selected-items('cities', 'ber ams')") else {
            panic!("expected items");
        };
        let values: Vec<&str> = picked.iter().map(|c| c.value.as_str()).collect();
        // List order wins, not token order.
        assert_eq!(values, vec!["ams", "ber"]);
    }

    // -- errors ------------------------------------------------------------

    #[test]
    fn call_errors() {
        let v = view();
        let node = NodeRef::root("d");
        let ctx = EvalContext::new(&node, &v);
        let eval = SimpleEvaluator::new();

        assert!(matches!(
            eval.evaluate("nope()", &ctx),
            Err(EvalError::UnknownFunction { .. })
        ));
        assert!(matches!(
            eval.evaluate("not(1, 2)", &ctx),
            Err(EvalError::Arguments { .. })
        ));
        assert!(matches!(
            eval.evaluate("count('lit')", &ctx),
            Err(EvalError::Arguments { .. })
        ));
        assert!(matches!(
            eval.evaluate("items('nope')", &ctx),
            Err(EvalError::UnknownChoiceList { .. })
        ));
    }

    #[test]
    fn refs_pass_through() {
        let eval = SimpleEvaluator::new();
        assert_eq!(
            eval.refs("../num1 * 20").unwrap(),
            vec!["../num1".to_string()]
        );
        assert!(eval.refs("3 +").is_err());
    }
}
