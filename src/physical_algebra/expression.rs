//! emits code that evaluates an `Expression` for one row.

use super::{Error, IuValueMap};
use crate::codegen::FunctionBuilder;
use crate::expr::Expression;
use crate::sql_value::{ArithOp, SqlValue};

pub fn evaluate(fb: &mut FunctionBuilder, e: &Expression, values: &IuValueMap) -> Result<SqlValue, Error> {
    Ok(match e {
        Expression::Cast { child, ty } => evaluate(fb, child, values)?.cast(fb, *ty)?,
        Expression::Not(child) => evaluate(fb, child, values)?.not(fb)?,
        Expression::Arithmetic { op, lhs, rhs, ty } => {
            let l = evaluate(fb, lhs, values)?;
            let r = evaluate(fb, rhs, values)?;
            match op {
                ArithOp::Add => l.add(fb, &r, *ty)?,
                ArithOp::Sub => l.sub(fb, &r, *ty)?,
                ArithOp::Mul => l.mul(fb, &r, *ty)?,
                ArithOp::Div => l.div(fb, &r, *ty)?,
            }
        }
        Expression::Comparison { mode, lhs, rhs } => {
            let l = evaluate(fb, lhs, values)?;
            let r = evaluate(fb, rhs, values)?;
            l.compare(fb, &r, *mode)?
        }
        Expression::And(a, b) => {
            let l = evaluate(fb, a, values)?;
            let r = evaluate(fb, b, values)?;
            l.and(fb, &r)?
        }
        Expression::Or(a, b) => {
            let l = evaluate(fb, a, values)?;
            let r = evaluate(fb, b, values)?;
            l.or(fb, &r)?
        }
        Expression::Identifier(iu) => values.get(iu).cloned().ok_or(Error::MissingValue(*iu))?,
        Expression::Constant { value, ty } => SqlValue::constant(fb, value, *ty)?,
        Expression::NullConstant => SqlValue::Unknown,
    })
}

#[test]
fn test_evaluate_expression() {
    use crate::codegen::ir::IrType;
    use crate::datum::Datum;
    use crate::iu::IuFactory;
    use crate::sql_type::SqlType;
    use crate::sql_value::{eval_to_word, ComparisonMode};

    struct Case {
        expression: Expression,
        expected: u64,
    }
    let mut ius = IuFactory::new();
    let x = ius.value_ref(SqlType::integer());
    let id = Expression::identifier;
    let int = |i| Expression::constant(Datum::Integer(i));
    let cases = vec![
        // x + 2 > 6 with x = 5
        Case {
            expression: Expression::compare(ComparisonMode::Gtr, Expression::add(id(x), int(2)).unwrap(), int(6)).unwrap(),
            expected: 1,
        },
        // NULL = x is not true
        Case {
            expression: Expression::equal(Expression::null(), id(x)).unwrap(),
            expected: 0,
        },
        // x * 1.50 = 7.50
        Case {
            expression: Expression::equal(
                Expression::mul(id(x), Expression::constant(Datum::Numeric(150, 2))).unwrap(),
                Expression::typed_constant(Datum::Numeric(750, 2), SqlType::numeric(13, 2)).unwrap(),
            )
            .unwrap(),
            expected: 1,
        },
        // NOT (x < 1) OR NULL
        Case {
            expression: Expression::or(
                Expression::compare(ComparisonMode::Less, id(x), int(1)).unwrap().not().unwrap(),
                Expression::null(),
            )
            .unwrap(),
            expected: 1,
        },
    ];
    for case in cases {
        let got = eval_to_word(IrType::I1, |fb| {
            let mut values = IuValueMap::new();
            values.insert(x, SqlValue::constant(fb, &Datum::Integer(5), SqlType::integer())?);
            let v = evaluate(fb, &case.expression, &values).map_err(|e| match e {
                Error::Value(v) => v,
                other => crate::sql_value::Error::InvalidOperation(other.to_string()),
            })?;
            v.is_true(fb)
        });
        assert_eq!(got, case.expected, "{}", case.expression);
    }
}
