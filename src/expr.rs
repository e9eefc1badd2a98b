//! Defines `Expression`, the scalar expressions used in predicates, computed columns and aggregate arguments.
//!
//! Expressions are typed when they are built. The constructors infer the result type from the operands and
//! wrap an operand in an implicit `Cast` when its type differs from the one the operation works in, so
//! evaluation never has to decide about types.  Combining operands of incompatible types fails right there,
//! long before any code is generated.

use enum_as_inner::EnumAsInner;

use crate::datum::{self, Datum};
use crate::iu::{IuRef, IuSet};
use crate::sql_type::{self, SqlType, SqlTypeKind};
use crate::sql_value::{ArithOp, ComparisonMode};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Type(#[from] sql_type::Error),
    #[error(transparent)]
    Datum(#[from] datum::Error),
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Expression {
    Cast {
        child: Box<Expression>,
        ty: SqlType,
    },
    Not(Box<Expression>),
    Arithmetic {
        op: ArithOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        ty: SqlType,
    },
    Comparison {
        mode: ComparisonMode,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Identifier(IuRef),
    /// a literal; `value` has already been converted to `ty`.
    Constant {
        value: Datum,
        ty: SqlType,
    },
    NullConstant,
}

fn expect_bool(e: &Expression, op: &'static str) -> Result<(), Error> {
    match e.ty().kind {
        SqlTypeKind::Bool | SqlTypeKind::Unknown => Ok(()),
        _ => Err(Error::Type(sql_type::Error::InvalidOperand { op, ty: e.ty() })),
    }
}

/// wraps `e` in a cast to the shape of `target` unless it already has it. NULL literals are left alone.
fn implicit_cast(e: Expression, target: SqlType) -> Expression {
    let ty = e.ty();
    if ty.is_unknown() || ty.kind == target.kind {
        return e;
    }
    Expression::Cast {
        child: Box::new(e),
        ty: target.with_nullable(ty.nullable),
    }
}

// Multiplication and division work on the operands' own precisions; only integers need widening there.
fn widen_integer(e: Expression, result: SqlType) -> Expression {
    if result.is_numeric() && e.ty().kind == SqlTypeKind::Integer {
        return implicit_cast(e, SqlType::numeric(10, 0));
    }
    e
}

impl Expression {
    pub fn identifier(iu: IuRef) -> Expression {
        Expression::Identifier(iu)
    }

    /// a literal of the value's own type.
    pub fn constant(value: Datum) -> Expression {
        if value.is_null() {
            return Expression::NullConstant;
        }
        let ty = value.natural_type();
        Expression::Constant { value, ty }
    }

    /// a literal converted to `ty`.
    pub fn typed_constant(value: Datum, ty: SqlType) -> Result<Expression, Error> {
        if value.is_null() {
            return Ok(Expression::NullConstant);
        }
        let value = value.coerce(ty.as_not_nullable())?;
        Ok(Expression::Constant {
            value,
            ty: ty.as_not_nullable(),
        })
    }

    pub fn null() -> Expression {
        Expression::NullConstant
    }

    pub fn cast(self, ty: SqlType) -> Expression {
        Expression::Cast {
            child: Box::new(self),
            ty,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Result<Expression, Error> {
        expect_bool(&self, "not")?;
        Ok(Expression::Not(Box::new(self)))
    }

    fn arithmetic(op: ArithOp, lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        let (l, r) = (lhs.ty(), rhs.ty());
        let ty = match op {
            ArithOp::Add => sql_type::infer_add_ty(l, r)?,
            ArithOp::Sub => sql_type::infer_sub_ty(l, r)?,
            ArithOp::Mul => sql_type::infer_mul_ty(l, r)?,
            ArithOp::Div => sql_type::infer_div_ty(l, r)?,
        };
        let (lhs, rhs) = match op {
            ArithOp::Add | ArithOp::Sub => (implicit_cast(lhs, ty), implicit_cast(rhs, ty)),
            ArithOp::Mul | ArithOp::Div => (widen_integer(lhs, ty), widen_integer(rhs, ty)),
        };
        Ok(Expression::Arithmetic {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        })
    }

    pub fn add(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::arithmetic(ArithOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::arithmetic(ArithOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::arithmetic(ArithOp::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::arithmetic(ArithOp::Div, lhs, rhs)
    }

    pub fn compare(mode: ComparisonMode, lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        sql_type::infer_compare_ty(lhs.ty(), rhs.ty())?;
        Ok(Expression::Comparison {
            mode,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn equal(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        Expression::compare(ComparisonMode::Eq, lhs, rhs)
    }

    pub fn and(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        expect_bool(&lhs, "and")?;
        expect_bool(&rhs, "and")?;
        Ok(Expression::And(Box::new(lhs), Box::new(rhs)))
    }

    pub fn or(lhs: Expression, rhs: Expression) -> Result<Expression, Error> {
        expect_bool(&lhs, "or")?;
        expect_bool(&rhs, "or")?;
        Ok(Expression::Or(Box::new(lhs), Box::new(rhs)))
    }

    pub fn ty(&self) -> SqlType {
        match self {
            Expression::Cast { ty, .. } => *ty,
            Expression::Not(e) => SqlType::bool().with_nullable(e.ty().nullable),
            Expression::Arithmetic { ty, .. } => *ty,
            Expression::Comparison { lhs, rhs, .. } | Expression::And(lhs, rhs) | Expression::Or(lhs, rhs) => {
                SqlType::bool().with_nullable(lhs.ty().nullable || rhs.ty().nullable)
            }
            Expression::Identifier(iu) => iu.ty(),
            Expression::Constant { ty, .. } => *ty,
            Expression::NullConstant => SqlType::unknown(),
        }
    }

    /// every IU the expression reads.
    pub fn ius(&self) -> IuSet {
        let mut set = IuSet::new();
        self.collect_ius(&mut set);
        set
    }

    fn collect_ius(&self, set: &mut IuSet) {
        match self {
            Expression::Cast { child, .. } | Expression::Not(child) => child.collect_ius(set),
            Expression::Arithmetic { lhs, rhs, .. }
            | Expression::Comparison { lhs, rhs, .. }
            | Expression::And(lhs, rhs)
            | Expression::Or(lhs, rhs) => {
                lhs.collect_ius(set);
                rhs.collect_ius(set);
            }
            Expression::Identifier(iu) => {
                set.insert(*iu);
            }
            Expression::Constant { .. } | Expression::NullConstant => {}
        }
    }

    /// the pairs `(left, right)` of a conjunction of equalities, or `None` if the expression is anything else.
    pub fn equality_pairs(&self) -> Option<Vec<(&Expression, &Expression)>> {
        match self {
            Expression::Comparison {
                mode: ComparisonMode::Eq,
                lhs,
                rhs,
            } => Some(vec![(lhs.as_ref(), rhs.as_ref())]),
            Expression::And(a, b) => {
                let mut pairs = a.equality_pairs()?;
                pairs.extend(b.equality_pairs()?);
                Some(pairs)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Cast { child, ty } => write!(f, "CAST({} AS {})", child, ty),
            Expression::Not(e) => write!(f, "NOT {}", e),
            Expression::Arithmetic { op, lhs, rhs, .. } => write!(f, "({} {} {})", lhs, op, rhs),
            Expression::Comparison { mode, lhs, rhs } => write!(f, "({} {} {})", lhs, mode, rhs),
            Expression::And(a, b) => write!(f, "({} AND {})", a, b),
            Expression::Or(a, b) => write!(f, "({} OR {})", a, b),
            Expression::Identifier(iu) => iu.fmt(f),
            Expression::Constant { value, ty } if ty.is_string() => write!(f, "'{}'", value),
            Expression::Constant { value, .. } => value.fmt(f),
            Expression::NullConstant => "NULL".fmt(f),
        }
    }
}

#[cfg(test)]
fn test_iu(ty: SqlType) -> IuRef {
    let mut factory = crate::iu::IuFactory::new();
    factory.value_ref(ty)
}

#[test]
fn test_arithmetic_inserts_casts() {
    struct Case {
        lhs: Expression,
        rhs: Expression,
        op: ArithOp,
        ty: SqlType,
        lhs_cast: Option<SqlType>,
    }
    let int = || Expression::constant(Datum::Integer(2));
    let num = || Expression::constant(Datum::Numeric(150, 2));
    let cases = vec![
        Case { lhs: int(), rhs: int(), op: ArithOp::Add, ty: SqlType::integer(), lhs_cast: None },
        Case { lhs: int(), rhs: num(), op: ArithOp::Add, ty: SqlType::numeric(3, 2), lhs_cast: Some(SqlType::numeric(3, 2)) },
        Case { lhs: int(), rhs: num(), op: ArithOp::Mul, ty: SqlType::numeric(13, 2), lhs_cast: Some(SqlType::numeric(10, 0)) },
        Case { lhs: num(), rhs: Expression::null(), op: ArithOp::Sub, ty: SqlType::numeric(3, 2).as_nullable(), lhs_cast: None },
    ];
    for case in cases {
        let e = Expression::arithmetic(case.op, case.lhs, case.rhs).unwrap();
        assert_eq!(e.ty(), case.ty, "{}", e);
        let (_, lhs, _, _) = e.as_arithmetic().unwrap();
        assert_eq!(lhs.as_cast().map(|(_, ty)| *ty), case.lhs_cast, "{}", e);
    }
}

#[test]
fn test_incompatible_operands_fail_at_construction() {
    let s = Expression::constant(Datum::Varchar("a".to_string()));
    let i = Expression::constant(Datum::Integer(1));
    assert!(matches!(
        Expression::add(s.clone(), i.clone()),
        Err(Error::Type(sql_type::Error::IncompatibleTypes { op: "add", .. }))
    ));
    assert!(Expression::equal(s.clone(), i.clone()).is_err());
    assert!(Expression::and(i.clone(), i.clone()).is_err());
    assert!(i.not().is_err());
    let e = Expression::equal(s.clone(), Expression::constant(Datum::Varchar("abc".to_string()))).unwrap();
    assert_eq!(e.ty(), SqlType::bool());
    assert_eq!(e.to_string(), "('a' = 'abc')");
}

#[test]
fn test_ius_and_equality_pairs() {
    let a = test_iu(SqlType::integer());
    let e = Expression::and(
        Expression::equal(Expression::identifier(a), Expression::constant(Datum::Integer(1))).unwrap(),
        Expression::equal(Expression::identifier(a), Expression::constant(Datum::Integer(2))).unwrap(),
    )
    .unwrap();
    assert_eq!(e.ius().into_iter().collect::<Vec<_>>(), vec![a]);
    assert_eq!(e.equality_pairs().map(|p| p.len()), Some(2));
    let lt = Expression::compare(
        ComparisonMode::Less,
        Expression::identifier(a),
        Expression::constant(Datum::Integer(1)),
    )
    .unwrap();
    assert!(lt.equality_pairs().is_none());
}
