//! Compile-time expression evaluation.
//!
//! The code generator folds what it can before spending registers: literal
//! arithmetic, references to declared constants, and comparisons between
//! them. Anything touching memory or a call is not foldable and returns
//! `None`. Shifts and bitwise complement wrap at 32 bits to match what the
//! target machine would compute.

use ahash::AHashMap;

use crate::ast::{BinOp, Dim, Expr, UnaryOp};

/// Resolves an array dimension, looking named dimensions up in the constant
/// table.
pub fn resolve_dim(dim: &Dim, constants: &AHashMap<String, i64>) -> Option<i64> {
    match dim {
        Dim::Lit(value) => Some(*value),
        Dim::Name(name) => constants.get(name).copied(),
    }
}

/// Attempts to evaluate `expr` to an integer at compile time.
pub fn fold_constant(expr: &Expr, constants: &AHashMap<String, i64>) -> Option<i64> {
    match expr {
        Expr::Number(value) => Some(*value),
        Expr::Var(name) => constants.get(name).copied(),
        Expr::Unary { op, operand } => {
            let value = fold_constant(operand, constants)?;
            match op {
                UnaryOp::Neg => Some(-value),
                UnaryOp::Not => Some(i64::from(value == 0)),
                UnaryOp::BitNot => Some(!value & 0xFFFF_FFFF),
                UnaryOp::AddrOf | UnaryOp::Deref => None,
            }
        }
        Expr::Binary { op, left, right } => {
            let l = fold_constant(left, constants)?;
            let r = fold_constant(right, constants)?;
            match op {
                BinOp::Add => Some(l.wrapping_add(r)),
                BinOp::Sub => Some(l.wrapping_sub(r)),
                BinOp::Mul => Some(l.wrapping_mul(r)),
                BinOp::Div => (r != 0).then(|| l.wrapping_div(r)),
                BinOp::Mod => (r != 0).then(|| l.wrapping_rem(r)),
                BinOp::BitAnd => Some(l & r),
                BinOp::BitOr => Some(l | r),
                BinOp::BitXor => Some(l ^ r),
                BinOp::Shl => Some((l << (r & 31)) & 0xFFFF_FFFF),
                BinOp::Shr => Some(l >> (r & 31)),
                BinOp::Eq => Some(i64::from(l == r)),
                BinOp::Ne => Some(i64::from(l != r)),
                BinOp::Lt => Some(i64::from(l < r)),
                BinOp::Le => Some(i64::from(l <= r)),
                BinOp::Gt => Some(i64::from(l > r)),
                BinOp::Ge => Some(i64::from(l >= r)),
                BinOp::LogicalAnd => Some(i64::from(l != 0 && r != 0)),
                BinOp::LogicalOr => Some(i64::from(l != 0 || r != 0)),
            }
        }
        _ => None,
    }
}

/// True when `value` is a positive power of two; such divisors lower to
/// arithmetic shifts.
pub fn power_of_two_shift(value: i64) -> Option<u32> {
    if value > 0 && (value & (value - 1)) == 0 {
        Some(value.trailing_zeros())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn consts() -> AHashMap<String, i64> {
        let mut map = AHashMap::new();
        map.insert("N".to_owned(), 8);
        map
    }

    fn bin(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn folds_literal_arithmetic() {
        let expr = bin(BinOp::Add, Expr::Number(1), Expr::Number(2));
        assert_eq!(fold_constant(&expr, &consts()), Some(3));
    }

    #[test]
    fn folds_through_named_constants() {
        let expr = bin(BinOp::Mul, Expr::Var("N".to_owned()), Expr::Number(4));
        assert_eq!(fold_constant(&expr, &consts()), Some(32));
    }

    #[test]
    fn division_by_zero_does_not_fold() {
        let expr = bin(BinOp::Div, Expr::Number(10), Expr::Number(0));
        assert_eq!(fold_constant(&expr, &consts()), None);
    }

    #[test]
    fn unknown_names_do_not_fold() {
        assert_eq!(fold_constant(&Expr::Var("mystery".to_owned()), &consts()), None);
    }

    #[test]
    fn bitwise_not_wraps_at_32_bits() {
        let expr = Expr::Unary {
            op: UnaryOp::BitNot,
            operand: Box::new(Expr::Number(0)),
        };
        assert_eq!(fold_constant(&expr, &consts()), Some(0xFFFF_FFFF));
    }

    #[test]
    fn power_of_two_detection() {
        assert_eq!(power_of_two_shift(1), Some(0));
        assert_eq!(power_of_two_shift(8), Some(3));
        assert_eq!(power_of_two_shift(6), None);
        assert_eq!(power_of_two_shift(0), None);
        assert_eq!(power_of_two_shift(-4), None);
    }

    #[test]
    fn dims_resolve_through_constants() {
        assert_eq!(resolve_dim(&Dim::Lit(5), &consts()), Some(5));
        assert_eq!(resolve_dim(&Dim::Name("N".to_owned()), &consts()), Some(8));
        assert_eq!(resolve_dim(&Dim::Name("missing".to_owned()), &consts()), None);
    }
}
