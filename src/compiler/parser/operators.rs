//! Operator kinds and precedence used by the expression parser, plus the
//! mapping onto bytecode math ops.

use crate::bytecode::instructions::{MathOp, UnaryMathOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    /// `a.b`
    Attribute,
    /// `a[b]`
    Index,
    Power,
    Multiply,
    Divide,
    Modulo,
    Add,
    Subtract,
    CmpEqual,
    CmpNotEqual,
    CmpLarger,
    CmpSmaller,
    CmpLargerOrEqual,
    CmpSmallerOrEqual,
    BoolAnd,
    BoolOr,
}

impl BinOpKind {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinOpKind::Attribute | BinOpKind::Index => 10,
            BinOpKind::Power => 9,
            BinOpKind::Multiply | BinOpKind::Divide | BinOpKind::Modulo => 8,
            BinOpKind::Add | BinOpKind::Subtract => 7,
            BinOpKind::CmpEqual
            | BinOpKind::CmpNotEqual
            | BinOpKind::CmpLarger
            | BinOpKind::CmpSmaller
            | BinOpKind::CmpLargerOrEqual
            | BinOpKind::CmpSmallerOrEqual => 5,
            BinOpKind::BoolAnd => 3,
            BinOpKind::BoolOr => 2,
        }
    }

    pub fn right_associative(self) -> bool {
        self == BinOpKind::Power
    }

    pub fn to_math_op(self) -> Option<MathOp> {
        Some(match self {
            BinOpKind::Attribute => return None,
            BinOpKind::Index => MathOp::IndexByExpr,
            BinOpKind::Power => MathOp::Power,
            BinOpKind::Multiply => MathOp::Multiply,
            BinOpKind::Divide => MathOp::Divide,
            BinOpKind::Modulo => MathOp::Modulo,
            BinOpKind::Add => MathOp::Add,
            BinOpKind::Subtract => MathOp::Subtract,
            BinOpKind::CmpEqual => MathOp::CmpEqual,
            BinOpKind::CmpNotEqual => MathOp::CmpNotEqual,
            BinOpKind::CmpLarger => MathOp::CmpLarger,
            BinOpKind::CmpSmaller => MathOp::CmpSmaller,
            BinOpKind::CmpLargerOrEqual => MathOp::CmpLargerOrEqual,
            BinOpKind::CmpSmallerOrEqual => MathOp::CmpSmallerOrEqual,
            BinOpKind::BoolAnd => MathOp::BoolAnd,
            BinOpKind::BoolOr => MathOp::BoolOr,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Negate,
    Not,
    New,
    Await,
}

impl UnaryOpKind {
    pub fn to_math_op(self) -> Option<UnaryMathOp> {
        match self {
            UnaryOpKind::Negate => Some(UnaryMathOp::Negate),
            UnaryOpKind::Not => Some(UnaryMathOp::BoolNot),
            UnaryOpKind::New | UnaryOpKind::Await => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOpKind {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
}

impl AssignOpKind {
    /// The arithmetic a compound assignment performs before storing.
    pub fn to_math_op(self) -> Option<MathOp> {
        match self {
            AssignOpKind::Assign => None,
            AssignOpKind::AddAssign => Some(MathOp::Add),
            AssignOpKind::SubtractAssign => Some(MathOp::Subtract),
            AssignOpKind::MultiplyAssign => Some(MathOp::Multiply),
            AssignOpKind::DivideAssign => Some(MathOp::Divide),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_binds_tighter_than_arithmetic() {
        assert!(BinOpKind::Attribute.precedence() > BinOpKind::Multiply.precedence());
        assert!(BinOpKind::Multiply.precedence() > BinOpKind::Add.precedence());
        assert!(BinOpKind::Add.precedence() > BinOpKind::CmpEqual.precedence());
        assert!(BinOpKind::CmpEqual.precedence() > BinOpKind::BoolAnd.precedence());
        assert!(BinOpKind::BoolAnd.precedence() > BinOpKind::BoolOr.precedence());
    }

    #[test]
    fn compound_assign_maps_to_math() {
        assert_eq!(AssignOpKind::AddAssign.to_math_op(), Some(MathOp::Add));
        assert_eq!(AssignOpKind::Assign.to_math_op(), None);
    }
}
