//! 查询谓词 AST
//!
//! 本模块定义过滤条件的表达式树:
//! - 字段比较 (==, !=, >, <, >=, <=)
//! - 集合成员 (in / notin)
//! - 类型与结构检查 ($type, $size, $all, $exists, $elemMatch)
//! - 逻辑组合 (and / or / nor / not)
//!
//! 表达式树由 `compile` 模块编译为 BSON 过滤文档。

use kumongo_bson::spec::ElementType;
use kumongo_bson::{Bson, Document};

/// 字段比较操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// 等于
    Eq,
    /// 不等于
    Ne,
    /// 大于
    Gt,
    /// 小于
    Lt,
    /// 大于等于
    Gte,
    /// 小于等于
    Lte,
}

impl CmpOp {
    pub fn mongo_operator(self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::Ne => "$ne",
            CmpOp::Gt => "$gt",
            CmpOp::Lt => "$lt",
            CmpOp::Gte => "$gte",
            CmpOp::Lte => "$lte",
        }
    }
}

/// 查询谓词表达式
///
/// 谓词树的每个节点编译为过滤文档中的一个键。
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// 字段与常量比较
    Cmp {
        field: String,
        op: CmpOp,
        value: Bson,
    },
    /// 字段值属于/不属于给定集合
    In {
        field: String,
        values: Vec<Bson>,
        negated: bool,
    },
    /// 字段类型检查
    Type {
        field: String,
        types: Vec<ElementType>,
    },
    /// 数组字段长度检查
    Size { field: String, size: i64 },
    /// 数组字段包含全部给定元素
    All { field: String, values: Vec<Bson> },
    /// 字段存在性检查
    Exists { field: String, exists: bool },
    /// 字段正则匹配
    Regex {
        field: String,
        pattern: String,
        options: String,
    },
    /// 取模检查
    Mod {
        field: String,
        divisor: i64,
        remainder: i64,
    },
    /// 数组元素匹配嵌套谓词
    ElemMatch {
        field: String,
        predicate: Box<Expression>,
    },
    /// 逻辑与
    And(Vec<Expression>),
    /// 逻辑或
    Or(Vec<Expression>),
    /// 逻辑或非
    Nor(Vec<Expression>),
    /// 逻辑非
    Not(Box<Expression>),
    /// 原样并入的过滤文档
    Raw(Document),
}

impl Expression {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::cmp(field, CmpOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::cmp(field, CmpOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::cmp(field, CmpOp::Gt, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::cmp(field, CmpOp::Lt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::cmp(field, CmpOp::Gte, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::cmp(field, CmpOp::Lte, value)
    }

    pub fn cmp(field: impl Into<String>, op: CmpOp, value: impl Into<Bson>) -> Self {
        Expression::Cmp {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Bson>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Expression::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<Bson>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Expression::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_type(field: impl Into<String>, ty: ElementType) -> Self {
        Expression::Type {
            field: field.into(),
            types: vec![ty],
        }
    }

    pub fn is_any_type(field: impl Into<String>, types: Vec<ElementType>) -> Self {
        Expression::Type {
            field: field.into(),
            types,
        }
    }

    pub fn size(field: impl Into<String>, size: i64) -> Self {
        Expression::Size {
            field: field.into(),
            size,
        }
    }

    pub fn all<V: Into<Bson>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Expression::All {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Expression::Exists {
            field: field.into(),
            exists,
        }
    }

    pub fn regex(
        field: impl Into<String>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Expression::Regex {
            field: field.into(),
            pattern: pattern.into(),
            options: options.into(),
        }
    }

    pub fn modulo(field: impl Into<String>, divisor: i64, remainder: i64) -> Self {
        Expression::Mod {
            field: field.into(),
            divisor,
            remainder,
        }
    }

    pub fn elem_match(field: impl Into<String>, predicate: Expression) -> Self {
        Expression::ElemMatch {
            field: field.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn and(exprs: Vec<Expression>) -> Self {
        Expression::And(exprs)
    }

    pub fn or(exprs: Vec<Expression>) -> Self {
        Expression::Or(exprs)
    }

    pub fn nor(exprs: Vec<Expression>) -> Self {
        Expression::Nor(exprs)
    }

    pub fn not(expr: Expression) -> Self {
        Expression::Not(Box::new(expr))
    }

    pub fn raw(filter: Document) -> Self {
        Expression::Raw(filter)
    }
}
