use crate::ast::{CmpOp, Expression};
use kumongo_bson::{doc, Bson, Document};

/// 将谓词表达式编译为 BSON 过滤文档
///
/// # Brief
/// 每个表达式节点编译为过滤文档中的一个键;字段比较编译为
/// `{field: {$op: value}}`,逻辑组合编译为 `{$and|$or|$nor|$not: [...]}`
///
/// # Arguments
/// * `expr` - 谓词表达式
///
/// # Returns
/// 可直接用于 find 的过滤文档
pub fn compile(expr: &Expression) -> Document {
    let mut out = Document::new();
    compile_into(expr, &mut out);
    out
}

/// 将多条顶层谓词编译为同一个过滤文档
///
/// 各条谓词成为文档的兄弟键,保持给定顺序(允许重复键)。
pub fn compile_all(exprs: &[Expression]) -> Document {
    let mut out = Document::new();
    for expr in exprs {
        compile_into(expr, &mut out);
    }
    out
}

fn compile_into(expr: &Expression, out: &mut Document) {
    match expr {
        Expression::Cmp { field, op, value } => {
            let mut inner = Document::new();
            inner.push(op.mongo_operator(), value.clone());
            out.push(field.as_str(), inner);
        }
        Expression::In {
            field,
            values,
            negated,
        } => {
            let operator = if *negated { "$nin" } else { "$in" };
            let mut inner = Document::new();
            inner.push(operator, Bson::Array(values.clone()));
            out.push(field.as_str(), inner);
        }
        Expression::Type { field, types } => {
            let value = if types.len() == 1 {
                Bson::Int32(types[0] as u8 as i32)
            } else {
                Bson::Array(
                    types
                        .iter()
                        .map(|t| Bson::Int32(*t as u8 as i32))
                        .collect(),
                )
            };
            let mut inner = Document::new();
            inner.push("$type", value);
            out.push(field.as_str(), inner);
        }
        Expression::Size { field, size } => {
            out.push(field.as_str(), doc! { "$size": (*size) });
        }
        Expression::All { field, values } => {
            let mut inner = Document::new();
            inner.push("$all", Bson::Array(values.clone()));
            out.push(field.as_str(), inner);
        }
        Expression::Exists { field, exists } => {
            out.push(field.as_str(), doc! { "$exists": (*exists) });
        }
        Expression::Regex {
            field,
            pattern,
            options,
        } => {
            let mut inner = Document::new();
            inner.push("$regex", pattern.as_str());
            inner.push("$options", options.as_str());
            out.push(field.as_str(), inner);
        }
        Expression::Mod {
            field,
            divisor,
            remainder,
        } => {
            let mut inner = Document::new();
            inner.push("$mod", Bson::Array(vec![Bson::Int64(*divisor), Bson::Int64(*remainder)]));
            out.push(field.as_str(), inner);
        }
        Expression::ElemMatch { field, predicate } => {
            let mut inner = Document::new();
            inner.push("$elemMatch", compile(predicate));
            out.push(field.as_str(), inner);
        }
        Expression::And(exprs) => out.push("$and", branches(exprs)),
        Expression::Or(exprs) => out.push("$or", branches(exprs)),
        Expression::Nor(exprs) => out.push("$nor", branches(exprs)),
        Expression::Not(inner) => {
            out.push("$not", Bson::Array(vec![Bson::Document(compile(inner))]));
        }
        Expression::Raw(filter) => {
            for (k, v) in filter.iter() {
                out.push(k, v.clone());
            }
        }
    }
}

fn branches(exprs: &[Expression]) -> Bson {
    Bson::Array(exprs.iter().map(|e| Bson::Document(compile(e))).collect())
}
