//! KuMongo 查询构建模块
//!
//! 本模块实现谓词 DSL 到 BSON 过滤文档的编译:
//! - 表达式 AST (比较、成员、类型、长度、逻辑组合)
//! - 编译器 (`compile` / `compile_all`)
//!
//! 构建出的过滤文档直接交给 `Collection::find` 使用:
//!
//! ```rust,ignore
//! use kumongo_query::{compile, Expression};
//!
//! let filter = compile(&Expression::and(vec![
//!     Expression::eq("label", "l"),
//!     Expression::gt("iter", 2),
//! ]));
//! ```

pub mod ast;
pub mod compile;

pub use ast::{CmpOp, Expression};
pub use compile::{compile, compile_all};
