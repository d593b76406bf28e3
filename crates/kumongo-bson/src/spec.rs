//! BSON 规范定义模块
//!
//! 定义 BSON 1.1 二进制格式的元素标记、二进制子类型和限制常量。

/// 单个文档最大大小 (16MB)
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// 最大嵌套深度 (防止栈溢出)
pub const MAX_NESTING_DEPTH: usize = 100;

/// 文档长度前缀 + 结尾 NUL 的最小占用
pub const MIN_DOCUMENT_SIZE: usize = 5;

/// BSON 元素类型标记
///
/// 每个文档元素以 `<标记字节><cstring 键><负载>` 形式编码,
/// 标记字节取值见 BSON 1.1 规范。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// 64 位浮点数
    Double = 0x01,
    /// UTF-8 字符串 (长度前缀 + NUL 结尾)
    String = 0x02,
    /// 嵌套文档
    Document = 0x03,
    /// 数组 (以十进制字符串 "0", "1", ... 为键的文档)
    Array = 0x04,
    /// 二进制数据 (带子类型字节)
    Binary = 0x05,
    /// Undefined (已废弃,仍需往返)
    Undefined = 0x06,
    /// ObjectId (12 字节)
    ObjectId = 0x07,
    /// 布尔值
    Boolean = 0x08,
    /// UTC 日期时间 (int64 毫秒)
    DateTime = 0x09,
    /// Null
    Null = 0x0A,
    /// 正则表达式 (两个 cstring: 模式 + 选项)
    Regex = 0x0B,
    /// DBPointer (已废弃: 命名空间 + 12 字节 ObjectId)
    DbPointer = 0x0C,
    /// JavaScript 代码
    JavaScript = 0x0D,
    /// 带作用域的 JavaScript 代码
    JavaScriptWithScope = 0x0F,
    /// 32 位有符号整数
    Int32 = 0x10,
    /// 内部时间戳 ({increment: i32, timestamp: i32} 位拼接为 int64)
    Timestamp = 0x11,
    /// 64 位有符号整数
    Int64 = 0x12,
    /// MaxKey
    MaxKey = 0x7F,
    /// MinKey
    MinKey = 0xFF,
}

impl ElementType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(ElementType::Double),
            0x02 => Some(ElementType::String),
            0x03 => Some(ElementType::Document),
            0x04 => Some(ElementType::Array),
            0x05 => Some(ElementType::Binary),
            0x06 => Some(ElementType::Undefined),
            0x07 => Some(ElementType::ObjectId),
            0x08 => Some(ElementType::Boolean),
            0x09 => Some(ElementType::DateTime),
            0x0A => Some(ElementType::Null),
            0x0B => Some(ElementType::Regex),
            0x0C => Some(ElementType::DbPointer),
            0x0D => Some(ElementType::JavaScript),
            0x0F => Some(ElementType::JavaScriptWithScope),
            0x10 => Some(ElementType::Int32),
            0x11 => Some(ElementType::Timestamp),
            0x12 => Some(ElementType::Int64),
            0x7F => Some(ElementType::MaxKey),
            0xFF => Some(ElementType::MinKey),
            _ => None,
        }
    }
}

/// 二进制子类型
///
/// Binary 元素负载前的子类型字节。0x80 以上为用户自定义区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySubtype {
    Generic,
    Function,
    BinaryOld,
    UuidOld,
    Uuid,
    Md5,
    UserDefined(u8),
}

impl BinarySubtype {
    pub fn to_u8(self) -> u8 {
        match self {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::BinaryOld => 0x02,
            BinarySubtype::UuidOld => 0x03,
            BinarySubtype::Uuid => 0x04,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::UserDefined(b) => b,
        }
    }

    pub fn from_u8(b: u8) -> Self {
        match b {
            0x00 => BinarySubtype::Generic,
            0x01 => BinarySubtype::Function,
            0x02 => BinarySubtype::BinaryOld,
            0x03 => BinarySubtype::UuidOld,
            0x04 => BinarySubtype::Uuid,
            0x05 => BinarySubtype::Md5,
            b => BinarySubtype::UserDefined(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_roundtrip() {
        for tag in [
            0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0F, 0x10, 0x11, 0x12, 0x7F, 0xFF,
        ] {
            let ty = ElementType::from_u8(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
    }

    #[test]
    fn test_element_type_unknown() {
        assert!(ElementType::from_u8(0x13).is_none());
        assert!(ElementType::from_u8(0x42).is_none());
    }

    #[test]
    fn test_binary_subtype_roundtrip() {
        for b in [0x00u8, 0x01, 0x02, 0x03, 0x04, 0x05, 0x80, 0xAB] {
            assert_eq!(BinarySubtype::from_u8(b).to_u8(), b);
        }
    }
}
