// ==========================================
// 生产执行控制引擎 - 仓储层行映射工具
// ==========================================
// 数量统一以 TEXT 存储，读写时与 Decimal 互转
// ==========================================

use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::Decimal;
use std::str::FromStr;

/// 读取 TEXT 列为 Decimal
pub fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(raw.trim())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 读取可空 TEXT 列为 Option<Decimal>
pub fn get_opt_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Decimal::from_str(s.trim())
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Decimal 转数据库存储字符串 (去掉无意义的尾随零)
pub fn decimal_to_db(value: &Decimal) -> String {
    value.normalize().to_string()
}
