// ==========================================
// 生产执行控制引擎 - 领域类型定义
// ==========================================
// 职责: 所有实体状态都是封闭枚举，非法字符串在构造时即被拒绝
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 枚举解析失败（未知取值）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized {type_name} value '{value}'")]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
}

/// 生成数据库枚举的样板代码
///
/// 每个枚举获得: as_str / Display / FromStr / ToSql / FromSql
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $label:literal {
            $( $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $variant, )+
        }

        impl $name {
            /// 全部取值
            pub const ALL: &'static [$name] = &[$( $name::$variant, )+];

            /// 转换为数据库存储的字符串
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_uppercase().as_str() {
                    $( $text => Ok($name::$variant), )+
                    _ => Err(UnknownVariant {
                        type_name: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = value.as_str()?;
                raw.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

// ==========================================
// 库存状态 (Inventory State)
// ==========================================
// 终态: CONSUMED / SCRAPPED
db_enum! {
    pub enum InventoryState: "inventory state" {
        Available => "AVAILABLE",
        Reserved => "RESERVED",
        Blocked => "BLOCKED",
        OnHold => "ON_HOLD",
        Consumed => "CONSUMED",
        Scrapped => "SCRAPPED",
    }
}

// ==========================================
// 保留锁状态 (Hold Status)
// ==========================================
db_enum! {
    pub enum HoldStatus: "hold status" {
        Active => "ACTIVE",
        Released => "RELEASED",
    }
}

// ==========================================
// 保留锁实体类型 (Hold Entity Type)
// ==========================================
db_enum! {
    pub enum HoldEntityType: "entity type" {
        Operation => "OPERATION",
        Batch => "BATCH",
        Inventory => "INVENTORY",
        Equipment => "EQUIPMENT",
    }
}

// ==========================================
// 工艺路线类型 (Routing Type)
// ==========================================
db_enum! {
    pub enum RoutingType: "routing type" {
        Sequential => "SEQUENTIAL",
        Parallel => "PARALLEL",
    }
}

// ==========================================
// 工艺路线步骤状态 (Routing Step Status)
// ==========================================
db_enum! {
    pub enum RoutingStepStatus: "routing step status" {
        Ready => "READY",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        OnHold => "ON_HOLD",
    }
}

// ==========================================
// 工序状态 (Operation Status)
// ==========================================
// CONFIRMED 为正常流程终态
db_enum! {
    pub enum OperationStatus: "operation status" {
        NotStarted => "NOT_STARTED",
        Ready => "READY",
        InProgress => "IN_PROGRESS",
        OnHold => "ON_HOLD",
        Blocked => "BLOCKED",
        Confirmed => "CONFIRMED",
    }
}

// ==========================================
// 工艺模板状态 (Process Status)
// ==========================================
db_enum! {
    pub enum ProcessStatus: "process status" {
        Draft => "DRAFT",
        Active => "ACTIVE",
        Inactive => "INACTIVE",
    }
}

// ==========================================
// 设备状态 (Equipment Status)
// ==========================================
db_enum! {
    pub enum EquipmentStatus: "equipment status" {
        Available => "AVAILABLE",
        InUse => "IN_USE",
        Maintenance => "MAINTENANCE",
        OnHold => "ON_HOLD",
        Unavailable => "UNAVAILABLE",
    }
}

// ==========================================
// 序号重置周期 (Reset Period)
// ==========================================
db_enum! {
    pub enum ResetPeriod: "reset period" {
        Never => "NEVER",
        Daily => "DAILY",
        Monthly => "MONTHLY",
        Yearly => "YEARLY",
    }
}

// ==========================================
// 审计动作 (Audit Action)
// ==========================================
db_enum! {
    pub enum AuditAction: "audit action" {
        Create => "CREATE",
        Update => "UPDATE",
        StatusChange => "STATUS_CHANGE",
        Consume => "CONSUME",
        Produce => "PRODUCE",
        Hold => "HOLD",
        Release => "RELEASE",
        Delete => "DELETE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("on_hold".parse::<InventoryState>().unwrap(), InventoryState::OnHold);
        assert_eq!(" Active ".parse::<ProcessStatus>().unwrap(), ProcessStatus::Active);
    }

    #[test]
    fn test_unknown_value_rejected() {
        let err = "WAREHOUSE".parse::<HoldEntityType>().unwrap_err();
        assert_eq!(err.type_name, "entity type");
        assert!(err.to_string().contains("WAREHOUSE"));
    }

    #[test]
    fn test_display_matches_db_string() {
        for state in InventoryState::ALL {
            assert_eq!(state.to_string(), state.as_str());
            assert_eq!(state.as_str().parse::<InventoryState>().unwrap(), *state);
        }
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&OperationStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }
}
