// rosbridge_utils/src/message.rs

//! rosbridge v2 协议的操作帧定义。
//!
//! 每一帧都是一个带 `op` 字段的 JSON 对象，`RosbridgeOp` 以 serde 内部标签的方式映射这些对象：
//!
//! | op                 | 方向          | 关键字段                          |
//! |--------------------|---------------|-----------------------------------|
//! | `advertise`        | 客户端 → 桥   | `topic`, `type`                   |
//! | `unadvertise`      | 客户端 → 桥   | `topic`                           |
//! | `publish`          | 客户端 → 桥   | `topic`, `msg`                    |
//! | `call_service`     | 客户端 → 桥   | `id`, `service`, `type`, `args`   |
//! | `service_response` | 桥 → 客户端   | `id`, `service`, `values`, `result` |
//! | `status`           | 桥 → 客户端   | `level`, `msg`                    |
//!
//! `msg` / `args` / `values` 以 `serde_json::Value` 承载，具体结构由 `robot_models` 定义。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WsError;

/// 一条 rosbridge 操作帧。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RosbridgeOp {
    /// 声明将向某话题发布消息。
    Advertise {
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// 撤销话题声明。
    Unadvertise {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// 向话题发布一条消息，无响应。
    Publish {
        topic: String,
        msg: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// 调用服务，桥端以相同 `id` 的 `service_response` 回复。
    CallService {
        service: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        service_type: Option<String>,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// 服务调用的结果。`result == false` 时 `values` 通常是错误描述字符串。
    ServiceResponse {
        service: String,
        #[serde(default)]
        values: Value,
        result: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// 桥端状态/错误通知。
    Status {
        #[serde(default)]
        level: String,
        #[serde(default)]
        msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl RosbridgeOp {
    pub fn advertise(topic: impl Into<String>, msg_type: impl Into<String>) -> Self {
        RosbridgeOp::Advertise {
            topic: topic.into(),
            msg_type: msg_type.into(),
            id: None,
        }
    }

    pub fn unadvertise(topic: impl Into<String>) -> Self {
        RosbridgeOp::Unadvertise {
            topic: topic.into(),
            id: None,
        }
    }

    /// 构造 `publish` 帧，`msg` 须可序列化为 JSON 对象。
    pub fn publish<T: Serialize>(topic: impl Into<String>, msg: &T) -> Result<Self, WsError> {
        let msg = serde_json::to_value(msg)
            .map_err(|e| WsError::SerializationError(format!("publish 消息序列化失败: {}", e)))?;
        Ok(RosbridgeOp::Publish {
            topic: topic.into(),
            msg,
            id: None,
        })
    }

    /// 构造 `call_service` 帧。
    pub fn call_service<T: Serialize>(
        id: impl Into<String>,
        service: impl Into<String>,
        service_type: impl Into<String>,
        args: &T,
    ) -> Result<Self, WsError> {
        let args = serde_json::to_value(args)
            .map_err(|e| WsError::SerializationError(format!("call_service 参数序列化失败: {}", e)))?;
        Ok(RosbridgeOp::CallService {
            service: service.into(),
            service_type: Some(service_type.into()),
            args,
            id: Some(id.into()),
        })
    }

    /// 构造 `service_response` 帧 (模拟端使用)。
    pub fn service_response(id: Option<String>, service: impl Into<String>, values: Value, result: bool) -> Self {
        RosbridgeOp::ServiceResponse {
            service: service.into(),
            values,
            result,
            id,
        }
    }

    /// 帧的 `op` 名称，用于日志。
    pub fn op_name(&self) -> &'static str {
        match self {
            RosbridgeOp::Advertise { .. } => "advertise",
            RosbridgeOp::Unadvertise { .. } => "unadvertise",
            RosbridgeOp::Publish { .. } => "publish",
            RosbridgeOp::CallService { .. } => "call_service",
            RosbridgeOp::ServiceResponse { .. } => "service_response",
            RosbridgeOp::Status { .. } => "status",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            RosbridgeOp::Advertise { id, .. }
            | RosbridgeOp::Unadvertise { id, .. }
            | RosbridgeOp::Publish { id, .. }
            | RosbridgeOp::CallService { id, .. }
            | RosbridgeOp::ServiceResponse { id, .. }
            | RosbridgeOp::Status { id, .. } => id.as_deref(),
        }
    }

    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("{} 帧序列化为JSON失败: {}", self.op_name(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text).map_err(|e| {
            WsError::DeserializationError(format!("无法解析 rosbridge 帧: {}, 原始文本: '{}'", e, text))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_service_matches_rosbridge_layout() {
        let op = RosbridgeOp::call_service(
            "call_service:/stop:3",
            "/stop",
            "web_connect/srv/Stop",
            &json!({"stop_cmd": 1}),
        )
        .unwrap();
        let value: Value = serde_json::from_str(&op.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "op": "call_service",
                "id": "call_service:/stop:3",
                "service": "/stop",
                "type": "web_connect/srv/Stop",
                "args": {"stop_cmd": 1}
            })
        );
    }

    #[test]
    fn advertise_omits_absent_id() {
        let text = RosbridgeOp::advertise("/pump_control", "web_connect/msg/Pump").to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"op": "advertise", "topic": "/pump_control", "type": "web_connect/msg/Pump"})
        );
    }

    #[test]
    fn service_response_parses_with_and_without_values() {
        let op = RosbridgeOp::from_json(
            r#"{"op":"service_response","id":"a1","service":"/stop","values":{"stop_ack":1},"result":true}"#,
        )
        .unwrap();
        assert_eq!(op.id(), Some("a1"));
        match op {
            RosbridgeOp::ServiceResponse { values, result, .. } => {
                assert!(result);
                assert_eq!(values["stop_ack"], 1);
            }
            other => panic!("解析出了错误的帧类型: {:?}", other),
        }

        let op = RosbridgeOp::from_json(r#"{"op":"service_response","service":"/stop","result":false}"#).unwrap();
        assert_eq!(op.id(), None);
        assert_eq!(op.op_name(), "service_response");
    }

    #[test]
    fn unknown_op_is_a_deserialization_error() {
        let err = RosbridgeOp::from_json(r#"{"op":"subscribe","topic":"/x"}"#).unwrap_err();
        assert!(matches!(err, WsError::DeserializationError(_)));
    }
}
