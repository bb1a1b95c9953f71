use rosbridge_utils::WsError;
use thiserror::Error;

/// 模拟端的错误类型。
#[derive(Error, Debug)]
pub enum SimError {
    #[error("监听地址 '{addr}' 绑定失败: {source}")]
    Bind {
        addr: String,
        #[source]
        source: WsError,
    },

    #[error("rosbridge 传输错误: {0}")]
    Transport(#[from] WsError),
}
