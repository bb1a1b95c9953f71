// rosbridge_utils/src/client/mod.rs

//! rosbridge 客户端模块：地址校验、连接建立与操作帧发送。

pub mod transport;
