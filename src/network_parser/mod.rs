//! 网络层：HTTP 传输、正文解密与晋江接口客户端。

pub mod api;
pub mod crypto;
pub mod transport;
