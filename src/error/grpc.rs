//! gRPC 错误处理
//!
//! 提供 gRPC 状态与 DiscoveryError 之间的转换

use tonic::{Code, Status};

use super::DiscoveryError;

impl From<DiscoveryError> for Status {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Status(status) => status,
            DiscoveryError::Cancelled => Status::cancelled("operation cancelled"),
            DiscoveryError::NotSupported => Status::unimplemented(err.to_string()),
            DiscoveryError::InvalidIdentity(_) | DiscoveryError::InvalidDialOption { .. } => {
                Status::invalid_argument(err.to_string())
            }
            DiscoveryError::Transport(_) | DiscoveryError::StreamClosed => {
                Status::unavailable(err.to_string())
            }
            other => Status::internal(other.to_string()),
        }
    }
}

/// 判断 gRPC 状态是否表示远端未实现该接口
pub fn is_unimplemented(status: &Status) -> bool {
    status.code() == Code::Unimplemented
}
