//! 应用标识

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proto;

/// 标识校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error(
        "invalid name {0:?}, names must be non-empty, printable UTF-8 strings with no whitespace"
    )]
    InvalidName(String),

    #[error(
        "invalid key {0:?}, keys must be non-empty, printable UTF-8 strings with no whitespace"
    )]
    InvalidKey(String),
}

/// 应用标识
///
/// 由名称和键组成，只能通过 [`Identity::new`] 构造，因此总是合法的。
/// 相等性按逻辑值比较（名称和键都相同）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity", into = "RawIdentity")]
pub struct Identity {
    name: String,
    key: String,
}

impl Identity {
    /// 创建并校验标识
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        let key = key.into();

        if !is_valid_token(&name) {
            return Err(IdentityError::InvalidName(name));
        }
        if !is_valid_token(&key) {
            return Err(IdentityError::InvalidKey(key));
        }

        Ok(Self { name, key })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.key)
    }
}

impl TryFrom<proto::Identity> for Identity {
    type Error = IdentityError;

    fn try_from(value: proto::Identity) -> Result<Self, Self::Error> {
        Identity::new(value.name, value.key)
    }
}

impl From<&Identity> for proto::Identity {
    fn from(value: &Identity) -> Self {
        proto::Identity {
            name: value.name.clone(),
            key: value.key.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawIdentity {
    name: String,
    key: String,
}

impl TryFrom<RawIdentity> for Identity {
    type Error = IdentityError;

    fn try_from(value: RawIdentity) -> Result<Self, Self::Error> {
        Identity::new(value.name, value.key)
    }
}

impl From<Identity> for RawIdentity {
    fn from(value: Identity) -> Self {
        RawIdentity {
            name: value.name,
            key: value.key,
        }
    }
}

fn is_valid_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| !c.is_whitespace() && !c.is_control())
}
