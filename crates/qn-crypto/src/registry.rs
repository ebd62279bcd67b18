//! Operator registry: version → operator dispatch with memoized instances.

use std::collections::HashMap;

use qn_core::config::CryptoConfig;
use qn_core::{ProtocolVersion, QnResult};

use crate::operator::ProtocolOperator;
use crate::v001::V001Operator;
use crate::v002::V002Operator;
use crate::v003::V003Operator;
use crate::v004::{Argon2Costs, V004Operator};

pub struct OperatorRegistry {
    crypto_config: CryptoConfig,
    memo: HashMap<ProtocolVersion, Box<dyn ProtocolOperator>>,
}

impl OperatorRegistry {
    pub fn new(crypto_config: CryptoConfig) -> Self {
        Self {
            crypto_config,
            memo: HashMap::new(),
        }
    }

    pub fn operator_for(&mut self, version: ProtocolVersion) -> QnResult<&dyn ProtocolOperator> {
        let entry = self.memo.entry(version).or_insert_with(|| match version {
            ProtocolVersion::V001 => Box::new(V001Operator),
            ProtocolVersion::V002 => Box::new(V002Operator),
            ProtocolVersion::V003 => Box::new(V003Operator),
            ProtocolVersion::V004 => Box::new(V004Operator::new(Argon2Costs {
                mem_cost_kib: self.crypto_config.argon2_mem_cost_kib,
                time_cost: self.crypto_config.argon2_time_cost,
            })),
        });
        Ok(&**entry)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new(CryptoConfig::default())
    }
}
