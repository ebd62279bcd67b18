//! Challenge contract: how the core asks the host UI for credentials.
//!
//! Prompting is a suspension point; cancellation is a first-class response
//! and every caller must roll back to its prior state on cancel.

use async_trait::async_trait;
use secrecy::SecretString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Passcode,
    AccountPassword,
}

pub enum ChallengeResponse {
    Value(SecretString),
    Canceled,
}

#[async_trait(?Send)]
pub trait ChallengeResponder {
    async fn prompt(&mut self, challenge: ChallengeType) -> ChallengeResponse;
}
