//! Login handshake state machine.
//!
//! `Unauthenticated -> Step1Done -> {Step2Done | NeedsTwoFactor} -> Authenticated`.
//! Any state may fall back to `Unauthenticated`; everything else is rejected.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    Step1Done,
    Step2Done,
    NeedsTwoFactor,
    Authenticated,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid login transition {from:?} -> {to:?}")]
pub struct LoginStateError {
    pub from: LoginState,
    pub to: LoginState,
}

impl LoginState {
    pub fn transition(self, next: LoginState) -> Result<LoginState, LoginStateError> {
        use LoginState::*;
        let allowed = matches!(
            (self, next),
            (_, Unauthenticated)
                | (Unauthenticated, Step1Done)
                | (Step1Done, Step2Done)
                | (Step1Done, NeedsTwoFactor)
                | (Step2Done, Authenticated)
        );
        if allowed {
            Ok(next)
        } else {
            Err(LoginStateError {
                from: self,
                to: next,
            })
        }
    }
}
