//! Token verification hook for connect messages.
//!
//! The server does not decide on its own who may join a battle. Every
//! connect message carries a token, and the router asks a [`TokenVerifier`]
//! whether that token is acceptable for the claimed player and room.
//!
//! Two verifiers ship with the crate:
//! - [`RoomKeyVerifier`]: the token must equal the room's secret key. This
//!   is the server default.
//! - [`AllowAll`]: accepts everything. Handy for local testing.
//!
//! Deployments that sign tokens elsewhere (JWT, an account service) plug in
//! their own implementation.

use std::future::Future;

use lockstep_protocol::{PlayerId, RoomId};

use crate::SessionError;

/// Everything a verifier gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ConnectClaim<'a> {
    pub player_id: PlayerId,
    pub room_id: RoomId,
    /// Token sent by the client.
    pub token: &'a str,
    /// Secret key generated for the room at creation.
    pub room_key: &'a str,
}

/// Decides whether a connect token is valid.
///
/// Called by the router after it has confirmed that the room exists, is not
/// over, and has the player on its roster.
///
/// # Example
///
/// ```rust
/// use lockstep_session::{ConnectClaim, SessionError, TokenVerifier};
///
/// /// Accepts tokens of the form "<player id>:<room key>".
/// struct PrefixedKey;
///
/// impl TokenVerifier for PrefixedKey {
///     async fn verify(
///         &self,
///         claim: &ConnectClaim<'_>,
///     ) -> Result<(), SessionError> {
///         let expected = format!("{}:{}", claim.player_id.0, claim.room_key);
///         if claim.token == expected {
///             Ok(())
///         } else {
///             Err(SessionError::InvalidToken(claim.player_id, claim.room_id))
///         }
///     }
/// }
/// ```
pub trait TokenVerifier: Send + Sync + 'static {
    /// `Ok(())` admits the player; any error is answered with a token
    /// error code.
    fn verify(
        &self,
        claim: &ConnectClaim<'_>,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Accepts a token only if it equals the room's secret key.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoomKeyVerifier;

impl TokenVerifier for RoomKeyVerifier {
    async fn verify(&self, claim: &ConnectClaim<'_>) -> Result<(), SessionError> {
        if claim.token == claim.room_key {
            Ok(())
        } else {
            Err(SessionError::InvalidToken(claim.player_id, claim.room_id))
        }
    }
}

/// Accepts every token.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl TokenVerifier for AllowAll {
    async fn verify(&self, _claim: &ConnectClaim<'_>) -> Result<(), SessionError> {
        Ok(())
    }
}
