//! LiveKit room access tokens.
//!
//! The core mints short-lived join tokens; room orchestration itself lives
//! in the external agent runtime. Token shape follows the LiveKit access
//! token contract: HS256 over the API secret with `video` grants.

use chrono::{Duration, Utc};
use coziyoo_core::CoreError;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

const TOKEN_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct RoomTokenRequest {
    pub room_name: String,
    pub participant_identity: String,
    pub participant_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VideoGrant {
    room: String,
    #[serde(rename = "roomJoin")]
    room_join: bool,
    #[serde(rename = "canPublish")]
    can_publish: bool,
    #[serde(rename = "canSubscribe")]
    can_subscribe: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LiveKitClaims {
    iss: String,
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    iat: i64,
    exp: i64,
    video: VideoGrant,
}

pub fn mint_room_token(
    api_key: &str,
    api_secret: &str,
    request: &RoomTokenRequest,
) -> Result<String, CoreError> {
    let now = Utc::now();
    let claims = LiveKitClaims {
        iss: api_key.to_string(),
        sub: request.participant_identity.clone(),
        name: request.participant_name.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(TOKEN_TTL_MINUTES)).timestamp(),
        video: VideoGrant {
            room: request.room_name.clone(),
            room_join: true,
            can_publish: true,
            can_subscribe: true,
        },
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(api_secret.as_bytes()),
    )
    .map_err(|e| CoreError::Credential(format!("livekit token encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn token_carries_room_grant_and_identity() {
        let token = mint_room_token(
            "lk_key",
            "lk-secret-0123456789-0123456789-ok",
            &RoomTokenRequest {
                room_name: "order-support-1".into(),
                participant_identity: "buyer-9".into(),
                participant_name: Some("Ayşe".into()),
            },
        )
        .unwrap();

        let decoded = decode::<LiveKitClaims>(
            &token,
            &DecodingKey::from_secret(b"lk-secret-0123456789-0123456789-ok"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.iss, "lk_key");
        assert_eq!(decoded.claims.sub, "buyer-9");
        assert_eq!(decoded.claims.video.room, "order-support-1");
        assert!(decoded.claims.video.room_join);
        assert!(decoded.claims.exp > decoded.claims.iat);
    }
}
